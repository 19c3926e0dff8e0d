//! Tabula - Type Definitions
//!
//! Shared types for the conversational data-analysis agent:
//! conversation messages, tool calls, tabular data, and the
//! collaborator traits the control loop consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

// ---- Conversation ---------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// Correlation id on tool-result messages; matches the id of the
    /// request that produced this result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A model-issued request to execute a named tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    /// Correlation id, unique within the turn.
    pub id: String,
    pub name: String,
    /// Raw JSON argument object, exactly as the model produced it.
    pub arguments: String,
}

// ---- Model Gateway --------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: String,
}

/// Tool description in the wire shape the chat-completions API expects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub def_type: String,
    pub function: ToolDefinitionFunction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinitionFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The language-model backend. One call per loop iteration; the response
/// either answers in natural language or requests tool executions.
/// Nothing about determinism is assumed: the same question may yield a
/// different tool-call sequence on another run.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> anyhow::Result<ModelResponse>;
}

// ---- Tabular data ---------------------------------------------------------

/// A single table cell. Numbers and booleans keep their type across the
/// JSON boundary; everything else is text.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Numeric view, used by aggregation and the stats helpers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Text(s) => s.trim().parse::<f64>().ok(),
            Cell::Null => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Bool(b) => b.to_string(),
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => v.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Null => serializer.serialize_none(),
            Cell::Bool(b) => serializer.serialize_bool(*b),
            Cell::Int(v) => serializer.serialize_i64(*v),
            Cell::Float(v) => serializer.serialize_f64(*v),
            Cell::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Cell {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Cell::from(&value))
    }
}

impl From<&serde_json::Value> for Cell {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(b) => Cell::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Int(i)
                } else {
                    Cell::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

/// Headers + rows, the shape every data-producing tool returns and the
/// HTTP layer serializes back to the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TabularResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl TabularResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Column metadata returned by the remote gateway's schema endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_key: bool,
}

// ---- Control loop result --------------------------------------------------

/// What one `invoke` returns to the HTTP layer.
#[derive(Clone, Debug, Serialize)]
pub struct AnswerResult {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TabularResult>,
}

/// Which data source the session is talking to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Code,
    Sql,
}

// ---- Remote query gateway -------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectCredentials {
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

/// A query either produces rows or a scalar status message
/// ("3 rows affected" style).
#[derive(Clone, Debug)]
pub enum QueryOutcome {
    Rows(TabularResult),
    Message(String),
}

/// The remote database gateway. Token-based: the client holds an opaque
/// credential token and retries auth failures internally (exactly one
/// reconnect per call); callers treat every call as succeed-or-fail.
#[async_trait]
pub trait QueryGateway: Send + Sync {
    async fn connect(&self, creds: &ConnectCredentials) -> Result<String, GatewayError>;
    async fn list_tables(&self) -> Result<Vec<String>, GatewayError>;
    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>, GatewayError>;
    async fn execute_query(&self, query: &str) -> Result<QueryOutcome, GatewayError>;
    async fn get_preview(&self, table: &str, limit: usize) -> Result<TabularResult, GatewayError>;
    async fn refresh_tables(&self) -> Result<Vec<String>, GatewayError>;
    async fn disconnect(&self) -> Result<(), GatewayError>;
}

// ---- Code execution sandbox -----------------------------------------------

#[derive(Clone, Debug)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs model-authored code against the active table in an isolated OS
/// process. The table is materialized into the sandbox working directory
/// and bound to a fixed variable name; the process gets a wall-clock
/// timeout and a confined working directory.
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn run(
        &self,
        code: &str,
        table: &crate::table::DataTable,
    ) -> anyhow::Result<SandboxOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_as_f64_parses_numeric_text() {
        assert_eq!(Cell::Text(" 3.5 ".into()).as_f64(), Some(3.5));
        assert_eq!(Cell::Int(2).as_f64(), Some(2.0));
        assert_eq!(Cell::Null.as_f64(), None);
        assert_eq!(Cell::Text("n/a".into()).as_f64(), None);
    }

    #[test]
    fn cell_serializes_like_json_scalars() {
        let row = vec![
            Cell::Null,
            Cell::Bool(true),
            Cell::Int(7),
            Cell::Text("x".into()),
        ];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"[null,true,7,"x"]"#);
    }

    #[test]
    fn tool_result_message_carries_correlation_id() {
        let msg = ChatMessage::tool_result("call_1", "ok");
        assert_eq!(msg.role, ChatRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }
}
