//! The Control Loop
//!
//! One invocation answers one question: compose the prompt, call the
//! model, dispatch any requested tools, feed results back, repeat until
//! the model answers in plain text or the model-call ceiling is hit.
//! An explicit phase enum drives the loop; there is no graph machinery.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::TabulaConfig;
use crate::session::SessionContext;
use crate::types::{AnswerResult, CodeSandbox, ModelGateway, QueryGateway};

use super::system_prompt::{
    compose_system_prompt, CRITICAL_FAILURE_FALLBACK, ITERATION_LIMIT_FALLBACK,
};
use super::tools::{
    create_tools, execute_tool, tools_for_mode, tools_to_wire_format, ToolContext, ToolSpec,
};

/// Loop phase. `Compose` runs once per invocation; the loop then
/// alternates `CallModel`/`DispatchTools` until `Done`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Compose,
    CallModel,
    DispatchTools,
    Done,
}

pub struct Agent {
    config: TabulaConfig,
    model: Arc<dyn ModelGateway>,
    gateway: Arc<dyn QueryGateway>,
    sandbox: Arc<dyn CodeSandbox>,
    tools: Vec<ToolSpec>,
}

impl Agent {
    pub fn new(
        config: TabulaConfig,
        model: Arc<dyn ModelGateway>,
        gateway: Arc<dyn QueryGateway>,
        sandbox: Arc<dyn CodeSandbox>,
    ) -> Self {
        Self {
            config,
            model,
            gateway,
            sandbox,
            tools: create_tools(),
        }
    }

    /// Answer one question within the given session. Never fails: any
    /// unhandled error is logged and converted to a fixed fallback
    /// answer; the session state survives either way.
    pub async fn invoke(&self, session: &mut SessionContext, question: &str) -> AnswerResult {
        session.pending_chart = None;
        session.pending_table = None;

        let text = match self.run_loop(session, question).await {
            Ok(text) => text,
            Err(err) => {
                error!(error = %format!("{err:#}"), "invocation failed");
                CRITICAL_FAILURE_FALLBACK.to_string()
            }
        };

        AnswerResult {
            text,
            chart: session.pending_chart.take(),
            table: session.pending_table.take(),
        }
    }

    async fn run_loop(&self, session: &mut SessionContext, question: &str) -> Result<String> {
        let exposed = tools_for_mode(&self.tools, session.mode);
        let wire_tools = tools_to_wire_format(&exposed);

        let mut phase = Phase::Compose;
        let mut model_calls: u32 = 0;
        let mut pending_calls = Vec::new();
        let mut answer = String::new();

        loop {
            match phase {
                Phase::Compose => {
                    let system_prompt = compose_system_prompt(session, &self.config);
                    session.thread.push_system(system_prompt);
                    session.thread.push_user(question);
                    phase = Phase::CallModel;
                }

                Phase::CallModel => {
                    if model_calls >= self.config.max_model_calls {
                        warn!(
                            limit = self.config.max_model_calls,
                            "model-call ceiling reached"
                        );
                        answer = ITERATION_LIMIT_FALLBACK.to_string();
                        phase = Phase::Done;
                        continue;
                    }
                    model_calls += 1;

                    let response = self.model.chat(&session.thread.messages, &wire_tools).await?;
                    session
                        .thread
                        .push_assistant(response.content.clone(), response.tool_calls.clone());

                    if response.tool_calls.is_empty() {
                        answer = response.content;
                        phase = Phase::Done;
                    } else {
                        pending_calls = response.tool_calls;
                        phase = Phase::DispatchTools;
                    }
                }

                Phase::DispatchTools => {
                    for call in pending_calls.drain(..) {
                        let args: Value =
                            serde_json::from_str(&call.arguments).unwrap_or_default();
                        info!(tool = %call.name, "dispatching tool call");

                        let mut ctx = ToolContext {
                            config: &self.config,
                            gateway: self.gateway.as_ref(),
                            sandbox: self.sandbox.as_ref(),
                            session,
                        };
                        let mut outcome =
                            execute_tool(&call.name, &args, &self.tools, &mut ctx).await;
                        // Correlate the result with the model's call id.
                        outcome.id = call.id.clone();

                        if let Some(ref err) = outcome.error {
                            warn!(tool = %call.name, error = %err, "tool call failed");
                        }
                        session
                            .thread
                            .push_tool_result(outcome.id.clone(), outcome.feedback_text());
                    }
                    phase = Phase::CallModel;
                }

                Phase::Done => break,
            }
        }

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::GatewayError;
    use crate::table::DataTable;
    use crate::types::{
        AgentMode, Cell, ChatMessage, ChatRole, ColumnInfo, ConnectCredentials, ModelResponse,
        QueryOutcome, SandboxOutput, TabularResult, ToolCallRequest, ToolDefinition,
    };

    /// Model stub driven by a fixed script of responses.
    struct ScriptedModel {
        script: Vec<ModelResponse>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(script: Vec<ModelResponse>) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelGateway for ScriptedModel {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> anyhow::Result<ModelResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.script.is_empty() {
                anyhow::bail!("script exhausted");
            }
            // The last scripted response repeats once the script runs out.
            Ok(self.script[n.min(self.script.len() - 1)].clone())
        }
    }

    struct StubGateway;

    #[async_trait]
    impl QueryGateway for StubGateway {
        async fn connect(&self, _creds: &ConnectCredentials) -> Result<String, GatewayError> {
            Err(GatewayError::NotConnected)
        }
        async fn list_tables(&self) -> Result<Vec<String>, GatewayError> {
            Ok(vec![])
        }
        async fn get_schema(&self, _table: &str) -> Result<Vec<ColumnInfo>, GatewayError> {
            Err(GatewayError::NotConnected)
        }
        async fn execute_query(&self, _query: &str) -> Result<QueryOutcome, GatewayError> {
            Ok(QueryOutcome::Rows(TabularResult {
                headers: vec!["n".into()],
                rows: vec![vec![Cell::Int(1)]],
            }))
        }
        async fn get_preview(
            &self,
            _table: &str,
            _limit: usize,
        ) -> Result<TabularResult, GatewayError> {
            Err(GatewayError::NotConnected)
        }
        async fn refresh_tables(&self) -> Result<Vec<String>, GatewayError> {
            Ok(vec![])
        }
        async fn disconnect(&self) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    struct StubSandbox;

    #[async_trait]
    impl CodeSandbox for StubSandbox {
        async fn run(&self, _code: &str, _table: &DataTable) -> anyhow::Result<SandboxOutput> {
            Ok(SandboxOutput {
                stdout: "42\n".to_string(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    fn tool_call(id: &str, name: &str, args: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
        }
    }

    fn text_response(text: &str) -> ModelResponse {
        ModelResponse {
            content: text.to_string(),
            tool_calls: vec![],
            finish_reason: "stop".to_string(),
        }
    }

    fn tool_response(calls: Vec<ToolCallRequest>) -> ModelResponse {
        ModelResponse {
            content: String::new(),
            tool_calls: calls,
            finish_reason: "tool_calls".to_string(),
        }
    }

    fn code_session() -> SessionContext {
        let mut session = SessionContext::new(AgentMode::Code);
        session.table = Some(DataTable::new(
            "t",
            vec!["a".into()],
            vec![vec![Cell::Int(1)]],
        ));
        session
    }

    fn agent(model: Arc<ScriptedModel>) -> Agent {
        let config = TabulaConfig {
            max_model_calls: 5,
            ..TabulaConfig::default()
        };
        Agent::new(config, model, Arc::new(StubGateway), Arc::new(StubSandbox))
    }

    #[tokio::test]
    async fn plain_text_answer_takes_one_model_call() {
        let model = Arc::new(ScriptedModel::new(vec![text_response("the answer")]));
        let agent = agent(Arc::clone(&model));
        let mut session = code_session();

        let result = agent.invoke(&mut session, "what is it?").await;
        assert_eq!(result.text, "the answer");
        assert_eq!(model.call_count(), 1);
        // One composition: exactly one system message in the thread.
        let systems = session
            .thread
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .count();
        assert_eq!(systems, 1);
    }

    #[tokio::test]
    async fn always_calling_model_stops_at_ceiling_with_fallback() {
        let model = Arc::new(ScriptedModel::new(vec![tool_response(vec![tool_call(
            "c1",
            "run_code",
            r#"{"code":"print(42)"}"#,
        )])]));
        let agent = agent(Arc::clone(&model));
        let mut session = code_session();

        let result = agent.invoke(&mut session, "loop forever").await;
        assert_eq!(result.text, ITERATION_LIMIT_FALLBACK);
        assert_eq!(model.call_count(), 5);
    }

    #[tokio::test]
    async fn tool_results_match_requests_in_order() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_response(vec![
                tool_call("first", "run_code", r#"{"code":"print(1)"}"#),
                tool_call("second", "run_code", r#"{"code":"print(2)"}"#),
            ]),
            text_response("done"),
        ]));
        let agent = agent(model);
        let mut session = code_session();

        let result = agent.invoke(&mut session, "two calls").await;
        assert_eq!(result.text, "done");
        assert!(session.thread.correlation_holds());

        let tool_ids: Vec<&str> = session
            .thread
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result_not_failure() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_response(vec![tool_call("c1", "drop_tables", "{}")]),
            text_response("recovered"),
        ]));
        let agent = agent(model);
        let mut session = code_session();

        let result = agent.invoke(&mut session, "try something odd").await;
        assert_eq!(result.text, "recovered");
        let tool_msg = session
            .thread
            .messages
            .iter()
            .find(|m| m.role == ChatRole::Tool)
            .unwrap();
        assert!(tool_msg.content.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn model_failure_yields_safe_fallback() {
        // Empty script: the first chat call errors.
        let model = Arc::new(ScriptedModel {
            script: vec![],
            calls: AtomicUsize::new(0),
        });
        let agent = agent(model);
        let mut session = code_session();

        let result = agent.invoke(&mut session, "anything").await;
        assert_eq!(result.text, CRITICAL_FAILURE_FALLBACK);
    }

    #[tokio::test]
    async fn query_result_is_returned_to_caller() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_response(vec![tool_call("q1", "run_query", r#"{"query":"SELECT 1 AS n"}"#)]),
            text_response("there is one row"),
        ]));
        let agent = agent(model);
        let mut session = SessionContext::new(AgentMode::Sql);

        let result = agent.invoke(&mut session, "how many?").await;
        assert_eq!(result.text, "there is one row");
        let table = result.table.unwrap();
        assert_eq!(table.headers, vec!["n"]);
        assert!(session.last_result.is_some());
    }
}
