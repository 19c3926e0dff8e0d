//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::types::{ConnectCredentials, TabularResult};

/// Request to ask a question about the loaded data.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    /// The natural-language question
    pub question: String,
}

/// Response to a question.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    /// The agent's answer text
    pub answer: String,

    /// Path to a generated chart, when one was produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Tabular payload accompanying the answer, when one was produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TabularResult>,
}

/// Request to connect to a remote database.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectRequest {
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl From<ConnectRequest> for ConnectCredentials {
    fn from(req: ConnectRequest) -> Self {
        ConnectCredentials {
            server: req.server,
            database: req.database,
            username: req.username,
            password: req.password,
        }
    }
}

/// Response after a successful database connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectResponse {
    pub message: String,
    pub tables: Vec<String>,
    pub token: String,
}

/// Request to switch the session's answering mode.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchModeRequest {
    /// "code" or "sql"
    pub mode: String,
}

/// Request for a table preview.
#[derive(Debug, Clone, Deserialize)]
pub struct TablePreviewRequest {
    pub table: String,
}

/// Preview payload.
#[derive(Debug, Clone, Serialize)]
pub struct TablePreviewResponse {
    pub message: String,
    pub table: TabularResult,
}

/// Connection status report.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatusResponse {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<String>>,
}

/// Request for a time-series forecast.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastRequest {
    pub date_column: String,
    pub value_column: String,
    #[serde(default = "default_periods")]
    pub periods: usize,
}

fn default_periods() -> usize {
    10
}

/// Forecast rows: ds / yhat / yhat_lower / yhat_upper.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastResponse {
    pub forecast: TabularResult,
}

/// Table name listing.
#[derive(Debug, Clone, Serialize)]
pub struct TablesResponse {
    pub tables: Vec<String>,
}

/// Generic `{message}` acknowledgement.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Generic `{error}` failure body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
