//! Endpoint handlers.
//!
//! Each handler resolves the caller's session from the `sid` cookie,
//! locks it, and does its work while holding the lock, so at most one
//! turn is in flight per session.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::resolve_path;
use crate::ingest::ingest_file;
use crate::session::SessionContext;
use crate::stats;
use crate::table::parse_row_request;
use crate::types::{AgentMode, ConnectCredentials, QueryGateway};

use super::types::{
    AskRequest, AskResponse, ConnectRequest, ConnectResponse, ConnectionStatusResponse,
    ForecastRequest, ForecastResponse, MessageResponse, SwitchModeRequest, TablePreviewRequest,
    TablePreviewResponse, TablesResponse,
};
use super::{cookie_session_id, with_session_cookie, ApiError, AppState};

const NO_SESSION: &str = "No active session. Upload a file or connect to a database first.";

/// Resolve the session for this request, or fail with 400.
async fn require_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(String, Arc<tokio::sync::Mutex<SessionContext>>), ApiError> {
    let sid = cookie_session_id(headers).ok_or_else(|| ApiError::bad_request(NO_SESSION))?;
    let entry = state
        .sessions
        .get(&sid)
        .ok_or_else(|| ApiError::bad_request(NO_SESSION))?;
    Ok((sid, entry))
}

/// Accept a file upload and start a fresh code-mode session around it.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut saved: Option<std::path::PathBuf> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed upload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(sanitize_filename)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ApiError::bad_request("upload is missing a file name"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read upload: {e}")))?;

        let dir = std::path::PathBuf::from(resolve_path(&state.config.upload_dir));
        std::fs::create_dir_all(&dir)
            .map_err(|e| ApiError::server(format!("failed to create upload directory: {e}")))?;
        let path = dir.join(&filename);
        std::fs::write(&path, &bytes)
            .map_err(|e| ApiError::server(format!("failed to store upload: {e}")))?;
        saved = Some(path);
        break;
    }

    let path = saved.ok_or_else(|| ApiError::bad_request("no 'file' field in the upload"))?;
    let table = ingest_file(&path)?;
    info!(
        file = %path.display(),
        rows = table.row_count(),
        columns = table.headers.len(),
        "file ingested"
    );

    let sid = cookie_session_id(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());
    let message = format!(
        "Loaded '{}': {} rows, {} columns.",
        table.name,
        table.row_count(),
        table.headers.len()
    );

    // A new upload starts the conversation over; only cached connection
    // details survive from any previous session.
    let mut session = SessionContext::new(AgentMode::Code);
    if let Some(previous) = state.sessions.get(&sid) {
        let previous = previous.lock().await;
        session.credentials = previous.credentials.clone();
        session.known_tables = previous.known_tables.clone();
    }
    session.table = Some(table);
    state.sessions.replace(&sid, session);

    let response = Json(MessageResponse { message }).into_response();
    Ok(with_session_cookie(response, &sid))
}

/// Connect to the remote query gateway and start an SQL-mode session.
pub async fn connect_db(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ConnectRequest>,
) -> Result<Response, ApiError> {
    let credentials: ConnectCredentials = req.into();
    let token = state.gateway.connect(&credentials).await?;
    let tables = state.gateway.list_tables().await?;
    info!(tables = tables.len(), "connected to query gateway");

    let sid = cookie_session_id(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut session = SessionContext::new(AgentMode::Sql);
    if let Some(previous) = state.sessions.get(&sid) {
        // Keep the uploaded table around so the user can switch back.
        session.table = previous.lock().await.table.clone();
    }
    session.credentials = Some(credentials);
    session.known_tables = tables.clone();
    state.sessions.replace(&sid, session);

    let response = Json(ConnectResponse {
        message: "Connected successfully.".to_string(),
        tables,
        token,
    })
    .into_response();
    Ok(with_session_cookie(response, &sid))
}

/// Answer one question in the caller's session.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::bad_request("question must not be empty"));
    }

    let (_, entry) = require_session(&state, &headers).await?;
    let mut session = entry.lock().await;

    // Plain row-display requests over an uploaded table skip the model.
    if session.mode == AgentMode::Code {
        if let Some(table) = session.table.as_ref() {
            if let Some(slice) = parse_row_request(&question)
                .and_then(|rr| table.answer_row_request(&rr))
            {
                info!(rows = slice.rows.len(), "row request fast path");
                return Ok(Json(AskResponse {
                    answer: "Here are the requested rows.".to_string(),
                    image: None,
                    table: Some(slice),
                }));
            }
        }
    }

    let result = state.agent.invoke(&mut session, &question).await;
    Ok(Json(AskResponse {
        answer: result.text,
        image: result.chart.map(|name| format!("/assets/{name}")),
        table: result.table,
    }))
}

/// Drop the conversation, keeping the data source in place. Clearing
/// with no session is a no-op, not an error.
pub async fn clear(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<MessageResponse> {
    let entry = cookie_session_id(&headers).and_then(|sid| state.sessions.get(&sid));
    match entry {
        Some(entry) => {
            entry.lock().await.reset_conversation();
            Json(MessageResponse {
                message: "Conversation cleared.".to_string(),
            })
        }
        None => Json(MessageResponse {
            message: "Nothing to clear.".to_string(),
        }),
    }
}

/// Switch the session between code and SQL mode. The target mode's data
/// source must already be in place; the conversation starts over.
pub async fn switch_mode(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SwitchModeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let mode = match req.mode.to_lowercase().as_str() {
        "code" => AgentMode::Code,
        "sql" => AgentMode::Sql,
        other => {
            return Err(ApiError::bad_request(format!(
                "unknown mode '{other}'; expected 'code' or 'sql'"
            )))
        }
    };

    let (sid, entry) = require_session(&state, &headers).await?;
    let session = entry.lock().await;

    match mode {
        AgentMode::Code if session.table.is_none() => {
            return Err(ApiError::bad_request(
                "No file uploaded; cannot switch to code mode.",
            ));
        }
        AgentMode::Sql if session.credentials.is_none() => {
            return Err(ApiError::bad_request(
                "Not connected to a database; cannot switch to SQL mode.",
            ));
        }
        _ => {}
    }

    // Fresh conversation in the new mode; data sources carry over.
    let mut fresh = SessionContext::new(mode);
    fresh.id = session.id.clone();
    fresh.table = session.table.clone();
    fresh.credentials = session.credentials.clone();
    fresh.known_tables = session.known_tables.clone();
    drop(session);
    state.sessions.replace(&sid, fresh);

    Ok(Json(MessageResponse {
        message: format!("Switched to {} mode.", req.mode.to_lowercase()),
    }))
}

/// Fetch the first rows of a remote table.
pub async fn get_table_preview(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TablePreviewRequest>,
) -> Result<Json<TablePreviewResponse>, ApiError> {
    let preview = state.gateway.get_preview(&req.table, 10).await?;
    Ok(Json(TablePreviewResponse {
        message: format!("Preview of '{}'.", req.table),
        table: preview,
    }))
}

/// Report whether the gateway connection is live. Always 200; the body
/// carries the verdict.
pub async fn check_connection_status(
    State(state): State<Arc<AppState>>,
) -> Json<ConnectionStatusResponse> {
    match state.gateway.list_tables().await {
        Ok(tables) => Json(ConnectionStatusResponse {
            connected: true,
            tables: Some(tables),
        }),
        Err(err) => {
            warn!(error = %err, "connection check failed");
            Json(ConnectionStatusResponse {
                connected: false,
                tables: None,
            })
        }
    }
}

/// Re-list remote tables and refresh the session's view of them.
pub async fn refresh_tables(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TablesResponse>, ApiError> {
    let tables = state.gateway.refresh_tables().await?;
    if let Some(entry) = cookie_session_id(&headers).and_then(|sid| state.sessions.get(&sid)) {
        let mut session = entry.lock().await;
        session.known_tables = tables.clone();
        session.schema_cache.clear();
    }
    Ok(Json(TablesResponse { tables }))
}

/// Tear down the gateway connection and scrub it from the session.
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<MessageResponse> {
    if let Err(err) = state.gateway.disconnect().await {
        warn!(error = %err, "disconnect request failed; local state cleared anyway");
    }
    if let Some(entry) = cookie_session_id(&headers).and_then(|sid| state.sessions.get(&sid)) {
        let mut session = entry.lock().await;
        scrub_connection(&mut session);
    }
    Json(MessageResponse {
        message: "Disconnected successfully.".to_string(),
    })
}

fn scrub_connection(session: &mut SessionContext) {
    session.credentials = None;
    session.known_tables.clear();
    session.schema_cache.clear();
    session.important_tables.clear();
    if session.mode == AgentMode::Sql {
        session.reset_conversation();
    }
}

/// Fit a trend over the uploaded table and extend it into the future.
pub async fn forecast(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ForecastRequest>,
) -> Result<Json<ForecastResponse>, ApiError> {
    let (_, entry) = require_session(&state, &headers).await?;
    let session = entry.lock().await;
    let table = session
        .table
        .as_ref()
        .ok_or_else(|| ApiError::bad_request("No file uploaded; nothing to forecast."))?;

    let forecast =
        stats::forecast_time_series(table, &req.date_column, &req.value_column, req.periods)
            .map_err(ApiError::bad_request)?;
    Ok(Json(ForecastResponse { forecast }))
}

/// Strip any path components from a client-supplied file name.
fn sanitize_filename(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use axum::http::HeaderValue;

    use crate::config::TabulaConfig;
    use crate::table::DataTable;
    use crate::types::Cell;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(TabulaConfig::default()))
    }

    fn headers_with_sid(sid: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("sid={sid}")).unwrap(),
        );
        headers
    }

    fn sample_table() -> DataTable {
        DataTable::new(
            "sales",
            vec!["Date".into(), "Sales".into()],
            (1..=5)
                .map(|i| vec![Cell::Text(format!("2024-01-0{i}")), Cell::Int(i * 10)])
                .collect(),
        )
    }

    #[test]
    fn sanitizes_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\data.csv"), "data.csv");
        assert_eq!(sanitize_filename("report.csv"), "report.csv");
    }

    #[tokio::test]
    async fn clear_without_session_is_a_noop() {
        let state = test_state();
        let Json(body) = clear(State(state), HeaderMap::new()).await;
        assert_eq!(body.message, "Nothing to clear.");
    }

    #[tokio::test]
    async fn ask_without_session_is_rejected() {
        let state = test_state();
        let err = ask(
            State(state),
            HeaderMap::new(),
            Json(AskRequest {
                question: "first 3 rows".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn row_request_fast_path_skips_the_model() {
        let state = test_state();
        let mut session = SessionContext::new(AgentMode::Code);
        session.table = Some(sample_table());
        state.sessions.replace("s1", session);

        // The model gateway is unconfigured; any model call would fall
        // back to the failure message. A direct table answer proves the
        // fast path handled it.
        let Json(body) = ask(
            State(state),
            headers_with_sid("s1"),
            Json(AskRequest {
                question: "show the [Date, Sales] last 3 rows".to_string(),
            }),
        )
        .await
        .unwrap();
        let table = body.table.unwrap();
        assert_eq!(table.headers, vec!["Date", "Sales"]);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0][0], Cell::Text("2024-01-03".into()));
    }

    #[tokio::test]
    async fn switch_to_sql_requires_a_connection() {
        let state = test_state();
        let mut session = SessionContext::new(AgentMode::Code);
        session.table = Some(sample_table());
        state.sessions.replace("s2", session);

        let err = switch_mode(
            State(state),
            headers_with_sid("s2"),
            Json(SwitchModeRequest {
                mode: "sql".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(err.message.contains("Not connected"));
    }

    #[tokio::test]
    async fn switch_resets_the_conversation() {
        let state = test_state();
        let mut session = SessionContext::new(AgentMode::Sql);
        session.table = Some(sample_table());
        session.credentials = Some(ConnectCredentials {
            server: "s".into(),
            database: "d".into(),
            username: "u".into(),
            password: "p".into(),
        });
        session.thread.push_user("old question");
        state.sessions.replace("s3", session);

        switch_mode(
            State(Arc::clone(&state)),
            headers_with_sid("s3"),
            Json(SwitchModeRequest {
                mode: "code".to_string(),
            }),
        )
        .await
        .unwrap();

        let entry = state.sessions.get("s3").unwrap();
        let session = entry.lock().await;
        assert_eq!(session.mode, AgentMode::Code);
        assert!(session.thread.is_empty());
        assert!(session.table.is_some());
        assert!(session.credentials.is_some());
    }
}
