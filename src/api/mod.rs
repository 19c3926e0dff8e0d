//! HTTP Service
//!
//! axum router exposing the agent over HTTP. Sessions are carried by a
//! `sid` cookie and held in the in-memory [`SessionStore`]; chart
//! artifacts are served from the asset directory.

pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::agent::agent_loop::Agent;
use crate::config::{resolve_path, TabulaConfig};
use crate::error::{GatewayError, IngestError};
use crate::gateway::QueryGatewayClient;
use crate::inference::OpenAiModelGateway;
use crate::sandbox::SubprocessSandbox;
use crate::session::SessionStore;
use crate::types::QueryGateway;

use self::types::ErrorResponse;

pub const SESSION_COOKIE: &str = "sid";

pub struct AppState {
    pub config: TabulaConfig,
    pub sessions: SessionStore,
    pub agent: Agent,
    pub gateway: Arc<QueryGatewayClient>,
}

impl AppState {
    pub fn new(config: TabulaConfig) -> Self {
        let gateway = Arc::new(QueryGatewayClient::new(config.gateway_url.clone()));
        let shared: Arc<dyn QueryGateway> = gateway.clone();
        let model = Arc::new(OpenAiModelGateway::new(&config));
        let sandbox = Arc::new(SubprocessSandbox::new(&config));
        let agent = Agent::new(config.clone(), model, shared, sandbox);
        Self {
            config,
            sessions: SessionStore::new(),
            agent,
            gateway,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let asset_dir = resolve_path(&state.config.asset_dir);
    Router::new()
        .route("/upload", post(handlers::upload))
        .route("/connect_db", post(handlers::connect_db))
        .route("/ask", post(handlers::ask))
        .route("/clear", post(handlers::clear))
        .route("/switch_mode", post(handlers::switch_mode))
        .route("/get_table_preview", post(handlers::get_table_preview))
        .route("/check_connection_status", get(handlers::check_connection_status))
        .route("/refresh_tables", post(handlers::refresh_tables))
        .route("/disconnect", post(handlers::disconnect))
        .route("/forecast", post(handlers::forecast))
        .nest_service("/assets", ServeDir::new(asset_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error surface of the HTTP layer: status code + `{error}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = match err {
            GatewayError::NotConnected => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: err.to_string(),
        }
    }
}

/// Session id from the request's Cookie header, if present.
pub fn cookie_session_id(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("sid="))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Attach the session cookie to a response.
pub fn with_session_cookie(mut response: Response, sid: &str) -> Response {
    let value = format!("{SESSION_COOKIE}={sid}; Path=/; HttpOnly; SameSite=Lax");
    if let Ok(value) = HeaderValue::from_str(&value) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}
