//! Tabula - Error Types
//!
//! Typed errors for the ingestion pipeline and the remote query gateway.
//! Everything else in the crate uses `anyhow` at the seams.

use thiserror::Error;

/// Failures while turning an uploaded file into a table.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("csv parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The document parsed but does not match the expected worksheet
    /// export structure (missing metadata, row/column count mismatch).
    #[error("malformed worksheet export: {0}")]
    Structure(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures from the remote query gateway client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No credential token is held; `connect` has not succeeded yet.
    #[error("not connected to a database")]
    NotConnected,

    /// Auth failed, the cached-credential reconnect was attempted once,
    /// and the retry failed too.
    #[error("authentication failed and reconnect did not recover: {0}")]
    AuthExhausted(String),

    /// The gateway answered with a non-auth error status.
    #[error("gateway error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gateway answered 200 but the body is not the expected shape.
    #[error("unexpected gateway response: {0}")]
    BadResponse(String),
}
