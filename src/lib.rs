//! Tabula -- Conversational Analytics over Tabular Data
//!
//! A tool-use agent service that answers natural-language questions
//! about tabular data, either by running sandboxed Python against an
//! uploaded file or by querying a remote database gateway.

pub mod types;
pub mod error;
pub mod config;
pub mod table;
pub mod ingest;
pub mod session;
pub mod agent;
pub mod inference;
pub mod gateway;
pub mod sandbox;
pub mod chart;
pub mod stats;
pub mod api;
