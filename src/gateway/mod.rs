//! Remote query gateway client.

pub mod client;

pub use client::QueryGatewayClient;
