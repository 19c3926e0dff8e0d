//! Tabula Configuration
//!
//! Loads and saves the service configuration from `~/.tabula/tabula.json`,
//! with environment-variable overrides for deployment.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Config file name within the tabula directory.
const CONFIG_FILENAME: &str = "tabula.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TabulaConfig {
    /// Address the HTTP service binds to.
    pub bind_addr: String,
    /// Directory generated chart files are written to and served from.
    pub asset_dir: String,
    /// Directory uploaded files are staged in.
    pub upload_dir: String,
    /// OpenAI-compatible chat-completions endpoint.
    pub model_api_url: String,
    pub model_api_key: String,
    pub model_name: String,
    pub max_tokens: u32,
    /// Base URL of the remote database query gateway.
    pub gateway_url: String,
    /// Model-call ceiling per question; hitting it produces the fixed
    /// fallback answer instead of an error.
    pub max_model_calls: u32,
    /// Rows shown in table previews.
    pub preview_rows: usize,
    /// Rows a query tool result is truncated to before it reaches the
    /// conversation.
    pub query_row_limit: usize,
    /// Wall-clock timeout for sandboxed code execution, in seconds.
    pub sandbox_timeout_secs: u64,
    /// Interpreter invoked by the code sandbox.
    pub sandbox_python: String,
}

impl Default for TabulaConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            asset_dir: "~/.tabula/assets".to_string(),
            upload_dir: "~/.tabula/uploads".to_string(),
            model_api_url: "https://api.openai.com/v1".to_string(),
            model_api_key: String::new(),
            model_name: "gpt-4o".to_string(),
            max_tokens: 4096,
            gateway_url: "http://127.0.0.1:9090".to_string(),
            max_model_calls: 12,
            preview_rows: 6,
            query_row_limit: 50,
            sandbox_timeout_secs: 30,
            sandbox_python: "python3".to_string(),
        }
    }
}

fn get_tabula_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".tabula")
}

/// Returns the full path to the config file: `~/.tabula/tabula.json`.
pub fn get_config_path() -> PathBuf {
    get_tabula_dir().join(CONFIG_FILENAME)
}

/// Load the config from disk, falling back to defaults when the file is
/// missing, then apply environment overrides (`TABULA_MODEL_API_KEY`,
/// `TABULA_MODEL_API_URL`, `TABULA_GATEWAY_URL`, `TABULA_BIND_ADDR`).
pub fn load_config() -> TabulaConfig {
    let config_path = get_config_path();
    let mut config = if config_path.exists() {
        fs::read_to_string(&config_path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default()
    } else {
        TabulaConfig::default()
    };

    if let Ok(v) = std::env::var("TABULA_MODEL_API_KEY") {
        config.model_api_key = v;
    }
    if let Ok(v) = std::env::var("TABULA_MODEL_API_URL") {
        config.model_api_url = v;
    }
    if let Ok(v) = std::env::var("TABULA_GATEWAY_URL") {
        config.gateway_url = v;
    }
    if let Ok(v) = std::env::var("TABULA_BIND_ADDR") {
        config.bind_addr = v;
    }

    config
}

/// Save the config to `~/.tabula/tabula.json`, creating the directory
/// if needed.
pub fn save_config(config: &TabulaConfig) -> Result<()> {
    let dir = get_tabula_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create tabula directory")?;
    }

    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(get_config_path(), &json).context("Failed to write config file")?;

    Ok(())
}

/// Resolve a path that may start with `~` to an absolute path.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_with_tilde() {
        let resolved = resolve_path("~/some/path");
        assert!(!resolved.starts_with('~'));
        assert!(resolved.ends_with("some/path"));
    }

    #[test]
    fn test_resolve_path_without_tilde() {
        let path = "/absolute/path/to/file";
        assert_eq!(resolve_path(path), path);
    }

    #[test]
    fn test_default_config_values() {
        let config = TabulaConfig::default();
        assert_eq!(config.max_model_calls, 12);
        assert_eq!(config.query_row_limit, 50);
        assert_eq!(config.preview_rows, 6);
        assert_eq!(config.model_name, "gpt-4o");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: TabulaConfig =
            serde_json::from_str(r#"{"bindAddr":"0.0.0.0:3000"}"#).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.max_model_calls, 12);
    }
}
