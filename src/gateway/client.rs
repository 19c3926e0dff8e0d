//! Query Gateway Client
//!
//! JSON/HTTP client for the remote database gateway. Holds the bearer
//! token issued by `/api/connect` and the credentials that earned it;
//! a 401/403 on any call triggers exactly one transparent reconnect
//! with those cached credentials before the error becomes terminal.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::GatewayError;
use crate::types::{
    Cell, ColumnInfo, ConnectCredentials, QueryGateway, QueryOutcome, TabularResult,
};

pub struct QueryGatewayClient {
    base_url: String,
    http: Client,
    token: Mutex<Option<String>>,
    credentials: Mutex<Option<ConnectCredentials>>,
}

impl QueryGatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
            token: Mutex::new(None),
            credentials: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn current_token(&self) -> Result<String, GatewayError> {
        self.token
            .lock()
            .ok()
            .and_then(|t| t.clone())
            .ok_or(GatewayError::NotConnected)
    }

    fn store_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.lock() {
            *slot = token;
        }
    }

    async fn send_raw(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, GatewayError> {
        let mut req = self
            .http
            .request(method, self.url(path))
            .header("Authorization", format!("Bearer {token}"));
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }

    /// Reconnect with the cached credentials, storing the fresh token.
    async fn reconnect(&self) -> Result<String, GatewayError> {
        let creds = self
            .credentials
            .lock()
            .ok()
            .and_then(|c| c.clone())
            .ok_or_else(|| {
                GatewayError::AuthExhausted("no cached credentials for reconnection".to_string())
            })?;
        info!("gateway token rejected, reconnecting with cached credentials");
        self.connect(&creds).await
    }

    /// Send an authenticated request, transparently reconnecting at most
    /// once when the gateway rejects the token.
    async fn authed_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> Result<Value, GatewayError> {
        let token = self.current_token()?;
        let resp = self
            .send_raw(method.clone(), path, &token, body, query)
            .await?;

        if !is_auth_failure(resp.status()) {
            return parse_response(resp).await;
        }

        warn!(path, "authentication failed, attempting one reconnect");
        let fresh = self.reconnect().await?;
        let retry = self.send_raw(method, path, &fresh, body, query).await?;
        if is_auth_failure(retry.status()) {
            self.store_token(None);
            return Err(GatewayError::AuthExhausted(format!(
                "gateway rejected a freshly issued token ({})",
                retry.status().as_u16()
            )));
        }
        parse_response(retry).await
    }

    /// Exchange the current token for a fresh one without re-sending
    /// credentials.
    pub async fn refresh_token(&self) -> Result<String, GatewayError> {
        let token = self.current_token()?;
        let resp = self
            .send_raw(Method::POST, "/api/refresh-token", &token, None, &[])
            .await?;
        let data = parse_response(resp).await?;
        let fresh = data["token"]
            .as_str()
            .ok_or_else(|| GatewayError::BadResponse("no token in refresh response".into()))?
            .to_string();
        self.store_token(Some(fresh.clone()));
        Ok(fresh)
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// Non-200 responses carry `{error}`; surface it with the status.
async fn parse_response(resp: reqwest::Response) -> Result<Value, GatewayError> {
    let status = resp.status();
    if !status.is_success() {
        let body: Value = resp.json().await.unwrap_or_default();
        let message = body["error"]
            .as_str()
            .unwrap_or("Unknown error")
            .to_string();
        return Err(GatewayError::Remote {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp.json().await?)
}

/// Pull headers+rows out of the gateway's response, accepting both the
/// flat shape and the nested `{table: {...}}` shape.
fn extract_table(data: &Value) -> Option<TabularResult> {
    let source = if data["headers"].is_array() && data["rows"].is_array() {
        data
    } else if data["table"]["headers"].is_array() && data["table"]["rows"].is_array() {
        &data["table"]
    } else {
        return None;
    };

    let headers: Vec<String> = source["headers"]
        .as_array()?
        .iter()
        .map(|h| h.as_str().map(str::to_string).unwrap_or_else(|| h.to_string()))
        .collect();
    let rows: Vec<Vec<Cell>> = source["rows"]
        .as_array()?
        .iter()
        .filter_map(|row| row.as_array())
        .map(|row| row.iter().map(Cell::from).collect())
        .collect();
    Some(TabularResult { headers, rows })
}

fn extract_columns(data: &Value) -> Vec<ColumnInfo> {
    data["schema"]
        .as_array()
        .map(|cols| {
            cols.iter()
                .map(|c| ColumnInfo {
                    name: c["name"]
                        .as_str()
                        .or_else(|| c["columnName"].as_str())
                        .unwrap_or("")
                        .to_string(),
                    data_type: c["dataType"]
                        .as_str()
                        .or_else(|| c["type"].as_str())
                        .unwrap_or("unknown")
                        .to_string(),
                    is_key: c["isKey"].as_bool().unwrap_or(false),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl QueryGateway for QueryGatewayClient {
    async fn connect(&self, creds: &ConnectCredentials) -> Result<String, GatewayError> {
        let body = serde_json::json!({
            "server": creds.server,
            "database": creds.database,
            "username": creds.username,
            "password": creds.password,
        });
        let resp = self
            .http
            .post(self.url("/api/connect"))
            .json(&body)
            .send()
            .await?;
        let data = parse_response(resp).await?;

        let token = data["token"]
            .as_str()
            .ok_or_else(|| GatewayError::BadResponse("no token in connect response".into()))?
            .to_string();

        self.store_token(Some(token.clone()));
        if let Ok(mut slot) = self.credentials.lock() {
            *slot = Some(creds.clone());
        }
        Ok(token)
    }

    async fn list_tables(&self) -> Result<Vec<String>, GatewayError> {
        let data = self
            .authed_json(Method::GET, "/api/tables", None, &[])
            .await?;
        Ok(data["tables"]
            .as_array()
            .map(|t| {
                t.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>, GatewayError> {
        let path = format!("/api/schema/{}", urlencoding::encode(table));
        let data = self.authed_json(Method::GET, &path, None, &[]).await?;
        Ok(extract_columns(&data))
    }

    async fn execute_query(&self, query: &str) -> Result<QueryOutcome, GatewayError> {
        let body = serde_json::json!({ "query": query });
        let data = self
            .authed_json(Method::POST, "/api/query", Some(&body), &[])
            .await?;

        if let Some(table) = extract_table(&data) {
            return Ok(QueryOutcome::Rows(table));
        }
        if let Some(count) = data["rowCount"].as_u64() {
            return Ok(QueryOutcome::Message(format!(
                "Query executed successfully. Affected rows: {count}"
            )));
        }
        Ok(QueryOutcome::Message(
            "Query executed successfully".to_string(),
        ))
    }

    async fn get_preview(&self, table: &str, limit: usize) -> Result<TabularResult, GatewayError> {
        let path = format!("/api/preview/{}", urlencoding::encode(table));
        let data = self
            .authed_json(Method::GET, &path, None, &[("limit", limit.to_string())])
            .await?;
        extract_table(&data)
            .ok_or_else(|| GatewayError::BadResponse("preview response had no table".into()))
    }

    async fn refresh_tables(&self) -> Result<Vec<String>, GatewayError> {
        let data = self
            .authed_json(Method::POST, "/api/refresh-tables", None, &[])
            .await?;
        Ok(data["tables"]
            .as_array()
            .map(|t| {
                t.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        let token = self.current_token()?;
        let resp = self
            .send_raw(Method::POST, "/api/disconnect", &token, None, &[])
            .await;
        // Local state resets regardless of what the gateway answered.
        self.store_token(None);
        if let Ok(mut slot) = self.credentials.lock() {
            *slot = None;
        }
        match resp {
            Ok(r) => {
                parse_response(r).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
