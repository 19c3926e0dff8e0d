//! Model Gateway Client
//!
//! Wraps an OpenAI-compatible /v1/chat/completions endpoint. The agent
//! talks to it through the [`ModelGateway`] trait so tests can script
//! responses.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::TabulaConfig;
use crate::types::{
    ChatMessage, ModelGateway, ModelResponse, ToolCallRequest, ToolDefinition,
};

pub struct OpenAiModelGateway {
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    http: Client,
}

impl OpenAiModelGateway {
    pub fn new(config: &TabulaConfig) -> Self {
        Self {
            api_url: config.model_api_url.trim_end_matches('/').to_string(),
            api_key: config.model_api_key.clone(),
            model: config.model_name.clone(),
            max_tokens: config.max_tokens,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl ModelGateway for OpenAiModelGateway {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse> {
        let formatted_messages: Vec<Value> = messages.iter().map(format_message).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": formatted_messages,
            "max_tokens": self.max_tokens,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
            body["tool_choice"] = serde_json::json!("auto");
        }

        let url = format!("{}/chat/completions", self.api_url);
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Model request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Model error: {}: {}", status.as_u16(), text);
        }

        let data: Value = resp.json().await.context("Failed to parse model response")?;
        let choice = data["choices"]
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("No completion choice returned"))?;
        let message = &choice["message"];

        let tool_calls: Vec<ToolCallRequest> = message["tool_calls"]
            .as_array()
            .map(|tcs| {
                tcs.iter()
                    .map(|tc| ToolCallRequest {
                        id: tc["id"].as_str().unwrap_or("").to_string(),
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"]
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ModelResponse {
            content: message["content"].as_str().unwrap_or("").to_string(),
            tool_calls,
            finish_reason: choice["finish_reason"].as_str().unwrap_or("stop").to_string(),
        })
    }
}

/// Format a ChatMessage into the JSON structure the API expects.
fn format_message(msg: &ChatMessage) -> Value {
    let mut formatted = serde_json::json!({
        "role": msg.role,
        "content": msg.content,
    });

    if let Some(ref tool_calls) = msg.tool_calls {
        let tc_json: Vec<Value> = tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments,
                    }
                })
            })
            .collect();
        formatted["tool_calls"] = serde_json::json!(tc_json);
    }
    if let Some(ref tool_call_id) = msg.tool_call_id {
        formatted["tool_call_id"] = serde_json::json!(tool_call_id);
    }

    formatted
}
