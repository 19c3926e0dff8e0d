//! Conversation Thread
//!
//! Append-only message log for one session. The control loop appends one
//! system + one user message per invocation, then assistant/tool pairs as
//! the model works. Tool results are correlated to their requests by id
//! and must follow the requesting assistant message in request order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ChatMessage, ChatRole, ToolCallRequest};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationThread {
    pub id: String,
    pub messages: Vec<ChatMessage>,
}

impl ConversationThread {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::system(content));
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) {
        self.messages.push(ChatMessage::assistant(content, tool_calls));
    }

    pub fn push_tool_result(&mut self, call_id: impl Into<String>, content: impl Into<String>) {
        self.messages.push(ChatMessage::tool_result(call_id, content));
    }

    /// Check the request/result correlation invariant: every assistant
    /// message carrying tool calls is immediately followed by exactly one
    /// tool result per request, in request order.
    pub fn correlation_holds(&self) -> bool {
        let mut i = 0;
        while i < self.messages.len() {
            let msg = &self.messages[i];
            if msg.role == ChatRole::Assistant {
                if let Some(ref calls) = msg.tool_calls {
                    for (offset, call) in calls.iter().enumerate() {
                        let Some(result) = self.messages.get(i + 1 + offset) else {
                            return false;
                        };
                        if result.role != ChatRole::Tool
                            || result.tool_call_id.as_deref() != Some(call.id.as_str())
                        {
                            return false;
                        }
                    }
                    i += calls.len();
                }
            }
            i += 1;
        }
        true
    }
}

impl Default for ConversationThread {
    fn default() -> Self {
        Self::new()
    }
}
