//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 默认回显最后一条 User 消息；可设为固定回复或固定失败，并记录每次收到的消息列表。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

#[derive(Debug, Default)]
enum MockBehavior {
    #[default]
    Echo,
    Reply(String),
    Fail(LlmError),
}

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient {
    behavior: MockBehavior,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次都返回同一段回复
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            behavior: MockBehavior::Reply(reply.into()),
            ..Self::default()
        }
    }

    /// 每次都失败
    pub fn failing(error: LlmError) -> Self {
        Self {
            behavior: MockBehavior::Fail(error),
            ..Self::default()
        }
    }

    /// 已收到的请求（每次 complete 的完整消息列表）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }

        match &self.behavior {
            MockBehavior::Fail(e) => Err(e.clone()),
            MockBehavior::Reply(r) => Ok(r.clone()),
            MockBehavior::Echo => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| matches!(m.role, Role::User))
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(format!("Echo from Mock: {}", last_user))
            }
        }
    }
}
