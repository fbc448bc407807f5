//! LLM 客户端抽象
//!
//! 对话生成后端（OpenAI 兼容 / Mock）实现 LlmClient：传入角色化消息列表，返回一段回复文字。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 调用对话补全端点时的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("api error: {0}")]
    Api(String),
}

impl LlmError {
    /// 按错误文本粗分类（SDK 的错误多半只带状态码和描述）
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("401") || lower.contains("invalid_api_key") || lower.contains("incorrect api key") {
            LlmError::Auth(message)
        } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
            LlmError::RateLimited(message)
        } else if lower.contains("timed out") || lower.contains("timeout") {
            LlmError::Timeout
        } else {
            LlmError::Api(message)
        }
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 返回首个候选的文字（已去除首尾空白）
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;
}
