//! 嵌入 API：供向量检索（/recall）使用，调用 OpenAI 兼容的 /embeddings 端点

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::LlmSection;
use crate::llm::LlmError;

/// 嵌入提供方
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本编码为向量；空文本返回空向量
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 与对话客户端共用 api_key / base_url
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![]);
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| LlmError::classify(e.to_string()))?;
        response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .ok_or_else(|| LlmError::InvalidResponse("no embedding returned".to_string()))
    }
}

/// 从 [llm] 配置创建嵌入提供方；未配置嵌入模型或没有 API Key 时返回 None
pub fn create_embedder_from_config(cfg: &LlmSection) -> Option<Arc<dyn EmbeddingProvider>> {
    let model = cfg.embedding_model.as_deref()?.trim();
    if model.is_empty() {
        return None;
    }
    let key = cfg.api_key.as_deref().unwrap_or("");
    if key.is_empty() || key == "sk-placeholder" {
        tracing::debug!("embedding skipped: no OPENAI_API_KEY");
        return None;
    }
    Some(Arc::new(OpenAiEmbedder::new(
        cfg.base_url.as_deref(),
        model,
        key,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_requires_model_and_key() {
        let mut cfg = LlmSection::default();
        assert!(create_embedder_from_config(&cfg).is_none());

        cfg.embedding_model = Some("text-embedding-3-small".into());
        assert!(create_embedder_from_config(&cfg).is_none());

        cfg.api_key = Some("sk-real".into());
        assert!(create_embedder_from_config(&cfg).is_some());
    }
}
