//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；temperature、max tokens、
//! presence / frequency penalty 全部来自配置。带图片的用户消息会转成 image_url 内容块。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImage, ChatCompletionRequestMessageContentPartText,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, ImageUrl,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::LlmSection;
use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// 采样参数
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub timeout: Duration,
    /// true 时以旧字段 max_tokens 发送上限，否则用 max_completion_tokens
    pub legacy_max_tokens: bool,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 220,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            timeout: Duration::from_secs(60),
            legacy_max_tokens: true,
        }
    }
}

impl From<&LlmSection> for CompletionParams {
    fn from(cfg: &LlmSection) -> Self {
        Self {
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            presence_penalty: cfg.presence_penalty,
            frequency_penalty: cfg.frequency_penalty,
            timeout: Duration::from_secs(cfg.timeouts.request),
            legacy_max_tokens: cfg.legacy_max_tokens,
        }
    }
}

/// OpenAI 兼容客户端：持有 Client、model 名与采样参数，complete 时转 Message 为 API 格式并取首条 content
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    params: CompletionParams,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            params: CompletionParams::default(),
        }
    }

    /// 从 [llm] 配置创建文字模型客户端
    pub fn from_config(cfg: &LlmSection) -> Self {
        Self::new(cfg.base_url.as_deref(), &cfg.model, cfg.api_key.as_deref())
            .with_params(CompletionParams::from(cfg))
    }

    pub fn with_params(mut self, params: CompletionParams) -> Self {
        self.params = params;
        self
    }

    /// 换模型（如看图模型），共用连接与参数
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let build_err = |e: async_openai::error::OpenAIError| LlmError::Api(e.to_string());
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_err)?,
                    ),
                    Role::User => {
                        let user = match &m.image {
                            Some(image) => {
                                let parts = vec![
                                    ChatCompletionRequestUserMessageContentPart::Text(
                                        ChatCompletionRequestMessageContentPartText {
                                            text: m.content.clone(),
                                        },
                                    ),
                                    ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                        ChatCompletionRequestMessageContentPartImage {
                                            image_url: ImageUrl {
                                                url: image.data_url(),
                                                detail: None,
                                            },
                                        },
                                    ),
                                ];
                                ChatCompletionRequestUserMessageArgs::default()
                                    .content(parts)
                                    .build()
                            }
                            None => ChatCompletionRequestUserMessageArgs::default()
                                .content(m.content.clone())
                                .build(),
                        };
                        ChatCompletionRequestMessage::User(user.map_err(build_err)?)
                    }
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_err)?,
                    ),
                };
                Ok(msg)
            })
            .collect()
    }

    /// 组请求体；输出上限按 legacy_max_tokens 落在两个字段之一
    #[allow(deprecated)]
    fn build_request(&self, messages: &[Message]) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages)?)
            .temperature(self.params.temperature)
            .presence_penalty(self.params.presence_penalty)
            .frequency_penalty(self.params.frequency_penalty)
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))?;
        if self.params.legacy_max_tokens {
            request.max_tokens = Some(self.params.max_tokens);
        } else {
            request.max_completion_tokens = Some(self.params.max_tokens);
        }
        Ok(request)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request = self.build_request(messages)?;

        let response = tokio::time::timeout(self.params.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::classify(e.to_string()))?;

        if let Some(usage) = &response.usage {
            tracing::info!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "token usage"
            );
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(LlmError::InvalidResponse("empty completion".to_string()));
        }
        tracing::debug!(model = %self.model, chars = content.chars().count(), "completion ok");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ImageInput;

    #[test]
    fn test_params_from_config() {
        let mut cfg = LlmSection::default();
        cfg.temperature = 0.2;
        cfg.max_tokens = 300;
        cfg.presence_penalty = 0.5;
        cfg.frequency_penalty = 0.1;
        cfg.timeouts.request = 15;
        let p = CompletionParams::from(&cfg);
        assert_eq!(p.max_tokens, 300);
        assert_eq!(p.timeout, Duration::from_secs(15));
        assert!((p.presence_penalty - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_message_conversion_keeps_roles_and_images() {
        let client = OpenAiClient::new(Some("http://localhost:1"), "gpt-4o-mini", Some("sk-test"));
        let messages = vec![
            Message::system("persona"),
            Message::assistant("hi"),
            Message::user("看看这张图").with_image(ImageInput::new("image/jpeg", vec![1, 2, 3])),
        ];
        let converted = client.to_openai_messages(&messages).unwrap();
        assert_eq!(converted.len(), 3);
        assert!(matches!(converted[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(converted[1], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(converted[2], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    #[allow(deprecated)]
    fn test_request_carries_sampling_params_and_output_limit() {
        let client = OpenAiClient::from_config(&LlmSection::default());
        let request = client.build_request(&[Message::user("hi")]).unwrap();
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.max_tokens, Some(220));
        assert_eq!(request.max_completion_tokens, None);

        let mut cfg = LlmSection::default();
        cfg.legacy_max_tokens = false;
        cfg.max_tokens = 128;
        let request = OpenAiClient::from_config(&cfg)
            .build_request(&[Message::user("hi")])
            .unwrap();
        assert_eq!(request.max_tokens, None);
        assert_eq!(request.max_completion_tokens, Some(128));
    }
}
