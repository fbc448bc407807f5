//! LLM 层：对话补全与嵌入的客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{create_embedder_from_config, EmbeddingProvider, OpenAiEmbedder};
pub use mock::MockLlmClient;
pub use openai::{CompletionParams, OpenAiClient};
pub use traits::{LlmClient, LlmError};
