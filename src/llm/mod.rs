//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）与嵌入

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{create_embedder_from_config, EmbeddingProvider, OpenAiEmbedder};
pub use mock::{MockLlmClient, RecordedCall, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{CompletionOptions, LlmClient, LlmError};
