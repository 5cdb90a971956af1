//! LLM 层：聊天完成与嵌入（OpenAI 兼容 / Mock / 本地哈希）

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{
    create_embedder_from_config, EmbeddingError, EmbeddingProvider, HashingEmbedder,
    OpenAiEmbedder,
};
pub use mock::MockLlmClient;
pub use openai::{create_llm_from_config, OpenAiClient, TokenUsage};
pub use traits::{LlmClient, PromptMessage};
