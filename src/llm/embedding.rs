//! 嵌入 API：供长期向量记忆使用
//!
//! - OpenAiEmbedder：调用 OpenAI 兼容的 /embeddings 端点
//! - HashingEmbedder：本地特征哈希（无 API Key 时的离线兜底，也用于测试）

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use thiserror::Error;

use crate::memory::tokenizer;

/// 嵌入失败（均视为暂时性错误，由下一轮清理重试）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding response was empty")]
    EmptyResponse,

    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

/// 可从 sync 上下文调用的嵌入提供方
///
/// 清理任务在 blocking 线程池中调用；异步路径需通过 spawn_blocking 调用。
pub trait EmbeddingProvider: Send + Sync {
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// 提供方名称（用于日志）
    fn name(&self) -> &str {
        "embedder"
    }
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 与 LLM 共用 OPENAI_API_KEY / base_url
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    pub async fn embed_async(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;
        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(EmbeddingError::EmptyResponse)
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| EmbeddingError::Unavailable(format!("no tokio runtime: {}", e)))?;
        handle.block_on(self.embed_async(text.trim()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// 本地特征哈希嵌入：分词后按 FNV-1a 哈希投影到固定维度，带符号位，L2 归一化
///
/// 语义能力有限（仅词面重叠），但确定性强、无网络依赖。
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let tokens = tokenizer::tokenize(text);
        if tokens.is_empty() {
            return Err(EmbeddingError::EmptyResponse);
        }
        let mut v = vec![0.0f32; self.dimensions];
        for token in &tokens {
            let h = fnv1a(token.as_bytes());
            let idx = (h % self.dimensions as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(v)
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// 从应用配置创建嵌入提供方：有 API Key 时用 OpenAI 兼容端点，否则退回本地哈希嵌入
pub fn create_embedder_from_config(
    base_url: Option<&str>,
    model: &str,
    api_key: Option<&str>,
    fallback_dimensions: usize,
) -> Arc<dyn EmbeddingProvider> {
    let key = api_key
        .map(String::from)
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.is_empty() && k != "sk-placeholder");
    match key {
        Some(key) => {
            tracing::info!("Using OpenAI-compatible embedder: {}", model);
            Arc::new(OpenAiEmbedder::new(base_url, model, &key))
        }
        None => {
            tracing::warn!(
                "No OPENAI_API_KEY, falling back to local hashing embedder ({} dims)",
                fallback_dimensions
            );
            Arc::new(HashingEmbedder::new(fallback_dimensions))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_hashing_embedder_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_sync("dinner reservation tonight").unwrap();
        let b = e.embed_sync("dinner reservation tonight").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hashing_embedder_related_text_scores_higher() {
        let e = HashingEmbedder::default();
        let q = e.embed_sync("restaurant reservation").unwrap();
        let related = e.embed_sync("please make a restaurant reservation for friday").unwrap();
        let unrelated = e.embed_sync("the invoice total was wrong").unwrap();
        assert!(cosine(&q, &related) > cosine(&q, &unrelated));
    }

    #[test]
    fn test_hashing_embedder_empty_text() {
        let e = HashingEmbedder::default();
        assert_eq!(e.embed_sync("  ").unwrap_err(), EmbeddingError::EmptyResponse);
    }

    #[test]
    fn test_openai_embedder_without_runtime() {
        let e = OpenAiEmbedder::new(None, "text-embedding-3-small", "sk-test");
        assert!(matches!(e.embed_sync("hi"), Err(EmbeddingError::Unavailable(_))));
    }
}
