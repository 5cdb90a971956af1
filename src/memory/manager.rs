//! 记忆管理：把过期会话转存进长期记忆，并提供检索（recall）
//!
//! 转存以会话为单位重试、以消息为单位幂等：任何一条消息嵌入或写入失败，会话保持
//! transferred_to_longterm = false，下一轮清理整段重跑；已写入的条目按 key 覆盖，不会重复。

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::{MemoryResult, RetryPolicy};
use crate::llm::EmbeddingProvider;
use crate::memory::long_term::{LongTermMemoryStore, Memory};
use crate::memory::session_manager::SessionManager;
use crate::memory::Session;

/// recall 默认参数
#[derive(Debug, Clone, Copy)]
pub struct RecallDefaults {
    pub top_k: usize,
    pub min_similarity: f32,
}

impl Default for RecallDefaults {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.3,
        }
    }
}

/// 长期记忆的写入（转存）与读取（检索）入口
pub struct MemoryManager {
    sessions: Arc<SessionManager>,
    long_term: Arc<LongTermMemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    /// 转存（后台）用的重试策略
    retry: RetryPolicy,
    /// 检索在入站路径上，默认不重试：嵌入不可用时直接降级
    recall_retry: RetryPolicy,
    defaults: RecallDefaults,
}

impl MemoryManager {
    /// 转存默认按 RetryPolicy::default() 重试，检索不重试
    pub fn new(
        sessions: Arc<SessionManager>,
        long_term: Arc<LongTermMemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            sessions,
            long_term,
            embedder,
            retry: RetryPolicy::default(),
            recall_retry: RetryPolicy::no_retry(),
            defaults: RecallDefaults::default(),
        }
    }

    /// 覆盖转存时的重试策略
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 覆盖检索时的重试策略
    pub fn with_recall_retry(mut self, retry: RetryPolicy) -> Self {
        self.recall_retry = retry;
        self
    }

    pub fn with_recall_defaults(mut self, defaults: RecallDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// 底层长期记忆存储
    pub fn long_term(&self) -> &Arc<LongTermMemoryStore> {
        &self.long_term
    }

    fn embed(&self, retry: &RetryPolicy, text: &str) -> MemoryResult<Vec<f32>> {
        Ok(retry.run(self.embedder.name(), || self.embedder.embed_sync(text))?)
    }

    /// 转存会话全部消息（按 order_num），全部成功并落盘后才把会话标记为已转存
    ///
    /// 调用方应先完成归档。已转存的会话直接返回。
    pub fn transfer(&self, session: &Session) -> MemoryResult<Session> {
        let mut current = self.sessions.store().reload(session)?;
        if current.transferred_to_longterm {
            tracing::debug!("Session {} already transferred", current.session_id);
            return Ok(current);
        }

        let messages = self.sessions.messages_of(&current)?;
        let collection = self.long_term.collection_for(&current.chat_identity);
        self.long_term.ensure_collection(&collection)?;

        // 先全部嵌入再写入：嵌入失败时集合里不留下这个会话的半截条目
        let mut embedded = Vec::with_capacity(messages.len());
        for message in &messages {
            if message.content.trim().is_empty() && message.media.is_none() {
                tracing::debug!("Skipping empty message {}", message.message_id);
                continue;
            }
            embedded.push((message, self.embed(&self.retry, &message.embedding_text())?));
        }
        let upserted = embedded.len();
        for (message, vector) in embedded {
            self.long_term.upsert_message(
                &collection,
                &current.session_id,
                &current.chat_identity,
                message,
                vector,
            )?;
        }
        self.long_term.flush_collection(&collection)?;

        current.transferred_to_longterm = true;
        self.sessions.store().save(&current)?;
        tracing::info!(
            "Transferred session {} to {} ({} of {} messages)",
            current.session_id,
            collection,
            upserted,
            messages.len()
        );
        Ok(current)
    }

    /// 在多个集合中检索：过滤低于 min_similarity 的结果，按相似度降序（相同时较新的在前），取 top_k
    pub fn recall(
        &self,
        query: &str,
        collection_names: &[String],
        top_k: usize,
        min_similarity: f32,
    ) -> MemoryResult<Vec<Memory>> {
        if query.trim().is_empty() || top_k == 0 || collection_names.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embed(&self.recall_retry, query)?;

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for collection in collection_names {
            for memory in self.long_term.search(collection, &vector, top_k)? {
                if memory.score >= min_similarity && seen.insert(memory.key.clone()) {
                    results.push(memory);
                }
            }
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.payload.timestamp.cmp(&a.payload.timestamp))
        });
        results.truncate(top_k);
        Ok(results)
    }

    /// 按默认参数检索某个聊天对象的长期记忆
    pub fn recall_for_chat(&self, chat_identity: &str, query: &str) -> MemoryResult<Vec<Memory>> {
        let collection = self.long_term.collection_for(chat_identity);
        self.recall(
            query,
            &[collection],
            self.defaults.top_k,
            self.defaults.min_similarity,
        )
    }
}
