//! 长期记忆：基于向量库的跨会话检索
//!
//! 每个聊天对象一个集合，集合名由 chat_identity 规范化得到；每条消息一条向量，
//! key = `<session_id>:<message_id>`，因此重复转存同一会话只会覆盖而不会重复。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{MemoryError, MemoryResult};
use crate::memory::vector_store::VectorStore;
use crate::memory::{ChatMessage, Role};

/// 存入向量库的 payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPayload {
    pub session_id: String,
    pub message_id: String,
    pub chat_identity: String,
    pub role: Role,
    pub content: String,
    pub order_num: u64,
    pub timestamp: DateTime<Utc>,
}

/// 一条检索到的长期记忆
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    pub key: String,
    pub score: f32,
    pub payload: MemoryPayload,
}

/// 向量条目 key，只依赖 (session_id, message_id)
pub fn memory_key(session_id: &str, message_id: &str) -> String {
    format!("{}:{}", session_id, message_id)
}

/// 将 chat_identity 编码为集合名
///
/// 去掉首尾空白并转小写（WhatsApp ID 不区分大小写）；[a-z0-9] 原样保留，
/// 其余字节编码为 `_xx`（两位十六进制）。'_' 本身也被编码，因此不同 ID 不会落到同一集合。
pub fn collection_name(prefix: &str, chat_identity: &str) -> String {
    let mut encoded = String::with_capacity(prefix.len() + chat_identity.len() * 2);
    encoded.push_str(prefix);
    for b in chat_identity.trim().to_ascii_lowercase().bytes() {
        if b.is_ascii_lowercase() || b.is_ascii_digit() {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("_{:02x}", b));
        }
    }
    encoded
}

/// 长期记忆：每个聊天对象一个向量集合
pub struct LongTermMemoryStore {
    vectors: Arc<dyn VectorStore>,
    collection_prefix: String,
}

impl LongTermMemoryStore {
    /// collection_prefix 加在每个集合名前，例如 "chat_"
    pub fn new(vectors: Arc<dyn VectorStore>, collection_prefix: impl Into<String>) -> Self {
        Self {
            vectors,
            collection_prefix: collection_prefix.into(),
        }
    }

    /// 聊天对象对应的集合名
    pub fn collection_for(&self, chat_identity: &str) -> String {
        collection_name(&self.collection_prefix, chat_identity)
    }

    /// 集合不存在时创建（空集合，flush 后才落盘）
    pub fn ensure_collection(&self, collection: &str) -> MemoryResult<()> {
        self.vectors.get_or_create(collection)
    }

    /// 写入一条消息的向量；key 为 session_id:message_id，重复写入覆盖原条目
    pub fn upsert_message(
        &self,
        collection: &str,
        session_id: &str,
        chat_identity: &str,
        message: &ChatMessage,
        vector: Vec<f32>,
    ) -> MemoryResult<()> {
        let payload = MemoryPayload {
            session_id: session_id.to_string(),
            message_id: message.message_id.clone(),
            chat_identity: chat_identity.to_string(),
            role: message.role,
            content: message.content.clone(),
            order_num: message.order_num,
            timestamp: message.timestamp,
        };
        let payload = serde_json::to_value(&payload)
            .map_err(|e| MemoryError::TransientProvider(e.to_string()))?;
        self.vectors.upsert(
            collection,
            &memory_key(session_id, &message.message_id),
            vector,
            payload,
        )
    }

    /// 在单个集合中检索；payload 无法解析的条目跳过
    pub fn search(&self, collection: &str, vector: &[f32], top_k: usize) -> MemoryResult<Vec<Memory>> {
        let hits = self.vectors.query(collection, vector, top_k)?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| match serde_json::from_value::<MemoryPayload>(hit.payload) {
                Ok(payload) => Some(Memory {
                    key: hit.key,
                    score: hit.score,
                    payload,
                }),
                Err(e) => {
                    tracing::warn!("Skipping memory {} with bad payload: {}", hit.key, e);
                    None
                }
            })
            .collect())
    }

    /// 集合内条目数；集合不存在时为 0
    pub fn count(&self, collection: &str) -> usize {
        self.vectors.count(collection)
    }

    /// 将集合快照落盘
    pub fn flush_collection(&self, collection: &str) -> MemoryResult<()> {
        self.vectors.flush_collection(collection)
    }

    /// 全部集合落盘
    pub fn flush(&self) -> MemoryResult<()> {
        self.vectors.flush()
    }
}
