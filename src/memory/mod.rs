//! 记忆层：会话（短期，磁盘目录）→ 归档 → 长期（向量检索）
//!
//! - message / session：数据模型
//! - message_store / session_store：磁盘布局与持久化
//! - session_manager：会话状态机（创建、追加、过期、归档）
//! - vector_store / long_term：向量索引与按聊天对象划分的长期记忆
//! - manager：转存与检索
//! - cleanup：后台清理调度

pub mod cleanup;
pub mod long_term;
pub mod manager;
pub mod message;
pub mod message_store;
pub mod session;
pub mod session_manager;
pub mod session_store;
pub mod tokenizer;
pub mod vector_store;

pub use cleanup::{CleanupReport, CleanupScheduler};
pub use long_term::{collection_name, memory_key, LongTermMemoryStore, Memory, MemoryPayload};
pub use manager::{MemoryManager, RecallDefaults};
pub use message::{ChatMessage, Role};
pub use message_store::MessageStore;
pub use session::{Session, SessionId, SessionState, EXPIRED_DIR};
pub use session_manager::SessionManager;
pub use session_store::SessionStore;
pub use vector_store::{LocalVectorStore, VectorHit, VectorStore};
