//! 记忆子系统错误类型
//!
//! 与 CleanupScheduler 配合：TransientProvider / ArchivalIo / CorruptSessionRecord 只影响单个会话，
//! 下一轮清理重试；Configuration 在启动时致命。

use std::path::PathBuf;

use thiserror::Error;

use crate::llm::EmbeddingError;

/// 会话存储、归档、转存过程中可能出现的错误
#[derive(Error, Debug)]
pub enum MemoryError {
    /// 嵌入或向量库 I/O 失败；会话保持未转存，下一轮重试
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// 归档移动目录失败；会话保持原状态
    #[error("Archival failed for session {session_id}: {source}")]
    ArchivalIo {
        session_id: String,
        #[source]
        source: std::io::Error,
    },

    /// session.json 无法读取或格式错误；本轮跳过
    #[error("Corrupt session record at {path}: {reason}")]
    CorruptSessionRecord { path: PathBuf, reason: String },

    #[error("Config error: {0}")]
    Configuration(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MemoryError {
    /// 带路径的 IO 错误
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// 是否可在下一轮清理中重试（配置错误不可重试）
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}

impl From<EmbeddingError> for MemoryError {
    fn from(e: EmbeddingError) -> Self {
        Self::TransientProvider(e.to_string())
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;
