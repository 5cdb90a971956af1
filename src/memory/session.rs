//! 会话记录（session.json）
//!
//! 一个会话 = 一个聊天对象在一段不活跃超时之内的连续对话。
//! 状态只能前进：Active → ExpiredPendingArchive → ArchivedPendingTransfer → ArchivedTransferred。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 会话 ID
pub type SessionId = String;

/// 归档子树的根目录名：<root>/expired/<date>/<session_id>/
pub const EXPIRED_DIR: &str = "expired";

/// 会话生命周期状态（由记录字段推导，不单独存储）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Active,
    ExpiredPendingArchive,
    ArchivedPendingTransfer,
    ArchivedTransferred,
}

/// 会话记录（session.json）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub chat_identity: String,
    /// 按 order_num 排列的消息 ID
    #[serde(default)]
    pub message_ids: Vec<String>,
    /// 单调递增，append 一次加一
    #[serde(default)]
    pub message_counter: u64,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub total_tokens: u64,
    /// 全部消息写入长期记忆后才置 true；崩溃恢复只看这个字段
    #[serde(default)]
    pub transferred_to_longterm: bool,
    /// 相对存储根目录的路径：活跃时为 <session_id>，归档后为 expired/<date>/<session_id>
    pub storage_path: PathBuf,
}

impl Session {
    /// 新会话：随机 ID，created_at = last_active = now，位于活跃目录
    pub fn new(chat_identity: &str, now: DateTime<Utc>) -> Self {
        let session_id = format!("session_{}", uuid::Uuid::new_v4());
        Self {
            storage_path: PathBuf::from(&session_id),
            session_id,
            chat_identity: chat_identity.to_string(),
            message_ids: Vec::new(),
            message_counter: 0,
            created_at: now,
            last_active: now,
            total_tokens: 0,
            transferred_to_longterm: false,
        }
    }

    /// 是否已位于归档子树下
    pub fn is_archived(&self) -> bool {
        is_archived_path(&self.storage_path)
    }

    /// 不活跃时间是否已超过 timeout
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_active > timeout
    }

    /// 过期日期 = last_active + timeout 所在的 UTC 日期，用作归档分区
    pub fn expiry_date(&self, timeout: Duration) -> NaiveDate {
        (self.last_active + timeout).date_naive()
    }

    /// 归档后的相对路径
    pub fn archived_path(&self, timeout: Duration) -> PathBuf {
        Path::new(EXPIRED_DIR)
            .join(self.expiry_date(timeout).format("%Y-%m-%d").to_string())
            .join(&self.session_id)
    }

    /// 由记录推导状态，不单独持久化
    pub fn state(&self, now: DateTime<Utc>, timeout: Duration) -> SessionState {
        match (self.is_archived(), self.transferred_to_longterm) {
            (true, true) => SessionState::ArchivedTransferred,
            (true, false) => SessionState::ArchivedPendingTransfer,
            (false, _) if self.is_expired(now, timeout) => SessionState::ExpiredPendingArchive,
            (false, _) => SessionState::Active,
        }
    }
}

pub(crate) fn is_archived_path(path: &Path) -> bool {
    path.components()
        .next()
        .is_some_and(|c| c.as_os_str() == EXPIRED_DIR)
}
