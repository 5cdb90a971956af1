//! 聊天消息：持久化的最小单元
//!
//! 每条消息独立写入会话目录 messages/ 下的一个 JSON 文件，属于且仅属于一个会话。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// 单条聊天消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    /// 所属会话，append 时填写
    #[serde(default)]
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub sender: String,
    pub recipient: String,
    /// 发送时间（来自传输层）
    pub timestamp: DateTime<Utc>,
    /// 进入系统的时间
    pub received_at: DateTime<Utc>,
    /// 会话内序号，等于 append 时的 message_counter（从 1 开始）
    #[serde(default)]
    pub order_num: u64,
    /// 附带媒体的引用（如下载地址或文件名），内容提取不在本模块
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
}

impl ChatMessage {
    fn new(role: Role, sender: &str, recipient: &str, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            message_id: format!("msg_{}", uuid::Uuid::new_v4()),
            session_id: String::new(),
            role,
            content: content.into(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            timestamp: now,
            received_at: now,
            order_num: 0,
            media: None,
        }
    }

    /// 用户发给机器人的消息
    pub fn user(chat_identity: &str, bot_identity: &str, content: impl Into<String>) -> Self {
        Self::new(Role::User, chat_identity, bot_identity, content)
    }

    /// 机器人回复
    pub fn assistant(chat_identity: &str, bot_identity: &str, content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, bot_identity, chat_identity, content)
    }

    /// 使用传输层提供的消息 ID（便于与 WhatsApp 消息对应）
    pub fn with_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn with_media(mut self, media: impl Into<String>) -> Self {
        self.media = Some(media.into());
        self
    }

    /// 写入向量库的文本表示
    pub fn embedding_text(&self) -> String {
        match &self.media {
            Some(media) => format!("{}: {} [media: {}]", self.role.as_str(), self.content, media),
            None => format!("{}: {}", self.role.as_str(), self.content),
        }
    }
}
