//! 外部集成：消息传输（WhatsApp 需 whatsapp feature 与公网 Webhook 域名）
//!
//! 核心只依赖 InboundMessage 与 MessageTransport，不关心线上格式。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[cfg(feature = "whatsapp")]
pub mod whatsapp;

/// 传输层交给核心的一条入站消息
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub chat_identity: String,
    pub sender: String,
    /// 传输层消息 ID（如有）
    pub message_id: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub media: Option<String>,
}

impl InboundMessage {
    pub fn text(chat_identity: impl Into<String>, text: impl Into<String>) -> Self {
        let chat_identity = chat_identity.into();
        Self {
            sender: chat_identity.clone(),
            chat_identity,
            message_id: None,
            text: text.into(),
            timestamp: Utc::now(),
            media: None,
        }
    }
}

/// 出站：向聊天对象发送文本
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send_text(&self, chat_identity: &str, text: &str) -> anyhow::Result<()>;
}
