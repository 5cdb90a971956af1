//! WhatsApp 集成（Green API）
//!
//! Green API 把通知 POST 到 /webhook；解析出文本消息后交给 ChatService 处理，
//! 回复通过 sendMessage 接口发回。Webhook 立即返回 200，处理在后台任务中进行。

use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::ChatService;
use crate::integrations::{InboundMessage, MessageTransport};

/// WhatsApp 单条消息长度上限内的分段大小（按字符）
const MAX_CHUNK_CHARS: usize = 4000;

pub struct WhatsappState {
    pub service: Arc<ChatService>,
    pub transport: Arc<dyn MessageTransport>,
}

/// Green API 通知（只解析需要的字段）
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GreenNotification {
    pub type_webhook: String,
    pub timestamp: Option<i64>,
    pub id_message: Option<String>,
    pub sender_data: Option<SenderData>,
    pub message_data: Option<MessageData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderData {
    pub chat_id: String,
    pub sender: Option<String>,
    pub sender_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub type_message: String,
    pub text_message_data: Option<TextMessageData>,
    pub extended_text_message_data: Option<ExtendedTextMessageData>,
    pub file_message_data: Option<FileMessageData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessageData {
    pub text_message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedTextMessageData {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMessageData {
    pub download_url: Option<String>,
    pub caption: Option<String>,
    pub file_name: Option<String>,
}

/// 将通知转换为入站消息；非入站消息或无内容时返回 None
pub fn parse_notification(n: GreenNotification) -> Option<InboundMessage> {
    if n.type_webhook != "incomingMessageReceived" {
        return None;
    }
    let sender_data = n.sender_data?;
    let data = n.message_data?;

    let (text, media) = match data.type_message.as_str() {
        "textMessage" => (data.text_message_data?.text_message, None),
        "extendedTextMessage" | "quotedMessage" => (data.extended_text_message_data?.text, None),
        "imageMessage" | "documentMessage" | "audioMessage" | "videoMessage" => {
            let file = data.file_message_data?;
            let media = file.download_url.or(file.file_name);
            (file.caption.unwrap_or_default(), media)
        }
        other => {
            tracing::debug!("Ignoring WhatsApp message type {}", other);
            return None;
        }
    };
    if text.trim().is_empty() && media.is_none() {
        return None;
    }

    let timestamp: DateTime<Utc> = n
        .timestamp
        .and_then(|t| Utc.timestamp_opt(t, 0).single())
        .unwrap_or_else(Utc::now);
    Some(InboundMessage {
        sender: sender_data.sender.unwrap_or_else(|| sender_data.chat_id.clone()),
        chat_identity: sender_data.chat_id,
        message_id: n.id_message,
        text,
        timestamp,
        media,
    })
}

pub fn create_router(state: Arc<WhatsappState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_receive))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// POST /webhook - 接收 Green API 通知
async fn webhook_receive(
    State(state): State<Arc<WhatsappState>>,
    Json(notification): Json<GreenNotification>,
) -> StatusCode {
    let Some(inbound) = parse_notification(notification) else {
        return StatusCode::OK;
    };

    tokio::spawn(async move {
        let chat = inbound.chat_identity.clone();
        let reply = match state.service.handle(inbound).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Failed to handle message from {}: {:#}", chat, e);
                "Sorry, something went wrong while processing your message.".to_string()
            }
        };
        if let Err(e) = state.transport.send_text(&chat, &reply).await {
            tracing::error!("Failed to send WhatsApp message to {}: {}", chat, e);
        }
    });

    StatusCode::OK
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    message: &'a str,
}

/// 通过 Green API sendMessage 发送文本
pub struct GreenApiTransport {
    client: reqwest::Client,
    api_url: String,
    id_instance: String,
    api_token: String,
}

impl GreenApiTransport {
    pub fn new(api_url: &str, id_instance: &str, api_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            id_instance: id_instance.to_string(),
            api_token: api_token.to_string(),
        }
    }

    fn send_url(&self) -> String {
        format!(
            "{}/waInstance{}/sendMessage/{}",
            self.api_url, self.id_instance, self.api_token
        )
    }
}

/// 按字符切分长消息
fn split_chunks(body: &str, max_chars: usize) -> Vec<String> {
    if body.chars().count() <= max_chars {
        return vec![body.to_string()];
    }
    body.chars()
        .collect::<Vec<_>>()
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

#[async_trait]
impl MessageTransport for GreenApiTransport {
    async fn send_text(&self, chat_identity: &str, text: &str) -> anyhow::Result<()> {
        let url = self.send_url();
        for chunk in split_chunks(text, MAX_CHUNK_CHARS) {
            let resp = self
                .client
                .post(&url)
                .json(&SendMessageRequest {
                    chat_id: chat_identity,
                    message: &chunk,
                })
                .send()
                .await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Green API error {}: {}", status, body);
            }
        }
        Ok(())
    }
}
