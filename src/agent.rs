//! 聊天服务：单条入站消息的处理流程
//!
//! 追加用户消息 → 检索该聊天的长期记忆 → 组装提示（系统提示 + 记忆 + 当前会话最近消息）
//! → 调用 LLM → 追加助手回复。长期记忆检索失败只降级，不影响对话。

use std::sync::Arc;

use anyhow::Context;

use crate::core::{MemoryResult, ServiceContext};
use crate::integrations::InboundMessage;
use crate::llm::{LlmClient, PromptMessage};
use crate::memory::{ChatMessage, Memory, Role};

/// 单条入站消息的处理流水线
pub struct ChatService {
    ctx: Arc<ServiceContext>,
    llm: Arc<dyn LlmClient>,
}

impl ChatService {
    pub fn new(ctx: Arc<ServiceContext>, llm: Arc<dyn LlmClient>) -> Self {
        Self { ctx, llm }
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    /// 处理一条入站消息，返回回复文本
    pub async fn handle(&self, inbound: InboundMessage) -> anyhow::Result<String> {
        let chat = inbound.chat_identity.clone();
        let bot = self.ctx.config.app.bot_identity.clone();

        let mut message = ChatMessage::user(&inbound.sender, &bot, inbound.text.clone())
            .with_timestamp(inbound.timestamp)
            .with_received_at(self.ctx.clock.now());
        if let Some(id) = inbound.message_id {
            message = message.with_id(id);
        }
        if let Some(media) = inbound.media {
            message = message.with_media(media);
        }

        let ctx = self.ctx.clone();
        let query = inbound.text;
        let chat_for_task = chat.clone();
        let (history, memories) = tokio::task::spawn_blocking(move || -> MemoryResult<_> {
            ctx.sessions.append(&chat_for_task, message)?;
            let history = ctx
                .sessions
                .recent_messages(&chat_for_task, ctx.config.llm.max_context_messages)?;
            let memories = match ctx.memory.recall_for_chat(&chat_for_task, &query) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Recall failed for {}, answering without memories: {}", chat_for_task, e);
                    Vec::new()
                }
            };
            Ok((history, memories))
        })
        .await
        .context("ingestion task panicked")??;

        let prompt = build_prompt(&self.ctx.config.llm.system_prompt, &memories, &history);
        let reply = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|e| anyhow::anyhow!("LLM error: {}", e))?;

        let ctx = self.ctx.clone();
        let reply_msg = ChatMessage::assistant(&chat, &bot, reply.clone())
            .with_received_at(self.ctx.clock.now());
        tokio::task::spawn_blocking(move || ctx.sessions.append(&chat, reply_msg))
            .await
            .context("ingestion task panicked")??;

        Ok(reply)
    }
}

/// 组装提示：系统提示（附长期记忆）+ 当前会话消息
pub fn build_prompt(
    system_prompt: &str,
    memories: &[Memory],
    history: &[ChatMessage],
) -> Vec<PromptMessage> {
    let mut system = system_prompt.trim().to_string();
    if !memories.is_empty() {
        system.push_str("\n\nRelevant memories from earlier conversations:\n");
        for m in memories {
            system.push_str(&format!(
                "- [{}] {}: {}\n",
                m.payload.timestamp.format("%Y-%m-%d"),
                m.payload.role.as_str(),
                m.payload.content
            ));
        }
    }

    let mut prompt = vec![PromptMessage::system(system)];
    prompt.extend(history.iter().map(|m| match m.role {
        Role::Assistant => PromptMessage::assistant(m.content.clone()),
        Role::System => PromptMessage::system(m.content.clone()),
        Role::User => PromptMessage::user(match &m.media {
            Some(media) => format!("{} [media: {}]", m.content, media),
            None => m.content.clone(),
        }),
    }));
    prompt
}
