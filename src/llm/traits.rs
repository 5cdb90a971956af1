//! LLM 客户端抽象
//!
//! 聊天回复生成属于外部协作方：核心只依赖 complete（非流式）。

use async_trait::async_trait;

use crate::memory::Role;

/// 发送给 LLM 的一条提示消息
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 对话补全客户端
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首条回复内容
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, String>;

    /// 累计 token 使用：(prompt, completion, total)；默认 (0, 0, 0)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
