//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 回显最后一条 User 消息，并报告提示中附带的长期记忆条数。

use async_trait::async_trait;

use crate::llm::{LlmClient, PromptMessage};
use crate::memory::Role;

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let recalled = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .flat_map(|m| m.content.lines())
            .filter(|l| l.starts_with("- "))
            .count();

        Ok(format!("Echo from Mock: {} (memories: {})", last_user, recalled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let reply = MockLlmClient
            .complete(&[
                PromptMessage::system("Relevant memories:\n- user: likes tea"),
                PromptMessage::user("first"),
                PromptMessage::assistant("ok"),
                PromptMessage::user("second"),
            ])
            .await
            .unwrap();
        assert_eq!(reply, "Echo from Mock: second (memories: 1)");
    }
}
