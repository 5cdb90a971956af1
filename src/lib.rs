//! Bee - 带长期记忆的 WhatsApp 聊天机器人
//!
//! 模块划分：
//! - **agent**: 聊天服务（入站消息 → 会话 → 记忆检索 → LLM → 回复）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、时钟、重试、服务上下文、优雅关闭
//! - **integrations**: 消息传输（WhatsApp / Green API）
//! - **llm**: LLM 与嵌入客户端（OpenAI 兼容 / Mock / 本地哈希嵌入）
//! - **memory**: 会话生命周期、消息存储、归档与长期记忆
//! - **observability**: tracing 日志初始化

pub mod agent;
pub mod config;
pub mod core;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
