//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__SESSION__TIMEOUT_SECS=600`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::{MemoryError, MemoryResult};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub session: SessionSection,
    pub cleanup: CleanupSection,
    pub memory: MemorySection,
    pub whatsapp: WhatsappSection,
}

/// [app] 段：应用名、日志级别
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 默认日志指令，RUST_LOG 优先
    pub log_level: String,
    /// 机器人自身标识（写入消息的 sender/recipient）
    pub bot_identity: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            log_level: "info".to_string(),
            bot_identity: "bee".to_string(),
        }
    }
}

/// [llm] 段：聊天模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub system_prompt: String,
    /// 提示中携带的当前会话最近消息数
    pub max_context_messages: usize,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            base_url: None,
            api_key: None,
            system_prompt: "You are Bee, a helpful WhatsApp assistant. Answer concisely.".to_string(),
            max_context_messages: 20,
        }
    }
}

/// [embedding] 段：嵌入模型与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// 本地哈希嵌入的维度（无 API Key 时使用）
    pub dimensions: usize,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            api_key: None,
            dimensions: 256,
            retry_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// [session] 段：会话目录与不活跃超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub storage_root: PathBuf,
    pub timeout_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("data/sessions"),
            timeout_secs: 1800,
        }
    }
}

/// [cleanup] 段：清理间隔
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupSection {
    pub interval_secs: u64,
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// [memory] 段：向量库位置、集合命名与检索参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub vector_root: PathBuf,
    pub collection_prefix: String,
    pub min_similarity: f32,
    pub recall_top_k: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            vector_root: PathBuf::from("data/vectors"),
            collection_prefix: "chat_".to_string(),
            min_similarity: 0.3,
            recall_top_k: 5,
        }
    }
}

/// [whatsapp] 段：Green API 实例
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhatsappSection {
    pub api_url: String,
    pub id_instance: Option<String>,
    pub api_token: Option<String>,
    pub listen_addr: String,
}

impl Default for WhatsappSection {
    fn default() -> Self {
        Self {
            api_url: "https://api.green-api.com".to_string(),
            id_instance: None,
            api_token: None,
            listen_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// 启动前校验；失败即为致命配置错误
    pub fn validate(&self) -> MemoryResult<()> {
        if self.session.storage_root.as_os_str().is_empty() {
            return Err(MemoryError::Configuration("session.storage_root is empty".into()));
        }
        if self.memory.vector_root.as_os_str().is_empty() {
            return Err(MemoryError::Configuration("memory.vector_root is empty".into()));
        }
        if self.session.timeout_secs == 0 {
            return Err(MemoryError::Configuration("session.timeout_secs must be > 0".into()));
        }
        if self.cleanup.interval_secs == 0 {
            return Err(MemoryError::Configuration("cleanup.interval_secs must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.memory.min_similarity) {
            return Err(MemoryError::Configuration(format!(
                "memory.min_similarity must be within [0, 1], got {}",
                self.memory.min_similarity
            )));
        }
        if self.memory.recall_top_k == 0 {
            return Err(MemoryError::Configuration("memory.recall_top_k must be > 0".into()));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
