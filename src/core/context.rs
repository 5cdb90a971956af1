//! 服务上下文：进程启动时构建一次，显式传给各组件（替代全局单例）
//!
//! 生命周期：build → run_startup_cleanup → 启动调度器与入口 → shutdown。

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::config::AppConfig;
use crate::core::{Clock, MemoryResult, RetryPolicy, SystemClock};
use crate::llm::{create_embedder_from_config, EmbeddingProvider};
use crate::memory::{
    CleanupScheduler, LocalVectorStore, LongTermMemoryStore, MemoryManager, RecallDefaults,
    SessionManager, SessionStore,
};

/// 进程内共享的服务组件，启动时构建一次
pub struct ServiceContext {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub sessions: Arc<SessionManager>,
    pub long_term: Arc<LongTermMemoryStore>,
    pub memory: Arc<MemoryManager>,
    pub scheduler: Arc<CleanupScheduler>,
}

impl ServiceContext {
    /// 按配置组装全部组件；配置非法时返回 Configuration 错误
    pub fn build(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> MemoryResult<Self> {
        config.validate()?;

        let store = SessionStore::open(&config.session.storage_root)?;
        let timeout = Duration::seconds(config.session.timeout_secs as i64);
        let sessions = Arc::new(SessionManager::new(store, clock.clone(), timeout)?);

        let vectors = Arc::new(LocalVectorStore::open(&config.memory.vector_root)?);
        let long_term = Arc::new(LongTermMemoryStore::new(
            vectors,
            config.memory.collection_prefix.clone(),
        ));

        let retry = RetryPolicy::new(
            config.embedding.retry_attempts,
            StdDuration::from_millis(config.embedding.retry_backoff_ms),
        );
        let memory = Arc::new(
            MemoryManager::new(sessions.clone(), long_term.clone(), embedder)
                .with_retry(retry)
                .with_recall_retry(RetryPolicy::no_retry())
                .with_recall_defaults(RecallDefaults {
                    top_k: config.memory.recall_top_k,
                    min_similarity: config.memory.min_similarity,
                }),
        );

        let scheduler = Arc::new(CleanupScheduler::new(
            sessions.clone(),
            memory.clone(),
            StdDuration::from_secs(config.cleanup.interval_secs),
        ));

        Ok(Self {
            config,
            clock,
            sessions,
            long_term,
            memory,
            scheduler,
        })
    }

    /// 生产环境：系统时钟 + 按配置选择嵌入提供方
    pub fn from_config(config: AppConfig) -> MemoryResult<Self> {
        let embedder = create_embedder_from_config(
            config.embedding.base_url.as_deref(),
            &config.embedding.model,
            config.embedding.api_key.as_deref(),
            config.embedding.dimensions,
        );
        Self::build(config, Arc::new(SystemClock), embedder)
    }

    /// 关闭：向量索引落盘
    pub fn shutdown(&self) -> MemoryResult<()> {
        self.long_term.flush()?;
        tracing::info!("Service context shut down");
        Ok(())
    }
}
