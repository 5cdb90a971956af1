//! 会话清理调度：后台周期扫描 → 归档 → 转存长期记忆
//!
//! - 每轮：取需要清理的会话（过期活跃 + 已归档未转存），逐个归档并转存
//! - 单个会话失败只记录日志，不影响同轮其它会话；该会话下一轮重试
//! - 启动时先同步跑一轮，恢复上次崩溃遗留的已归档未转存会话
//! - 停止信号只在睡眠边界检查，进行中的一轮不会被打断

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::MemoryResult;
use crate::memory::manager::MemoryManager;
use crate::memory::session_manager::SessionManager;
use crate::memory::Session;

/// 单轮清理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub found: usize,
    pub archived: usize,
    pub transferred: usize,
    pub failed: usize,
    /// 扫描后又收到消息、本轮不再处理的会话
    pub skipped: usize,
}

/// 定期归档并转存过期会话
pub struct CleanupScheduler {
    sessions: Arc<SessionManager>,
    memory: Arc<MemoryManager>,
    interval: Duration,
}

impl CleanupScheduler {
    /// interval 为两轮清理之间的间隔
    pub fn new(sessions: Arc<SessionManager>, memory: Arc<MemoryManager>, interval: Duration) -> Self {
        Self {
            sessions,
            memory,
            interval,
        }
    }

    /// 两轮之间的睡眠间隔
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 执行一轮清理；只有枚举本身失败时返回错误
    pub fn run_iteration(&self) -> MemoryResult<CleanupReport> {
        let pending = self
            .sessions
            .get_sessions_needing_cleanup(self.sessions.timeout())?;
        let mut report = CleanupReport {
            found: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::info!("Cleanup: {} sessions need attention", pending.len());

        for session in &pending {
            match self.cleanup_one(session, &mut report) {
                Ok(true) => report.transferred += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        "Cleanup of session {} failed, will retry next interval: {}",
                        session.session_id,
                        e
                    );
                }
            }
        }
        tracing::info!(
            "Cleanup done: {} archived, {} transferred, {} failed, {} skipped",
            report.archived,
            report.transferred,
            report.failed,
            report.skipped
        );
        Ok(report)
    }

    /// 归档并转存单个会话；会话已恢复活跃时返回 Ok(false)
    fn cleanup_one(&self, session: &Session, report: &mut CleanupReport) -> MemoryResult<bool> {
        let archived = if session.is_archived() {
            session.clone()
        } else {
            let s = self.sessions.archive(session)?;
            if !s.is_archived() {
                return Ok(false);
            }
            report.archived += 1;
            s
        };
        self.memory.transfer(&archived)?;
        Ok(true)
    }

    /// 启动时同步执行一轮（在开始接收消息前调用）
    pub fn run_startup_cleanup(&self) -> MemoryResult<CleanupReport> {
        tracing::info!("Running startup cleanup pass");
        self.run_iteration()
    }

    /// 后台循环：睡眠 interval → 执行一轮，直到 token 取消
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        tracing::info!("Cleanup scheduler started (interval {:?})", self.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            let this = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || this.run_iteration()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("Cleanup iteration failed: {}", e),
                Err(e) => tracing::error!("Cleanup iteration panicked: {}", e),
            }
        }
        tracing::info!("Cleanup scheduler stopped");
    }

    /// 在 tokio 运行时中启动后台循环；关闭时 await 返回的句柄等待本轮结束
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration as ChronoDuration;

    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::core::{Clock, ManualClock, RetryPolicy};
    use crate::llm::{EmbeddingError, EmbeddingProvider, HashingEmbedder};
    use crate::memory::long_term::LongTermMemoryStore;
    use crate::memory::session_store::{SessionStore, SESSION_FILE};
    use crate::memory::vector_store::LocalVectorStore;
    use crate::memory::ChatMessage;

    /// 只对包含 "poison" 的文本失败
    struct PoisonEmbedder(HashingEmbedder);

    impl EmbeddingProvider for PoisonEmbedder {
        fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("poison") {
                return Err(EmbeddingError::Request("rejected".to_string()));
            }
            self.0.embed_sync(text)
        }
    }

    /// 每次嵌入前睡眠，用于在转存进行中发出停止信号
    struct SlowEmbedder {
        inner: HashingEmbedder,
        started: Arc<AtomicBool>,
        delay: Duration,
    }

    impl EmbeddingProvider for SlowEmbedder {
        fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.started.store(true, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.inner.embed_sync(text)
        }
    }

    fn build(
        dir: &std::path::Path,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> (Arc<ManualClock>, Arc<SessionManager>, Arc<LongTermMemoryStore>, Arc<CleanupScheduler>) {
        let clock = Arc::new(ManualClock::default());
        let store = SessionStore::open(dir.join("sessions")).unwrap();
        let sessions =
            Arc::new(SessionManager::new(store, clock.clone(), ChronoDuration::minutes(30)).unwrap());
        let vectors = Arc::new(LocalVectorStore::open(dir.join("vectors")).unwrap());
        let long_term = Arc::new(LongTermMemoryStore::new(vectors, "chat_"));
        let memory = Arc::new(
            MemoryManager::new(sessions.clone(), long_term.clone(), embedder)
                .with_retry(RetryPolicy::no_retry()),
        );
        let scheduler = Arc::new(CleanupScheduler::new(
            sessions.clone(),
            memory,
            Duration::from_millis(20),
        ));
        (clock, sessions, long_term, scheduler)
    }

    #[test]
    fn test_failure_is_isolated_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, sessions, long_term, scheduler) =
            build(dir.path(), Arc::new(PoisonEmbedder(HashingEmbedder::default())));
        sessions
            .append("bad", ChatMessage::user("bad", "bot", "poison pill"))
            .unwrap();
        sessions
            .append("good", ChatMessage::user("good", "bot", "all fine here"))
            .unwrap();
        clock.advance(ChronoDuration::hours(1));

        let report = scheduler.run_iteration().unwrap();
        assert_eq!(report.found, 2);
        assert_eq!(report.archived, 2);
        assert_eq!(report.transferred, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(long_term.count(&long_term.collection_for("good")), 1);
        assert_eq!(long_term.count(&long_term.collection_for("bad")), 0);

        // 下一轮只剩失败的会话，且不会再归档一次
        let report = scheduler.run_iteration().unwrap();
        assert_eq!(report.found, 1);
        assert_eq!(report.archived, 0);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_corrupt_record_does_not_abort_pass() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, sessions, long_term, scheduler) =
            build(dir.path(), Arc::new(HashingEmbedder::default()));
        sessions
            .append("x", ChatMessage::user("x", "bot", "hello world"))
            .unwrap();
        let broken = dir
            .path()
            .join("sessions")
            .join("expired")
            .join("2026-01-01")
            .join("session_broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(SESSION_FILE), "{").unwrap();
        clock.advance(ChronoDuration::hours(1));

        let report = scheduler.run_iteration().unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(long_term.count(&long_term.collection_for("x")), 1);
    }

    #[test]
    fn test_session_revived_after_scan_is_not_transferred() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, sessions, long_term, scheduler) =
            build(dir.path(), Arc::new(HashingEmbedder::default()));
        let start = clock.now();
        sessions
            .append("x", ChatMessage::user("x", "bot", "first"))
            .unwrap();

        clock.set(start + ChronoDuration::minutes(30) + ChronoDuration::seconds(1));
        let pending = sessions
            .get_sessions_needing_cleanup(sessions.timeout())
            .unwrap();
        assert_eq!(pending.len(), 1);

        // 扫描之后、归档之前又来了一条消息
        clock.set(start + ChronoDuration::minutes(30));
        let (id, _) = sessions
            .append("x", ChatMessage::user("x", "bot", "second"))
            .unwrap();
        clock.set(start + ChronoDuration::minutes(30) + ChronoDuration::seconds(1));

        let mut report = CleanupReport::default();
        assert!(!scheduler.cleanup_one(&pending[0], &mut report).unwrap());
        assert_eq!(report.archived, 0);
        assert_eq!(sessions.active_session("x").unwrap().session_id, id);
        assert_eq!(long_term.count(&long_term.collection_for("x")), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_loop_transfers_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, sessions, long_term, scheduler) =
            build(dir.path(), Arc::new(HashingEmbedder::default()));
        sessions
            .append("x", ChatMessage::user("x", "bot", "remember the parking spot"))
            .unwrap();
        clock.advance(ChronoDuration::hours(1));

        let token = CancellationToken::new();
        let handle = scheduler.clone().spawn(token.clone());

        let collection = long_term.collection_for("x");
        for _ in 0..100 {
            if long_term.count(&collection) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(long_term.count(&collection), 1);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler should stop within one interval")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_in_flight_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let started = Arc::new(AtomicBool::new(false));
        let embedder = Arc::new(SlowEmbedder {
            inner: HashingEmbedder::default(),
            started: started.clone(),
            delay: Duration::from_millis(150),
        });
        let (clock, sessions, long_term, scheduler) = build(dir.path(), embedder);
        for text in ["pick up the dry cleaning", "call the dentist", "renew the passport"] {
            sessions.append("x", ChatMessage::user("x", "bot", text)).unwrap();
        }
        clock.advance(ChronoDuration::hours(1));

        let token = CancellationToken::new();
        let handle = scheduler.clone().spawn(token.clone());
        for _ in 0..200 {
            if started.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(started.load(Ordering::SeqCst));

        // 转存进行中发出停止：本轮仍须完整结束
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler should stop after the current pass")
            .unwrap();

        let archived: Vec<Session> = sessions
            .store()
            .list_archived()
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(archived.len(), 1);
        assert!(archived[0].transferred_to_longterm);
        assert_eq!(long_term.count(&long_term.collection_for("x")), 3);
    }
}
