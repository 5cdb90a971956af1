//! 会话生命周期集成测试：追加 → 过期 → 归档 → 转存 → 检索，以及崩溃恢复

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use bee::config::AppConfig;
    use bee::core::{Clock, ManualClock, ServiceContext};
    use bee::llm::{EmbeddingError, EmbeddingProvider, HashingEmbedder};
    use bee::memory::{ChatMessage, MessageStore, Session, SessionState, EXPIRED_DIR};
    use chrono::{Duration, Utc};

    const TIMEOUT_SECS: u64 = 1800;

    fn config_in(dir: &Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.session.storage_root = dir.join("sessions");
        cfg.session.timeout_secs = TIMEOUT_SECS;
        cfg.memory.vector_root = dir.join("vectors");
        cfg.embedding.retry_attempts = 1;
        cfg.embedding.retry_backoff_ms = 0;
        cfg
    }

    fn context(
        dir: &Path,
        clock: Arc<ManualClock>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> ServiceContext {
        ServiceContext::build(config_in(dir), clock, embedder).unwrap()
    }

    fn past_timeout() -> Duration {
        Duration::seconds(TIMEOUT_SECS as i64 + 60)
    }

    /// 内容含 "poison" 的消息一律嵌入失败
    struct PoisonEmbedder(HashingEmbedder);

    impl EmbeddingProvider for PoisonEmbedder {
        fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("poison") {
                return Err(EmbeddingError::Unavailable("provider down".to_string()));
            }
            self.0.embed_sync(text)
        }
    }

    #[test]
    fn test_append_creates_session() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let ctx = context(dir.path(), clock.clone(), Arc::new(HashingEmbedder::default()));

        let (id, session) = ctx
            .sessions
            .append("X", ChatMessage::user("X", "bee", "hello"))
            .unwrap();
        assert_eq!(session.session_id, id);
        assert_eq!(session.message_counter, 1);
        assert!(!session.transferred_to_longterm);
        assert_eq!(session.state(clock.now(), Duration::seconds(TIMEOUT_SECS as i64)), SessionState::Active);
        assert!(dir.path().join("sessions").join(&id).join("session.json").exists());
    }

    #[test]
    fn test_cleanup_archives_and_transfers_expired_session() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let ctx = context(dir.path(), clock.clone(), Arc::new(HashingEmbedder::default()));

        let (id, _) = ctx
            .sessions
            .append("X", ChatMessage::user("X", "bee", "remember my flight is on monday"))
            .unwrap();
        clock.advance(past_timeout());

        let report = ctx.scheduler.run_iteration().unwrap();
        assert_eq!(report.archived, 1);
        assert_eq!(report.transferred, 1);

        let archived = ctx.sessions.store().list_archived();
        assert_eq!(archived.len(), 1);
        let session = archived.into_iter().next().unwrap().unwrap();
        assert_eq!(session.session_id, id);
        assert!(session.storage_path.starts_with(EXPIRED_DIR));
        assert!(session.transferred_to_longterm);
        assert!(!dir.path().join("sessions").join(&id).exists());

        let collection = ctx.long_term.collection_for("X");
        assert!(ctx.long_term.count(&collection) >= 1);
    }

    #[test]
    fn test_startup_cleanup_recovers_archived_but_untransferred_session() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let timeout = Duration::seconds(TIMEOUT_SECS as i64);

        // 模拟「已归档、转存前崩溃」：直接把会话放进归档子树
        let mut session = Session::new("X", clock.now() - Duration::hours(3));
        session.storage_path = session.archived_path(timeout);
        let session_dir = dir.path().join("sessions").join(&session.storage_path);
        std::fs::create_dir_all(&session_dir).unwrap();
        let mut message = ChatMessage::user("X", "bee", "my passport number ends in 42");
        message.session_id = session.session_id.clone();
        message.order_num = 1;
        session.message_counter = 1;
        session.message_ids.push(message.message_id.clone());
        MessageStore::new().save(&session_dir, &message).unwrap();
        std::fs::write(
            session_dir.join("session.json"),
            serde_json::to_string_pretty(&session).unwrap(),
        )
        .unwrap();

        let ctx = context(dir.path(), clock, Arc::new(HashingEmbedder::default()));
        let pending = ctx.sessions.get_sessions_needing_cleanup(timeout).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].session_id, session.session_id);

        let report = ctx.scheduler.run_startup_cleanup().unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(report.archived, 0);

        let reloaded = ctx.sessions.store().load(&session_dir).unwrap();
        assert!(reloaded.transferred_to_longterm);
        assert_eq!(ctx.long_term.count(&ctx.long_term.collection_for("X")), 1);
        assert!(ctx.sessions.get_sessions_needing_cleanup(timeout).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_cleanup_does_not_duplicate_entries() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let ctx = context(dir.path(), clock.clone(), Arc::new(HashingEmbedder::default()));

        for text in ["first note", "second note", "third note"] {
            ctx.sessions.append("X", ChatMessage::user("X", "bee", text)).unwrap();
        }
        clock.advance(past_timeout());
        ctx.scheduler.run_iteration().unwrap();

        let collection = ctx.long_term.collection_for("X");
        let before = ctx.long_term.count(&collection);
        assert_eq!(before, 3);

        let second = ctx.scheduler.run_iteration().unwrap();
        let third = ctx.scheduler.run_iteration().unwrap();
        assert_eq!(second.found, 0);
        assert_eq!(third.found, 0);
        assert_eq!(ctx.long_term.count(&collection), before);

        // 直接对已转存会话再调 transfer 也不变
        let session = ctx.sessions.store().list_archived().remove(0).unwrap();
        ctx.memory.transfer(&session).unwrap();
        assert_eq!(ctx.long_term.count(&collection), before);
    }

    #[test]
    fn test_failing_provider_isolates_session() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let ctx = context(
            dir.path(),
            clock.clone(),
            Arc::new(PoisonEmbedder(HashingEmbedder::default())),
        );

        ctx.sessions.append("S", ChatMessage::user("S", "bee", "an ordinary line")).unwrap();
        ctx.sessions.append("S", ChatMessage::user("S", "bee", "poison pill")).unwrap();
        ctx.sessions.append("Y", ChatMessage::user("Y", "bee", "lunch at noon")).unwrap();
        clock.advance(past_timeout());

        for _ in 0..3 {
            let report = ctx.scheduler.run_iteration().unwrap();
            assert!(report.failed >= 1);
        }

        let s = ctx
            .sessions
            .store()
            .list_archived()
            .into_iter()
            .map(|r| r.unwrap())
            .find(|s| s.chat_identity == "S")
            .unwrap();
        assert!(!s.transferred_to_longterm);
        assert_eq!(ctx.long_term.count(&ctx.long_term.collection_for("S")), 0);
        assert_eq!(ctx.long_term.count(&ctx.long_term.collection_for("Y")), 1);

        // 其它聊天对象的消息照常写入
        let (_, y) = ctx
            .sessions
            .append("Y", ChatMessage::user("Y", "bee", "and dinner at eight"))
            .unwrap();
        assert_eq!(y.message_counter, 1);
        assert!(!y.storage_path.starts_with(EXPIRED_DIR));
    }

    #[test]
    fn test_archive_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let ctx = context(dir.path(), clock.clone(), Arc::new(HashingEmbedder::default()));

        let (_, session) = ctx.sessions.append("X", ChatMessage::user("X", "bee", "hi")).unwrap();
        clock.advance(past_timeout());

        let first = ctx.sessions.archive(&session).unwrap();
        let again_stale = ctx.sessions.archive(&session).unwrap();
        let again = ctx.sessions.archive(&first).unwrap();
        assert_eq!(first.storage_path, again_stale.storage_path);
        assert_eq!(first.storage_path, again.storage_path);
        assert_eq!(ctx.sessions.store().list_archived().len(), 1);
    }

    #[test]
    fn test_transferred_messages_are_recallable() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let ctx = context(dir.path(), clock.clone(), Arc::new(HashingEmbedder::default()));

        ctx.sessions
            .append("X", ChatMessage::user("X", "bee", "I am allergic to peanuts and shellfish"))
            .unwrap();
        ctx.sessions
            .append("X", ChatMessage::assistant("X", "bee", "Noted, I will keep that in mind"))
            .unwrap();
        clock.advance(past_timeout());
        ctx.scheduler.run_iteration().unwrap();

        let found = ctx
            .memory
            .recall_for_chat("X", "am I allergic to peanuts")
            .unwrap();
        assert!(!found.is_empty());
        assert!(found[0].payload.content.contains("peanuts"));
        assert!(found.iter().all(|m| m.score >= ctx.config.memory.min_similarity));

        // 其它聊天对象看不到
        assert!(ctx.memory.recall_for_chat("Z", "peanuts").unwrap().is_empty());
    }

    #[test]
    fn test_transcript_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let ctx = context(dir.path(), clock.clone(), Arc::new(HashingEmbedder::default()));

        let texts: Vec<String> = (1..=12).map(|i| format!("message number {}", i)).collect();
        for t in &texts {
            ctx.sessions.append("X", ChatMessage::user("X", "bee", t.clone())).unwrap();
            clock.advance(Duration::seconds(5));
        }
        clock.advance(past_timeout());
        ctx.scheduler.run_iteration().unwrap();

        let session = ctx.sessions.store().list_archived().remove(0).unwrap();
        let transcript = ctx.sessions.messages_of(&session).unwrap();
        let orders: Vec<u64> = transcript.iter().map(|m| m.order_num).collect();
        assert_eq!(orders, (1..=12).collect::<Vec<u64>>());
        let contents: Vec<String> = transcript.into_iter().map(|m| m.content).collect();
        assert_eq!(contents, texts);

        let hits = ctx
            .memory
            .recall(
                "message number",
                &[ctx.long_term.collection_for("X")],
                12,
                0.0,
            )
            .unwrap();
        let mut by_order: Vec<_> = hits.iter().map(|m| (m.payload.order_num, m.payload.content.clone())).collect();
        by_order.sort();
        assert_eq!(by_order.len(), 12);
        assert!(by_order.iter().zip(&texts).all(|((_, c), t)| c == t));
    }

    #[test]
    fn test_restart_finishes_pending_work() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        {
            let ctx = context(dir.path(), clock.clone(), Arc::new(HashingEmbedder::default()));
            ctx.sessions
                .append("X", ChatMessage::user("X", "bee", "the wifi password is bumblebee"))
                .unwrap();
            ctx.shutdown().unwrap();
        }

        clock.advance(past_timeout());
        let ctx = context(dir.path(), clock.clone(), Arc::new(HashingEmbedder::default()));
        let report = ctx.scheduler.run_startup_cleanup().unwrap();
        assert_eq!(report.transferred, 1);
        ctx.shutdown().unwrap();

        // 向量索引在重启后仍可用
        let ctx = context(dir.path(), clock, Arc::new(HashingEmbedder::default()));
        assert_eq!(ctx.long_term.count(&ctx.long_term.collection_for("X")), 1);
        let found = ctx.memory.recall_for_chat("X", "what is the wifi password").unwrap();
        assert!(found.iter().any(|m| m.payload.content.contains("bumblebee")));
    }

    #[test]
    fn test_message_after_expiry_starts_new_session() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ctx = context(dir.path(), clock.clone(), Arc::new(HashingEmbedder::default()));

        let (old_id, _) = ctx.sessions.append("X", ChatMessage::user("X", "bee", "one")).unwrap();
        clock.advance(past_timeout());
        let (new_id, new_session) = ctx.sessions.append("X", ChatMessage::user("X", "bee", "two")).unwrap();
        assert_ne!(old_id, new_id);
        assert_eq!(new_session.message_counter, 1);

        // 旧会话只在清理时被处理，新会话保持活跃
        let report = ctx.scheduler.run_iteration().unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(ctx.sessions.active_session("X").unwrap().session_id, new_id);
    }
}
