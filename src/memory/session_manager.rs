//! 会话管理：创建、追加消息、过期检测、归档
//!
//! 每个聊天对象同一时间最多一个活跃会话。活跃会话一旦超时就不再接收新消息：
//! 新消息会开启新会话，旧会话留给清理任务归档与转存。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;

use crate::core::{Clock, MemoryError, MemoryResult};
use crate::memory::message_store::MessageStore;
use crate::memory::session_store::SessionStore;
use crate::memory::{tokenizer, ChatMessage, Session, SessionId};

/// 会话生命周期管理；append 与 archive 在同一把锁下串行
pub struct SessionManager {
    store: SessionStore,
    messages: MessageStore,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    /// chat_identity -> 当前活跃会话（磁盘记录的内存副本）
    active: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    /// 创建管理器并从磁盘重建活跃会话索引（同一聊天对象有多个时取最近活跃的）
    pub fn new(store: SessionStore, clock: Arc<dyn Clock>, timeout: Duration) -> MemoryResult<Self> {
        if timeout <= Duration::zero() {
            return Err(MemoryError::Configuration(format!(
                "session timeout must be positive, got {}s",
                timeout.num_seconds()
            )));
        }
        let mut active: HashMap<String, Session> = HashMap::new();
        for record in store.list_active()? {
            match record {
                Ok(session) => {
                    let newer = active
                        .get(&session.chat_identity)
                        .map_or(true, |cur| session.last_active > cur.last_active);
                    if newer {
                        active.insert(session.chat_identity.clone(), session);
                    }
                }
                Err(e) => tracing::warn!("Skipping unreadable active session: {}", e),
            }
        }
        tracing::info!(
            "Session manager ready at {:?} ({} active chats)",
            store.root(),
            active.len()
        );
        Ok(Self {
            store,
            messages: MessageStore::new(),
            clock,
            timeout,
            active: Mutex::new(active),
        })
    }

    /// 不活跃超时
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 底层会话存储（转存时读写 session.json）
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 追加一条消息：必要时新建会话；先写消息文件，再更新会话记录
    pub fn append(
        &self,
        chat_identity: &str,
        mut message: ChatMessage,
    ) -> MemoryResult<(SessionId, Session)> {
        let mut active = self.lock();
        let now = self.clock.now();

        let reusable = active
            .get(chat_identity)
            .filter(|s| !s.is_archived() && !s.is_expired(now, self.timeout))
            .cloned();
        let mut session = match reusable {
            Some(s) => s,
            None => {
                if let Some(stale) = active.get(chat_identity) {
                    tracing::info!(
                        "Session {} for {} expired, starting a new one",
                        stale.session_id,
                        chat_identity
                    );
                }
                let s = Session::new(chat_identity, now);
                self.store.create(&s)?;
                tracing::info!("Created session {} for {}", s.session_id, chat_identity);
                s
            }
        };

        session.message_counter += 1;
        message.session_id = session.session_id.clone();
        message.order_num = session.message_counter;
        self.messages.save(&self.store.session_dir(&session), &message)?;

        session.message_ids.push(message.message_id.clone());
        session.last_active = now;
        session.total_tokens += tokenizer::estimate_tokens(&message.content);
        self.store.save(&session)?;

        tracing::debug!(
            "Appended message #{} to session {}",
            message.order_num,
            session.session_id
        );
        active.insert(chat_identity.to_string(), session.clone());
        Ok((session.session_id.clone(), session))
    }

    /// 当前活跃（未超时）会话
    pub fn active_session(&self, chat_identity: &str) -> Option<Session> {
        let now = self.clock.now();
        self.lock()
            .get(chat_identity)
            .filter(|s| !s.is_archived() && !s.is_expired(now, self.timeout))
            .cloned()
    }

    /// 当前活跃会话的最近 limit 条消息（按 order_num）；无活跃会话时为空
    pub fn recent_messages(&self, chat_identity: &str, limit: usize) -> MemoryResult<Vec<ChatMessage>> {
        match self.active_session(chat_identity) {
            Some(s) => self.messages.load_recent(&self.store.session_dir(&s), limit),
            None => Ok(Vec::new()),
        }
    }

    /// 会话的全部消息（只读）
    pub fn messages_of(&self, session: &Session) -> MemoryResult<Vec<ChatMessage>> {
        self.messages.load_all(&self.store.session_dir(session))
    }

    /// 活跃根目录下 now - last_active > timeout 的会话
    pub fn get_expired_sessions(&self, timeout: Duration) -> MemoryResult<Vec<Session>> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for record in self.store.list_active()? {
            match record {
                Ok(s) if s.is_expired(now, timeout) => expired.push(s),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable active session: {}", e),
            }
        }
        Ok(expired)
    }

    /// 需要清理的会话 = 已过期的活跃会话 ∪ 归档子树下尚未转存的会话
    ///
    /// 后半部分覆盖「已归档但转存前崩溃」的会话，只扫描活跃目录会永远漏掉它们。
    pub fn get_sessions_needing_cleanup(&self, timeout: Duration) -> MemoryResult<Vec<Session>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for s in self.get_expired_sessions(timeout)? {
            if seen.insert(s.session_id.clone()) {
                out.push(s);
            }
        }
        for record in self.store.list_archived() {
            match record {
                Ok(s) if !s.transferred_to_longterm => {
                    if seen.insert(s.session_id.clone()) {
                        out.push(s);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable archived session: {}", e),
            }
        }
        Ok(out)
    }

    /// 归档：rename 到 expired/<过期日期>/<session_id>/ 并更新 storage_path；已归档则原样返回
    ///
    /// 持锁后按最新记录重新判断过期：扫描之后又收到消息的会话不归档，原样返回（仍是活跃路径），
    /// 调用方据 `is_archived()` 判断是否继续转存。
    pub fn archive(&self, session: &Session) -> MemoryResult<Session> {
        if session.is_archived() {
            return Ok(session.clone());
        }
        let mut active = self.lock();

        let current = match self.store.reload(session) {
            Ok(s) => s,
            Err(e) => {
                // 上次 rename 完成后崩溃：目录已在归档位置
                let moved = self.store.root().join(session.archived_path(self.timeout));
                if !moved.exists() {
                    return Err(e);
                }
                self.store.load(&moved)?
            }
        };
        if current.is_archived() {
            self.store.save(&current)?;
            return Ok(current);
        }
        if !current.is_expired(self.clock.now(), self.timeout) {
            tracing::debug!(
                "Session {} received a message after the scan, leaving it active",
                current.session_id
            );
            return Ok(current);
        }

        let dest = current.archived_path(self.timeout);
        self.store.move_dir(&current, &dest)?;
        let mut archived = current;
        archived.storage_path = dest;
        self.store.save(&archived)?;

        if active
            .get(&archived.chat_identity)
            .is_some_and(|s| s.session_id == archived.session_id)
        {
            active.remove(&archived.chat_identity);
        }
        tracing::info!(
            "Archived session {} ({} messages) to {:?}",
            archived.session_id,
            archived.message_counter,
            archived.storage_path
        );
        Ok(archived)
    }
}
