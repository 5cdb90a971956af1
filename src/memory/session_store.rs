//! 会话目录存储
//!
//! 目录布局：
//! - 活跃：`<root>/<session_id>/session.json` + `messages/`
//! - 归档：`<root>/expired/<YYYY-MM-DD>/<session_id>/`，内部结构相同
//!
//! 归档是一次目录 rename（同一文件系统内近似原子），不存在「复制到一半」的中间态。

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::core::{MemoryError, MemoryResult};
use crate::memory::session::{is_archived_path, EXPIRED_DIR};
use crate::memory::Session;

pub const SESSION_FILE: &str = "session.json";

/// 先写临时文件再 rename 覆盖，避免崩溃时留下半截 JSON
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> MemoryResult<()> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| {
        MemoryError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).map_err(|e| MemoryError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| MemoryError::io(path, e))
}

/// 会话目录存储：<root>/<session_id>/ 与 <root>/expired/<date>/<session_id>/
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// 打开（必要时创建）存储根目录
    pub fn open(root: impl Into<PathBuf>) -> MemoryResult<Self> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(MemoryError::Configuration(
                "session storage root is empty".to_string(),
            ));
        }
        std::fs::create_dir_all(root.join(EXPIRED_DIR)).map_err(|e| MemoryError::io(&root, e))?;
        Ok(Self { root })
    }

    /// 存储根目录（活跃会话直接位于其下）
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 会话当前所在目录（绝对路径）
    pub fn session_dir(&self, session: &Session) -> PathBuf {
        self.root.join(&session.storage_path)
    }

    /// 新建会话目录并写入记录
    pub fn create(&self, session: &Session) -> MemoryResult<()> {
        let dir = self.session_dir(session);
        let messages = dir.join(crate::memory::message_store::MESSAGES_DIR);
        std::fs::create_dir_all(&messages).map_err(|e| MemoryError::io(&messages, e))?;
        self.save(session)
    }

    /// 覆盖写入 session.json（位于 storage_path 指向的目录）
    pub fn save(&self, session: &Session) -> MemoryResult<()> {
        let dir = self.session_dir(session);
        if !dir.is_dir() {
            return Err(MemoryError::SessionNotFound(session.session_id.clone()));
        }
        write_json_atomic(&dir.join(SESSION_FILE), session)
    }

    /// 从会话目录读取记录
    ///
    /// 记录里的 storage_path 以目录实际位置为准：rename 完成但记录尚未更新时崩溃，
    /// 会话仍按所在位置（归档子树）被识别。
    pub fn load(&self, dir: &Path) -> MemoryResult<Session> {
        let path = dir.join(SESSION_FILE);
        let data = std::fs::read_to_string(&path).map_err(|e| MemoryError::CorruptSessionRecord {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let mut session: Session =
            serde_json::from_str(&data).map_err(|e| MemoryError::CorruptSessionRecord {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if let Ok(rel) = dir.strip_prefix(&self.root) {
            if session.storage_path != rel {
                tracing::debug!(
                    "session {} record path {:?} differs from location {:?}, using location",
                    session.session_id,
                    session.storage_path,
                    rel
                );
                session.storage_path = rel.to_path_buf();
            }
        }
        Ok(session)
    }

    /// 重新读取会话的最新记录
    pub fn reload(&self, session: &Session) -> MemoryResult<Session> {
        self.load(&self.session_dir(session))
    }

    /// 枚举活跃根目录下的全部会话（跳过 expired/ 与非会话目录）
    pub fn list_active(&self) -> MemoryResult<Vec<MemoryResult<Session>>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| MemoryError::io(&self.root, e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MemoryError::io(&self.root, e))?;
            let path = entry.path();
            if entry.file_name() == EXPIRED_DIR || !path.is_dir() {
                continue;
            }
            if !path.join(SESSION_FILE).exists() {
                continue;
            }
            out.push(self.load(&path));
        }
        Ok(out)
    }

    /// 枚举归档子树 expired/<date>/<session_id>/ 下的全部会话
    pub fn list_archived(&self) -> Vec<MemoryResult<Session>> {
        let expired = self.root.join(EXPIRED_DIR);
        WalkDir::new(&expired)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) if e.file_type().is_dir() => Some(self.load(e.path())),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Failed to scan archived sessions: {}", e);
                    None
                }
            })
            .collect()
    }

    /// 将会话目录 rename 到归档路径；目标已存在且源不存在时视为已完成
    pub fn move_dir(&self, session: &Session, to: &Path) -> MemoryResult<()> {
        debug_assert!(is_archived_path(to));
        let from = self.session_dir(session);
        let dest = self.root.join(to);
        let archival_err = |source| MemoryError::ArchivalIo {
            session_id: session.session_id.clone(),
            source,
        };
        if !from.exists() && dest.join(SESSION_FILE).exists() {
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(archival_err)?;
        }
        std::fs::rename(&from, &dest).map_err(archival_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_open_rejects_empty_root() {
        assert!(matches!(
            SessionStore::open(""),
            Err(MemoryError::Configuration(_))
        ));
    }

    #[test]
    fn test_create_and_list_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let session = Session::new("chat", Utc::now());
        store.create(&session).unwrap();

        let active = store.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].as_ref().unwrap(), &session);
        assert!(store.list_archived().is_empty());
    }

    #[test]
    fn test_move_dir_to_archive() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let session = Session::new("chat", Utc::now());
        store.create(&session).unwrap();

        let to = session.archived_path(Duration::minutes(30));
        store.move_dir(&session, &to).unwrap();
        // 再次移动为空操作
        store.move_dir(&session, &to).unwrap();

        assert!(store.list_active().unwrap().is_empty());
        let archived = store.list_archived();
        assert_eq!(archived.len(), 1);
        // 记录尚未更新，但以实际位置为准
        let loaded = archived[0].as_ref().unwrap();
        assert_eq!(loaded.storage_path, to);
        assert!(loaded.is_archived());
    }

    #[test]
    fn test_corrupt_record_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let good = Session::new("a", Utc::now());
        store.create(&good).unwrap();
        let bad_dir = dir.path().join("session_bad");
        std::fs::create_dir_all(&bad_dir).unwrap();
        std::fs::write(bad_dir.join(SESSION_FILE), "garbage").unwrap();

        let listed = store.list_active().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(listed
            .iter()
            .any(|r| matches!(r, Err(MemoryError::CorruptSessionRecord { .. }))));
    }

    #[test]
    fn test_save_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let session = Session::new("chat", Utc::now());
        assert!(matches!(
            store.save(&session),
            Err(MemoryError::SessionNotFound(_))
        ));
    }
}
