//! 消息持久化：每条消息一个 JSON 文件
//!
//! 位置：<session_dir>/messages/<order_num:06>_<message_id>.json。
//! 文件名前缀保证目录顺序与 order_num 一致，加载时仍按 order_num 排序。

use std::path::{Path, PathBuf};

use crate::core::{MemoryError, MemoryResult};
use crate::memory::session_store::write_json_atomic;
use crate::memory::ChatMessage;

pub const MESSAGES_DIR: &str = "messages";

/// 每条消息一个 JSON 文件：<session>/messages/<order:06>_<id>.json
#[derive(Debug, Clone, Default)]
pub struct MessageStore;

impl MessageStore {
    /// 无状态，目录由调用方按会话传入
    pub fn new() -> Self {
        Self
    }

    /// 会话的消息子目录
    pub fn messages_dir(session_dir: &Path) -> PathBuf {
        session_dir.join(MESSAGES_DIR)
    }

    fn message_path(session_dir: &Path, message: &ChatMessage) -> PathBuf {
        Self::messages_dir(session_dir).join(format!(
            "{:06}_{}.json",
            message.order_num,
            sanitize_file_component(&message.message_id)
        ))
    }

    /// 写入单条消息；重复写入同一条消息会覆盖
    pub fn save(&self, session_dir: &Path, message: &ChatMessage) -> MemoryResult<()> {
        let dir = Self::messages_dir(session_dir);
        std::fs::create_dir_all(&dir).map_err(|e| MemoryError::io(&dir, e))?;
        write_json_atomic(&Self::message_path(session_dir, message), message)
    }

    /// 加载会话全部消息，按 order_num 升序；任一文件损坏则整体报错
    pub fn load_all(&self, session_dir: &Path) -> MemoryResult<Vec<ChatMessage>> {
        let dir = Self::messages_dir(session_dir);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&dir).map_err(|e| MemoryError::io(&dir, e))?;
        let mut messages = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| MemoryError::io(&dir, e))?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let data = std::fs::read_to_string(&path).map_err(|e| MemoryError::io(&path, e))?;
            let message: ChatMessage =
                serde_json::from_str(&data).map_err(|e| MemoryError::CorruptSessionRecord {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            messages.push(message);
        }
        messages.sort_by_key(|m| m.order_num);
        Ok(messages)
    }

    /// 加载最近 limit 条消息
    pub fn load_recent(&self, session_dir: &Path, limit: usize) -> MemoryResult<Vec<ChatMessage>> {
        let mut messages = self.load_all(session_dir)?;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }
}

/// 传输层的消息 ID 可能含有路径分隔符等字符，写入文件名前替换
fn sanitize_file_component(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
