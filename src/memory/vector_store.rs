//! 本地向量索引
//!
//! 按集合（collection）划分，每个集合内以字符串 key 唯一标识一条向量：upsert 同 key 覆盖而不是追加。
//! 每个集合持久化为 `<root>/<collection>.json` 快照，启动时加载，flush 时原子写回。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::core::{MemoryError, MemoryResult};
use crate::memory::session_store::write_json_atomic;

/// 检索命中：(key, 相似度, payload)
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub key: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

/// 向量库接口（同步阻塞调用，由清理任务在 blocking 线程中使用）
pub trait VectorStore: Send + Sync {
    fn get_or_create(&self, collection: &str) -> MemoryResult<()>;

    fn collection_exists(&self, collection: &str) -> bool;

    /// 按 key 插入或覆盖
    fn upsert(
        &self,
        collection: &str,
        key: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> MemoryResult<()>;

    /// 余弦相似度最高的 top_k 条，按分数降序；集合不存在时返回空
    fn query(&self, collection: &str, vector: &[f32], top_k: usize) -> MemoryResult<Vec<VectorHit>>;

    fn count(&self, collection: &str) -> usize;

    /// 将指定集合落盘
    fn flush_collection(&self, collection: &str) -> MemoryResult<()>;

    /// 全部集合落盘（关闭时调用）
    fn flush(&self) -> MemoryResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    vector: Vec<f32>,
    payload: serde_json::Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collection {
    /// 所有向量维度必须一致；空集合时为 None
    dimensions: Option<usize>,
    entries: BTreeMap<String, VectorEntry>,
    #[serde(skip)]
    dirty: bool,
}

/// 内存向量索引 + 可选 JSON 快照持久化
pub struct LocalVectorStore {
    root: Option<PathBuf>,
    collections: RwLock<HashMap<String, Collection>>,
}

impl LocalVectorStore {
    /// 纯内存（测试用）
    pub fn in_memory() -> Self {
        Self {
            root: None,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// 打开快照目录并加载已有集合
    ///
    /// 无法解析的快照改名隔离为 `<collection>.json.corrupt-<毫秒时间戳>`，之后的 flush
    /// 不会覆盖它；隔离失败时拒绝打开。
    pub fn open(root: impl Into<PathBuf>) -> MemoryResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| MemoryError::io(&root, e))?;
        let mut collections = HashMap::new();
        let entries = std::fs::read_dir(&root).map_err(|e| MemoryError::io(&root, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            match Self::load_snapshot(&path) {
                Ok(c) => {
                    tracing::debug!("Loaded vector collection {} ({} entries)", name, c.entries.len());
                    collections.insert(name, c);
                }
                Err(e) => {
                    let quarantined = Self::quarantine(&path)?;
                    tracing::error!(
                        "Vector snapshot {:?} is unreadable ({}), moved to {:?}; \
                         sessions already transferred to {} need manual recovery",
                        path,
                        e,
                        quarantined,
                        name
                    );
                }
            }
        }
        tracing::info!("Vector store opened at {:?} ({} collections)", root, collections.len());
        Ok(Self {
            root: Some(root),
            collections: RwLock::new(collections),
        })
    }

    fn load_snapshot(path: &Path) -> anyhow::Result<Collection> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn quarantine(path: &Path) -> MemoryResult<PathBuf> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = path.with_file_name(format!(
            "{}.corrupt-{}",
            file_name,
            chrono::Utc::now().timestamp_millis()
        ));
        std::fs::rename(path, &target).map_err(|e| MemoryError::io(path, e))?;
        Ok(target)
    }

    fn snapshot_path(&self, collection: &str) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(format!("{}.json", collection)))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Collection>> {
        self.collections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Collection>> {
        self.collections.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl VectorStore for LocalVectorStore {
    fn get_or_create(&self, collection: &str) -> MemoryResult<()> {
        let mut collections = self.write();
        if !collections.contains_key(collection) {
            tracing::info!("Creating vector collection {}", collection);
            collections.insert(
                collection.to_string(),
                Collection {
                    dirty: true,
                    ..Default::default()
                },
            );
        }
        Ok(())
    }

    fn collection_exists(&self, collection: &str) -> bool {
        self.read().contains_key(collection)
    }

    fn upsert(
        &self,
        collection: &str,
        key: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> MemoryResult<()> {
        if vector.is_empty() {
            return Err(MemoryError::TransientProvider(format!(
                "empty vector for key {}",
                key
            )));
        }
        let mut collections = self.write();
        let c = collections.get_mut(collection).ok_or_else(|| {
            MemoryError::TransientProvider(format!("unknown collection {}", collection))
        })?;
        match c.dimensions {
            Some(d) if d != vector.len() => {
                return Err(MemoryError::TransientProvider(format!(
                    "dimension mismatch in {}: expected {}, got {}",
                    collection,
                    d,
                    vector.len()
                )));
            }
            Some(_) => {}
            None => c.dimensions = Some(vector.len()),
        }
        c.entries
            .insert(key.to_string(), VectorEntry { vector, payload });
        c.dirty = true;
        Ok(())
    }

    fn query(&self, collection: &str, vector: &[f32], top_k: usize) -> MemoryResult<Vec<VectorHit>> {
        let collections = self.read();
        let Some(c) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<VectorHit> = c
            .entries
            .iter()
            .map(|(key, entry)| VectorHit {
                key: key.clone(),
                score: cosine_similarity(vector, &entry.vector),
                payload: entry.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn count(&self, collection: &str) -> usize {
        self.read().get(collection).map_or(0, |c| c.entries.len())
    }

    fn flush_collection(&self, collection: &str) -> MemoryResult<()> {
        let Some(path) = self.snapshot_path(collection) else {
            return Ok(());
        };
        let mut collections = self.write();
        let Some(c) = collections.get_mut(collection) else {
            return Ok(());
        };
        if !c.dirty {
            return Ok(());
        }
        write_json_atomic(&path, &*c)?;
        c.dirty = false;
        Ok(())
    }

    fn flush(&self) -> MemoryResult<()> {
        let names: Vec<String> = self.read().keys().cloned().collect();
        for name in names {
            self.flush_collection(&name)?;
        }
        Ok(())
    }
}

/// 余弦相似度；维度不同或零向量时为 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
