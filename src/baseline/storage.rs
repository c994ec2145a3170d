use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::{Result, RumanError};

const BASELINE_DIR: &str = ".ruman";
const BASELINE_FILE: &str = "baselines.json";

/// 键 → JSON 的持久化映射，按集合 id 区分键
pub trait BaselineStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>>;
    fn save(&self, key: &str, value: Value) -> Result<()>;
}

pub fn contract_key(collection_id: &str) -> String {
    format!("contract:{}", collection_id)
}

pub fn performance_key(collection_id: &str) -> String {
    format!("perf:{}", collection_id)
}

/// 读取并反序列化；内容损坏时记录警告并视为不存在
pub fn load_as<T: DeserializeOwned>(store: &dyn BaselineStore, key: &str) -> Result<Option<T>> {
    let Some(value) = store.load(key)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            warn!("Ignoring unreadable baseline {}: {}", key, e);
            Ok(None)
        }
    }
}

pub fn save_as<T: Serialize>(store: &dyn BaselineStore, key: &str, value: &T) -> Result<()> {
    store.save(key, serde_json::to_value(value)?)
}

/// 单个 JSON 文件，读写时加 fs2 文件锁
pub struct FileBaselineStore {
    file_path: PathBuf,
}

impl Default for FileBaselineStore {
    fn default() -> Self {
        let dir = std::env::var("RUMAN_BASELINE_DIR").unwrap_or_else(|_| BASELINE_DIR.to_string());
        Self {
            file_path: Path::new(&dir).join(BASELINE_FILE),
        }
    }
}

impl FileBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn parse(content: &str) -> Result<BTreeMap<String, Value>> {
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(content)
            .map_err(|e| RumanError::BaselineError(format!("无法解析基线文件: {}", e)))
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>> {
        if !self.file_path.exists() {
            return Ok(BTreeMap::new());
        }
        let mut file = fs::File::open(&self.file_path)?;
        FileExt::lock_shared(&file)?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        Self::parse(&content)
    }
}

impl BaselineStore for FileBaselineStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all()?.remove(key))
    }

    /// 读-改-写在同一把排他锁内完成
    fn save(&self, key: &str, value: Value) -> Result<()> {
        self.ensure_dir()?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.file_path)?;
        FileExt::lock_exclusive(&file)?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let mut entries = Self::parse(&content)?;
        entries.insert(key.to_string(), value);

        let json = serde_json::to_string_pretty(&entries)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(json.as_bytes())?;
        file.flush()?;

        debug!("Saved baseline {} to {}", key, self.file_path.display());
        Ok(())
    }
}

/// 进程内存储，用于测试与一次性运行
#[derive(Default)]
pub struct MemoryBaselineStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| RumanError::BaselineError(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| RumanError::BaselineError(e.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}
