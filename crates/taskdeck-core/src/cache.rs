use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const TASKS_COLLECTION: &str = "tasks";
pub const CATEGORIES_COLLECTION: &str = "categories";

/// Key-value persistence for whole collections, keyed by collection name.
///
/// Writes are best-effort: callers log failures and carry on with their in-memory state.
/// There is no transaction spanning two collections.
pub trait DurableCache: Send + Sync {
    fn read_collection(&self, name: &str) -> anyhow::Result<Option<Value>>;

    fn write_collection(&self, name: &str, value: &Value) -> anyhow::Result<()>;

    fn remove_collection(&self, name: &str) -> anyhow::Result<()>;
}

/// One JSON document per collection under a data directory.
#[derive(Debug)]
pub struct FileCache {
    pub data_dir: PathBuf,
}

impl FileCache {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened local cache");
        Ok(Self { data_dir })
    }

    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.json"))
    }
}

impl DurableCache for FileCache {
    #[tracing::instrument(skip(self))]
    fn read_collection(&self, name: &str) -> anyhow::Result<Option<Value>> {
        let path = self.collection_path(name);
        if !path.exists() {
            debug!(file = %path.display(), "collection not cached yet");
            return Ok(None);
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(None);
        }

        let value = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", path.display()))?;
        Ok(Some(value))
    }

    #[tracing::instrument(skip(self, value))]
    fn write_collection(&self, name: &str, value: &Value) -> anyhow::Result<()> {
        let path = self.collection_path(name);
        debug!(file = %path.display(), "saving collection atomically");

        let mut temp = NamedTempFile::new_in(&self.data_dir)?;
        serde_json::to_writer(&mut temp, value)?;
        writeln!(temp)?;
        temp.flush()?;

        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn remove_collection(&self, name: &str) -> anyhow::Result<()> {
        let path = self.collection_path(name);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed removing {}", path.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    collections: Mutex<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.lock().contains_key(name)
    }
}

impl DurableCache for MemoryCache {
    fn read_collection(&self, name: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.collections.lock().get(name).cloned())
    }

    fn write_collection(&self, name: &str, value: &Value) -> anyhow::Result<()> {
        self.collections
            .lock()
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    fn remove_collection(&self, name: &str) -> anyhow::Result<()> {
        self.collections.lock().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn file_cache_roundtrips_and_removes() {
        let temp = tempdir().expect("tempdir");
        let cache = FileCache::open(temp.path()).expect("open cache");

        assert!(cache.read_collection(TASKS_COLLECTION).expect("read").is_none());

        let value = json!([{"title": "Buy milk"}]);
        cache
            .write_collection(TASKS_COLLECTION, &value)
            .expect("write");
        assert_eq!(
            cache.read_collection(TASKS_COLLECTION).expect("read"),
            Some(value)
        );

        cache.remove_collection(TASKS_COLLECTION).expect("remove");
        assert!(!cache.collection_path(TASKS_COLLECTION).exists());
    }

    #[test]
    fn corrupt_collection_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let cache = FileCache::open(temp.path()).expect("open cache");
        fs::write(cache.collection_path(CATEGORIES_COLLECTION), "{not json")
            .expect("write garbage");
        assert!(cache.read_collection(CATEGORIES_COLLECTION).is_err());
    }
}
