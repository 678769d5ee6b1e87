use extract::ExtractionRecord;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache entry {path} is not a valid record: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Durable store of one extraction record per chunk id. An entry existing
/// means the chunk has been processed.
///
/// Entries are keyed by chunk id only: if a chunk's text changes but its id
/// does not, the old record is still returned.
#[derive(Debug, Clone)]
pub struct ExtractionCache {
    dir: PathBuf,
    /// Keeps a scratch directory alive; it is removed when the last clone drops.
    scratch: Option<Arc<TempDir>>,
}

impl ExtractionCache {
    /// Open the cache, creating its directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(io_error(&dir))?;
        Ok(Self { dir, scratch: None })
    }

    /// A cache in a fresh temporary directory, deleted on drop. Used when
    /// the graph is not persisted, so nothing is marked as processed for
    /// later runs.
    pub fn scratch() -> Result<Self, CacheError> {
        let tmp = tempfile::Builder::new()
            .prefix("kg_cache")
            .tempdir()
            .map_err(io_error(&std::env::temp_dir()))?;
        Ok(Self {
            dir: tmp.path().to_path_buf(),
            scratch: Some(Arc::new(tmp)),
        })
    }

    pub fn is_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Chunk ids are arbitrary strings, so file names are their SHA-256.
    fn path_for(&self, chunk_id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(chunk_id.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(hasher.finalize())))
    }

    pub async fn exists(&self, chunk_id: &str) -> bool {
        fs::try_exists(self.path_for(chunk_id)).await.unwrap_or(false)
    }

    pub async fn read(&self, chunk_id: &str) -> Result<ExtractionRecord, CacheError> {
        let path = self.path_for(chunk_id);
        let bytes = fs::read(&path).await.map_err(io_error(&path))?;
        serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt { path, source })
    }

    /// Write the entry through a temp file and rename it into place, so an
    /// interrupted write never leaves a partial entry behind.
    pub async fn write(
        &self,
        chunk_id: &str,
        record: &ExtractionRecord,
    ) -> Result<(), CacheError> {
        let path = self.path_for(chunk_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(record).map_err(|source| CacheError::Corrupt {
            path: path.clone(),
            source,
        })?;

        fs::write(&tmp, json).await.map_err(io_error(&tmp))?;
        fs::rename(&tmp, &path).await.map_err(io_error(&path))?;
        Ok(())
    }

    /// Number of committed entries.
    pub async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries().await?.len())
    }

    /// Remove every entry, including leftover temp files. Returns how many
    /// committed entries were removed.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        let mut dir = fs::read_dir(&self.dir).await.map_err(io_error(&self.dir))?;

        while let Some(entry) = dir.next_entry().await.map_err(io_error(&self.dir))? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".json") {
                removed += 1;
            } else if !name.ends_with(".json.tmp") {
                continue;
            }
            fs::remove_file(&path).await.map_err(io_error(&path))?;
        }

        Ok(removed)
    }

    async fn entries(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await.map_err(io_error(&self.dir))?;

        while let Some(entry) = dir.next_entry().await.map_err(io_error(&self.dir))? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                entries.push(path);
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::ExtractedEntity;

    fn record(chunk_id: &str) -> ExtractionRecord {
        let mut record = ExtractionRecord::empty(chunk_id);
        record.entities.push(ExtractedEntity {
            name: "Ferritin".to_string(),
            canonical_name: "ferritin".to_string(),
            types: vec!["Analyte".to_string()],
            aliases: vec![],
        });
        record
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExtractionCache::open(dir.path().join("kg_cache"))
            .await
            .unwrap();

        assert!(!cache.exists("q1").await);
        cache.write("q1", &record("q1")).await.unwrap();

        assert!(cache.exists("q1").await);
        assert_eq!(cache.read("q1").await.unwrap(), record("q1"));
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_records_are_entries_too() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExtractionCache::open(dir.path()).await.unwrap();

        cache
            .write("empty", &ExtractionRecord::empty("empty"))
            .await
            .unwrap();

        assert!(cache.exists("empty").await);
        assert!(cache.read("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_ids_get_distinct_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExtractionCache::open(dir.path()).await.unwrap();

        for id in ["../escape", "a/b", "a_b", "späce id"] {
            cache.write(id, &record(id)).await.unwrap();
        }

        assert_eq!(cache.len().await.unwrap(), 4);
        assert_eq!(cache.read("a/b").await.unwrap().chunk_id, "a/b");
        assert!(!dir.path().parent().unwrap().join("escape.json").exists());
    }

    #[tokio::test]
    async fn test_clear_removes_entries_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExtractionCache::open(dir.path()).await.unwrap();
        cache.write("a", &record("a")).await.unwrap();
        cache.write("b", &record("b")).await.unwrap();
        std::fs::write(dir.path().join("stray.json.tmp"), b"{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(!cache.exists("a").await);
        assert_eq!(cache.len().await.unwrap(), 0);
        assert!(dir.path().join("notes.txt").exists());
        assert!(!dir.path().join("stray.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExtractionCache::open(dir.path()).await.unwrap();
        std::fs::write(cache.path_for("bad"), b"not json").unwrap();

        assert!(cache.exists("bad").await);
        assert!(matches!(
            cache.read("bad").await,
            Err(CacheError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_scratch_cache_is_removed_on_drop() {
        let cache = ExtractionCache::scratch().unwrap();
        let dir = cache.dir().to_path_buf();
        cache.write("a", &record("a")).await.unwrap();

        assert!(cache.is_scratch());
        assert!(dir.exists());

        let clone = cache.clone();
        drop(cache);
        assert!(clone.exists("a").await);

        drop(clone);
        assert!(!dir.exists());
    }
}
