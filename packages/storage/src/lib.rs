//! Migration file storage.
//!
//! Exported jobs travel between nodes as JSON-lines files: one serialized
//! [`Job`] per line, its latest status embedded. Files live in an object
//! store so a node can be pointed at a local directory or, in tests, at
//! memory.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::TryStreamExt;
use jobsdb_core::Job;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{key}:{line}: {source}")]
    Line {
        key: String,
        line: usize,
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Whether the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::ObjectStore(object_store::Error::NotFound { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub enum FileBackend {
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: FileBackend,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: FileBackend::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: FileBackend::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `STORAGE_BACKEND`: `filesystem` (default) or `memory`
    /// - `STORAGE_FS_ROOT` (default: `./data/migrations`)
    /// - `STORAGE_PREFIX` (optional, e.g. `gw/`)
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = std::env::var("STORAGE_BACKEND").ok().and_then(non_empty);
        let prefix = std::env::var("STORAGE_PREFIX").ok().and_then(non_empty);

        let cfg = match backend.as_deref() {
            None | Some("filesystem") | Some("fs") => {
                let root = std::env::var("STORAGE_FS_ROOT")
                    .ok()
                    .and_then(non_empty)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/migrations"));
                Self::filesystem(root)
            }
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected filesystem|memory)"
                )));
            }
        };

        Ok(Self { prefix, ..cfg })
    }
}

/// Reads and writes migration files.
#[derive(Clone)]
pub struct FileStore {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl FileStore {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store) = match cfg.backend {
            FileBackend::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs) as Arc<dyn ObjectStore>)
            }
            FileBackend::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as Arc<dyn ObjectStore>)
            }
        };

        tracing::info!("Migration file store: {}", kind.as_str());

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
        })
    }

    pub fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?)
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "object key must not be empty".to_string(),
            ));
        }

        let joined = match self.prefix() {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        };

        Ok(Path::from(joined))
    }

    /// Write `jobs` to `key` as JSON lines, replacing any previous file.
    pub async fn write_jobs(&self, key: &str, jobs: &[Job]) -> Result<usize, StorageError> {
        let path = self.to_path(key)?;
        let mut buf = Vec::new();
        for job in jobs {
            serde_json::to_writer(&mut buf, job)?;
            buf.push(b'\n');
        }
        self.store
            .put(&path, object_store::PutPayload::from(Bytes::from(buf)))
            .await?;

        tracing::debug!("Wrote {} jobs to {}", jobs.len(), path);
        Ok(jobs.len())
    }

    /// Read the jobs stored at `key`, in file order. Blank lines are skipped.
    pub async fn read_jobs(&self, key: &str) -> Result<Vec<Job>, StorageError> {
        let path = self.to_path(key)?;
        let bytes = self.store.get(&path).await?.bytes().await?;

        let mut jobs = Vec::new();
        for (i, line) in bytes.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let job = serde_json::from_slice(line).map_err(|source| StorageError::Line {
                key: key.to_string(),
                line: i + 1,
                source,
            })?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// Keys under `prefix`, sorted, relative to the store prefix.
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let search = match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            Some(p) => Some(self.to_path(p)?),
            None => self.prefix().map(Path::from),
        };

        let objects: Vec<_> = self.store.list(search.as_ref()).try_collect().await?;
        let strip = self.prefix().map(|p| format!("{p}/"));

        let mut keys: Vec<String> = objects
            .into_iter()
            .map(|meta| {
                let location = meta.location.to_string();
                match strip.as_deref() {
                    Some(p) => location.strip_prefix(p).map(str::to_string).unwrap_or(location),
                    None => location,
                }
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store.delete(&path).await?;
        Ok(())
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
