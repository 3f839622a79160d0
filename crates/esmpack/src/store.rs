//! Abstract blob and key-value stores with filesystem implementations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EsmpackError, Result};

/// Durable blob storage. Keys are forward-slash paths (`builds/<id>.js`).
pub trait BlobStore: Send + Sync {
    fn exists(&self, key: &str) -> bool;
    fn read(&self, key: &str) -> Result<Vec<u8>>;
    fn write(&self, key: &str, data: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// The value stored per build identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// UTF-8 JSON of the resolved metadata
    pub esmeta: String,
    /// 1 when a CSS blob was emitted alongside the artifact
    pub css: u8,
}

/// Key-value metadata storage keyed by build identifier.
pub trait MetaStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheRecord>>;
    fn put(&self, key: &str, record: &CacheRecord) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Blob store rooted in a local directory. Writes are atomic: the data lands
/// in a temp file first and is renamed into place.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobStore for FsBlobStore {
    fn exists(&self, key: &str) -> bool {
        self.path_of(key).is_file()
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        std::fs::read(self.path_of(key)).map_err(store_err)
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(store_err)?;
        }
        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        std::fs::write(&tmp, data).map_err(store_err)?;
        std::fs::rename(&tmp, &path).map_err(store_err)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_of(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err(e)),
        }
    }
}

/// Metadata store writing one JSON record per key under `meta/`.
pub struct FsMetaStore {
    root: PathBuf,
}

impl FsMetaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, key: &str) -> PathBuf {
        self.root.join("meta").join(format!("{}.json", key))
    }
}

impl MetaStore for FsMetaStore {
    fn get(&self, key: &str) -> Result<Option<CacheRecord>> {
        let path = self.path_of(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_err(e)),
        };
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            // unreadable records are indistinguishable from missing ones
            Err(_) => Ok(None),
        }
    }

    fn put(&self, key: &str, record: &CacheRecord) -> Result<()> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(store_err)?;
        }
        let content = serde_json::to_string(record)?;
        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        std::fs::write(&tmp, content).map_err(store_err)?;
        std::fs::rename(&tmp, &path).map_err(store_err)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_of(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_err(e)),
        }
    }
}

fn store_err(e: std::io::Error) -> EsmpackError {
    EsmpackError::Store(e.to_string())
}
