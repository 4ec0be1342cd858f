use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use docreview_core::{parse_pdf, Document, ReviewError};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob {0} does not exist")]
    NotFound(String),
    #[error("blob {0} already exists and overwrite is off")]
    AlreadyExists(String),
    #[error("invalid blob key {0:?}")]
    InvalidKey(String),
}

/// Flat key/value blob storage. Keys are `/`-separated paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn put(&self, key: &str, bytes: Bytes, overwrite: bool) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Every key starting with `prefix`, sorted, including nested ones.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug)]
pub enum Blob {
    Document(Document),
    Json(serde_json::Value),
}

pub fn parse_blob(key: &str, bytes: &[u8]) -> std::result::Result<Blob, ReviewError> {
    let ext = Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => Ok(Blob::Document(parse_pdf(key, bytes)?)),
        Some("json") => Ok(Blob::Json(serde_json::from_slice(bytes)?)),
        Some(other) => Err(ReviewError::UnsupportedInput(format!("{key} (.{other})"))),
        None => Err(ReviewError::UnsupportedInput(format!("{key} (no extension)"))),
    }
}

/// Loads a document blob: a PDF, or a JSON page map as written by an
/// earlier extraction.
pub async fn load_document(store: &dyn BlobStore, key: &str) -> Result<Document> {
    let bytes = store.get(key).await?;
    match parse_blob(key, &bytes).with_context(|| format!("failed to parse {key}"))? {
        Blob::Document(document) => Ok(document),
        Blob::Json(value) => serde_json::from_value(value)
            .with_context(|| format!("{key} is not a page map")),
    }
}

pub async fn get_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Result<T> {
    let bytes = store.get(key).await?;
    serde_json::from_slice(&bytes).with_context(|| format!("failed to decode {key}"))
}

pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
    overwrite: bool,
) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.put(key, Bytes::from(bytes), overwrite).await
}

/// Keys sitting directly under `folder`, not in its subfolders.
pub fn direct_children(folder: &str, keys: &[String]) -> Vec<String> {
    let prefix = format!("{}/", folder.trim_end_matches('/'));
    keys.iter()
        .filter(|key| {
            key.strip_prefix(&prefix)
                .map_or(false, |rest| !rest.is_empty() && !rest.contains('/'))
        })
        .cloned()
        .collect()
}

pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

pub fn file_stem(key: &str) -> &str {
    let name = file_name(key);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Blob store over a directory tree.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(BlobError::InvalidKey(key.to_string()).into());
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()).into())
            }
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn put(&self, key: &str, bytes: Bytes, overwrite: bool) -> Result<()> {
        let path = self.path_for(key)?;
        if !overwrite && tokio::fs::try_exists(&path).await? {
            return Err(BlobError::AlreadyExists(key.to_string()).into());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::debug!(key, bytes = bytes.len(), "blob written");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)?).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to list {}", dir.display()))
                }
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-process blob store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Bytes>) {
        self.blobs.write().insert(key.into(), bytes.into());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Bytes> {
        self.blobs
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()).into())
    }

    async fn put(&self, key: &str, bytes: Bytes, overwrite: bool) -> Result<()> {
        let mut blobs = self.blobs.write();
        if !overwrite && blobs.contains_key(key) {
            return Err(BlobError::AlreadyExists(key.to_string()).into());
        }
        blobs.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.read().contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
