//! Object storage seam.
//!
//! Keys are flat strings; `/` is the folder delimiter and folders only exist as
//! shared key prefixes. Two backends implement [`ObjectStore`]:
//!
//! - [`LocalBucket`]: objects as files under a root directory
//! - [`MemoryBucket`]: an in-process ordered map
//!
//! [`Bucket`] wraps whichever one the configuration selects.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::warn;

mod local;
mod memory;

pub use local::LocalBucket;
pub use memory::MemoryBucket;

/// Folder delimiter used by listings.
pub const DELIMITER: char = '/';

/// Name of the marker object that keeps an otherwise empty folder visible.
pub const FOLDER_PLACEHOLDER: &str = ".folder-placeholder";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("upload was staged by a different bucket")]
    ForeignStaging,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub uploaded: DateTime<Utc>,
}

pub enum ObjectBody {
    Bytes(Bytes),
    File(tokio::fs::File),
}

pub struct StoredObject {
    pub meta: ObjectMeta,
    pub body: ObjectBody,
}

/// Result of a delimited listing under one prefix.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Objects directly under the prefix.
    pub objects: Vec<ObjectMeta>,
    /// Full sub-folder prefixes, each ending in the delimiter.
    pub common_prefixes: Vec<String>,
}

/// Bytes of an upload in progress. Nothing is visible in the bucket until
/// [`ObjectStore::commit`] gives them a key.
pub struct StagedObject {
    body: StagedBody,
    hasher: Sha256,
    size: u64,
}

pub(crate) enum StagedBody {
    Memory(BytesMut),
    File { file: fs::File, path: PathBuf },
}

impl StagedBody {
    pub(crate) async fn discard(self) {
        if let StagedBody::File { file, path } = self {
            drop(file);
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "could not remove staged upload");
            }
        }
    }
}

impl StagedObject {
    pub(crate) fn in_memory() -> Self {
        Self::with_body(StagedBody::Memory(BytesMut::new()))
    }

    pub(crate) fn on_disk(file: fs::File, path: PathBuf) -> Self {
        Self::with_body(StagedBody::File { file, path })
    }

    fn with_body(body: StagedBody) -> Self {
        Self {
            body,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    pub async fn write(&mut self, chunk: &[u8]) -> StorageResult<()> {
        match &mut self.body {
            StagedBody::Memory(buf) => buf.extend_from_slice(chunk),
            StagedBody::File { file, .. } => file.write_all(chunk).await?,
        }
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
        Ok(())
    }

    pub async fn discard(self) {
        self.body.discard().await;
    }

    /// Body, size and hex SHA-256 etag of everything written.
    pub(crate) fn finish(self) -> (StagedBody, u64, String) {
        (self.body, self.size, hex::encode(self.hasher.finalize()))
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Opens a staging area for an object whose key may not be known yet.
    async fn stage(&self) -> StorageResult<StagedObject>;

    /// Publishes staged bytes under `key`, replacing any previous object.
    /// The staged bytes are discarded when this fails.
    async fn commit(&self, key: &str, staged: StagedObject, content_type: Option<String>) -> StorageResult<ObjectMeta>;

    async fn put(&self, key: &str, body: Bytes, content_type: Option<String>) -> StorageResult<ObjectMeta> {
        validate_key(key)?;
        let mut staged = self.stage().await?;
        if let Err(e) = staged.write(&body).await {
            staged.discard().await;
            return Err(e);
        }
        self.commit(key, staged, content_type).await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>>;

    /// Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn list(&self, prefix: &str) -> StorageResult<Listing>;
}

/// Which backend [`Bucket::open`] builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketConfig {
    Memory,
    Local { root: PathBuf },
}

pub enum Bucket {
    Memory(MemoryBucket),
    Local(LocalBucket),
}

macro_rules! delegate_bucket {
    ($self:ident, $method:ident ( $($arg:expr),* )) => {
        match $self {
            Bucket::Memory(b) => b.$method($($arg),*).await,
            Bucket::Local(b) => b.$method($($arg),*).await,
        }
    };
}

impl Bucket {
    pub async fn open(config: &BucketConfig) -> StorageResult<Self> {
        match config {
            BucketConfig::Memory => Ok(Bucket::Memory(MemoryBucket::new())),
            BucketConfig::Local { root } => Ok(Bucket::Local(LocalBucket::open(root).await?)),
        }
    }

    pub fn memory() -> Self {
        Bucket::Memory(MemoryBucket::new())
    }
}

#[async_trait]
impl ObjectStore for Bucket {
    async fn stage(&self) -> StorageResult<StagedObject> {
        delegate_bucket!(self, stage())
    }

    async fn commit(&self, key: &str, staged: StagedObject, content_type: Option<String>) -> StorageResult<ObjectMeta> {
        delegate_bucket!(self, commit(key, staged, content_type))
    }

    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        delegate_bucket!(self, get(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        delegate_bucket!(self, delete(key))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Listing> {
        delegate_bucket!(self, list(prefix))
    }
}

/// Rejects keys that cannot be mapped onto path segments safely.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".into()));
    }
    if key.contains('\\') || key.contains('\0') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if key.split(DELIMITER).any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// A listing prefix is valid when its folder part is a valid key (or empty).
pub fn validate_prefix(prefix: &str) -> StorageResult<()> {
    match prefix.rsplit_once(DELIMITER) {
        Some((dir, _)) => validate_key(dir),
        None => Ok(()),
    }
}

/// Groups metadata of keys into a delimited [`Listing`] for `prefix`.
pub fn group_listing<I>(prefix: &str, metas: I) -> Listing
where
    I: IntoIterator<Item = ObjectMeta>,
{
    let mut objects = Vec::new();
    let mut prefixes = BTreeSet::new();

    for meta in metas {
        let Some(rest) = meta.key.strip_prefix(prefix) else {
            continue;
        };
        match rest.find(DELIMITER) {
            Some(idx) => {
                prefixes.insert(format!("{prefix}{}", &rest[..=idx]));
            }
            None => objects.push(meta),
        }
    }

    objects.sort_by(|a, b| a.key.cmp(&b.key));
    Listing {
        objects,
        common_prefixes: prefixes.into_iter().collect(),
    }
}
