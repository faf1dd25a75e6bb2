//! Content-addressed blob storage.
//!
//! Blobs are stored under caller-supplied keys of the form
//! `ecosystem/[namespace/]name/version/filename`. The backend treats keys
//! as opaque `/`-separated strings and never interprets the segments.

use std::io;
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

mod fs;

pub use fs::FsStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("storage error: {0}")]
    Backend(String),
}

/// A readable blob body.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Durable byte storage addressed by storage key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stream `reader` to durable storage under `key`, computing SHA-256
    /// over exactly the bytes written. Returns `(size, sha256_hex)`.
    ///
    /// The write is atomic at the key boundary: concurrent readers holding
    /// an open handle keep their snapshot; new readers see either the old
    /// or the new content, never a torn write. The input is consumed
    /// sequentially; no seeking is required.
    async fn store(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(u64, String), StoreError>;

    /// Open the blob for reading. `NotFound` if absent.
    async fn open(&self, key: &str) -> Result<BlobReader, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn size(&self, key: &str) -> Result<u64, StoreError>;

    /// Last modification time, `None` if the blob is absent.
    async fn modified(&self, key: &str) -> Result<Option<SystemTime>, StoreError>;

    /// Remove the blob; absent keys are a no-op.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Total bytes currently stored.
    async fn used_space(&self) -> Result<u64, StoreError>;
}
