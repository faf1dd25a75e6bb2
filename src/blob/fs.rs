//! Filesystem blob store.
//!
//! Keys map directly onto a directory tree under the store root, so an
//! `ls` of the root is browsable by ecosystem/name/version. Writes go to
//! a sibling `tmp/` directory on the same volume and are renamed into
//! place, which makes them atomic at the key boundary.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use super::{BlobReader, BlobStore, StoreError};

pub struct FsStore {
    root: PathBuf,
    tmp: PathBuf,
}

impl std::fmt::Debug for FsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsStore").field("root", &self.root).finish()
    }
}

impl FsStore {
    /// Create a store rooted at `root`, creating the directory tree as
    /// needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let tmp = root.join(".tmp");
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(&tmp).await?;
        Ok(Self { root, tmp })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to its on-disk path, rejecting traversal attempts.
    fn blob_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.starts_with('/') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn tmp_path(&self) -> PathBuf {
        let unique = format!(
            "write-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        self.tmp.join(unique)
    }
}

#[async_trait]
impl BlobStore for FsStore {
    async fn store(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(u64, String), StoreError> {
        let dest = self.blob_path(key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.tmp_path();
        let mut file = File::create(&tmp).await?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    drop(file);
                    fs::remove_file(&tmp).await.ok();
                    return Err(e.into());
                }
            };
            if let Err(e) = file.write_all(&buf[..n]).await {
                drop(file);
                fs::remove_file(&tmp).await.ok();
                return Err(e.into());
            }
            hasher.update(&buf[..n]);
            written += n as u64;
        }

        file.flush().await?;
        drop(file);
        fs::rename(&tmp, &dest).await?;

        Ok((written, hex::encode(hasher.finalize())))
    }

    async fn open(&self, key: &str) -> Result<BlobReader, StoreError> {
        let path = self.blob_path(key)?;
        match File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.blob_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn size(&self, key: &str) -> Result<u64, StoreError> {
        let path = self.blob_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn modified(&self, key: &str) -> Result<Option<SystemTime>, StoreError> {
        let path = self.blob_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.modified().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn used_space(&self) -> Result<u64, StoreError> {
        let root = self.root.clone();
        let tmp = self.tmp.clone();
        tokio::task::spawn_blocking(move || {
            let mut total = 0u64;
            for entry in walkdir::WalkDir::new(&root).into_iter().flatten() {
                if entry.path().starts_with(&tmp) {
                    continue;
                }
                if entry.file_type().is_file() {
                    if let Ok(meta) = entry.metadata() {
                        total += meta.len();
                    }
                }
            }
            total
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use sha2::{Digest, Sha256};
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    use super::*;

    async fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_store_and_open() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();

        let data = b"hello, depot!";
        let mut input = &data[..];
        let (size, hash) = store
            .store("npm/left-pad/1.3.0/left-pad-1.3.0.tgz", &mut input)
            .await
            .unwrap();

        assert_eq!(size, data.len() as u64);
        assert_eq!(hash, hex::encode(Sha256::digest(data)));
        assert!(store.exists("npm/left-pad/1.3.0/left-pad-1.3.0.tgz").await.unwrap());
        assert_eq!(
            store.size("npm/left-pad/1.3.0/left-pad-1.3.0.tgz").await.unwrap(),
            size
        );

        let reader = store
            .open("npm/left-pad/1.3.0/left-pad-1.3.0.tgz")
            .await
            .unwrap();
        assert_eq!(read_all(reader).await, data);
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        let err = match store.open("npm/missing/1.0.0/x.tgz").await {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        store.delete("npm/missing/1.0.0/x.tgz").await.unwrap();
    }

    #[tokio::test]
    async fn test_overwrite_preserves_open_snapshot() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();

        let mut first = &b"first contents"[..];
        store.store("gem/rails/7.0.0/rails.gem", &mut first).await.unwrap();
        let reader = store.open("gem/rails/7.0.0/rails.gem").await.unwrap();

        let mut second = &b"second"[..];
        store.store("gem/rails/7.0.0/rails.gem", &mut second).await.unwrap();

        // The handle opened before the overwrite still sees its snapshot.
        assert_eq!(read_all(reader).await, b"first contents");
        let fresh = store.open("gem/rails/7.0.0/rails.gem").await.unwrap();
        assert_eq!(read_all(fresh).await, b"second");
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        for key in ["../escape", "/abs/path", "a//b", ""] {
            let mut input = &b"x"[..];
            let err = store.store(key, &mut input).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)), "key: {key}");
        }
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();

        // A reader that yields one chunk and then fails.
        let stream = futures::stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"partial")),
            Err(std::io::Error::other("connection reset")),
        ]);
        let mut reader = tokio_util::io::StreamReader::new(stream);

        let err = store.store("npm/x/1.0.0/x.tgz", &mut reader).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(!store.exists("npm/x/1.0.0/x.tgz").await.unwrap());
        // No abandoned partial in the temp area either.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join(".tmp"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_used_space_sums_blobs() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path()).await.unwrap();
        let mut a = &b"1234"[..];
        let mut b = &b"56789"[..];
        store.store("npm/a/1.0.0/a.tgz", &mut a).await.unwrap();
        store.store("npm/b/1.0.0/b.tgz", &mut b).await.unwrap();
        assert_eq!(store.used_space().await.unwrap(), 9);
    }
}
