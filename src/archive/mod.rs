//! In-memory archive browsing.
//!
//! Readers buffer the whole archive up front — a deliberate trade for
//! simple random access — and answer list / list-dir / extract queries
//! without materializing anything to disk. Resources are released on drop.

use std::io;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

mod memory;
mod strip;

pub use memory::MemArchive;
pub use strip::PrefixStripped;

#[cfg(test)]
pub(crate) use memory::fixtures;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("'{0}' is a directory")]
    IsDirectory(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed archive: {0}")]
    Malformed(String),
}

/// One archive entry.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    /// Full path inside the archive, no leading or trailing slash.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub size: u64,
    pub mod_time: Option<DateTime<Utc>>,
    pub is_dir: bool,
    pub mode: u32,
    pub compressed_size: Option<u64>,
}

/// Random access over an opened archive.
pub trait ArchiveReader: Send + Sync {
    /// Every entry in the archive.
    fn list(&self) -> Vec<FileInfo>;

    /// Entries directly inside `dir` (`""` is the root), synthesizing
    /// directory entries for subtrees even when the archive carries no
    /// explicit directory records. Each component appears exactly once.
    fn list_dir(&self, dir: &str) -> Vec<FileInfo>;

    /// The exact bytes of the entry at `path`.
    fn extract(&self, path: &str) -> Result<Vec<u8>, ArchiveError>;
}

/// Supported formats, detected from the filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    /// Outer tar wrapping an inner `data.tar.gz` holding the real files.
    Gem,
}

/// Extension-based detection; compound extensions are checked before their
/// suffixes so `.tar.gz` never reads as `.gz`.
pub fn detect_format(filename: &str) -> Option<ArchiveFormat> {
    let name = filename.to_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".crate") {
        Some(ArchiveFormat::TarGz)
    } else if name.ends_with(".tar.bz2") {
        Some(ArchiveFormat::TarBz2)
    } else if name.ends_with(".tar.xz") {
        Some(ArchiveFormat::TarXz)
    } else if name.ends_with(".tar") {
        Some(ArchiveFormat::Tar)
    } else if name.ends_with(".zip")
        || name.ends_with(".jar")
        || name.ends_with(".whl")
        || name.ends_with(".nupkg")
        || name.ends_with(".egg")
    {
        Some(ArchiveFormat::Zip)
    } else if name.ends_with(".gem") {
        Some(ArchiveFormat::Gem)
    } else {
        None
    }
}

/// Open archive bytes using the format implied by `filename`.
pub fn open_archive(filename: &str, bytes: Vec<u8>) -> Result<MemArchive, ArchiveError> {
    let format = detect_format(filename)
        .ok_or_else(|| ArchiveError::UnsupportedFormat(filename.to_string()))?;
    MemArchive::open(format, bytes)
}
