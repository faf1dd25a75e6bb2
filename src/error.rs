//! Crate-wide error kinds and their HTTP mapping.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::blob::StoreError;
use crate::catalog::CatalogError;
use crate::fetch::FetchError;

/// Coarse error classification shared across subsystems.
///
/// Cloneable so it can travel through the single-flight completion channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    RateLimited,
    UpstreamDown,
    Cancelled,
    BadRequest,
    Storage,
    Catalog,
    CircuitOpen,
    Validation,
}

/// Top-level error for the request-servicing pipeline.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("not found")]
    NotFound,

    #[error("upstream rate limited")]
    RateLimited,

    #[error("upstream unavailable: {0}")]
    UpstreamDown(String),

    #[error("circuit open for host {0}")]
    CircuitOpen(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl ProxyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::UpstreamDown(_) => ErrorKind::UpstreamDown,
            Self::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Catalog(_) => ErrorKind::Catalog,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }

    /// HTTP status code for the user-visible response.
    pub fn status(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::BadRequest | ErrorKind::Validation => 400,
            ErrorKind::Cancelled => 499,
            ErrorKind::RateLimited
            | ErrorKind::UpstreamDown
            | ErrorKind::CircuitOpen
            | ErrorKind::Storage
            | ErrorKind::Catalog => 502,
        }
    }

    /// Rebuild an error from the classification carried by a single-flight
    /// completion signal.
    pub fn from_kind(kind: ErrorKind, message: &str) -> Self {
        match kind {
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::RateLimited => Self::RateLimited,
            ErrorKind::UpstreamDown => Self::UpstreamDown(message.to_string()),
            ErrorKind::CircuitOpen => Self::CircuitOpen(message.to_string()),
            ErrorKind::Cancelled => Self::Cancelled,
            ErrorKind::BadRequest => Self::BadRequest(message.to_string()),
            ErrorKind::Storage => Self::Storage(StoreError::Backend(message.to_string())),
            ErrorKind::Catalog => Self::Catalog(CatalogError::Backend(message.to_string())),
            ErrorKind::Validation => Self::Validation(message.to_string()),
        }
    }
}

impl From<ArchiveError> for ProxyError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::NotFound(_) => Self::NotFound,
            ArchiveError::IsDirectory(path) => Self::BadRequest(format!("'{path}' is a directory")),
            ArchiveError::UnsupportedFormat(name) => {
                Self::Validation(format!("unsupported archive format: {name}"))
            }
            ArchiveError::Malformed(msg) => Self::Validation(format!("malformed archive: {msg}")),
            ArchiveError::Io(e) => Self::Storage(StoreError::Io(e)),
        }
    }
}

impl From<FetchError> for ProxyError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound => Self::NotFound,
            FetchError::RateLimited => Self::RateLimited,
            FetchError::UpstreamDown { status } => {
                Self::UpstreamDown(format!("upstream returned {status}"))
            }
            FetchError::CircuitOpen { host } => Self::CircuitOpen(host),
            FetchError::Denied { status } => {
                Self::BadRequest(format!("upstream rejected request ({status})"))
            }
            FetchError::BadUrl(url) => Self::BadRequest(format!("invalid upstream url: {url}")),
            FetchError::Transport(e) => Self::UpstreamDown(e.to_string()),
        }
    }
}
