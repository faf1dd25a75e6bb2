//! npm registry adapter.
//!
//! Tarball requests look like `left-pad/-/left-pad-1.3.0.tgz`, scoped
//! packages like `@types/node/-/node-20.1.0.tgz`. Everything else is
//! package metadata. npm tarballs wrap all files under `package/`.

use crate::error::ProxyError;
use crate::proxy::{FetchRequest, RequestKind};
use crate::purl::Purl;

use super::{Adapter, Resolution};

pub struct NpmAdapter {
    upstream: String,
}

impl std::fmt::Debug for NpmAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NpmAdapter").finish()
    }
}

impl Default for NpmAdapter {
    fn default() -> Self {
        Self::new("https://registry.npmjs.org")
    }
}

impl NpmAdapter {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
        }
    }

    /// `left-pad-1.3.0.tgz` with package name `left-pad` → `1.3.0`. The
    /// scope is not part of the filename, only of the name.
    fn version_from_filename(name: &str, filename: &str) -> Option<String> {
        let short = name.rsplit('/').next()?;
        let stem = filename.strip_suffix(".tgz")?;
        let version = stem.strip_prefix(short)?.strip_prefix('-')?;
        if version.is_empty() {
            None
        } else {
            Some(version.to_string())
        }
    }
}

impl Adapter for NpmAdapter {
    fn ecosystem(&self) -> &'static str {
        "npm"
    }

    fn resolve(&self, path: &str) -> Result<Resolution, ProxyError> {
        let upstream_url = format!("{}/{path}", self.upstream);

        if let Some((name, filename)) = path.split_once("/-/") {
            let version = Self::version_from_filename(name, filename).ok_or_else(|| {
                ProxyError::BadRequest(format!("unrecognized npm tarball name: {filename}"))
            })?;
            return Ok(Resolution::Fetch(FetchRequest {
                kind: RequestKind::Artifact,
                upstream_url,
                storage_key: Some(format!("npm/{name}/{version}/{filename}")),
                purl: Some(Purl::version("npm", name, &version)),
                filename: Some(filename.to_string()),
                content_type: Some("application/gzip".to_string()),
            }));
        }

        // Bare package documents get a derived cache key; version-specific
        // and search endpoints stream through.
        let segments = path.split('/').count();
        let cacheable = segments == 1 || (segments == 2 && path.starts_with('@'));
        let storage_key = cacheable.then(|| format!("npm/{path}/_metadata.json"));

        Ok(Resolution::Fetch(FetchRequest {
            kind: RequestKind::Metadata,
            upstream_url,
            storage_key,
            purl: None,
            filename: None,
            content_type: Some("application/json".to_string()),
        }))
    }

    fn archive_prefix(&self, _name: &str, _version: &str, _filename: &str) -> Option<String> {
        Some("package/".to_string())
    }
}
