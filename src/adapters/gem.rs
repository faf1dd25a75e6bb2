//! RubyGems adapter.
//!
//! `gems/{name}-{version}.gem` downloads are cached; the compact index
//! (`info/{name}`, `versions`, `names`) and spec files stream through,
//! with per-gem info documents cached under a derived key. Gem files are
//! nested tars handled by the archive browser, no prefix.

use crate::error::ProxyError;
use crate::proxy::{FetchRequest, RequestKind};
use crate::purl::Purl;

use super::{split_name_version, Adapter, Resolution};

pub struct GemAdapter {
    upstream: String,
}

impl std::fmt::Debug for GemAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GemAdapter").finish()
    }
}

impl Default for GemAdapter {
    fn default() -> Self {
        Self::new("https://rubygems.org")
    }
}

impl GemAdapter {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
        }
    }
}

impl Adapter for GemAdapter {
    fn ecosystem(&self) -> &'static str {
        "gem"
    }

    fn resolve(&self, path: &str) -> Result<Resolution, ProxyError> {
        let upstream_url = format!("{}/{path}", self.upstream);

        if let Some(filename) = path.strip_prefix("gems/") {
            if !filename.contains('/') && filename.ends_with(".gem") {
                let stem = filename.trim_end_matches(".gem");
                let (name, version) = split_name_version(stem).ok_or_else(|| {
                    ProxyError::BadRequest(format!("unrecognized gem name: {filename}"))
                })?;
                return Ok(Resolution::Fetch(FetchRequest {
                    kind: RequestKind::Artifact,
                    upstream_url,
                    storage_key: Some(format!("gem/{name}/{version}/{filename}")),
                    purl: Some(Purl::version("gem", name, version)),
                    filename: Some(filename.to_string()),
                    content_type: Some("application/octet-stream".to_string()),
                }));
            }
        }

        let storage_key = path
            .strip_prefix("info/")
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .map(|name| format!("gem/{name}/_info"));

        Ok(Resolution::Fetch(FetchRequest {
            kind: RequestKind::Metadata,
            upstream_url,
            storage_key,
            purl: None,
            filename: None,
            content_type: Some("text/plain".to_string()),
        }))
    }
}
