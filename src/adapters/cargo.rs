//! Cargo sparse-registry adapter.
//!
//! `config.json` is answered synthetically, pointing cargo's download and
//! API endpoints back at this proxy. `api/v1/crates/{name}/{version}/download`
//! fetches the `.crate` from the static CDN; all other paths are sparse
//! index files proxied from the upstream index. Crate tarballs wrap their
//! contents in `{name}-{version}/`.

use crate::error::ProxyError;
use crate::proxy::{FetchRequest, RequestKind};
use crate::purl::Purl;

use super::{Adapter, Resolution};

pub struct CargoAdapter {
    index_upstream: String,
    dl_upstream: String,
    public_url: String,
}

impl std::fmt::Debug for CargoAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CargoAdapter").finish()
    }
}

impl CargoAdapter {
    pub fn new(public_url: &str) -> Self {
        Self {
            index_upstream: "https://index.crates.io".to_string(),
            dl_upstream: "https://static.crates.io/crates".to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Adapter for CargoAdapter {
    fn ecosystem(&self) -> &'static str {
        "cargo"
    }

    fn resolve(&self, path: &str) -> Result<Resolution, ProxyError> {
        if path == "config.json" {
            let body = serde_json::json!({
                "dl": format!("{}/cargo/api/v1/crates", self.public_url),
                "api": format!("{}/cargo", self.public_url),
            });
            return Ok(Resolution::Synthetic {
                content_type: "application/json",
                body: body.to_string(),
            });
        }

        if let Some(rest) = path.strip_prefix("api/v1/crates/") {
            let mut parts = rest.split('/');
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(version), Some("download"), None) => {
                    let filename = format!("{name}-{version}.crate");
                    return Ok(Resolution::Fetch(FetchRequest {
                        kind: RequestKind::Artifact,
                        upstream_url: format!("{}/{name}/{filename}", self.dl_upstream),
                        storage_key: Some(format!("cargo/{name}/{version}/{filename}")),
                        purl: Some(Purl::version("cargo", name, version)),
                        filename: Some(filename),
                        content_type: Some("application/gzip".to_string()),
                    }));
                }
                _ => {
                    return Err(ProxyError::BadRequest(format!(
                        "unrecognized cargo api path: {path}"
                    )))
                }
            }
        }

        // Sparse index entry (`se/rd/serde`, `3/s/syn`, …); the crate name
        // is the last segment.
        let name = path.rsplit('/').next().unwrap_or(path);
        Ok(Resolution::Fetch(FetchRequest {
            kind: RequestKind::Metadata,
            upstream_url: format!("{}/{path}", self.index_upstream),
            storage_key: Some(format!("cargo/{name}/_index")),
            purl: None,
            filename: None,
            content_type: Some("text/plain".to_string()),
        }))
    }

    fn archive_prefix(&self, name: &str, version: &str, _filename: &str) -> Option<String> {
        Some(format!("{name}-{version}/"))
    }
}
