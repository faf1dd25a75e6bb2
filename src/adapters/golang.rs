//! Go module proxy adapter.
//!
//! Paths follow the GOPROXY protocol: `{module}/@v/list`,
//! `{module}/@v/{version}.info|.mod|.zip`, `{module}/@latest`. Only the
//! zips are cached as artifacts; module zips wrap their contents in
//! `{module}@{version}/`.

use crate::error::ProxyError;
use crate::proxy::{FetchRequest, RequestKind};
use crate::purl::Purl;

use super::{Adapter, Resolution};

pub struct GoAdapter {
    upstream: String,
}

impl std::fmt::Debug for GoAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoAdapter").finish()
    }
}

impl Default for GoAdapter {
    fn default() -> Self {
        Self::new("https://proxy.golang.org")
    }
}

impl GoAdapter {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
        }
    }
}

impl Adapter for GoAdapter {
    fn ecosystem(&self) -> &'static str {
        "go"
    }

    fn resolve(&self, path: &str) -> Result<Resolution, ProxyError> {
        let upstream_url = format!("{}/{path}", self.upstream);

        if let Some((module, rest)) = path.split_once("/@v/") {
            if let Some(version) = rest.strip_suffix(".zip") {
                if module.is_empty() || version.is_empty() {
                    return Err(ProxyError::BadRequest(format!(
                        "unrecognized go module path: {path}"
                    )));
                }
                let filename = format!("{version}.zip");
                return Ok(Resolution::Fetch(FetchRequest {
                    kind: RequestKind::Artifact,
                    upstream_url,
                    storage_key: Some(format!("go/{module}/{version}/{filename}")),
                    purl: Some(Purl::version("go", module, version)),
                    filename: Some(filename),
                    content_type: Some("application/zip".to_string()),
                }));
            }
        }

        // list / .info / .mod / @latest all stream through.
        Ok(Resolution::Fetch(FetchRequest {
            kind: RequestKind::Metadata,
            upstream_url,
            storage_key: None,
            purl: None,
            filename: None,
            content_type: None,
        }))
    }

    fn archive_prefix(&self, name: &str, version: &str, _filename: &str) -> Option<String> {
        Some(format!("{name}@{version}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_is_cached_artifact() {
        let adapter = GoAdapter::default();
        let Resolution::Fetch(req) = adapter
            .resolve("github.com/pkg/errors/@v/v0.9.1.zip")
            .unwrap()
        else {
            panic!("expected fetch");
        };
        assert_eq!(req.kind, RequestKind::Artifact);
        assert_eq!(
            req.upstream_url,
            "https://proxy.golang.org/github.com/pkg/errors/@v/v0.9.1.zip"
        );
        assert_eq!(
            req.storage_key.as_deref(),
            Some("go/github.com/pkg/errors/v0.9.1/v0.9.1.zip")
        );
        assert_eq!(
            req.purl.unwrap().to_purl_string(),
            "pkg:go/github.com/pkg/errors@v0.9.1"
        );
        assert_eq!(
            adapter.archive_prefix("github.com/pkg/errors", "v0.9.1", "v0.9.1.zip"),
            Some("github.com/pkg/errors@v0.9.1/".to_string())
        );
    }

    #[test]
    fn test_info_and_list_stream_through() {
        let adapter = GoAdapter::default();
        for path in [
            "github.com/pkg/errors/@v/list",
            "github.com/pkg/errors/@v/v0.9.1.info",
            "github.com/pkg/errors/@v/v0.9.1.mod",
            "github.com/pkg/errors/@latest",
        ] {
            let Resolution::Fetch(req) = adapter.resolve(path).unwrap() else {
                panic!("expected fetch");
            };
            assert_eq!(req.kind, RequestKind::Metadata, "{path}");
            assert!(req.storage_key.is_none(), "{path}");
        }
    }
}
