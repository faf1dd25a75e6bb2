//! PyPI adapter.
//!
//! The simple index (`simple/{name}/`) is cacheable metadata; package
//! files under `packages/…/{filename}` are cached artifacts fetched from
//! the files host. Wheels are zips with no wrapper directory; sdists wrap
//! their contents in `{name}-{version}/`.

use crate::error::ProxyError;
use crate::proxy::{FetchRequest, RequestKind};
use crate::purl::Purl;

use super::{Adapter, Resolution};

pub struct PypiAdapter {
    upstream: String,
    files_upstream: String,
}

impl std::fmt::Debug for PypiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PypiAdapter").finish()
    }
}

impl Default for PypiAdapter {
    fn default() -> Self {
        Self {
            upstream: "https://pypi.org".to_string(),
            files_upstream: "https://files.pythonhosted.org".to_string(),
        }
    }
}

/// `requests-2.31.0-py3-none-any.whl` → (`requests`, `2.31.0`);
/// `requests-2.31.0.tar.gz` → the same. Wheel filenames are
/// `name-version-tags…`, sdists `name-version.ext`.
fn parse_artifact_name(filename: &str) -> Option<(String, String)> {
    if let Some(stem) = filename.strip_suffix(".whl").or_else(|| filename.strip_suffix(".egg")) {
        let mut parts = stem.split('-');
        let name = parts.next()?;
        let version = parts.next()?;
        return Some((name.to_string(), version.to_string()));
    }
    let stem = filename
        .strip_suffix(".tar.gz")
        .or_else(|| filename.strip_suffix(".tar.bz2"))
        .or_else(|| filename.strip_suffix(".zip"))?;
    let (name, version) = stem.rsplit_once('-')?;
    Some((name.to_string(), version.to_string()))
}

impl Adapter for PypiAdapter {
    fn ecosystem(&self) -> &'static str {
        "pypi"
    }

    fn resolve(&self, path: &str) -> Result<Resolution, ProxyError> {
        if path.starts_with("packages/") {
            let filename = path.rsplit('/').next().unwrap_or_default();
            let (name, version) = parse_artifact_name(filename).ok_or_else(|| {
                ProxyError::BadRequest(format!("unrecognized pypi filename: {filename}"))
            })?;
            return Ok(Resolution::Fetch(FetchRequest {
                kind: RequestKind::Artifact,
                upstream_url: format!("{}/{path}", self.files_upstream),
                storage_key: Some(format!("pypi/{name}/{version}/{filename}")),
                purl: Some(Purl::version("pypi", &name, &version)),
                filename: Some(filename.to_string()),
                content_type: Some("application/octet-stream".to_string()),
            }));
        }

        let storage_key = path
            .strip_prefix("simple/")
            .map(|rest| rest.trim_end_matches('/'))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .map(|name| format!("pypi/{name}/_simple.html"));

        Ok(Resolution::Fetch(FetchRequest {
            kind: RequestKind::Metadata,
            upstream_url: format!("{}/{path}", self.upstream),
            storage_key,
            purl: None,
            filename: None,
            content_type: Some("text/html".to_string()),
        }))
    }

    fn archive_prefix(&self, name: &str, version: &str, filename: &str) -> Option<String> {
        // Only sdists carry the wrapper directory.
        (filename.ends_with(".tar.gz") || filename.ends_with(".tar.bz2") || filename.ends_with(".zip"))
            .then(|| format!("{name}-{version}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wheel_resolution() {
        let adapter = PypiAdapter::default();
        let Resolution::Fetch(req) = adapter
            .resolve("packages/ab/cd/requests-2.31.0-py3-none-any.whl")
            .unwrap()
        else {
            panic!("expected fetch");
        };
        assert_eq!(req.kind, RequestKind::Artifact);
        assert_eq!(
            req.upstream_url,
            "https://files.pythonhosted.org/packages/ab/cd/requests-2.31.0-py3-none-any.whl"
        );
        assert_eq!(
            req.storage_key.as_deref(),
            Some("pypi/requests/2.31.0/requests-2.31.0-py3-none-any.whl")
        );
        assert_eq!(
            req.purl.unwrap().to_purl_string(),
            "pkg:pypi/requests@2.31.0"
        );
        // Wheels browse without a prefix.
        assert_eq!(
            adapter.archive_prefix("requests", "2.31.0", "requests-2.31.0-py3-none-any.whl"),
            None
        );
    }

    #[test]
    fn test_sdist_resolution() {
        let adapter = PypiAdapter::default();
        let Resolution::Fetch(req) = adapter
            .resolve("packages/source/r/requests/requests-2.31.0.tar.gz")
            .unwrap()
        else {
            panic!("expected fetch");
        };
        assert_eq!(
            req.storage_key.as_deref(),
            Some("pypi/requests/2.31.0/requests-2.31.0.tar.gz")
        );
        assert_eq!(
            adapter.archive_prefix("requests", "2.31.0", "requests-2.31.0.tar.gz"),
            Some("requests-2.31.0/".to_string())
        );
    }

    #[test]
    fn test_simple_index_is_cacheable() {
        let adapter = PypiAdapter::default();
        let Resolution::Fetch(req) = adapter.resolve("simple/requests/").unwrap() else {
            panic!("expected fetch");
        };
        assert_eq!(req.kind, RequestKind::Metadata);
        assert_eq!(req.upstream_url, "https://pypi.org/simple/requests/");
        assert_eq!(
            req.storage_key.as_deref(),
            Some("pypi/requests/_simple.html")
        );
    }
}
