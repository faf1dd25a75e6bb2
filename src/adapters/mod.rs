//! Per-ecosystem protocol adapters.
//!
//! An adapter turns a request path (relative to its mount) into either a
//! [`FetchRequest`] for the proxy core or a synthetic response served
//! without touching upstream. Adapters also own the storage-key formula
//! `ecosystem/[namespace/]name/version/filename` and know whether their
//! archives wrap files in a top-level directory.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProxyError;
use crate::proxy::FetchRequest;

mod cargo;
mod gem;
mod golang;
mod npm;
mod pypi;

pub use cargo::CargoAdapter;
pub use gem::GemAdapter;
pub use golang::GoAdapter;
pub use npm::NpmAdapter;
pub use pypi::PypiAdapter;

/// Outcome of resolving a client path.
#[derive(Debug)]
pub enum Resolution {
    Fetch(FetchRequest),
    /// Served directly, e.g. a registry configuration document.
    Synthetic {
        content_type: &'static str,
        body: String,
    },
}

pub trait Adapter: Send + Sync {
    fn ecosystem(&self) -> &'static str;

    /// Resolve `path` (no leading slash, relative to the mount).
    fn resolve(&self, path: &str) -> Result<Resolution, ProxyError>;

    /// The literal top-level directory this ecosystem wraps archive
    /// contents in, if any; stripped transparently when browsing.
    fn archive_prefix(&self, _name: &str, _version: &str, _filename: &str) -> Option<String> {
        None
    }
}

/// Pure pass-through for ecosystems proxied without artifact caching:
/// every request forwards to the upstream base, streaming.
pub struct PassthroughAdapter {
    ecosystem: &'static str,
    upstream: String,
}

impl std::fmt::Debug for PassthroughAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughAdapter")
            .field("ecosystem", &self.ecosystem)
            .finish()
    }
}

impl PassthroughAdapter {
    pub fn new(ecosystem: &'static str, upstream: impl Into<String>) -> Self {
        Self {
            ecosystem,
            upstream: upstream.into(),
        }
    }
}

impl Adapter for PassthroughAdapter {
    fn ecosystem(&self) -> &'static str {
        self.ecosystem
    }

    fn resolve(&self, path: &str) -> Result<Resolution, ProxyError> {
        Ok(Resolution::Fetch(FetchRequest::metadata(format!(
            "{}/{path}",
            self.upstream
        ))))
    }
}

/// Mount table consulted by the HTTP router.
#[derive(Default)]
pub struct AdapterSet {
    mounts: HashMap<&'static str, Arc<dyn Adapter>>,
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut mounts: Vec<&&str> = self.mounts.keys().collect();
        mounts.sort();
        f.debug_struct("AdapterSet").field("mounts", &mounts).finish()
    }
}

impl AdapterSet {
    pub fn insert(&mut self, mount: &'static str, adapter: Arc<dyn Adapter>) {
        self.mounts.insert(mount, adapter);
    }

    pub fn get(&self, mount: &str) -> Option<&Arc<dyn Adapter>> {
        self.mounts.get(mount)
    }

    /// Find the adapter serving an ecosystem (mount and ecosystem name
    /// differ only for OCI's `/v2` mount).
    pub fn by_ecosystem(&self, ecosystem: &str) -> Option<&Arc<dyn Adapter>> {
        self.mounts
            .values()
            .find(|a| a.ecosystem() == ecosystem)
            .or_else(|| self.get(ecosystem))
    }

    pub fn mounts(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.mounts.keys().copied()
    }
}

/// The full mount table with default upstreams. `public_url` is this
/// proxy's own externally-reachable base, used by synthetic registry
/// configuration documents.
pub fn default_adapters(public_url: &str) -> AdapterSet {
    let mut set = AdapterSet::default();
    set.insert("npm", Arc::new(NpmAdapter::default()));
    set.insert("cargo", Arc::new(CargoAdapter::new(public_url)));
    set.insert("gem", Arc::new(GemAdapter::default()));
    set.insert("pypi", Arc::new(PypiAdapter::default()));
    set.insert("go", Arc::new(GoAdapter::default()));

    for (mount, ecosystem, upstream) in [
        ("hex", "hex", "https://repo.hex.pm"),
        ("pub", "pub", "https://pub.dev"),
        ("maven", "maven", "https://repo1.maven.org/maven2"),
        ("nuget", "nuget", "https://api.nuget.org"),
        ("composer", "composer", "https://repo.packagist.org"),
        ("conan", "conan", "https://center.conan.io"),
        ("conda", "conda", "https://conda.anaconda.org"),
        ("cran", "cran", "https://cran.r-project.org"),
        ("v2", "oci", "https://registry-1.docker.io/v2"),
        ("debian", "debian", "https://deb.debian.org"),
        ("rpm", "rpm", "https://dl.fedoraproject.org"),
    ] {
        set.insert(mount, Arc::new(PassthroughAdapter::new(ecosystem, upstream)));
    }
    set
}

/// Split an `{name}-{version}.{ext}` artifact stem at its last dash.
/// Registry filenames put the version last, so this holds even for names
/// containing dashes.
pub(crate) fn split_name_version(stem: &str) -> Option<(&str, &str)> {
    let (name, version) = stem.rsplit_once('-')?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::RequestKind;

    #[test]
    fn test_default_mount_table_is_complete() {
        let set = default_adapters("http://localhost:8080");
        for mount in [
            "npm", "cargo", "gem", "go", "hex", "pub", "pypi", "maven", "nuget", "composer",
            "conan", "conda", "cran", "v2", "debian", "rpm",
        ] {
            assert!(set.get(mount).is_some(), "missing mount {mount}");
        }
        assert_eq!(set.get("v2").unwrap().ecosystem(), "oci");
        assert_eq!(set.by_ecosystem("oci").unwrap().ecosystem(), "oci");
    }

    #[test]
    fn test_passthrough_streams_everything() {
        let adapter = PassthroughAdapter::new("hex", "https://repo.hex.pm");
        let Resolution::Fetch(req) = adapter.resolve("tarballs/plug-1.15.0.tar").unwrap() else {
            panic!("expected fetch");
        };
        assert_eq!(req.kind, RequestKind::Metadata);
        assert_eq!(req.upstream_url, "https://repo.hex.pm/tarballs/plug-1.15.0.tar");
        assert!(req.storage_key.is_none());
    }

    #[test]
    fn test_split_name_version() {
        assert_eq!(split_name_version("left-pad-1.3.0"), Some(("left-pad", "1.3.0")));
        assert_eq!(split_name_version("serde-1.0.200"), Some(("serde", "1.0.200")));
        assert_eq!(split_name_version("noversion"), None);
    }
}
