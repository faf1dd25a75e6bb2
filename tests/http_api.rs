//! End-to-end HTTP tests: a real listener, a mock upstream registry, and
//! the full router in between.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use depot::adapters::{AdapterSet, NpmAdapter};
use depot::blob::{BlobStore, FsStore};
use depot::catalog::{open_sqlite, Catalog, Package, Vulnerability};
use depot::enrich::{
    EnrichError, Enricher, MetadataSource, NoVulnSource, UpstreamMetadata,
};
use depot::fetch::{BreakerConfig, Fetcher, NoAuth, RetryPolicy};
use depot::metrics::Metrics;
use depot::proxy::ProxyCore;
use depot::server::{build_router, AppState};

struct NullMeta;

#[async_trait]
impl MetadataSource for NullMeta {
    async fn package_info(
        &self,
        _ecosystem: &str,
        _name: &str,
    ) -> Result<Option<UpstreamMetadata>, EnrichError> {
        Ok(None)
    }
}

fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents).unwrap();
    }
    let tar_bytes = builder.into_inner().unwrap();
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

struct TestServer {
    _dir: tempfile::TempDir,
    base: String,
    catalog: Arc<dyn Catalog>,
    client: reqwest::Client,
}

async fn start_server(upstream_url: &str) -> TestServer {
    let dir = tempfile::TempDir::new().unwrap();
    let catalog: Arc<dyn Catalog> =
        Arc::new(open_sqlite(&dir.path().join("catalog.db")).await.unwrap());
    let store: Arc<dyn BlobStore> =
        Arc::new(FsStore::new(dir.path().join("store")).await.unwrap());
    let metrics = Arc::new(Metrics::new().unwrap());
    let fetcher = Arc::new(
        Fetcher::new(
            RetryPolicy {
                attempts: 2,
                base: Duration::from_millis(1),
            },
            BreakerConfig::default(),
            Arc::new(NoAuth),
        )
        .unwrap(),
    );
    let proxy = ProxyCore::new(
        Arc::clone(&catalog),
        Arc::clone(&store),
        fetcher,
        Arc::clone(&metrics),
        Duration::from_secs(300),
    );
    let enricher = Enricher::new(
        Arc::clone(&catalog),
        Arc::new(NullMeta),
        Arc::new(NoVulnSource),
    );

    let mut adapters = AdapterSet::default();
    adapters.insert("npm", Arc::new(NpmAdapter::new(upstream_url)));

    let state = Arc::new(AppState::new(
        proxy,
        Arc::clone(&catalog),
        store,
        adapters,
        enricher,
        metrics,
        dir.path().join("store").display().to_string(),
        dir.path().join("catalog.db").display().to_string(),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });

    TestServer {
        _dir: dir,
        base: format!("http://{addr}"),
        catalog,
        client: reqwest::Client::new(),
    }
}

const README_V1: &[u8] = b"# left-pad\nline one\nline two\n";
const README_V2: &[u8] = b"# left-pad\nline one\nline 2\n";

/// Register both tarball versions; the returned mocks must outlive the
/// test's requests.
async fn mock_tarballs(server: &mut mockito::ServerGuard) -> Vec<mockito::Mock> {
    let v1 = tar_gz(&[
        ("package/README.md", README_V1),
        ("package/old.txt", b"goes away\n"),
        ("package/index.js", b"module.exports = pad;\n"),
    ]);
    let v2 = tar_gz(&[
        ("package/README.md", README_V2),
        ("package/new.txt", b"brand new\n"),
        ("package/index.js", b"module.exports = pad;\n"),
    ]);
    vec![
        server
            .mock("GET", "/left-pad/-/left-pad-1.0.0.tgz")
            .with_status(200)
            .with_header("content-type", "application/gzip")
            .with_body(v1)
            .create_async()
            .await,
        server
            .mock("GET", "/left-pad/-/left-pad-2.0.0.tgz")
            .with_status(200)
            .with_header("content-type", "application/gzip")
            .with_body(v2)
            .create_async()
            .await,
    ]
}

#[tokio::test]
async fn test_proxy_roundtrip_and_operational_endpoints() {
    let mut upstream = mockito::Server::new_async().await;
    let _mocks = mock_tarballs(&mut upstream).await;
    let ts = start_server(&upstream.url()).await;

    // Cold fetch through the npm mount.
    let resp = ts
        .client
        .get(format!("{}/npm/left-pad/-/left-pad-1.0.0.tgz", ts.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-cache"], "miss");
    let etag = resp.headers()["etag"].to_str().unwrap().to_string();
    assert!(etag.starts_with("sha256-"));
    let first_id: u64 = resp.headers()["x-request-id"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let cold_body = resp.bytes().await.unwrap();

    // Warm fetch: served from cache, same bytes, larger request id.
    let resp = ts
        .client
        .get(format!("{}/npm/left-pad/-/left-pad-1.0.0.tgz", ts.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-cache"], "hit");
    assert_eq!(resp.headers()["etag"].to_str().unwrap(), etag);
    let second_id: u64 = resp.headers()["x-request-id"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(second_id > first_id);
    assert_eq!(resp.bytes().await.unwrap(), cold_body);

    // Health and stats see the cached artifact.
    let resp = ts.client.get(format!("{}/health", ts.base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");

    let stats: serde_json::Value = ts
        .client
        .get(format!("{}/stats", ts.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["cached_artifacts"], 1);
    assert!(stats["total_size_bytes"].as_i64().unwrap() > 0);
    assert!(stats["total_size"].is_string());

    let metrics = ts
        .client
        .get(format!("{}/metrics", ts.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("depot_requests_total"));
    assert!(metrics.contains("depot_cache_hits_total"));

    // Unknown mounts are a plain 404.
    let resp = ts
        .client
        .get(format!("{}/nosuch/thing", ts.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_browse_and_compare() {
    let mut upstream = mockito::Server::new_async().await;
    let _mocks = mock_tarballs(&mut upstream).await;
    let ts = start_server(&upstream.url()).await;

    // Cache both versions.
    for version in ["1.0.0", "2.0.0"] {
        let resp = ts
            .client
            .get(format!(
                "{}/npm/left-pad/-/left-pad-{version}.tgz",
                ts.base
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "fetch {version}");
    }

    // Directory listing with the npm `package/` prefix stripped.
    let listing: serde_json::Value = ts
        .client
        .get(format!("{}/api/browse/npm/left-pad/1.0.0", ts.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = listing["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"README.md"));
    assert!(names.contains(&"old.txt"));
    assert!(!names.contains(&"package"));

    // Raw file bytes with inline disposition.
    let resp = ts
        .client
        .get(format!(
            "{}/api/browse/npm/left-pad/1.0.0/file/README.md",
            ts.base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .contains("README.md"));
    assert_eq!(resp.bytes().await.unwrap(), README_V1);

    // Version diff: one modified, one added, one deleted.
    let diff: serde_json::Value = ts
        .client
        .get(format!("{}/api/compare/npm/left-pad/1.0.0/2.0.0", ts.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(diff["totals"]["files_changed"], 1);
    assert_eq!(diff["totals"]["files_added"], 1);
    assert_eq!(diff["totals"]["files_deleted"], 1);
    let readme = diff["files"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["path"] == "README.md")
        .unwrap();
    let text = readme["diff"].as_str().unwrap();
    assert!(text.contains("--- a/README.md"));
    assert!(text.contains("+++ b/README.md"));

    // Browsing an uncached version is a 404.
    let resp = ts
        .client
        .get(format!("{}/api/browse/npm/left-pad/9.9.9", ts.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_api_package_search_outdated_bulk() {
    let mut upstream = mockito::Server::new_async().await;
    let _mocks = mock_tarballs(&mut upstream).await;
    let ts = start_server(&upstream.url()).await;

    // Seed the catalog through a proxy fetch, then enrich by hand.
    ts.client
        .get(format!("{}/npm/left-pad/-/left-pad-1.0.0.tgz", ts.base))
        .send()
        .await
        .unwrap();
    ts.catalog
        .upsert_package(&Package {
            purl: "pkg:npm/left-pad".to_string(),
            ecosystem: "npm".to_string(),
            name: "left-pad".to_string(),
            latest_version: Some("2.0.0".to_string()),
            license: Some("MIT".to_string()),
            ..Package::default()
        })
        .await
        .unwrap();
    ts.catalog
        .upsert_vulnerability(&Vulnerability {
            vuln_id: "GHSA-test".to_string(),
            ecosystem: "npm".to_string(),
            package_name: "left-pad".to_string(),
            severity: Some("HIGH".to_string()),
            fixed_version: Some("2.0.0".to_string()),
            ..Vulnerability::default()
        })
        .await
        .unwrap();

    let pkg: serde_json::Value = ts
        .client
        .get(format!("{}/api/package/npm/left-pad", ts.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pkg["latest_version"], "2.0.0");
    assert_eq!(pkg["license_category"], "permissive");
    assert_eq!(pkg["vulnerabilities"].as_array().unwrap().len(), 1);
    assert!(!pkg["versions"].as_array().unwrap().is_empty());

    let version: serde_json::Value = ts
        .client
        .get(format!("{}/api/package/npm/left-pad/1.0.0", ts.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(version["version"]["version"], "1.0.0");
    assert!(!version["artifacts"].as_array().unwrap().is_empty());

    // Vulns for an already-fixed version are filtered out.
    let vulns: serde_json::Value = ts
        .client
        .get(format!("{}/api/vulns/npm/left-pad/1.0.0", ts.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(vulns.as_array().unwrap().len(), 1);
    let vulns: serde_json::Value = ts
        .client
        .get(format!("{}/api/vulns/npm/left-pad/2.0.0", ts.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(vulns.as_array().unwrap().is_empty());

    let found: serde_json::Value = ts
        .client
        .get(format!("{}/api/search?q=left&ecosystem=npm", ts.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found.as_array().unwrap().len(), 1);

    let outdated: serde_json::Value = ts
        .client
        .post(format!("{}/api/outdated", ts.base))
        .json(&serde_json::json!({
            "packages": [
                {"ecosystem": "npm", "name": "left-pad", "version": "1.0.0"},
                {"ecosystem": "npm", "name": "left-pad", "version": "2.0.0"}
            ]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outdated[0]["is_outdated"], true);
    assert_eq!(outdated[1]["is_outdated"], false);

    let bulk: serde_json::Value = ts
        .client
        .post(format!("{}/api/bulk", ts.base))
        .json(&serde_json::json!({
            "purls": ["pkg:npm/left-pad", "pkg:npm/ghost", "not-a-purl"]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bulk["pkg:npm/left-pad"]["name"], "left-pad");
    assert!(bulk.get("pkg:npm/ghost").is_none());

    let cached: serde_json::Value = ts
        .client
        .get(format!("{}/api/packages?ecosystem=npm&sort=hits", ts.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cached.as_array().unwrap().len(), 1);
    assert_eq!(cached[0]["vuln_count"], 1);
}
