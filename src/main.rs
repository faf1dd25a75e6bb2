//! depot CLI: run the proxy, inspect the cache, clear artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use depot::adapters::default_adapters;
use depot::blob::{BlobStore, FsStore};
use depot::catalog::{connect_postgres, open_sqlite, Catalog};
use depot::config::Config;
use depot::enrich::{Enricher, OsvSource, RegistrySource};
use depot::fetch::Fetcher;
use depot::metrics::Metrics;
use depot::proxy::ProxyCore;
use depot::purl::Purl;
use depot::server::{self, AppState};

#[derive(Parser)]
#[command(name = "depot")]
#[command(version, about = "depot - a caching pass-through proxy for package registries")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "DEPOT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy server
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long)]
        listen: Option<String>,
        /// Data directory for the blob store and embedded catalog
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Postgres URL for the catalog (default: embedded SQLite)
        #[arg(long, env = "DEPOT_DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Print cache statistics
    Stats,
    /// Drop a cached artifact; its hit history survives
    Clear {
        /// Version purl, e.g. pkg:npm/left-pad@1.3.0
        purl: String,
        /// Artifact filename, e.g. left-pad-1.3.0.tgz
        filename: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            listen,
            data_dir,
            database_url,
        } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            if let Some(database_url) = database_url {
                config.database_url = Some(database_url);
            }
            serve(config).await
        }
        Commands::Stats => stats(config).await,
        Commands::Clear { purl, filename } => clear(config, &purl, &filename).await,
    }
}

async fn open_catalog(config: &Config) -> Result<Arc<dyn Catalog>> {
    Ok(match &config.database_url {
        Some(url) => Arc::new(connect_postgres(url).await?),
        None => Arc::new(open_sqlite(&config.db_path()).await?),
    })
}

async fn serve(config: Config) -> Result<()> {
    let catalog = open_catalog(&config).await?;
    let store: Arc<dyn BlobStore> = Arc::new(FsStore::new(config.store_dir()).await?);
    let metrics = Arc::new(Metrics::new()?);
    let fetcher = Arc::new(Fetcher::new(
        config.retry_policy(),
        config.breaker_config(),
        Arc::new(config.auth_resolver()),
    )?);

    let proxy = ProxyCore::new(
        Arc::clone(&catalog),
        Arc::clone(&store),
        fetcher,
        Arc::clone(&metrics),
        config.metadata_ttl(),
    );
    let enricher = Enricher::new(
        Arc::clone(&catalog),
        Arc::new(RegistrySource::new()?),
        Arc::new(OsvSource::new()?),
    );
    let adapters = default_adapters(&config.public_url);

    let database_path = config
        .database_url
        .clone()
        .unwrap_or_else(|| config.db_path().display().to_string());
    let state = Arc::new(AppState::new(
        proxy,
        catalog,
        store,
        adapters,
        enricher,
        metrics,
        config.store_dir().display().to_string(),
        database_path,
    ));

    server::run(state, &config.listen).await
}

async fn stats(config: Config) -> Result<()> {
    let catalog = open_catalog(&config).await?;
    let stats = catalog.cache_stats().await?;
    println!("cached artifacts: {}", stats.cached_artifacts);
    println!("total size:       {} bytes", stats.total_size_bytes);
    println!("packages:         {}", stats.packages);
    println!("versions:         {}", stats.versions);
    Ok(())
}

async fn clear(config: Config, purl: &str, filename: &str) -> Result<()> {
    let parsed = Purl::parse(purl)?;
    anyhow::ensure!(parsed.version.is_some(), "clear needs a versioned purl");

    let catalog = open_catalog(&config).await?;
    let store: Arc<dyn BlobStore> = Arc::new(FsStore::new(config.store_dir()).await?);

    if let Some(artifact) = catalog.get_artifact(purl, filename).await? {
        if let Some(path) = &artifact.storage_path {
            store.delete(path).await?;
        }
        catalog.clear_artifact(purl, filename).await?;
        println!("cleared {purl} {filename}");
    } else {
        println!("no such artifact: {purl} {filename}");
    }
    Ok(())
}
