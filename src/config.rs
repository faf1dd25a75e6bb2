//! Runtime configuration.
//!
//! Defaults work out of the box (`~/.depot`, embedded SQLite); a TOML
//! file and a few CLI flags override them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::fetch::{BreakerConfig, RetryPolicy, StaticAuth};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address for the HTTP server.
    pub listen: String,
    /// Externally reachable base URL, used by synthetic registry
    /// configuration documents.
    pub public_url: String,
    /// Home for the blob store and the embedded catalog.
    pub data_dir: PathBuf,
    /// `postgres://…` switches the catalog to the client/server backend;
    /// unset means SQLite under `data_dir`.
    pub database_url: Option<String>,
    /// How long cached metadata documents stay fresh.
    pub metadata_ttl_secs: u64,
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    /// Per-host auth headers for private upstreams.
    pub auth: HashMap<String, AuthHeader>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.attempts,
            base_ms: policy.base.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub threshold: u32,
    pub window_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let config = BreakerConfig::default();
        Self {
            threshold: config.threshold,
            window_secs: config.window.as_secs(),
            cooldown_secs: config.cooldown.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthHeader {
    pub header: String,
    pub value: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
            data_dir: crate::try_depot_home().unwrap_or_else(|| PathBuf::from(".depot")),
            database_url: None,
            metadata_ttl_secs: 300,
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            auth: HashMap::new(),
        }
    }
}

impl Config {
    /// Load from a TOML file; a missing `path` of `None` yields defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("depot.db")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry.attempts.max(1),
            base: Duration::from_millis(self.retry.base_ms),
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            threshold: self.breaker.threshold.max(1),
            window: Duration::from_secs(self.breaker.window_secs),
            cooldown: Duration::from_secs(self.breaker.cooldown_secs),
        }
    }

    pub fn auth_resolver(&self) -> StaticAuth {
        StaticAuth::new(
            self.auth
                .iter()
                .map(|(host, auth)| (host.clone(), (auth.header.clone(), auth.value.clone())))
                .collect(),
        )
    }
}
