//! depot - a caching pass-through proxy for package registries.
//!
//! Sits between package-manager clients and their canonical upstreams:
//! serves cached artifacts when it has them, fetches and records them
//! when it does not, and answers browse/diff/search queries over what it
//! has cached.

pub mod adapters;
pub mod archive;
pub mod blob;
pub mod catalog;
pub mod config;
pub mod diff;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod proxy;
pub mod purl;
pub mod server;

use std::path::PathBuf;

use dirs::home_dir;

/// User-Agent sent on every upstream request.
pub const USER_AGENT: &str = concat!("depot/", env!("CARGO_PKG_VERSION"));

/// Try to get the depot home directory, `None` if the home directory
/// cannot be determined.
pub fn try_depot_home() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".depot"))
}

/// Default depot home directory: `~/.depot`
///
/// # Panics
/// Panics if the home directory cannot be determined.
pub fn depot_home() -> PathBuf {
    try_depot_home().expect("Could not determine home directory")
}

/// Default catalog path: `~/.depot/depot.db`
pub fn db_path() -> PathBuf {
    depot_home().join("depot.db")
}

/// Default blob store root: `~/.depot/store`
pub fn store_path() -> PathBuf {
    depot_home().join("store")
}
