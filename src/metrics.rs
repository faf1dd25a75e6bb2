//! Prometheus counters for the request pipeline.

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub requests_total: IntCounter,
    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,
    pub upstream_fetches_total: IntCounter,
    pub upstream_errors_total: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("requests_total", &self.requests_total.get())
            .finish()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let requests_total =
            IntCounter::new("depot_requests_total", "Client requests received")?;
        let cache_hits_total =
            IntCounter::new("depot_cache_hits_total", "Requests served from cache")?;
        let cache_misses_total =
            IntCounter::new("depot_cache_misses_total", "Requests that missed the cache")?;
        let upstream_fetches_total =
            IntCounter::new("depot_upstream_fetches_total", "Upstream fetches started")?;
        let upstream_errors_total =
            IntCounter::new("depot_upstream_errors_total", "Upstream fetches that failed")?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(upstream_fetches_total.clone()))?;
        registry.register(Box::new(upstream_errors_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            cache_hits_total,
            cache_misses_total,
            upstream_fetches_total,
            upstream_errors_total,
        })
    }

    /// Text exposition for `GET /metrics`.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
