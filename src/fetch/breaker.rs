//! Per-host circuit breaker.
//!
//! State machine: `Closed → Open → HalfOpen → Closed`. Consecutive
//! rate-limit/upstream-down outcomes within the window trip the breaker;
//! while open, calls fail fast without touching the network. After the
//! cool-down a single probe is admitted; its outcome decides whether the
//! circuit closes or re-opens. State is keyed by hostname and
//! process-local.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::FetchError;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub threshold: u32,
    /// Failures older than this no longer count as consecutive.
    pub window: Duration,
    /// How long the circuit stays open before admitting a probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed {
        failures: u32,
        window_start: Option<Instant>,
    },
    Open {
        until: Instant,
    },
    HalfOpen,
}

impl Phase {
    fn closed() -> Self {
        Self::Closed {
            failures: 0,
            window_start: None,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    hosts: DashMap<String, Phase>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            hosts: DashMap::new(),
            config,
        }
    }

    /// Gate a request to `host`. While open this fails fast; the first
    /// call after the cool-down becomes the half-open probe.
    pub fn admit(&self, host: &str) -> Result<(), FetchError> {
        let mut entry = self
            .hosts
            .entry(host.to_string())
            .or_insert_with(Phase::closed);
        match *entry {
            Phase::Closed { .. } => Ok(()),
            Phase::Open { until } => {
                if Instant::now() < until {
                    Err(FetchError::CircuitOpen {
                        host: host.to_string(),
                    })
                } else {
                    *entry = Phase::HalfOpen;
                    Ok(())
                }
            }
            // A probe is already in flight; everyone else waits it out.
            Phase::HalfOpen => Err(FetchError::CircuitOpen {
                host: host.to_string(),
            }),
        }
    }

    pub fn record_success(&self, host: &str) {
        if let Some(mut entry) = self.hosts.get_mut(host) {
            *entry = Phase::closed();
        }
    }

    /// Record an outcome classified as rate-limited or upstream-down.
    pub fn record_failure(&self, host: &str) {
        let now = Instant::now();
        let mut entry = self
            .hosts
            .entry(host.to_string())
            .or_insert_with(Phase::closed);
        match *entry {
            Phase::Closed {
                failures,
                window_start,
            } => {
                let (failures, window_start) = match window_start {
                    Some(start) if now.duration_since(start) <= self.config.window => {
                        (failures + 1, start)
                    }
                    _ => (1, now),
                };
                if failures >= self.config.threshold {
                    *entry = Phase::Open {
                        until: now + self.config.cooldown,
                    };
                } else {
                    *entry = Phase::Closed {
                        failures,
                        window_start: Some(window_start),
                    };
                }
            }
            // A failed probe re-opens with a fresh cool-down.
            Phase::HalfOpen => {
                *entry = Phase::Open {
                    until: now + self.config.cooldown,
                };
            }
            Phase::Open { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            threshold,
            window: Duration::from_secs(60),
            cooldown,
        })
    }

    #[test]
    fn test_trips_after_threshold() {
        let b = breaker(3, Duration::from_secs(30));
        for _ in 0..2 {
            b.record_failure("registry.npmjs.org");
            assert!(b.admit("registry.npmjs.org").is_ok());
        }
        b.record_failure("registry.npmjs.org");
        assert!(matches!(
            b.admit("registry.npmjs.org"),
            Err(FetchError::CircuitOpen { .. })
        ));
        // Other hosts are unaffected.
        assert!(b.admit("crates.io").is_ok());
    }

    #[test]
    fn test_success_resets_count() {
        let b = breaker(3, Duration::from_secs(30));
        b.record_failure("crates.io");
        b.record_failure("crates.io");
        b.record_success("crates.io");
        b.record_failure("crates.io");
        b.record_failure("crates.io");
        assert!(b.admit("crates.io").is_ok());
    }

    #[test]
    fn test_half_open_probe_closes_on_success() {
        let b = breaker(1, Duration::from_millis(20));
        b.record_failure("rubygems.org");
        assert!(b.admit("rubygems.org").is_err());

        std::thread::sleep(Duration::from_millis(30));
        // One probe is admitted, everyone else still fails fast.
        assert!(b.admit("rubygems.org").is_ok());
        assert!(b.admit("rubygems.org").is_err());

        b.record_success("rubygems.org");
        assert!(b.admit("rubygems.org").is_ok());
    }

    #[test]
    fn test_half_open_probe_reopens_on_failure() {
        let b = breaker(1, Duration::from_millis(20));
        b.record_failure("rubygems.org");
        std::thread::sleep(Duration::from_millis(30));
        assert!(b.admit("rubygems.org").is_ok());
        b.record_failure("rubygems.org");
        assert!(b.admit("rubygems.org").is_err());
    }
}
