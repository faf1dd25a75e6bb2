//! Single-flight coordination for cache fills.
//!
//! For each in-flight storage key, exactly one task (the leader) performs
//! the upstream fetch and store. Everyone else gets a follower handle on
//! the same completion signal and re-reads the catalog once it fires. A
//! leader that unwinds without publishing — cancellation, panic — notifies
//! followers with a `Cancelled` failure on drop, so nobody waits forever;
//! a follower seeing `Cancelled` may re-join and elect itself the new
//! leader.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::error::ErrorKind;

/// What a successful fill produced.
#[derive(Debug, Clone)]
pub struct Stored {
    pub content_hash: String,
    pub size: u64,
    pub content_type: Option<String>,
}

/// Cloneable failure carried over the completion channel.
#[derive(Debug, Clone)]
pub struct FlightFailure {
    pub kind: ErrorKind,
    pub message: String,
}

pub type FlightResult = Result<Stored, FlightFailure>;

type Slot = watch::Receiver<Option<FlightResult>>;

#[derive(Debug, Clone, Default)]
pub struct FlightMap {
    inner: Arc<DashMap<String, Slot>>,
}

/// The caller's role for one key.
pub enum Flight {
    Leader(FlightPermit),
    Follower(Slot),
}

impl FlightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-if-absent: the first caller per key becomes the leader.
    pub fn join(&self, key: &str) -> Flight {
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(e) => Flight::Follower(e.get().clone()),
            Entry::Vacant(v) => {
                let (tx, rx) = watch::channel(None);
                v.insert(rx);
                Flight::Leader(FlightPermit {
                    key: key.to_string(),
                    map: Arc::clone(&self.inner),
                    tx,
                    published: false,
                })
            }
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.inner.len()
    }
}

/// Leadership over one key. Must be resolved via
/// [`publish`](FlightPermit::publish); dropping it unresolved publishes a
/// `Cancelled` failure instead.
pub struct FlightPermit {
    key: String,
    map: Arc<DashMap<String, Slot>>,
    tx: watch::Sender<Option<FlightResult>>,
    published: bool,
}

impl std::fmt::Debug for FlightPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightPermit").field("key", &self.key).finish()
    }
}

impl FlightPermit {
    /// Resolve the flight. The key is released before the signal fires so
    /// late arrivals start a fresh flight instead of reading a stale slot.
    pub fn publish(mut self, result: FlightResult) {
        self.published = true;
        self.map.remove(&self.key);
        let _ = self.tx.send(Some(result));
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        if !self.published {
            self.map.remove(&self.key);
            let _ = self.tx.send(Some(Err(FlightFailure {
                kind: ErrorKind::Cancelled,
                message: "cache fill abandoned by its leader".to_string(),
            })));
        }
    }
}

/// Wait for the flight's completion signal.
pub async fn wait(mut slot: Slot) -> FlightResult {
    loop {
        if let Some(result) = slot.borrow_and_update().clone() {
            return result;
        }
        if slot.changed().await.is_err() {
            return Err(FlightFailure {
                kind: ErrorKind::Cancelled,
                message: "cache fill signal dropped".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_caller_leads_rest_follow() {
        let flights = FlightMap::new();
        let leader = match flights.join("npm/a/1.0.0/a.tgz") {
            Flight::Leader(p) => p,
            Flight::Follower(_) => panic!("first caller must lead"),
        };
        let follower = match flights.join("npm/a/1.0.0/a.tgz") {
            Flight::Follower(slot) => slot,
            Flight::Leader(_) => panic!("second caller must follow"),
        };
        // A different key gets its own flight.
        assert!(matches!(flights.join("npm/b/1.0.0/b.tgz"), Flight::Leader(_)));

        leader.publish(Ok(Stored {
            content_hash: "abc".to_string(),
            size: 3,
            content_type: None,
        }));

        let result = wait(follower).await.unwrap();
        assert_eq!(result.content_hash, "abc");
        assert_eq!(result.size, 3);
    }

    #[tokio::test]
    async fn test_publish_releases_key() {
        let flights = FlightMap::new();
        let leader = match flights.join("k") {
            Flight::Leader(p) => p,
            Flight::Follower(_) => unreachable!(),
        };
        assert_eq!(flights.in_flight(), 1);
        leader.publish(Err(FlightFailure {
            kind: ErrorKind::NotFound,
            message: "gone".to_string(),
        }));
        assert_eq!(flights.in_flight(), 0);
        // The next caller starts over as leader.
        assert!(matches!(flights.join("k"), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_dropped_leader_cancels_followers() {
        let flights = FlightMap::new();
        let leader = match flights.join("k") {
            Flight::Leader(p) => p,
            Flight::Follower(_) => unreachable!(),
        };
        let follower = match flights.join("k") {
            Flight::Follower(slot) => slot,
            Flight::Leader(_) => unreachable!(),
        };

        drop(leader);
        let failure = wait(follower).await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Cancelled);
        // The key is free again; a waiter may take over as leader.
        assert!(matches!(flights.join("k"), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_wait_sees_result_published_before_waiting() {
        let flights = FlightMap::new();
        let leader = match flights.join("k") {
            Flight::Leader(p) => p,
            Flight::Follower(_) => unreachable!(),
        };
        let follower = match flights.join("k") {
            Flight::Follower(slot) => slot,
            Flight::Leader(_) => unreachable!(),
        };
        leader.publish(Ok(Stored {
            content_hash: "h".to_string(),
            size: 1,
            content_type: None,
        }));
        // Result was published before this follower ever polled.
        assert!(wait(follower).await.is_ok());
    }
}
