//! Single-flight registry of pending computations.
//!
//! The first caller for a key becomes the leader: its computation is spawned on
//! its own tokio task and published as a [`Shared`] future. Every caller that
//! arrives while it is pending joins the same future and observes the same
//! `Result`. Because the work runs detached, a waiter that gives up (for example
//! on a request deadline) never cancels it.
//!
//! The entry is removed by the task itself as soon as the computation settles,
//! success or failure. Removal is conditional on the entry id so that a slow
//! task can never delete a newer entry registered under the same key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::{counter, gauge};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{CatalogError, Result};

/// A pending computation every waiter can poll.
pub type SharedComputation<V> = Shared<BoxFuture<'static, Result<V>>>;

/// Whether a caller started the computation or joined an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    Leader,
    Follower,
}

impl FlightRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Follower => "follower",
        }
    }
}

struct InFlightEntry<V> {
    id: u64,
    computation: SharedComputation<V>,
    created_at: Instant,
    abort: AbortHandle,
}

impl<V> InFlightEntry<V> {
    fn is_stuck(&self, max_age: Duration) -> bool {
        self.created_at.elapsed() > max_age
    }
}

/// Single-flight map from key to shared pending computation.
pub struct InFlightRegistry<V> {
    name: &'static str,
    entries: Arc<DashMap<String, InFlightEntry<V>>>,
    next_id: AtomicU64,
    max_entries: usize,
    /// Entries older than this are considered stuck and replaced
    max_age: Duration,
}

impl<V> InFlightRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, max_entries: usize, max_age: Duration) -> Self {
        Self {
            name,
            entries: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            max_entries,
            max_age,
        }
    }

    /// Join the pending computation for `key`, or start `compute` as the leader.
    ///
    /// Fails with a capacity error when `max_entries` computations are already
    /// pending; callers are expected to run the work directly in that case.
    pub fn get_or_create<F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<(SharedComputation<V>, FlightRole)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let existing = self
            .entries
            .get(key)
            .filter(|entry| !entry.is_stuck(self.max_age))
            .map(|entry| entry.computation.clone());
        if let Some(computation) = existing {
            self.record_join(FlightRole::Follower);
            return Ok((computation, FlightRole::Follower));
        }

        // `len` takes every shard lock, so it must not run under `entry`.
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(key) {
            counter!("catalog_inflight_rejected_total", "registry" => self.name).increment(1);
            return Err(CatalogError::capacity(
                format!("{} in-flight registry", self.name),
                self.max_entries,
            ));
        }

        let (computation, role) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) if !occupied.get().is_stuck(self.max_age) => {
                (occupied.get().computation.clone(), FlightRole::Follower)
            }
            Entry::Occupied(mut occupied) => {
                warn!(
                    registry = self.name,
                    key = %key,
                    age_ms = occupied.get().created_at.elapsed().as_millis() as u64,
                    "Replacing stuck in-flight computation"
                );
                occupied.get().abort.abort();
                let entry = self.spawn(key, compute());
                let computation = entry.computation.clone();
                occupied.insert(entry);
                (computation, FlightRole::Leader)
            }
            Entry::Vacant(vacant) => {
                let entry = self.spawn(key, compute());
                let computation = entry.computation.clone();
                vacant.insert(entry);
                (computation, FlightRole::Leader)
            }
        };

        self.record_join(role);
        Ok((computation, role))
    }

    fn spawn<Fut>(&self, key: &str, fut: Fut) -> InFlightEntry<V>
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = self.name;

        let entries = Arc::clone(&self.entries);
        let owned_key = key.to_string();
        let handle = tokio::spawn(async move {
            let result = fut.await;
            entries.remove_if(&owned_key, |_, e| e.id == id);
            result
        });
        let abort = handle.abort_handle();

        // A panicked or aborted task never reaches its own cleanup.
        let entries = Arc::clone(&self.entries);
        let owned_key = key.to_string();
        let computation = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    entries.remove_if(&owned_key, |_, e| e.id == id);
                    debug!(registry = name, key = %owned_key, "In-flight task did not complete");
                    Err(if join_error.is_cancelled() {
                        CatalogError::internal("In-flight computation was cancelled")
                    } else {
                        CatalogError::internal(format!(
                            "In-flight computation panicked: {}",
                            join_error
                        ))
                    })
                }
            }
        }
        .boxed()
        .shared();

        InFlightEntry {
            id,
            computation,
            created_at: Instant::now(),
            abort,
        }
    }

    fn record_join(&self, role: FlightRole) {
        counter!(
            "catalog_inflight_joins_total",
            "registry" => self.name,
            "role" => role.as_str(),
        )
        .increment(1);
        gauge!("catalog_inflight_entries", "registry" => self.name)
            .set(self.entries.len() as f64);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every pending entry. Running computations finish on their own.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Abort every pending computation and forget it. Waiters observe an
    /// internal error.
    pub fn abort_all(&self) -> usize {
        let mut aborted = 0;
        self.entries.retain(|_, entry| {
            entry.abort.abort();
            aborted += 1;
            false
        });
        aborted
    }
}
