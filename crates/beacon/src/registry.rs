// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Generic keyed store with a per-entry time-to-live.
//!
//! Entries are soft state: every upsert replaces the value wholesale and resets its
//! timestamp, and an entry that has not been refreshed for a full TTL becomes invisible to
//! readers even before it is physically removed.
//!
//! ```text
//!   upsert ──> Registered ──upsert──> Refreshed ──(no upsert for ttl)──> Expired ──sweep──> Removed
//!                  │                       │
//!                  └──────── remove ───────┴──────────────────────────────────────────────> Removed
//! ```
//!
//! Expiry is checked lazily on every read and enforced physically by [`ExpiringRegistry::sweep`],
//! which can run inline or from the periodic task started by
//! [`ExpiringRegistry::spawn_sweeper`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    refreshed_at: Instant,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.refreshed_at) < ttl
    }
}

/// Key-value store whose entries expire unless refreshed within `ttl`.
///
/// One lock guards the map: writers (`upsert`, `remove`, `sweep`) take it exclusively and
/// readers (`get`, `lookup`) share it, so a lookup never observes a half-written entry.
/// Results are always cloned snapshots.
#[derive(Debug)]
pub struct ExpiringRegistry<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    ttl: Duration,
}

impl<K, V> ExpiringRegistry<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Inserts or replaces the entry for `key` and resets its timestamp.
    pub fn upsert(&self, key: K, value: V) {
        let now = Instant::now();
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.insert(
            key,
            Entry {
                value,
                refreshed_at: now,
            },
        );
    }

    /// Computes the new value for `key` from the live entry, if any, and stores it.
    ///
    /// `update` sees `None` when the entry is absent or expired, and runs under the same
    /// exclusive lock as the write. Returning `None` leaves the existing entry and its
    /// timestamp untouched. Returns whether a value was stored.
    pub fn upsert_with<F>(&self, key: K, update: F) -> bool
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let now = Instant::now();
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.write().expect("lock poisoned");
        let live = entries
            .get(&key)
            .filter(|entry| entry.is_live(now, self.ttl))
            .map(|entry| &entry.value);
        let Some(value) = update(live) else {
            return false;
        };
        entries.insert(
            key,
            Entry {
                value,
                refreshed_at: now,
            },
        );
        true
    }

    /// Deletes the entry for `key`. Returns whether anything was removed.
    pub fn remove(&self, key: &K) -> bool {
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.remove(key).is_some()
    }

    /// Returns the value for `key` if present and not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        #[allow(clippy::expect_used)]
        let entries = self.entries.read().expect("lock poisoned");
        entries
            .get(key)
            .filter(|entry| entry.is_live(now, self.ttl))
            .map(|entry| entry.value.clone())
    }

    /// Point-in-time snapshot of every live value matching `predicate`.
    pub fn lookup<P>(&self, predicate: P) -> Vec<V>
    where
        P: Fn(&K, &V) -> bool,
    {
        let now = Instant::now();
        #[allow(clippy::expect_used)]
        let entries = self.entries.read().expect("lock poisoned");
        entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now, self.ttl) && predicate(key, &entry.value))
            .map(|(_, entry)| entry.value.clone())
            .collect()
    }

    /// Removes every entry whose age has reached `ttl`. Returns the number removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.write().expect("lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now, ttl));
        before - entries.len()
    }

    /// Sweeps with the registry's own TTL.
    pub fn expire(&self) -> usize {
        self.sweep(self.ttl)
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let entries = self.entries.read().expect("lock poisoned");
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries currently visible to readers.
    pub fn live_count(&self) -> usize {
        let now = Instant::now();
        #[allow(clippy::expect_used)]
        let entries = self.entries.read().expect("lock poisoned");
        entries
            .values()
            .filter(|entry| entry.is_live(now, self.ttl))
            .count()
    }
}

impl<K, V> ExpiringRegistry<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Sweeps the registry every `period` until `cancel_token` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        period: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        // tokio intervals panic on a zero period
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.expire();
                        if removed > 0 {
                            trace!("Swept {} expired registry entries", removed);
                        }
                    }
                }
            }
            debug!("Registry sweeper stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    const TTL: Duration = Duration::from_secs(1);

    #[test]
    fn test_upsert_replaces_value() {
        let registry = ExpiringRegistry::new(TTL);
        registry.upsert("add", vec!["compute"]);
        registry.upsert("add", vec!["sum"]);

        let values = registry.lookup(|_, _| true);
        assert_eq!(values, vec![vec!["sum"]]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = ExpiringRegistry::new(TTL);
        registry.upsert(1, "one");
        assert!(registry.remove(&1));
        assert!(!registry.remove(&1));
        assert!(registry.get(&1).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_filters_by_predicate() {
        let registry = ExpiringRegistry::new(TTL);
        registry.upsert(("add", 1), 10);
        registry.upsert(("add", 2), 20);
        registry.upsert(("mul", 1), 30);

        let mut values = registry.lookup(|(name, _), _| *name == "add");
        values.sort_unstable();
        assert_eq!(values, vec![10, 20]);
        assert!(registry.lookup(|(name, _), _| *name == "div").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_visible_until_ttl() {
        let registry = ExpiringRegistry::new(TTL);
        registry.upsert("add", 1);

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(registry.get(&"add"), Some(1));
        assert_eq!(registry.lookup(|_, _| true), vec![1]);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(registry.get(&"add"), None);
        assert!(registry.lookup(|_, _| true).is_empty());
        // invisible but not yet swept
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_lifetime() {
        let registry = ExpiringRegistry::new(TTL);
        registry.upsert("add", 1);

        tokio::time::advance(Duration::from_millis(800)).await;
        registry.upsert("add", 2);
        tokio::time::advance(Duration::from_millis(800)).await;

        assert_eq!(registry.get(&"add"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let registry = ExpiringRegistry::new(TTL);
        registry.upsert("old", 1);
        tokio::time::advance(Duration::from_millis(600)).await;
        registry.upsert("new", 2);
        tokio::time::advance(Duration::from_millis(600)).await;

        assert_eq!(registry.expire(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&"new"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_with_custom_ttl() {
        let registry = ExpiringRegistry::new(TTL);
        registry.upsert("a", 1);
        tokio::time::advance(Duration::from_millis(300)).await;

        assert_eq!(registry.sweep(Duration::from_secs(5)), 0);
        assert_eq!(registry.sweep(Duration::from_millis(200)), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_upsert_with_sees_live_value() {
        let registry = ExpiringRegistry::new(TTL);
        assert!(registry.upsert_with("add", |live| {
            assert!(live.is_none());
            Some(1)
        }));
        assert!(!registry.upsert_with("add", |live| live.filter(|v| **v == 2).map(|v| v + 1)));
        assert_eq!(registry.get(&"add"), Some(1));
        assert!(registry.upsert_with("add", |live| live.map(|v| v + 10)));
        assert_eq!(registry.get(&"add"), Some(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_with_ignores_expired_entry() {
        let registry = ExpiringRegistry::new(TTL);
        registry.upsert("add", 1);
        tokio::time::advance(TTL).await;

        assert!(registry.upsert_with("add", |live| match live {
            Some(_) => None,
            None => Some(2),
        }));
        assert_eq!(registry.get(&"add"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_update_keeps_timestamp() {
        let registry = ExpiringRegistry::new(TTL);
        registry.upsert("add", 1);
        tokio::time::advance(TTL / 2).await;
        assert!(!registry.upsert_with("add", |_| None));
        tokio::time::advance(TTL / 2).await;
        assert_eq!(registry.get(&"add"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_removes_expired_entries() {
        let registry = Arc::new(ExpiringRegistry::new(TTL));
        registry.upsert("add", 1);

        let cancel_token = CancellationToken::new();
        let sweeper = Arc::clone(&registry)
            .spawn_sweeper(Duration::from_millis(100), cancel_token.clone());

        tokio::time::sleep(TTL + Duration::from_millis(250)).await;
        assert!(registry.is_empty());

        cancel_token.cancel();
        sweeper.await.unwrap();
    }

    #[test]
    fn test_concurrent_writer_and_readers() {
        let registry = Arc::new(ExpiringRegistry::new(Duration::from_secs(60)));

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..1000u32 {
                    registry.upsert(i % 10, (i, i));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..200 {
                        for (a, b) in registry.lookup(|_, _| true) {
                            // both halves are always written together
                            assert_eq!(a, b);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.len(), 10);
    }

    proptest! {
        #[test]
        fn prop_last_upsert_wins(values in proptest::collection::vec(any::<u32>(), 1..50)) {
            let registry = ExpiringRegistry::new(Duration::from_secs(60));
            for value in &values {
                registry.upsert("key", *value);
            }
            let last = *values.last().unwrap();
            prop_assert_eq!(registry.lookup(|_, _| true), vec![last]);
        }
    }
}
