//! Query cache storage.
//!
//! One [`QueryStore`] is created per client session and owns every cache
//! entry until the session ends. There is no eviction: entries survive until
//! invalidation marks them stale or the store is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::domain::error::SyncError;

use super::keys::{KeyPattern, QueryKey};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Monotonic per-entry counter. A fetch carries the generation it started
/// under; a completion whose generation no longer matches is discarded so a
/// stale result never clobbers newer data.
pub type FetchGeneration = u64;

/// Shared handle to one pending fetch, awaited by every joined caller.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>, SyncError>>>;

/// Outcome of [`QueryStore::join_or_begin`].
pub(crate) enum FetchPlan {
    /// Fresh Success data already cached; no fetch needed.
    Cached(Arc<Value>),
    /// A fetch for this key is in flight; await it.
    Join(SharedFetch),
    /// A new fetch was installed; the caller drives it.
    Begin(SharedFetch),
}

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

struct CacheEntry {
    status: QueryStatus,
    data: Option<Arc<Value>>,
    error: Option<SyncError>,
    last_resolved_at: Option<OffsetDateTime>,
    subscriber_count: usize,
    stale: bool,
    generation: FetchGeneration,
    in_flight: Option<SharedFetch>,
    // Bumped on every write; subscribers observe refreshed values through it.
    version: u64,
    notify: watch::Sender<u64>,
}

impl CacheEntry {
    fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            last_resolved_at: None,
            subscriber_count: 0,
            stale: false,
            generation: 0,
            in_flight: None,
            version: 0,
            notify,
        }
    }

    fn needs_fetch(&self, stale_after: Option<Duration>) -> bool {
        match self.status {
            // Invalidation can clear the in-flight handle of a Loading
            // entry; without one there is nothing to wait on.
            QueryStatus::Loading => self.in_flight.is_none(),
            QueryStatus::Idle | QueryStatus::Error => true,
            QueryStatus::Success => self.stale || expired(self.last_resolved_at, stale_after),
        }
    }

    fn bump_version(&mut self) {
        self.version += 1;
        self.notify.send_replace(self.version);
    }
}

fn expired(resolved_at: Option<OffsetDateTime>, stale_after: Option<Duration>) -> bool {
    match (resolved_at, stale_after) {
        (Some(at), Some(window)) => OffsetDateTime::now_utc() - at > window,
        _ => false,
    }
}

/// Read-only view of a cache entry, detached from the store's locks.
#[derive(Debug, Clone)]
pub struct EntryView {
    pub status: QueryStatus,
    pub data: Option<Arc<Value>>,
    pub error: Option<SyncError>,
    pub last_resolved_at: Option<OffsetDateTime>,
    pub subscriber_count: usize,
    pub stale: bool,
}

/// A caller's registered interest in one query key.
///
/// Must be returned to [`QueryStore::unsubscribe`] when the caller stops
/// observing; dropping it without unsubscribing leaves the interest counted.
pub struct Subscription {
    id: Uuid,
    key: QueryKey,
    changes: watch::Receiver<u64>,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait until the entry is written again (refetch completion or
    /// hydration). Returns false if the store was dropped.
    pub async fn refreshed(&mut self) -> bool {
        self.changes.changed().await.is_ok()
    }
}

/// Process-wide keyed cache of procedure results with subscriber tracking.
pub struct QueryStore {
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
}

impl QueryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of the entry for `key`, if any.
    pub fn get(&self, key: &QueryKey) -> Option<EntryView> {
        let entries = rw_read(&self.entries, SOURCE, "get");
        entries.get(key).map(|entry| EntryView {
            status: entry.status,
            data: entry.data.clone(),
            error: entry.error.clone(),
            last_resolved_at: entry.last_resolved_at,
            subscriber_count: entry.subscriber_count,
            stale: entry.stale,
        })
    }

    /// Success data usable without a fetch: present, not stale, and inside
    /// the freshness window when one is configured.
    pub fn fresh_success(
        &self,
        key: &QueryKey,
        stale_after: Option<Duration>,
    ) -> Option<Arc<Value>> {
        let entries = rw_read(&self.entries, SOURCE, "fresh_success");
        let entry = entries.get(key)?;
        if entry.status != QueryStatus::Success
            || entry.stale
            || expired(entry.last_resolved_at, stale_after)
        {
            return None;
        }
        entry.data.clone()
    }

    /// Register interest in `key`. Returns the subscription and whether the
    /// entry needs a fetch (absent, stale, errored, or never resolved).
    pub fn subscribe(
        &self,
        key: &QueryKey,
        stale_after: Option<Duration>,
    ) -> (Subscription, bool) {
        let mut entries = rw_write(&self.entries, SOURCE, "subscribe");
        let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::new);
        entry.subscriber_count += 1;
        let needs_fetch = entry.needs_fetch(stale_after);
        let subscription = Subscription {
            id: Uuid::new_v4(),
            key: key.clone(),
            changes: entry.notify.subscribe(),
        };
        debug!(
            key = %key,
            subscriber_id = %subscription.id,
            subscribers = entry.subscriber_count,
            needs_fetch,
            "Query subscribed"
        );
        (subscription, needs_fetch)
    }

    /// Remove a caller's interest. Cached data is kept; an in-flight fetch
    /// shared with other subscribers is not cancelled.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut entries = rw_write(&self.entries, SOURCE, "unsubscribe");
        if let Some(entry) = entries.get_mut(&subscription.key) {
            entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
            debug!(
                key = %subscription.key,
                subscriber_id = %subscription.id,
                subscribers = entry.subscriber_count,
                "Query unsubscribed"
            );
        }
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        rw_read(&self.entries, SOURCE, "subscriber_count")
            .get(key)
            .map(|entry| entry.subscriber_count)
            .unwrap_or(0)
    }

    /// Atomically decide how a fetch request for `key` proceeds: serve the
    /// fresh cached value, join the pending fetch, or install the one
    /// produced by `make` under the entry's current generation.
    ///
    /// The decision runs under the store lock so a fetch completing between
    /// a caller's cache check and its fetch cannot cause a duplicate
    /// round-trip. At most one fetch per key is in flight at any instant.
    pub(crate) fn join_or_begin(
        &self,
        key: &QueryKey,
        stale_after: Option<Duration>,
        make: impl FnOnce(FetchGeneration) -> SharedFetch,
    ) -> FetchPlan {
        let mut entries = rw_write(&self.entries, SOURCE, "join_or_begin");
        let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::new);
        if entry.status == QueryStatus::Success
            && !entry.stale
            && !expired(entry.last_resolved_at, stale_after)
        {
            if let Some(data) = &entry.data {
                return FetchPlan::Cached(data.clone());
            }
        }
        if let Some(pending) = &entry.in_flight {
            return FetchPlan::Join(pending.clone());
        }
        let fetch = make(entry.generation);
        entry.status = QueryStatus::Loading;
        entry.error = None;
        entry.in_flight = Some(fetch.clone());
        FetchPlan::Begin(fetch)
    }

    /// Record a fetch completion.
    ///
    /// If the entry moved to a newer generation while the fetch was in
    /// flight, the completion is discarded and
    /// [`SyncError::ConcurrencyConflict`] is returned for logging; the
    /// entry is left untouched.
    pub(crate) fn complete(
        &self,
        key: &QueryKey,
        generation: FetchGeneration,
        result: &Result<Arc<Value>, SyncError>,
    ) -> Result<(), SyncError> {
        let mut entries = rw_write(&self.entries, SOURCE, "complete");
        let Some(entry) = entries.get_mut(key) else {
            return Ok(());
        };
        if entry.generation != generation {
            return Err(SyncError::ConcurrencyConflict {
                observed: generation,
                current: entry.generation,
            });
        }
        entry.in_flight = None;
        entry.stale = false;
        entry.last_resolved_at = Some(OffsetDateTime::now_utc());
        match result {
            Ok(data) => {
                entry.status = QueryStatus::Success;
                entry.data = Some(data.clone());
                entry.error = None;
            }
            Err(error) => {
                entry.status = QueryStatus::Error;
                entry.error = Some(error.clone());
            }
        }
        entry.bump_version();
        Ok(())
    }

    /// Seed a Success entry directly, e.g. from a delivered page snapshot.
    pub fn write_success(&self, key: &QueryKey, data: Arc<Value>, resolved_at: OffsetDateTime) {
        let mut entries = rw_write(&self.entries, SOURCE, "write_success");
        let entry = entries.entry(key.clone()).or_insert_with(CacheEntry::new);
        entry.status = QueryStatus::Success;
        entry.data = Some(data);
        entry.error = None;
        entry.stale = false;
        entry.last_resolved_at = Some(resolved_at);
        entry.bump_version();
    }

    /// Mark every key matching `pattern` stale and move it to a new
    /// generation, discarding whatever is currently in flight.
    ///
    /// Returns the matched keys that have active subscribers; the caller
    /// refetches those. Keys without subscribers are only marked, so the
    /// next subscribe triggers a fresh fetch lazily.
    pub fn invalidate(&self, pattern: &KeyPattern) -> Vec<QueryKey> {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate");
        let mut refetch = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if !pattern.matches(key) {
                continue;
            }
            entry.stale = true;
            entry.generation += 1;
            entry.in_flight = None;
            if entry.subscriber_count > 0 {
                refetch.push(key.clone());
            }
        }
        debug!(
            pattern = ?pattern,
            refetch = refetch.len(),
            "Cache keys invalidated"
        );
        refetch
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QueryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use serde_json::json;

    use super::*;

    fn feed_key() -> QueryKey {
        QueryKey::new("posts.getAll", &json!({}))
    }

    #[test]
    fn absent_key_needs_fetch_on_subscribe() {
        let store = QueryStore::new();
        let (subscription, needs_fetch) = store.subscribe(&feed_key(), None);
        assert!(needs_fetch);
        assert_eq!(store.subscriber_count(&feed_key()), 1);
        store.unsubscribe(subscription);
        assert_eq!(store.subscriber_count(&feed_key()), 0);
    }

    #[test]
    fn seeded_key_does_not_need_fetch() {
        let store = QueryStore::new();
        store.write_success(
            &feed_key(),
            Arc::new(json!([])),
            OffsetDateTime::now_utc(),
        );
        let (_subscription, needs_fetch) = store.subscribe(&feed_key(), None);
        assert!(!needs_fetch);
    }

    #[test]
    fn unsubscribe_keeps_data() {
        let store = QueryStore::new();
        store.write_success(
            &feed_key(),
            Arc::new(json!([1, 2])),
            OffsetDateTime::now_utc(),
        );
        let (subscription, _) = store.subscribe(&feed_key(), None);
        store.unsubscribe(subscription);
        let view = store.get(&feed_key()).expect("entry kept");
        assert_eq!(view.status, QueryStatus::Success);
        assert!(view.data.is_some());
    }

    #[test]
    fn invalidate_marks_unsubscribed_keys_for_lazy_refetch() {
        let store = QueryStore::new();
        store.write_success(
            &feed_key(),
            Arc::new(json!([])),
            OffsetDateTime::now_utc(),
        );

        let refetch = store.invalidate(&KeyPattern::procedure("posts.getAll"));
        assert!(refetch.is_empty());

        let view = store.get(&feed_key()).expect("entry kept");
        assert!(view.stale);
        assert!(store.fresh_success(&feed_key(), None).is_none());

        let (_subscription, needs_fetch) = store.subscribe(&feed_key(), None);
        assert!(needs_fetch);
    }

    #[test]
    fn invalidate_reports_subscribed_keys() {
        let store = QueryStore::new();
        store.write_success(
            &feed_key(),
            Arc::new(json!([])),
            OffsetDateTime::now_utc(),
        );
        let (_subscription, _) = store.subscribe(&feed_key(), None);

        let refetch = store.invalidate(&KeyPattern::procedure("posts.getAll"));
        assert_eq!(refetch, vec![feed_key()]);
    }

    #[test]
    fn stale_completion_is_discarded() {
        let store = QueryStore::new();
        let key = feed_key();
        store.write_success(&key, Arc::new(json!(["old"])), OffsetDateTime::now_utc());

        // A fetch started under generation 0; invalidation moves the entry on.
        store.invalidate(&KeyPattern::Exact(key.clone()));

        let late: Result<Arc<Value>, SyncError> = Ok(Arc::new(json!(["late"])));
        let outcome = store.complete(&key, 0, &late);
        assert!(matches!(
            outcome,
            Err(SyncError::ConcurrencyConflict {
                observed: 0,
                current: 1
            })
        ));

        let view = store.get(&key).expect("entry kept");
        assert_eq!(view.data, Some(Arc::new(json!(["old"]))));
        assert!(view.stale);
    }

    #[test]
    fn current_completion_is_written() {
        let store = QueryStore::new();
        let key = feed_key();
        let result: Result<Arc<Value>, SyncError> = Ok(Arc::new(json!(["fresh"])));

        // Generation 0 entry created on first subscribe.
        let (_subscription, _) = store.subscribe(&key, None);
        store.complete(&key, 0, &result).expect("write accepted");

        let view = store.get(&key).expect("entry present");
        assert_eq!(view.status, QueryStatus::Success);
        assert_eq!(view.data, Some(Arc::new(json!(["fresh"]))));
        assert!(view.error.is_none());
    }

    #[test]
    fn failed_completion_moves_entry_to_error() {
        let store = QueryStore::new();
        let key = feed_key();
        let (_subscription, _) = store.subscribe(&key, None);

        let result: Result<Arc<Value>, SyncError> =
            Err(SyncError::transient("connection reset"));
        store.complete(&key, 0, &result).expect("write accepted");

        let view = store.get(&key).expect("entry present");
        assert_eq!(view.status, QueryStatus::Error);
        assert!(view.error.is_some());

        // Not permanently poisoned: the next subscribe retries.
        let (_second, needs_fetch) = store.subscribe(&key, None);
        assert!(needs_fetch);
    }

    #[test]
    fn time_window_staleness() {
        let store = QueryStore::new();
        let key = feed_key();
        let an_hour_ago = OffsetDateTime::now_utc() - Duration::hours(1);
        store.write_success(&key, Arc::new(json!([])), an_hour_ago);

        assert!(store.fresh_success(&key, None).is_some());
        assert!(
            store
                .fresh_success(&key, Some(Duration::minutes(5)))
                .is_none()
        );
        let (_subscription, needs_fetch) = store.subscribe(&key, Some(Duration::minutes(5)));
        assert!(needs_fetch);
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        let store = QueryStore::new();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.write_success(
            &feed_key(),
            Arc::new(json!([])),
            OffsetDateTime::now_utc(),
        );
        assert!(store.get(&feed_key()).is_some());
    }
}
