//! Session synchronization client.
//!
//! Resolves queries against the session's [`QueryStore`], deduplicating
//! concurrent identical fetches through a shared in-flight handle, and
//! executes mutations with their declared post-success invalidation.

use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{FetchGeneration, FetchPlan, KeyPattern, QueryKey, QueryStore, Subscription};
use crate::config::SyncConfig;
use crate::domain::error::SyncError;
use crate::domain::identity::Viewer;
use crate::page::Snapshot;

use super::Backend;
use super::registry::{ProcedureKind, ProcedureRegistry};

const METRIC_QUERY_HIT: &str = "chirp_query_cache_hit_total";
const METRIC_QUERY_MISS: &str = "chirp_query_cache_miss_total";
const METRIC_QUERY_DEDUP: &str = "chirp_query_dedup_total";
const METRIC_QUERY_INVALIDATE: &str = "chirp_query_invalidate_total";
const METRIC_QUERY_STALE_DISCARD: &str = "chirp_query_stale_discard_total";

/// Client-session facade over registry, backend, and query cache.
///
/// Cheap to clone; clones share the same session store.
#[derive(Clone)]
pub struct SyncClient {
    registry: Arc<ProcedureRegistry>,
    backend: Arc<dyn Backend>,
    store: Arc<QueryStore>,
    config: SyncConfig,
}

impl SyncClient {
    pub fn new(
        registry: Arc<ProcedureRegistry>,
        backend: Arc<dyn Backend>,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            backend,
            store: Arc::new(QueryStore::new()),
            config,
        }
    }

    /// The session's cache store.
    pub fn store(&self) -> &Arc<QueryStore> {
        &self.store
    }

    /// Resolve a query to cached or freshly fetched data.
    ///
    /// Concurrent calls for the same key share one backend round-trip.
    pub async fn query(&self, procedure: &str, input: Value) -> Result<Arc<Value>, SyncError> {
        let key = self.query_key(procedure, &input)?;
        if let Some(data) = self
            .store
            .fresh_success(&key, self.config.query_stale_after())
        {
            counter!(METRIC_QUERY_HIT).increment(1);
            return Ok(data);
        }
        counter!(METRIC_QUERY_MISS).increment(1);
        self.fetch(key).await
    }

    /// Resolve a query and deserialize its payload.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        procedure: &str,
        input: Value,
    ) -> Result<T, SyncError> {
        let data = self.query(procedure, input).await?;
        serde_json::from_value((*data).clone())
            .map_err(|err| SyncError::transient(format!("malformed result payload: {err}")))
    }

    /// Begin observing a query.
    ///
    /// If the entry is absent, stale, or errored, a fetch is started in the
    /// background; the subscription's `refreshed` resolves when it lands.
    pub fn subscribe(&self, procedure: &str, input: Value) -> Result<Subscription, SyncError> {
        let key = self.query_key(procedure, &input)?;
        let (subscription, needs_fetch) = self
            .store
            .subscribe(&key, self.config.query_stale_after());
        if needs_fetch {
            self.spawn_fetch(key);
        }
        Ok(subscription)
    }

    /// Stop observing a query. Shared in-flight fetches are not cancelled.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.store.unsubscribe(subscription);
    }

    /// Execute a mutation. Never deduplicated, never cached.
    ///
    /// On success every declared key pattern is invalidated; on failure the
    /// cache is left unchanged and the error is returned for presentation.
    pub async fn mutate(
        &self,
        procedure: &str,
        input: Value,
        viewer: &Viewer,
    ) -> Result<Value, SyncError> {
        let def = self.registry.get(procedure)?;
        if def.kind() != ProcedureKind::Mutation {
            return Err(SyncError::validation(format!(
                "`{procedure}` is not a mutation"
            )));
        }
        if def.requires_auth() && !viewer.signed_in {
            return Err(SyncError::Unauthorized {
                procedure: procedure.to_string(),
            });
        }
        def.validate(&input)?;

        let payload = attach_viewer(input, viewer);
        let result = self.backend.invoke(procedure, payload).await?;

        for pattern in def.invalidates() {
            self.invalidate(pattern);
        }
        Ok(result)
    }

    /// Mark matching keys stale and refetch those with active subscribers.
    pub fn invalidate(&self, pattern: &KeyPattern) {
        counter!(METRIC_QUERY_INVALIDATE).increment(1);
        let refetch = self.store.invalidate(pattern);
        for key in refetch {
            self.spawn_fetch(key);
        }
    }

    /// Seed the session cache from a delivered page snapshot.
    ///
    /// Must run before components subscribe; a first subscription for a
    /// seeded key then costs no backend round-trip.
    pub fn hydrate(&self, snapshot: &Snapshot) {
        snapshot.hydrate_into(&self.store);
    }

    fn query_key(&self, procedure: &str, input: &Value) -> Result<QueryKey, SyncError> {
        let def = self.registry.get(procedure)?;
        if def.kind() != ProcedureKind::Query {
            return Err(SyncError::validation(format!(
                "`{procedure}` is not a query"
            )));
        }
        def.validate(input)?;
        Ok(QueryKey::new(procedure, input))
    }

    fn spawn_fetch(&self, key: QueryKey) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(error) = client.fetch(key.clone()).await {
                warn!(key = %key, %error, "Background refetch failed");
            }
        });
    }

    /// Join the pending fetch for `key` or start a new one.
    pub(crate) async fn fetch(&self, key: QueryKey) -> Result<Arc<Value>, SyncError> {
        let plan = self
            .store
            .join_or_begin(&key, self.config.query_stale_after(), |generation| {
                let client = self.clone();
                let key = key.clone();
                async move { client.run_fetch(key, generation).await }
                    .boxed()
                    .shared()
            });
        match plan {
            FetchPlan::Cached(data) => Ok(data),
            FetchPlan::Join(shared) => {
                counter!(METRIC_QUERY_DEDUP).increment(1);
                debug!(key = %key, "Joined in-flight fetch");
                shared.await
            }
            FetchPlan::Begin(shared) => shared.await,
        }
    }

    async fn run_fetch(
        self,
        key: QueryKey,
        generation: FetchGeneration,
    ) -> Result<Arc<Value>, SyncError> {
        let result = self
            .backend
            .invoke(key.procedure(), key.args_value())
            .await
            .map(Arc::new);
        if let Err(conflict) = self.store.complete(&key, generation, &result) {
            counter!(METRIC_QUERY_STALE_DISCARD).increment(1);
            debug!(key = %key, %conflict, "Discarded stale fetch completion");
        }
        result
    }
}

/// Mutations run on behalf of the signed-in viewer; the backend receives the
/// viewer's id alongside the validated input.
fn attach_viewer(input: Value, viewer: &Viewer) -> Value {
    match (input, &viewer.user_id) {
        (Value::Object(mut map), Some(user_id)) => {
            map.insert("authorId".to_string(), Value::String(user_id.clone()));
            Value::Object(map)
        }
        (other, _) => other,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn attach_viewer_injects_author_id() {
        let viewer = Viewer::user("user_1");
        let payload = attach_viewer(json!({"content": "🔥"}), &viewer);
        assert_eq!(payload["authorId"], json!("user_1"));
        assert_eq!(payload["content"], json!("🔥"));
    }

    #[test]
    fn attach_viewer_leaves_anonymous_input_unchanged() {
        let payload = attach_viewer(json!({"content": "🔥"}), &Viewer::anonymous());
        assert!(payload.get("authorId").is_none());
    }
}
