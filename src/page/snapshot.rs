//! Page snapshots: serialized query results captured ahead of request time.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::cache::{QueryKey, QueryStore};
use crate::domain::error::SyncError;
use crate::domain::identity::PageIdentity;
use crate::rpc::{Backend, ProcedureKind, ProcedureRegistry};

use super::plan::QuerySpec;

const METRIC_SNAPSHOT_BUILD_MS: &str = "chirp_snapshot_build_ms";

/// One prefetched query result inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: QueryKey,
    pub data: Value,
}

/// Transferable bundle of query results for one page identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub identity: PageIdentity,
    pub entries: Vec<SnapshotEntry>,
    pub generated_at: OffsetDateTime,
}

impl Snapshot {
    /// Result for `key`, if the snapshot contains it.
    pub fn get(&self, key: &QueryKey) -> Option<&Value> {
        self.entries
            .iter()
            .find(|entry| &entry.key == key)
            .map(|entry| &entry.data)
    }

    /// Hydration bridge: seed a query store with every captured result as a
    /// Success entry stamped with the generation time.
    ///
    /// Runs before any component subscribes, so a client query for a seeded
    /// key resolves without a network round-trip; the entry becomes eligible
    /// for refetch only through normal staleness and invalidation rules.
    pub fn hydrate_into(&self, store: &QueryStore) {
        for entry in &self.entries {
            store.write_success(
                &entry.key,
                Arc::new(entry.data.clone()),
                self.generated_at,
            );
        }
        debug!(
            identity = %self.identity,
            entries = self.entries.len(),
            "Hydrated query store from snapshot"
        );
    }
}

/// Executes a page's query set directly against the backend, bypassing any
/// client cache, and bundles the results.
pub struct SnapshotBuilder {
    registry: Arc<ProcedureRegistry>,
    backend: Arc<dyn Backend>,
}

impl SnapshotBuilder {
    pub fn new(registry: Arc<ProcedureRegistry>, backend: Arc<dyn Backend>) -> Self {
        Self { registry, backend }
    }

    /// Build a snapshot for `identity`.
    ///
    /// Fails with `NotFound` when a query's target entity does not exist
    /// (the identity resolves to nothing); an empty collection result is a
    /// valid snapshot, not a failure.
    pub async fn build(
        &self,
        identity: &PageIdentity,
        queries: &[QuerySpec],
    ) -> Result<Snapshot, SyncError> {
        let started = Instant::now();
        let mut entries = Vec::with_capacity(queries.len());
        for query in queries {
            let def = self.registry.get(query.procedure)?;
            if def.kind() != ProcedureKind::Query {
                return Err(SyncError::validation(format!(
                    "`{}` is not a query",
                    query.procedure
                )));
            }
            def.validate(&query.input)?;
            let data = self
                .backend
                .invoke(query.procedure, query.input.clone())
                .await?;
            entries.push(SnapshotEntry {
                key: QueryKey::new(query.procedure, &query.input),
                data,
            });
        }
        histogram!(METRIC_SNAPSHOT_BUILD_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            identity = %identity,
            queries = entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Built page snapshot"
        );
        Ok(Snapshot {
            identity: identity.clone(),
            entries,
            generated_at: OffsetDateTime::now_utc(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            identity: PageIdentity::parse("alice").expect("valid identity"),
            entries: vec![SnapshotEntry {
                key: QueryKey::new("profile.getUserByUsername", &json!({"username": "alice"})),
                data: json!({"id": "user_1", "username": "alice", "profileImageUrl": ""}),
            }],
            generated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn snapshot_lookup_by_key() {
        let snapshot = sample_snapshot();
        let key = QueryKey::new("profile.getUserByUsername", &json!({"username": "alice"}));
        assert!(snapshot.get(&key).is_some());
        let other = QueryKey::new("profile.getUserByUsername", &json!({"username": "bob"}));
        assert!(snapshot.get(&other).is_none());
    }

    #[test]
    fn snapshot_serialization_round_trip() {
        let snapshot = sample_snapshot();
        let wire = serde_json::to_string(&snapshot).expect("serializable");
        let back: Snapshot = serde_json::from_str(&wire).expect("deserializable");
        assert_eq!(back, snapshot);
    }

    #[test]
    fn hydration_seeds_success_entries() {
        let snapshot = sample_snapshot();
        let store = QueryStore::new();
        snapshot.hydrate_into(&store);

        let key = QueryKey::new("profile.getUserByUsername", &json!({"username": "alice"}));
        let data = store.fresh_success(&key, None).expect("seeded entry");
        assert_eq!(data.as_ref()["username"], json!("alice"));

        let (_subscription, needs_fetch) = store.subscribe(&key, None);
        assert!(!needs_fetch);
    }
}
