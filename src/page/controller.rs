//! Page generation controller.
//!
//! Owns the static page records for the process and drives the per-identity
//! state machine `NotGenerated → Generating → Fresh → Stale → Generating`.
//! Generation is single-flight: every request that arrives while a build is
//! in progress awaits the same shared build instead of starting its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::cache::lock::mutex_lock;
use crate::config::SyncConfig;
use crate::domain::error::SyncError;
use crate::domain::identity::PageIdentity;

use super::plan::PagePlan;
use super::snapshot::{Snapshot, SnapshotBuilder};

const SOURCE: &str = "page::controller";

const METRIC_PAGE_SERVE: &str = "chirp_page_serve_total";
const METRIC_PAGE_BUILD: &str = "chirp_page_build_total";

/// Delivery status of a resolved page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// Snapshot is current; serve as-is.
    Fresh,
    /// Snapshot is due for regeneration but still served; a background
    /// rebuild has been scheduled.
    Stale,
    /// The identity resolves to no entity; render a not-found page.
    NotFound,
}

/// Contract consumed by the page server to decide delivery.
#[derive(Debug, Clone)]
pub struct ResolvedPage {
    pub status: PageStatus,
    pub snapshot: Option<Arc<Snapshot>>,
    pub revalidate_after: Option<Duration>,
}

type SharedBuild = Shared<BoxFuture<'static, Result<Arc<Snapshot>, SyncError>>>;

struct ReadyRecord {
    snapshot: Arc<Snapshot>,
    generated_at: OffsetDateTime,
    stale: bool,
    regenerating: bool,
}

enum PageSlot {
    /// A blocking build is in flight; waiters share it.
    Generating(SharedBuild),
    /// A persisted snapshot, possibly due for background regeneration.
    Ready(ReadyRecord),
}

struct ControllerInner {
    builder: SnapshotBuilder,
    plan: Box<dyn PagePlan>,
    records: Mutex<HashMap<PageIdentity, PageSlot>>,
    revalidate_after: Option<Duration>,
}

/// Per-process controller for static page records.
///
/// Cheap to clone; clones share the record set.
#[derive(Clone)]
pub struct PageController {
    inner: Arc<ControllerInner>,
}

impl PageController {
    pub fn new(builder: SnapshotBuilder, plan: Box<dyn PagePlan>, config: &SyncConfig) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                builder,
                plan,
                records: Mutex::new(HashMap::new()),
                revalidate_after: config.page_revalidate_after(),
            }),
        }
    }

    /// Resolve a raw path segment to a page outcome.
    ///
    /// Malformed identities fail with `InvalidIdentity` before any backend
    /// work. A first request for an ungenerated identity blocks until the
    /// build yields `Fresh` or `NotFound`; stale records are served
    /// immediately while a background rebuild runs.
    pub async fn resolve(&self, raw_identity: &str) -> Result<ResolvedPage, SyncError> {
        let identity = PageIdentity::parse(raw_identity)?;
        self.resolve_identity(identity).await
    }

    /// Resolve an already-normalized identity.
    pub async fn resolve_identity(&self, identity: PageIdentity) -> Result<ResolvedPage, SyncError> {
        let build = {
            let mut records = mutex_lock(&self.inner.records, SOURCE, "resolve");
            match records.get_mut(&identity) {
                Some(PageSlot::Generating(build)) => build.clone(),
                Some(PageSlot::Ready(record)) => {
                    let due = record.stale || expired(record.generated_at, self.inner.revalidate_after);
                    if !due {
                        counter!(METRIC_PAGE_SERVE, "state" => "fresh").increment(1);
                        return Ok(self.served(PageStatus::Fresh, record.snapshot.clone()));
                    }
                    record.stale = true;
                    let snapshot = record.snapshot.clone();
                    if !record.regenerating {
                        record.regenerating = true;
                        tokio::spawn(self.clone().regenerate(identity.clone()));
                    }
                    counter!(METRIC_PAGE_SERVE, "state" => "stale").increment(1);
                    return Ok(self.served(PageStatus::Stale, snapshot));
                }
                None => {
                    let build = self.begin_build(identity.clone());
                    records.insert(identity.clone(), PageSlot::Generating(build.clone()));
                    build
                }
            }
        };

        match build.await {
            Ok(snapshot) => {
                counter!(METRIC_PAGE_SERVE, "state" => "fresh").increment(1);
                Ok(self.served(PageStatus::Fresh, snapshot))
            }
            Err(SyncError::NotFound { .. }) => {
                counter!(METRIC_PAGE_SERVE, "state" => "not_found").increment(1);
                Ok(ResolvedPage {
                    status: PageStatus::NotFound,
                    snapshot: None,
                    revalidate_after: None,
                })
            }
            Err(error) => Err(error),
        }
    }

    /// External revalidation signal: mark a persisted record stale so the
    /// next request serves it non-blocking and schedules regeneration.
    ///
    /// Returns false when no record exists for the identity.
    pub fn mark_stale(&self, identity: &PageIdentity) -> bool {
        let mut records = mutex_lock(&self.inner.records, SOURCE, "mark_stale");
        match records.get_mut(identity) {
            Some(PageSlot::Ready(record)) => {
                record.stale = true;
                info!(identity = %identity, "Page marked stale");
                true
            }
            _ => false,
        }
    }

    fn served(&self, status: PageStatus, snapshot: Arc<Snapshot>) -> ResolvedPage {
        ResolvedPage {
            status,
            snapshot: Some(snapshot),
            revalidate_after: self.inner.revalidate_after,
        }
    }

    /// Shared build future for the blocking path. Updates the record set on
    /// completion: success persists a Fresh record, failure clears the slot
    /// so a later request may retry generation.
    fn begin_build(&self, identity: PageIdentity) -> SharedBuild {
        let controller = self.clone();
        async move {
            counter!(METRIC_PAGE_BUILD, "path" => "blocking").increment(1);
            let queries = controller.inner.plan.queries(&identity);
            let result = controller
                .inner
                .builder
                .build(&identity, &queries)
                .await
                .map(Arc::new);

            let mut records = mutex_lock(&controller.inner.records, SOURCE, "finish_build");
            match &result {
                Ok(snapshot) => {
                    records.insert(
                        identity.clone(),
                        PageSlot::Ready(ReadyRecord {
                            snapshot: snapshot.clone(),
                            generated_at: snapshot.generated_at,
                            stale: false,
                            regenerating: false,
                        }),
                    );
                }
                Err(error) => {
                    // No record persisted: the identity may exist later.
                    records.remove(&identity);
                    warn!(identity = %identity, %error, "Page generation failed");
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Background regeneration for a stale record. The stale snapshot keeps
    /// serving while this runs.
    async fn regenerate(self, identity: PageIdentity) {
        counter!(METRIC_PAGE_BUILD, "path" => "background").increment(1);
        let queries = self.inner.plan.queries(&identity);
        let result = self.inner.builder.build(&identity, &queries).await;

        let mut records = mutex_lock(&self.inner.records, SOURCE, "finish_regenerate");
        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                records.insert(
                    identity.clone(),
                    PageSlot::Ready(ReadyRecord {
                        generated_at: snapshot.generated_at,
                        snapshot,
                        stale: false,
                        regenerating: false,
                    }),
                );
                info!(identity = %identity, "Page regenerated in background");
            }
            Err(SyncError::NotFound { .. }) => {
                records.remove(&identity);
                info!(identity = %identity, "Page vanished during regeneration");
            }
            Err(error) => {
                if let Some(PageSlot::Ready(record)) = records.get_mut(&identity) {
                    record.regenerating = false;
                }
                warn!(identity = %identity, %error, "Background regeneration failed; keeping stale snapshot");
            }
        }
    }
}

fn expired(generated_at: OffsetDateTime, revalidate_after: Option<Duration>) -> bool {
    match revalidate_after {
        Some(window) => OffsetDateTime::now_utc() - generated_at > window,
        None => false,
    }
}
