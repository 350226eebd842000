//! Static page generation.
//!
//! [`SnapshotBuilder`] runs a page's query set directly against the backend
//! ahead of request time; [`PageController`] decides per identity whether to
//! serve an existing snapshot, block while one is generated, or report
//! not-found, with single-flight generation per identity.

mod controller;
mod plan;
mod snapshot;

pub use controller::{PageController, PageStatus, ResolvedPage};
pub use plan::{PagePlan, ProfilePagePlan, QuerySpec};
pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotEntry};
