//! Chirp data-synchronization core.
//!
//! Keeps three timelines of a social feed consistent without duplicate
//! fetches or stale data:
//!
//! - **Build time**: [`page::SnapshotBuilder`] runs a page's query set
//!   directly against the backend and bundles the results.
//! - **Request time**: [`page::PageController`] serves existing snapshots,
//!   blocks first requests while a snapshot is generated (single-flight per
//!   identity), and schedules background regeneration for stale pages.
//! - **Session time**: [`rpc::SyncClient`] resolves queries through the
//!   [`cache::QueryStore`], deduplicating concurrent identical fetches and
//!   refetching invalidated keys for active subscribers.
//!
//! A snapshot delivered to a client is written into the query store before
//! any subscriber attaches ([`page::Snapshot::hydrate_into`]), so the first
//! subscription for a prefetched key costs zero network round-trips.
//!
//! ## Configuration
//!
//! Behavior is controlled via `chirp.toml` / `CHIRP_*` environment
//! variables, see [`config::SyncConfig`]:
//!
//! ```toml
//! query_stale_secs = 0      # 0: cache entries stay fresh until invalidated
//! page_revalidate_secs = 60 # 0: pages stay fresh until marked stale
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod page;
pub mod rpc;

pub use cache::{EntryView, KeyPattern, QueryKey, QueryStatus, QueryStore, Subscription};
pub use config::{LogFormat, LoggingConfig, SettingsError, SyncConfig};
pub use domain::error::SyncError;
pub use domain::identity::{PageIdentity, Viewer};
pub use domain::posts::{CreatePostInput, FeedItem, Post};
pub use domain::users::{GetUserByUsernameInput, UserProfile};
pub use infra::memory::MemoryBackend;
pub use page::{
    PageController, PagePlan, PageStatus, ProfilePagePlan, QuerySpec, ResolvedPage, Snapshot,
    SnapshotBuilder, SnapshotEntry,
};
pub use rpc::{Backend, ProcedureKind, ProcedureRegistry, SyncClient, chirp_registry, procedures};
