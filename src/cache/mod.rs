//! Chirp query cache.
//!
//! Process-wide keyed cache of procedure results with subscriber tracking.
//! The store owns every cache entry for the lifetime of a client session and
//! is mutated only through its defined operations:
//!
//! - **Subscribe/unsubscribe** track caller interest per key; the first
//!   subscription to an absent or stale key signals a fetch.
//! - **Invalidation** marks matching keys stale. Keys with active
//!   subscribers are reported back for immediate refetch; keys without
//!   subscribers are only marked, so the next subscribe fetches lazily
//!   instead of the store doing unbounded background work.
//! - **Single-flight fetches** are coordinated through a shared in-flight
//!   handle per key, and a per-entry generation counter discards fetch
//!   completions that arrive after the entry moved on.

mod keys;
pub(crate) mod lock;
mod store;

pub use keys::{KeyPattern, QueryKey};
pub use store::{EntryView, FetchGeneration, QueryStatus, QueryStore, SharedFetch, Subscription};
pub(crate) use store::FetchPlan;
