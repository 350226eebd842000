//! Remote procedure layer.
//!
//! [`ProcedureRegistry`] declares the finite procedure set at startup;
//! [`SyncClient`] resolves queries through the session cache and executes
//! mutations with declared invalidation. The persistent store sits behind
//! the [`Backend`] seam.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::error::SyncError;

mod client;
mod registry;

pub use client::SyncClient;
pub use registry::{ProcedureDef, ProcedureKind, ProcedureRegistry, chirp_registry, procedures};

/// Fixed call interface of the backend data store.
///
/// Queries must be idempotent; mutations are invoked at most once per
/// executor call (the core never retries them automatically).
#[async_trait]
pub trait Backend: Send + Sync {
    async fn invoke(&self, procedure: &str, input: Value) -> Result<Value, SyncError>;
}
