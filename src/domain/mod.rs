//! Domain layer: feed entities, identity normalization, validation rules,
//! and the core error taxonomy.

use serde::Serialize;
use serde::de::DeserializeOwned;

use self::error::SyncError;

pub mod error;
pub mod identity;
pub mod posts;
pub mod users;

/// Typed input schema for a registered procedure.
///
/// Deserialization enforces the wire shape; `validate` enforces domain rules
/// on top of it. Both run before any backend call.
pub trait ProcedureInput: DeserializeOwned + Serialize {
    fn validate(&self) -> Result<(), SyncError> {
        Ok(())
    }
}
