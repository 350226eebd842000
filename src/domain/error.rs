use thiserror::Error;

/// Error taxonomy for the synchronization core.
///
/// The type is `Clone` because resolved results travel through shared
/// single-flight futures to every joined waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Input failed schema or domain validation. Never retried.
    #[error("input validation failed: {message}")]
    Validation { message: String },
    /// A page identity could not be normalized. Fails before any fetch.
    #[error("page identity `{input}` is malformed")]
    InvalidIdentity { input: String },
    /// A valid request matched no entity. For page generation this becomes a
    /// user-visible not-found page, not a hard failure.
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    /// Backend or network failure. Retryable at the caller's discretion; a
    /// cache entry in this state is refetched on the next subscribe.
    #[error("backend call failed: {message}")]
    Transient { message: String },
    /// Mutation attempted without a signed-in viewer.
    #[error("sign-in required for `{procedure}`")]
    Unauthorized { procedure: String },
    /// Procedure name missing from the registry.
    #[error("unknown procedure `{name}`")]
    UnknownProcedure { name: String },
    /// A fetch completed after its cache entry moved to a newer generation.
    /// Discarded by the store, logged, never surfaced to a user.
    #[error("fetch completion for generation {observed} superseded by generation {current}")]
    ConcurrencyConflict { observed: u64, current: u64 },
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_identity(input: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            input: input.into(),
        }
    }

    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
