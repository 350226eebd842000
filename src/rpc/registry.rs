//! Procedure registry.
//!
//! Maps procedure names to typed (input schema, kind, invalidation set)
//! declarations, resolved once at startup rather than at each call. Invalid
//! input fails with a validation error before any handler runs.

use std::collections::HashMap;

use serde_json::Value;

use crate::cache::KeyPattern;
use crate::domain::ProcedureInput;
use crate::domain::error::SyncError;
use crate::domain::posts::CreatePostInput;
use crate::domain::users::GetUserByUsernameInput;

/// Well-known Chirp procedure names.
pub mod procedures {
    /// Query: full feed, newest first, posts joined with author profiles.
    pub const POSTS_GET_ALL: &str = "posts.getAll";
    /// Query: profile lookup by username.
    pub const PROFILE_GET_USER: &str = "profile.getUserByUsername";
    /// Mutation: publish a post as the signed-in viewer.
    pub const POSTS_CREATE: &str = "posts.create";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    /// Side-effect-free, result cacheable.
    Query,
    /// Side-effecting, never cached, may invalidate query results.
    Mutation,
}

/// One registered procedure: name, kind, typed validator, and (for
/// mutations) the key patterns it invalidates on success.
pub struct ProcedureDef {
    name: &'static str,
    kind: ProcedureKind,
    requires_auth: bool,
    invalidates: Vec<KeyPattern>,
    validate: fn(&Value) -> Result<(), SyncError>,
}

impl ProcedureDef {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    pub fn invalidates(&self) -> &[KeyPattern] {
        &self.invalidates
    }

    /// Run the declared input validator: wire shape, then domain rules.
    pub fn validate(&self, input: &Value) -> Result<(), SyncError> {
        (self.validate)(input)
    }
}

fn validate_as<I: ProcedureInput>(input: &Value) -> Result<(), SyncError> {
    let parsed: I = serde_json::from_value(input.clone())
        .map_err(|err| SyncError::validation(format!("invalid input shape: {err}")))?;
    parsed.validate()
}

/// Finite set of named procedures, built once at startup.
pub struct ProcedureRegistry {
    procedures: HashMap<&'static str, ProcedureDef>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self {
            procedures: HashMap::new(),
        }
    }

    /// Register a query with input schema `I`.
    pub fn query<I: ProcedureInput>(mut self, name: &'static str) -> Self {
        self.procedures.insert(
            name,
            ProcedureDef {
                name,
                kind: ProcedureKind::Query,
                requires_auth: false,
                invalidates: Vec::new(),
                validate: validate_as::<I>,
            },
        );
        self
    }

    /// Register a mutation with input schema `I` and its invalidation set.
    pub fn mutation<I: ProcedureInput>(
        mut self,
        name: &'static str,
        requires_auth: bool,
        invalidates: Vec<KeyPattern>,
    ) -> Self {
        self.procedures.insert(
            name,
            ProcedureDef {
                name,
                kind: ProcedureKind::Mutation,
                requires_auth,
                invalidates,
                validate: validate_as::<I>,
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Result<&ProcedureDef, SyncError> {
        self.procedures
            .get(name)
            .ok_or_else(|| SyncError::UnknownProcedure {
                name: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

impl Default for ProcedureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Empty input for procedures that take no arguments.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct NoInput {}

impl ProcedureInput for NoInput {}

/// The Chirp procedure set.
pub fn chirp_registry() -> ProcedureRegistry {
    ProcedureRegistry::new()
        .query::<NoInput>(procedures::POSTS_GET_ALL)
        .query::<GetUserByUsernameInput>(procedures::PROFILE_GET_USER)
        .mutation::<CreatePostInput>(
            procedures::POSTS_CREATE,
            true,
            vec![KeyPattern::procedure(procedures::POSTS_GET_ALL)],
        )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn registry_contains_the_chirp_procedures() {
        let registry = chirp_registry();
        assert_eq!(registry.len(), 3);

        let feed = registry.get(procedures::POSTS_GET_ALL).expect("registered");
        assert_eq!(feed.kind(), ProcedureKind::Query);
        assert!(feed.invalidates().is_empty());

        let create = registry.get(procedures::POSTS_CREATE).expect("registered");
        assert_eq!(create.kind(), ProcedureKind::Mutation);
        assert!(create.requires_auth());
        assert_eq!(create.invalidates().len(), 1);
    }

    #[test]
    fn unknown_procedure_is_rejected() {
        let registry = chirp_registry();
        assert!(matches!(
            registry.get("posts.delete"),
            Err(SyncError::UnknownProcedure { .. })
        ));
    }

    #[test]
    fn validator_rejects_wrong_shape_before_domain_rules() {
        let registry = chirp_registry();
        let create = registry.get(procedures::POSTS_CREATE).expect("registered");

        assert!(matches!(
            create.validate(&json!({"wrong": true})),
            Err(SyncError::Validation { .. })
        ));
        assert!(matches!(
            create.validate(&json!({"content": "plain text"})),
            Err(SyncError::Validation { .. })
        ));
        assert!(create.validate(&json!({"content": "🔥"})).is_ok());
    }

    #[test]
    fn lookup_input_validates_username() {
        let registry = chirp_registry();
        let lookup = registry
            .get(procedures::PROFILE_GET_USER)
            .expect("registered");

        assert!(lookup.validate(&json!({"username": "alice"})).is_ok());
        assert!(lookup.validate(&json!({"username": "not a slug"})).is_err());
    }
}
