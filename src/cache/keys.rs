//! Query cache key definitions.
//!
//! A [`QueryKey`] is the composite identity of a cached procedure result:
//! the procedure name plus a canonical rendering of its arguments. Two calls
//! with structurally equal arguments map to the same key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Composite identity of a cached query result. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    procedure: String,
    args: String,
}

impl QueryKey {
    /// Build a key from a procedure name and its argument value.
    ///
    /// `serde_json` keeps object keys sorted, so structurally equal argument
    /// values serialize to the same canonical string regardless of the field
    /// order they were built with.
    pub fn new(procedure: impl Into<String>, args: &Value) -> Self {
        Self {
            procedure: procedure.into(),
            args: args.to_string(),
        }
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Recover the argument value, e.g. for an invalidation-driven refetch.
    pub fn args_value(&self) -> Value {
        serde_json::from_str(&self.args).unwrap_or(Value::Null)
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.procedure, self.args)
    }
}

/// Pattern over query keys, declared by mutations for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Every key of the named procedure, regardless of arguments.
    Procedure(String),
    /// One exact key.
    Exact(QueryKey),
}

impl KeyPattern {
    pub fn procedure(name: impl Into<String>) -> Self {
        Self::Procedure(name.into())
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            Self::Procedure(name) => key.procedure == *name,
            Self::Exact(exact) => key == exact,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn structurally_equal_args_share_a_key() {
        let a = QueryKey::new("profile.getUserByUsername", &json!({"username": "alice"}));
        let b = QueryKey::new("profile.getUserByUsername", &json!({"username": "alice"}));
        assert_eq!(a, b);
    }

    #[test]
    fn object_key_order_does_not_matter() {
        let a = QueryKey::new("posts.list", &json!({"cursor": "abc", "limit": 10}));
        let b = QueryKey::new("posts.list", &json!({"limit": 10, "cursor": "abc"}));
        assert_eq!(a, b);
    }

    #[test]
    fn different_args_produce_different_keys() {
        let a = QueryKey::new("profile.getUserByUsername", &json!({"username": "alice"}));
        let b = QueryKey::new("profile.getUserByUsername", &json!({"username": "bob"}));
        assert_ne!(a, b);
    }

    #[test]
    fn args_round_trip() {
        let args = json!({"username": "alice"});
        let key = QueryKey::new("profile.getUserByUsername", &args);
        assert_eq!(key.args_value(), args);
    }

    #[test]
    fn procedure_pattern_ignores_args() {
        let pattern = KeyPattern::procedure("posts.getAll");
        assert!(pattern.matches(&QueryKey::new("posts.getAll", &json!({}))));
        assert!(pattern.matches(&QueryKey::new("posts.getAll", &json!({"limit": 5}))));
        assert!(!pattern.matches(&QueryKey::new("posts.create", &json!({}))));
    }

    #[test]
    fn exact_pattern_requires_matching_args() {
        let key = QueryKey::new("profile.getUserByUsername", &json!({"username": "alice"}));
        let pattern = KeyPattern::Exact(key.clone());
        assert!(pattern.matches(&key));
        assert!(!pattern.matches(&QueryKey::new(
            "profile.getUserByUsername",
            &json!({"username": "bob"})
        )));
    }
}
