//! Page identities and viewer identity.
//!
//! A page identity is the normalized external identifier of a generated
//! page, e.g. the `alice` behind a `/@alice` profile URL. Normalization
//! strips the leading `@` marker and rejects anything that is not a valid
//! username before the identifier can reach the backend.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::SyncError;
use super::users::is_valid_username;

/// Normalized identifier mapping to at most one generated page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageIdentity(String);

impl PageIdentity {
    /// Normalize a raw path segment into a page identity.
    ///
    /// Malformed input fails fast with [`SyncError::InvalidIdentity`] and
    /// never reaches the backend.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let slug = raw.strip_prefix('@').unwrap_or(raw);
        if is_valid_username(slug) {
            Ok(Self(slug.to_string()))
        } else {
            Err(SyncError::invalid_identity(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output of the external identity provider for the current session.
///
/// Anonymous viewers may run queries; mutations that require auth are
/// rejected before any backend call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    pub signed_in: bool,
    pub user_id: Option<String>,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            signed_in: true,
            user_id: Some(user_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_marker() {
        let identity = PageIdentity::parse("@alice").expect("valid identity");
        assert_eq!(identity.as_str(), "alice");
    }

    #[test]
    fn accepts_bare_slug() {
        let identity = PageIdentity::parse("alice").expect("valid identity");
        assert_eq!(identity.as_str(), "alice");
    }

    #[test]
    fn rejects_malformed_identities() {
        for raw in ["", "@", "not-a-slug!!", "@two words", "@@alice"] {
            assert!(
                matches!(
                    PageIdentity::parse(raw),
                    Err(SyncError::InvalidIdentity { .. })
                ),
                "`{raw}` should be rejected"
            );
        }
    }

    #[test]
    fn structural_equality_after_normalization() {
        let a = PageIdentity::parse("@alice").expect("valid identity");
        let b = PageIdentity::parse("alice").expect("valid identity");
        assert_eq!(a, b);
    }
}
