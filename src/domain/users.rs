//! User profiles and the profile lookup input schema.

use serde::{Deserialize, Serialize};

use super::ProcedureInput;
use super::error::SyncError;

const MAX_USERNAME_LEN: usize = 64;

/// Public profile of a feed author, as delivered by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub profile_image_url: String,
}

/// Input for `profile.getUserByUsername`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUserByUsernameInput {
    pub username: String,
}

impl ProcedureInput for GetUserByUsernameInput {
    fn validate(&self) -> Result<(), SyncError> {
        if is_valid_username(&self.username) {
            Ok(())
        } else {
            Err(SyncError::validation(format!(
                "`{}` is not a valid username",
                self.username
            )))
        }
    }
}

/// Usernames are 1-64 characters from `[A-Za-z0-9_-]`.
pub(crate) fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
