//! Posts, feed items, and the post creation input schema.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::ProcedureInput;
use super::error::SyncError;
use super::users::UserProfile;

/// Maximum post length, counted in characters.
pub const MAX_POST_CHARS: usize = 280;

/// A single published post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub author_id: String,
    pub content: String,
    pub created_at: OffsetDateTime,
}

/// Feed row: a post joined with its author's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub post: Post,
    pub author: UserProfile,
}

/// Input for `posts.create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePostInput {
    pub content: String,
}

impl ProcedureInput for CreatePostInput {
    fn validate(&self) -> Result<(), SyncError> {
        validate_post_content(&self.content)
    }
}

/// Chirp posts are emoji-only: 1-280 characters, no ASCII letters or digits.
pub fn validate_post_content(content: &str) -> Result<(), SyncError> {
    if content.trim().is_empty() {
        return Err(SyncError::validation("post content is empty"));
    }
    if content.chars().count() > MAX_POST_CHARS {
        return Err(SyncError::validation(format!(
            "post content exceeds {MAX_POST_CHARS} characters"
        )));
    }
    if content.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(SyncError::validation("only emoji are allowed"));
    }
    Ok(())
}
