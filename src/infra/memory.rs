//! In-memory backend.
//!
//! Implements the fixed `invoke(procedure, input)` interface over in-process
//! user and post tables. Stands in for the external persistent store in
//! tests and local development; it is not a storage engine.

use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::cache::lock::{rw_read, rw_write};
use crate::domain::error::SyncError;
use crate::domain::posts::{FeedItem, Post};
use crate::domain::users::UserProfile;
use crate::rpc::{Backend, procedures};

const SOURCE: &str = "infra::memory";

#[derive(Default)]
struct BackendState {
    users: Vec<UserProfile>,
    posts: Vec<Post>,
}

/// In-process backend data store.
pub struct MemoryBackend {
    state: RwLock<BackendState>,
    invocations: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BackendState::default()),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Total number of `invoke` calls observed. Every deduplicated or cached
    /// resolution keeps this counter unchanged.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn seed_user(&self, profile: UserProfile) {
        rw_write(&self.state, SOURCE, "seed_user").users.push(profile);
    }

    pub fn seed_post(&self, post: Post) {
        rw_write(&self.state, SOURCE, "seed_post").posts.push(post);
    }

    fn get_all_posts(&self) -> Result<Value, SyncError> {
        let state = rw_read(&self.state, SOURCE, "get_all_posts");
        let mut items: Vec<FeedItem> = state
            .posts
            .iter()
            .filter_map(|post| {
                let author = state.users.iter().find(|user| user.id == post.author_id);
                match author {
                    Some(author) => Some(FeedItem {
                        post: post.clone(),
                        author: author.clone(),
                    }),
                    None => {
                        warn!(post_id = %post.id, "Feed post has no author; skipping");
                        None
                    }
                }
            })
            .collect();
        items.sort_by(|a, b| b.post.created_at.cmp(&a.post.created_at));
        serde_json::to_value(items)
            .map_err(|err| SyncError::transient(format!("feed serialization failed: {err}")))
    }

    fn get_user_by_username(&self, input: &Value) -> Result<Value, SyncError> {
        let username = input
            .get("username")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::validation("missing `username`"))?;
        let state = rw_read(&self.state, SOURCE, "get_user_by_username");
        let user = state
            .users
            .iter()
            .find(|user| user.username == username)
            .ok_or(SyncError::not_found("user"))?;
        serde_json::to_value(user)
            .map_err(|err| SyncError::transient(format!("profile serialization failed: {err}")))
    }

    fn create_post(&self, input: &Value) -> Result<Value, SyncError> {
        let content = input
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::validation("missing `content`"))?;
        let author_id = input
            .get("authorId")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::validation("missing `authorId`"))?;
        let post = Post {
            id: Uuid::new_v4(),
            author_id: author_id.to_string(),
            content: content.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        rw_write(&self.state, SOURCE, "create_post")
            .posts
            .push(post.clone());
        serde_json::to_value(post)
            .map_err(|err| SyncError::transient(format!("post serialization failed: {err}")))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn invoke(&self, procedure: &str, input: Value) -> Result<Value, SyncError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match procedure {
            procedures::POSTS_GET_ALL => self.get_all_posts(),
            procedures::PROFILE_GET_USER => self.get_user_by_username(&input),
            procedures::POSTS_CREATE => self.create_post(&input),
            other => Err(SyncError::UnknownProcedure {
                name: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn alice() -> UserProfile {
        UserProfile {
            id: "user_alice".to_string(),
            username: "alice".to_string(),
            profile_image_url: "https://img.example/alice.png".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_feed_is_a_valid_empty_result() {
        let backend = MemoryBackend::new();
        let feed = backend
            .invoke(procedures::POSTS_GET_ALL, json!({}))
            .await
            .expect("feed query succeeds");
        assert_eq!(feed, json!([]));
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let backend = MemoryBackend::new();
        let outcome = backend
            .invoke(procedures::PROFILE_GET_USER, json!({"username": "ghost"}))
            .await;
        assert_eq!(outcome, Err(SyncError::not_found("user")));
    }

    #[tokio::test]
    async fn created_posts_appear_newest_first() {
        let backend = MemoryBackend::new();
        backend.seed_user(alice());

        for content in ["🌊", "🔥"] {
            backend
                .invoke(
                    procedures::POSTS_CREATE,
                    json!({"content": content, "authorId": "user_alice"}),
                )
                .await
                .expect("post created");
            // Distinct timestamps so the ordering assertion is deterministic.
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let feed: Vec<FeedItem> = serde_json::from_value(
            backend
                .invoke(procedures::POSTS_GET_ALL, json!({}))
                .await
                .expect("feed query succeeds"),
        )
        .expect("feed deserializes");

        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].post.content, "🔥");
        assert_eq!(feed[0].author.username, "alice");
    }

    #[tokio::test]
    async fn unknown_procedure_is_rejected() {
        let backend = MemoryBackend::new();
        let outcome = backend.invoke("posts.delete", json!({})).await;
        assert!(matches!(outcome, Err(SyncError::UnknownProcedure { .. })));
    }
}
