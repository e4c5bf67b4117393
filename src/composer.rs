//! Publishing posts, replies and reposts.
//!
//! Each publish is two sequenced writes, record first and index second, so
//! feeds subscribed to the index only ever see keys whose record exists.

use std::sync::Arc;

use chrono::{Local, Utc};
use serde_json::{json, Value};
use tracing::info;

use crate::config::TimelineConfig;
use crate::error::TimelineError;
use crate::rate_limit::RateLimiter;
use crate::store::{GraphStore, StorePath};
use crate::types::{Post, PostId, PostRecord, UserId, UserRecord};

/// What is being published.
#[derive(Debug, Clone, Copy)]
pub enum Compose<'a> {
    /// Top-level post.
    Post,
    /// Reply to a post.
    Reply(&'a Post),
    /// Repost of a post.
    Repost(&'a Post),
}

/// Writes new posts and user profiles.
pub struct PostComposer<S: GraphStore> {
    store: Arc<S>,
    config: TimelineConfig,
    limiter: RateLimiter,
}

impl<S: GraphStore> PostComposer<S> {
    /// Create a composer with the given limits.
    pub fn new(store: Arc<S>, config: TimelineConfig) -> Self {
        let limiter = RateLimiter::from_config(&config);
        Self { store, config, limiter }
    }

    /// The limiter built from the configured quota.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Publish and return the new id.
    pub async fn publish(&self, author: &UserId, text: &str, kind: Compose<'_>) -> Result<PostId, TimelineError> {
        self.validate_text(text)?;

        let id = PostId::generate();
        let mut record = PostRecord {
            uid: author.clone(),
            text: text.to_string(),
            likes: 0,
            reposts: 0,
            timestamp: Utc::now().timestamp(),
            replying_to: None,
            reposting_from: None,
        };

        match kind {
            Compose::Post => {
                self.write(&StorePath::post(&id), record.to_value()).await?;
                self.write(&StorePath::user_posts(author).child(id.as_str()), json!(1)).await?;
            }
            Compose::Reply(root) | Compose::Repost(root) => {
                let handle = root.author.handle.clone();
                if let Compose::Reply(_) = kind {
                    record.replying_to = Some(handle);
                } else {
                    record.reposting_from = Some(handle);
                }
                self.write(&StorePath::post_replies(&root.id).child(id.as_str()), record.to_value())
                    .await?;
                self.write(
                    &StorePath::user_replies(author).child(root.id.as_str()),
                    Value::String(id.to_string()),
                )
                .await?;
            }
        }

        info!(post_id = %id, author = %author, kind = ?kind_name(&kind), "published");
        Ok(id)
    }

    /// Publish after checking today's quota against the caller's local collections.
    pub async fn publish_within_quota(
        &self,
        author: &UserId,
        text: &str,
        kind: Compose<'_>,
        local_posts: &[Post],
        local_replies: &[Post],
    ) -> Result<PostId, TimelineError> {
        let today = Local::now().date_naive();
        if !self.limiter.can_post_today(local_posts, local_replies, today) {
            return Err(TimelineError::QuotaExceeded { quota: self.limiter.quota() });
        }
        self.publish(author, text, kind).await
    }

    /// Store a user profile and claim its handle.
    ///
    /// Renaming writes the profile, claims the new handle, then releases the
    /// old one. The steps are sequenced, not atomic: a failure after the
    /// claim leaves both handles pointing at `user`.
    pub async fn register_user(&self, user: &UserId, profile: UserRecord) -> Result<(), TimelineError> {
        let handle = profile.username.clone();
        self.validate_handle(&handle)?;

        if let Some(owner) = self.handle_owner(&handle).await? {
            if owner != user.as_str() {
                return Err(TimelineError::InvalidHandle(format!("{handle} is taken")));
            }
        }

        let path = StorePath::user(user);
        let previous = self
            .store
            .read_once(&path)
            .await
            .map_err(TimelineError::from_store)?
            .and_then(|raw| raw.get("username").and_then(Value::as_str).map(str::to_string))
            .filter(|old| old != &handle);

        let record = serde_json::to_value(&profile).map_err(|e| TimelineError::MalformedRecord {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        self.write(&path, record).await?;
        self.write(&StorePath::user_handle(&handle), Value::String(user.to_string())).await?;

        if let Some(old) = previous {
            // Only release the old handle while it still points at this user.
            if self.handle_owner(&old).await?.as_deref() == Some(user.as_str()) {
                self.store
                    .delete(&StorePath::user_handle(&old))
                    .await
                    .map_err(TimelineError::from_store)?;
            }
            info!(user = %user, old_handle = %old, new_handle = %handle, "handle changed");
        }
        Ok(())
    }

    async fn handle_owner(&self, handle: &str) -> Result<Option<String>, TimelineError> {
        let owner = self
            .store
            .read_once(&StorePath::user_handle(handle))
            .await
            .map_err(TimelineError::from_store)?;
        Ok(owner.and_then(|v| v.as_str().map(str::to_string)))
    }

    fn validate_text(&self, text: &str) -> Result<(), TimelineError> {
        if text.trim().is_empty() {
            return Err(TimelineError::EmptyText);
        }
        let len = text.chars().count();
        if len > self.config.max_post_chars {
            return Err(TimelineError::TextTooLong { len, max: self.config.max_post_chars });
        }
        Ok(())
    }

    fn validate_handle(&self, handle: &str) -> Result<(), TimelineError> {
        if handle.is_empty() || handle.contains('/') || handle.chars().any(char::is_whitespace) {
            return Err(TimelineError::InvalidHandle(format!("{handle:?} is not a valid handle")));
        }
        if handle.chars().count() > self.config.max_handle_chars {
            return Err(TimelineError::InvalidHandle(format!(
                "{handle} exceeds {} characters",
                self.config.max_handle_chars
            )));
        }
        Ok(())
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), TimelineError> {
        self.store.write(path, value).await.map_err(TimelineError::from_store)
    }
}

fn kind_name(kind: &Compose<'_>) -> &'static str {
    match kind {
        Compose::Post => "post",
        Compose::Reply(_) => "reply",
        Compose::Repost(_) => "repost",
    }
}
