//! Entity resolution: raw store records to hydrated posts and users.

use std::sync::Arc;

use serde_json::Value;

use crate::error::TimelineError;
use crate::store::{GraphStore, StorePath};
use crate::types::{Post, PostId, PostRecord, User, UserId, UserRecord};

/// Resolves records into domain entities, joining each post with its author.
///
/// Resolution only reads; resolving the same record twice yields equal posts.
/// Viewer-relative flags (`is_current_user`) are computed against the
/// optional viewer the resolver was built for.
pub struct EntityResolver<S: GraphStore> {
    store: Arc<S>,
    viewer: Option<UserId>,
}

impl<S: GraphStore> Clone for EntityResolver<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), viewer: self.viewer.clone() }
    }
}

impl<S: GraphStore> EntityResolver<S> {
    /// Create a resolver with no viewer.
    pub fn new(store: Arc<S>) -> Self {
        Self { store, viewer: None }
    }

    /// Create a resolver that computes flags relative to `viewer`.
    pub fn for_viewer(store: Arc<S>, viewer: UserId) -> Self {
        Self { store, viewer: Some(viewer) }
    }

    /// The viewer flags are computed against.
    pub fn viewer(&self) -> Option<&UserId> {
        self.viewer.as_ref()
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolve a raw post record.
    ///
    /// Fails with `MissingAuthorReference` when the record has no `uid`,
    /// `AuthorNotFound` when `users/{uid}` is absent, and `MalformedRecord`
    /// when either record does not decode. Missing counters default to zero.
    /// `path` is where `raw` was read from and is reported in decode errors.
    pub async fn resolve_post(&self, raw: &Value, post_id: &PostId, path: &StorePath) -> Result<Post, TimelineError> {
        let record = PostRecord::decode(raw, post_id, &path.to_string())?;
        let author = match self.load_user(&record.uid).await? {
            Some(author) => author,
            None => {
                return Err(TimelineError::AuthorNotFound {
                    post_id: post_id.clone(),
                    author_id: record.uid,
                });
            }
        };
        Post::from_record(post_id.clone(), record, author)
    }

    /// Read `posts/{id}` and resolve it.
    pub async fn fetch_post(&self, post_id: &PostId) -> Result<Post, TimelineError> {
        let path = StorePath::post(post_id);
        let raw = self
            .store
            .read_once(&path)
            .await
            .map_err(TimelineError::from_store)?
            .ok_or_else(|| TimelineError::PostNotFound(post_id.clone()))?;
        self.resolve_post(&raw, post_id, &path).await
    }

    /// Read `users/{uid}`.
    pub async fn fetch_user(&self, user_id: &UserId) -> Result<User, TimelineError> {
        self.load_user(user_id)
            .await?
            .ok_or_else(|| TimelineError::UserNotFound(user_id.to_string()))
    }

    /// Look a user up by unique handle through `userHandles/{handle}`.
    pub async fn fetch_user_by_handle(&self, handle: &str) -> Result<User, TimelineError> {
        let uid = self
            .store
            .read_once(&StorePath::user_handle(handle))
            .await
            .map_err(TimelineError::from_store)?;
        match uid {
            Some(Value::String(uid)) => self.fetch_user(&UserId::new(uid)).await,
            _ => Err(TimelineError::UserNotFound(handle.to_string())),
        }
    }

    /// Decode a raw user record read from `path`.
    pub fn resolve_user(&self, raw: Value, user_id: &UserId, path: &StorePath) -> Result<User, TimelineError> {
        let record: UserRecord =
            serde_json::from_value(raw).map_err(|e| TimelineError::MalformedRecord {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(User::from_record(user_id.clone(), record, self.viewer.as_ref()))
    }

    async fn load_user(&self, user_id: &UserId) -> Result<Option<User>, TimelineError> {
        let path = StorePath::user(user_id);
        let Some(raw) = self.store.read_once(&path).await.map_err(TimelineError::from_store)? else {
            return Ok(None);
        };
        self.resolve_user(raw, user_id, &path).map(Some)
    }
}
