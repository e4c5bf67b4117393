//! Like state: toggle saga, existence check and index repair.
//!
//! A like is stored twice: `userLikes/{uid}/{post}` (primary) and
//! `postLikes/{post}/{uid}` (reverse index), plus the denormalized counter
//! `posts/{post}/likes`. The three writes are sequenced but not atomic. A
//! failure or crash between them leaves the halves disagreeing until
//! [`LikeStateReconciler::reconcile`] runs.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::TimelineError;
use crate::store::{GraphStore, StorePath};
use crate::types::{Post, UserId};

/// Result of a reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexRepair {
    /// Both halves agree.
    Consistent,
    /// Primary relation present, reverse entry was missing and has been written.
    RestoredReverseIndex,
    /// Reverse entry had no primary relation and has been removed.
    RemovedDanglingReverse,
}

/// Toggles and checks like relations.
pub struct LikeStateReconciler<S: GraphStore> {
    store: Arc<S>,
}

impl<S: GraphStore> LikeStateReconciler<S> {
    /// Create a reconciler over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Flip the viewer's like on `post` and return the updated post.
    ///
    /// Trusts `post.did_liked` as given; the store is not re-read first, so
    /// two clients toggling from stale state can double-count. Order:
    ///
    /// 1. counter `posts/{post}/likes` set to `likes ± 1`
    /// 2. primary relation written or deleted
    /// 3. reverse index written or deleted, after step 2 succeeded
    ///
    /// The first failing step is returned; earlier steps are not rolled back.
    pub async fn toggle_like(&self, post: &Post, viewer: &UserId) -> Result<Post, TimelineError> {
        let was_liked = post.did_liked;
        let likes = if was_liked { post.likes.saturating_sub(1) } else { post.likes + 1 };

        let primary = StorePath::user_likes(viewer).child(post.id.as_str());
        let reverse = StorePath::post_likes(&post.id).child(viewer.as_str());

        self.store
            .write(&StorePath::post_likes_counter(&post.id), json!(likes))
            .await
            .map_err(|e| self.fail(e, "counter"))?;

        if was_liked {
            self.store.delete(&primary).await.map_err(|e| self.fail(e, "primary delete"))?;
            self.store.delete(&reverse).await.map_err(|e| self.fail(e, "reverse delete"))?;
        } else {
            self.store.write(&primary, json!(1)).await.map_err(|e| self.fail(e, "primary write"))?;
            self.store.write(&reverse, json!(1)).await.map_err(|e| self.fail(e, "reverse write"))?;
        }

        debug!(post_id = %post.id, viewer = %viewer, liked = !was_liked, likes, "like toggled");

        let mut updated = post.clone();
        updated.did_liked = !was_liked;
        updated.likes = likes;
        Ok(updated)
    }

    /// Whether the primary relation `userLikes/{viewer}/{post}` exists.
    pub async fn has_liked(&self, post: &Post, viewer: &UserId) -> Result<bool, TimelineError> {
        let path = StorePath::user_likes(viewer).child(post.id.as_str());
        let value = self.store.read_once(&path).await.map_err(TimelineError::from_store)?;
        Ok(value.is_some())
    }

    /// Return `post` with `did_liked` read from the store.
    pub async fn hydrate(&self, post: &Post, viewer: &UserId) -> Result<Post, TimelineError> {
        let mut hydrated = post.clone();
        hydrated.did_liked = self.has_liked(post, viewer).await?;
        Ok(hydrated)
    }

    /// Check that the relation and its reverse index agree.
    ///
    /// Returns the like state, or `IndexInconsistency` when exactly one half exists.
    pub async fn check_index(&self, post: &Post, viewer: &UserId) -> Result<bool, TimelineError> {
        let (primary, reverse) = self.read_halves(post, viewer).await?;
        if primary != reverse {
            return Err(TimelineError::IndexInconsistency {
                user_id: viewer.clone(),
                post_id: post.id.clone(),
            });
        }
        Ok(primary)
    }

    /// Repair a half-applied toggle so the reverse index matches the primary relation.
    pub async fn reconcile(&self, post: &Post, viewer: &UserId) -> Result<IndexRepair, TimelineError> {
        let (primary, reverse) = self.read_halves(post, viewer).await?;
        let reverse_path = StorePath::post_likes(&post.id).child(viewer.as_str());

        let repair = match (primary, reverse) {
            (true, false) => {
                self.store.write(&reverse_path, json!(1)).await.map_err(TimelineError::from_store)?;
                IndexRepair::RestoredReverseIndex
            }
            (false, true) => {
                self.store.delete(&reverse_path).await.map_err(TimelineError::from_store)?;
                IndexRepair::RemovedDanglingReverse
            }
            _ => IndexRepair::Consistent,
        };

        if repair != IndexRepair::Consistent {
            info!(post_id = %post.id, viewer = %viewer, repair = ?repair, "like index repaired");
        }
        Ok(repair)
    }

    async fn read_halves(&self, post: &Post, viewer: &UserId) -> Result<(bool, bool), TimelineError> {
        let primary = self.has_liked(post, viewer).await?;
        let reverse = self
            .store
            .read_once(&StorePath::post_likes(&post.id).child(viewer.as_str()))
            .await
            .map_err(TimelineError::from_store)?
            .is_some();
        Ok((primary, reverse))
    }

    fn fail(&self, e: S::Error, step: &'static str) -> TimelineError {
        let err = TimelineError::from_store(e);
        warn!(step, error = %err, "like toggle step failed");
        err
    }
}
