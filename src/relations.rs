//! Follow relationships and relation counters.
//!
//! `userFollowing/{viewer}/{target}` is the primary edge and
//! `userFollowers/{target}/{viewer}` its reverse index. Like the like
//! relation, the pair is written in sequence without atomicity.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::TimelineError;
use crate::store::{GraphStore, StorePath};
use crate::types::{RelationStats, User, UserId};

/// Follow graph operations.
pub struct RelationGraph<S: GraphStore> {
    store: Arc<S>,
}

impl<S: GraphStore> RelationGraph<S> {
    /// Create a relation graph over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Make `viewer` follow `target`.
    ///
    /// Open home timelines of `viewer` pick the new edge up as a new branch.
    pub async fn follow(&self, viewer: &UserId, target: &UserId) -> Result<(), TimelineError> {
        if viewer == target {
            return Err(TimelineError::SelfRelation(viewer.clone()));
        }
        self.store
            .write(&StorePath::user_following(viewer).child(target.as_str()), json!(1))
            .await
            .map_err(TimelineError::from_store)?;
        self.store
            .write(&StorePath::user_followers(target).child(viewer.as_str()), json!(1))
            .await
            .map_err(TimelineError::from_store)?;
        debug!(viewer = %viewer, target = %target, "followed");
        Ok(())
    }

    /// Remove the follow edge between `viewer` and `target`.
    ///
    /// Posts already folded into an open home timeline are not retracted.
    pub async fn unfollow(&self, viewer: &UserId, target: &UserId) -> Result<(), TimelineError> {
        if viewer == target {
            return Err(TimelineError::SelfRelation(viewer.clone()));
        }
        self.store
            .delete(&StorePath::user_following(viewer).child(target.as_str()))
            .await
            .map_err(TimelineError::from_store)?;
        self.store
            .delete(&StorePath::user_followers(target).child(viewer.as_str()))
            .await
            .map_err(TimelineError::from_store)?;
        debug!(viewer = %viewer, target = %target, "unfollowed");
        Ok(())
    }

    /// Whether `viewer` follows `target`.
    pub async fn is_following(&self, viewer: &UserId, target: &UserId) -> Result<bool, TimelineError> {
        let value = self
            .store
            .read_once(&StorePath::user_following(viewer).child(target.as_str()))
            .await
            .map_err(TimelineError::from_store)?;
        Ok(value.is_some())
    }

    /// Follower and following counts for `user`.
    pub async fn relation_stats(&self, user: &UserId) -> Result<RelationStats, TimelineError> {
        let followers = self.count_children(&StorePath::user_followers(user)).await?;
        let following = self.count_children(&StorePath::user_following(user)).await?;
        Ok(RelationStats { followers, following })
    }

    /// Fill in the viewer-relative flags and counters of `user`.
    pub async fn hydrate(&self, user: &User, viewer: &UserId) -> Result<User, TimelineError> {
        let mut hydrated = user.clone();
        hydrated.is_current_user = &user.id == viewer;
        hydrated.is_followed = !hydrated.is_current_user && self.is_following(viewer, &user.id).await?;
        hydrated.stats = Some(self.relation_stats(&user.id).await?);
        Ok(hydrated)
    }

    async fn count_children(&self, path: &StorePath) -> Result<usize, TimelineError> {
        let value = self.store.read_once(path).await.map_err(TimelineError::from_store)?;
        Ok(match value {
            Some(Value::Object(children)) => children.len(),
            _ => 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGraphStore;
    use crate::types::UserRecord;

    fn ids() -> (UserId, UserId, UserId) {
        (UserId::new("ada"), UserId::new("bob"), UserId::new("cy"))
    }

    #[tokio::test]
    async fn test_follow_writes_both_edges() {
        let store = Arc::new(InMemoryGraphStore::new());
        let graph = RelationGraph::new(Arc::clone(&store));
        let (ada, bob, _) = ids();

        graph.follow(&ada, &bob).await.unwrap();

        assert!(graph.is_following(&ada, &bob).await.unwrap());
        assert!(!graph.is_following(&bob, &ada).await.unwrap());
        assert!(store.get(&StorePath::parse("userFollowers/bob/ada")).is_some());
    }

    #[tokio::test]
    async fn test_unfollow_only_removes_one_edge() {
        let store = Arc::new(InMemoryGraphStore::new());
        let graph = RelationGraph::new(Arc::clone(&store));
        let (ada, bob, cy) = ids();

        graph.follow(&ada, &bob).await.unwrap();
        graph.follow(&ada, &cy).await.unwrap();
        graph.unfollow(&ada, &bob).await.unwrap();

        assert!(!graph.is_following(&ada, &bob).await.unwrap());
        assert!(graph.is_following(&ada, &cy).await.unwrap());
        assert_eq!(graph.relation_stats(&ada).await.unwrap().following, 1);
    }

    #[tokio::test]
    async fn test_relation_stats() {
        let store = Arc::new(InMemoryGraphStore::new());
        let graph = RelationGraph::new(store);
        let (ada, bob, cy) = ids();

        graph.follow(&bob, &ada).await.unwrap();
        graph.follow(&cy, &ada).await.unwrap();
        graph.follow(&ada, &cy).await.unwrap();

        let stats = graph.relation_stats(&ada).await.unwrap();
        assert_eq!(stats, RelationStats { followers: 2, following: 1 });
        assert_eq!(graph.relation_stats(&UserId::new("nobody")).await.unwrap(), RelationStats::default());
    }

    #[tokio::test]
    async fn test_self_follow_rejected() {
        let graph = RelationGraph::new(Arc::new(InMemoryGraphStore::new()));
        let (ada, _, _) = ids();
        assert_eq!(graph.follow(&ada, &ada).await, Err(TimelineError::SelfRelation(ada)));
    }

    #[tokio::test]
    async fn test_hydrate_sets_viewer_flags() {
        let graph = RelationGraph::new(Arc::new(InMemoryGraphStore::new()));
        let (ada, bob, _) = ids();
        graph.follow(&ada, &bob).await.unwrap();
        let user = User::from_record(bob.clone(), UserRecord::new("bob", "Bob"), None);

        let seen_by_ada = graph.hydrate(&user, &ada).await.unwrap();
        assert!(seen_by_ada.is_followed);
        assert!(!seen_by_ada.is_current_user);
        assert_eq!(seen_by_ada.stats.unwrap().followers, 1);

        let seen_by_self = graph.hydrate(&user, &bob).await.unwrap();
        assert!(seen_by_self.is_current_user);
        assert!(!seen_by_self.is_followed);
    }
}
