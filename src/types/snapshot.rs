//! Accumulated post sets and the immutable snapshots published from them.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::ids::PostId;
use super::post::Post;
use super::user::User;
use crate::canonical::canonical_hash_hex;

/// Feed ordering key: newest first, then by id for ties.
type FeedKey = (Reverse<DateTime<Utc>>, PostId);

/// Running set of posts for one aggregation request.
///
/// Keyed by post identity: inserting an id that is already present is a
/// no-op, whatever the record looks like the second time.
#[derive(Debug, Clone, Default)]
pub struct PostSet {
    ids: HashSet<PostId>,
    ordered: BTreeMap<FeedKey, Post>,
}

impl PostSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a post in. Returns `false` when the id was already present.
    pub fn insert(&mut self, post: Post) -> bool {
        if !self.ids.insert(post.id.clone()) {
            return false;
        }
        self.ordered.insert((Reverse(post.created_at), post.id.clone()), post);
        true
    }

    /// Whether a post id has been folded in.
    pub fn contains(&self, id: &PostId) -> bool {
        self.ids.contains(id)
    }

    /// Number of distinct posts.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing has been folded in yet.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Materialize the posts in feed order.
    pub fn to_sorted(&self) -> Arc<[Post]> {
        self.ordered.values().cloned().collect()
    }
}

/// Immutable point-in-time view of a feed.
///
/// Posts are ordered by descending creation time. A snapshot is never the
/// final answer: subscriptions are unbounded and a later snapshot may hold
/// more posts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    posts: Arc<[Post]>,
    generation: u64,
}

impl FeedSnapshot {
    /// Build a snapshot from an accumulated set.
    pub fn from_set(set: &PostSet, generation: u64) -> Self {
        Self { posts: set.to_sorted(), generation }
    }

    /// Posts in feed order.
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    /// Number of folds published before and including this one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of posts.
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    /// Whether the snapshot holds no posts.
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Whether the snapshot holds a post.
    pub fn contains(&self, id: &PostId) -> bool {
        self.posts.iter().any(|p| &p.id == id)
    }

    /// Post ids in feed order.
    pub fn ids(&self) -> Vec<PostId> {
        self.posts.iter().map(|p| p.id.clone()).collect()
    }

    /// Content fingerprint over ids, counters and like flags.
    ///
    /// Equal fingerprints mean an observer has nothing new to render.
    pub fn fingerprint(&self) -> String {
        fingerprint_posts(&self.posts)
    }
}

/// Root post plus its replies, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyThread {
    root_id: PostId,
    replies: Arc<[Post]>,
    generation: u64,
}

impl ReplyThread {
    /// Build a thread snapshot from an accumulated set.
    pub fn from_set(root_id: PostId, set: &PostSet, generation: u64) -> Self {
        Self { root_id, replies: set.to_sorted(), generation }
    }

    /// Identity of the root post.
    pub fn root_id(&self) -> &PostId {
        &self.root_id
    }

    /// Replies in feed order.
    pub fn replies(&self) -> &[Post] {
        &self.replies
    }

    /// Number of folds published before and including this one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of replies.
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    /// Whether there are no replies yet.
    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// Content fingerprint, see [`FeedSnapshot::fingerprint`].
    pub fn fingerprint(&self) -> String {
        fingerprint_posts(&self.replies)
    }
}

/// Every registered user seen so far, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDirectory {
    users: Arc<[User]>,
    generation: u64,
}

impl UserDirectory {
    /// Build a directory snapshot from users in arrival order.
    pub fn new(users: Arc<[User]>, generation: u64) -> Self {
        Self { users, generation }
    }

    /// Users in arrival order.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Number of folds published before and including this one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no user has arrived yet.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Handles in directory order.
    pub fn handles(&self) -> Vec<&str> {
        self.users.iter().map(|u| u.handle.as_str()).collect()
    }

    /// Content fingerprint over ids and handles.
    pub fn fingerprint(&self) -> String {
        let rows: Vec<(&str, &str)> = self.users.iter().map(|u| (u.id.as_str(), u.handle.as_str())).collect();
        canonical_hash_hex(&rows)
    }
}

fn fingerprint_posts(posts: &[Post]) -> String {
    let rows: Vec<(&str, u64, u64, bool)> = posts
        .iter()
        .map(|p| (p.id.as_str(), p.likes, p.reposts, p.did_liked))
        .collect();
    canonical_hash_hex(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PostKind, User, UserId, UserRecord};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn make_post(id: &str, ts: i64) -> Post {
        Post {
            id: PostId::new(id),
            author: User::from_record(UserId::new("u1"), UserRecord::new("ada", "Ada"), None),
            text: format!("post {id}"),
            created_at: Utc.timestamp_opt(ts, 0).unwrap(),
            likes: 0,
            reposts: 0,
            replying_to: None,
            kind: PostKind::Original,
            did_liked: false,
        }
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut set = PostSet::new();
        assert!(set.insert(make_post("p1", 10)));

        let mut changed = make_post("p1", 99);
        changed.likes = 7;
        assert!(!set.insert(changed));

        assert_eq!(set.len(), 1);
        let sorted = set.to_sorted();
        assert_eq!(sorted[0].likes, 0);
        assert_eq!(sorted[0].created_at.timestamp(), 10);
    }

    #[test]
    fn test_sorted_newest_first_with_id_tiebreak() {
        let mut set = PostSet::new();
        set.insert(make_post("b", 5));
        set.insert(make_post("c", 20));
        set.insert(make_post("a", 5));

        let snapshot = FeedSnapshot::from_set(&set, 3);
        let ids: Vec<_> = snapshot.ids().into_iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(snapshot.generation(), 3);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let mut set = PostSet::new();
        set.insert(make_post("p1", 1));
        let a = FeedSnapshot::from_set(&set, 1);
        let b = FeedSnapshot::from_set(&set, 2);
        assert_eq!(a.fingerprint(), b.fingerprint());

        set.insert(make_post("p2", 2));
        let c = FeedSnapshot::from_set(&set, 3);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_reply_thread_keeps_root() {
        let mut set = PostSet::new();
        set.insert(make_post("r1", 3));
        let thread = ReplyThread::from_set(PostId::new("root"), &set, 1);
        assert_eq!(thread.root_id().as_str(), "root");
        assert_eq!(thread.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_each_id_appears_once(deliveries in prop::collection::vec((0u8..16, 0i64..1_000), 0..200)) {
            let mut set = PostSet::new();
            for (id, ts) in &deliveries {
                set.insert(make_post(&format!("p{id}"), *ts));
            }
            let posts = set.to_sorted();
            let distinct: HashSet<_> = deliveries.iter().map(|(id, _)| *id).collect();
            prop_assert_eq!(posts.len(), distinct.len());
            let ids: HashSet<_> = posts.iter().map(|p| p.id.clone()).collect();
            prop_assert_eq!(ids.len(), posts.len());
        }

        #[test]
        fn prop_newer_posts_precede_older(timestamps in prop::collection::vec(0i64..1_000_000, 0..100)) {
            let mut set = PostSet::new();
            for (i, ts) in timestamps.iter().enumerate() {
                set.insert(make_post(&format!("p{i}"), *ts));
            }
            let posts = set.to_sorted();
            for pair in posts.windows(2) {
                prop_assert!(pair[0].created_at >= pair[1].created_at);
            }
        }
    }
}
