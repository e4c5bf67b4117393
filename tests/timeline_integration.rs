//! Integration tests for live timeline aggregation.
//!
//! These drive feeds, threads and mutations end to end over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use timeline_kernel::{
    Compose, FanOutAggregator, FeedHandle, FeedRequest, FeedSnapshot, InMemoryGraphStore, LikeStateReconciler,
    PostComposer, PostId, RelationGraph, ReplyThreadAssembler, StorePath, TimelineConfig, TimelineError,
    UserDirectoryAssembler, UserId, UserRecord,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(5);

fn uid(s: &str) -> UserId {
    UserId::new(s)
}

fn seed_user(store: &InMemoryGraphStore, id: &str) {
    store
        .put(&StorePath::user(&uid(id)), json!({ "username": id, "fullname": id.to_uppercase() }))
        .unwrap();
}

fn seed_post(store: &InMemoryGraphStore, author: &str, post: &str, ts: i64) {
    store
        .put(
            &StorePath::post(&PostId::new(post)),
            json!({ "uid": author, "text": format!("{post} by {author}"), "timestamp": ts }),
        )
        .unwrap();
    store.put(&StorePath::user_posts(&uid(author)).child(post), json!(1)).unwrap();
}

fn seed_follow(store: &InMemoryGraphStore, viewer: &str, target: &str) {
    store.put(&StorePath::user_following(&uid(viewer)).child(target), json!(1)).unwrap();
    store.put(&StorePath::user_followers(&uid(target)).child(viewer), json!(1)).unwrap();
}

async fn wait_for(handle: &FeedHandle, len: usize) -> FeedSnapshot {
    let mut updates = handle.updates();
    tokio::time::timeout(WAIT, async {
        loop {
            let snapshot = updates.recv().await.expect("feed closed");
            if snapshot.len() >= len {
                return snapshot;
            }
        }
    })
    .await
    .expect("feed did not converge")
}

fn assert_sorted(snapshot: &FeedSnapshot) {
    for pair in snapshot.posts().windows(2) {
        assert!(pair[0].created_at >= pair[1].created_at, "snapshot out of order");
    }
}

fn home(store: &Arc<InMemoryGraphStore>, viewer: &str) -> FeedHandle {
    FanOutAggregator::new(Arc::clone(store)).open(FeedRequest::HomeTimeline { viewer: uid(viewer) })
}

// ─────────────────────────────────────────────────────────────────────────────
// Fan-out
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_home_timeline_contains_followed_and_own_posts() {
    let store = Arc::new(InMemoryGraphStore::new());
    seed_user(&store, "viewer");
    seed_post(&store, "viewer", "own_1", 1);
    seed_post(&store, "viewer", "own_2", 2);

    let mut ts = 10;
    for k in 0..3 {
        let author = format!("author_{k}");
        seed_user(&store, &author);
        seed_follow(&store, "viewer", &author);
        for m in 0..4 {
            seed_post(&store, &author, &format!("{author}_post_{m}"), ts);
            ts += 1;
        }
    }
    seed_user(&store, "stranger");
    seed_post(&store, "stranger", "not_followed", 999);

    let handle = home(&store, "viewer");
    let snapshot = wait_for(&handle, 14).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = handle.latest().unwrap_or(snapshot);

    assert_eq!(snapshot.len(), 14);
    assert!(!snapshot.contains(&PostId::new("not_followed")));
    assert_sorted(&snapshot);
    assert_eq!(snapshot.posts()[0].id, PostId::new("author_2_post_3"));
    // One fan-out branch, the own-posts branch, and one branch per followed user.
    assert_eq!(handle.branch_count(), 5);
}

#[tokio::test]
async fn test_late_follow_extends_open_timeline() {
    let store = Arc::new(InMemoryGraphStore::new());
    seed_user(&store, "viewer");
    seed_user(&store, "late");
    seed_post(&store, "viewer", "own", 1);
    seed_post(&store, "late", "late_1", 5);
    seed_post(&store, "late", "late_2", 6);

    let handle = home(&store, "viewer");
    wait_for(&handle, 1).await;

    RelationGraph::new(Arc::clone(&store)).follow(&uid("viewer"), &uid("late")).await.unwrap();

    let snapshot = wait_for(&handle, 3).await;
    assert_eq!(snapshot.ids(), vec![PostId::new("late_2"), PostId::new("late_1"), PostId::new("own")]);
}

#[tokio::test]
async fn test_unfollow_does_not_retract_folded_posts() {
    let store = Arc::new(InMemoryGraphStore::new());
    seed_user(&store, "viewer");
    seed_user(&store, "gone");
    seed_follow(&store, "viewer", "gone");
    seed_post(&store, "gone", "kept", 5);

    let handle = home(&store, "viewer");
    wait_for(&handle, 1).await;

    RelationGraph::new(Arc::clone(&store)).unfollow(&uid("viewer"), &uid("gone")).await.unwrap();
    seed_post(&store, "viewer", "after", 10);

    let snapshot = wait_for(&handle, 2).await;
    assert!(snapshot.contains(&PostId::new("kept")));
}

#[tokio::test]
async fn test_redelivery_never_duplicates() {
    let store = Arc::new(InMemoryGraphStore::new());
    seed_user(&store, "viewer");
    seed_user(&store, "friend");
    seed_follow(&store, "viewer", "friend");
    seed_post(&store, "friend", "p1", 1);
    seed_post(&store, "viewer", "p2", 2);

    let handle = home(&store, "viewer");
    wait_for(&handle, 2).await;

    for _ in 0..10 {
        store.redeliver(&StorePath::user_posts(&uid("friend")), "p1");
        store.redeliver(&StorePath::user_posts(&uid("viewer")), "p2");
        store.redeliver(&StorePath::user_following(&uid("viewer")), "friend");
    }
    seed_post(&store, "viewer", "p3", 3);

    let snapshot = wait_for(&handle, 3).await;
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot.generation(), 3);
    assert_eq!(handle.branch_count(), 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation and failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_snapshot_after_cancel_with_reads_in_flight() {
    let store = Arc::new(InMemoryGraphStore::new());
    seed_user(&store, "viewer");
    seed_post(&store, "viewer", "slow", 1);
    store.set_read_delay(Some(Duration::from_millis(100)));

    let handle = home(&store, "viewer");
    let mut updates = handle.updates();
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(handle.latest().is_none());
    assert!(updates.recv().await.is_none());
}

#[tokio::test]
async fn test_dropping_handle_releases_subscriptions() {
    let store = Arc::new(InMemoryGraphStore::new());
    seed_user(&store, "viewer");
    seed_post(&store, "viewer", "p1", 1);

    let handle = home(&store, "viewer");
    wait_for(&handle, 1).await;
    let own = StorePath::user_posts(&uid("viewer"));
    assert_eq!(store.subscriber_count(&own), 1);

    drop(handle);
    tokio::time::sleep(Duration::from_millis(20)).await;
    seed_post(&store, "viewer", "p2", 2);

    assert_eq!(store.subscriber_count(&own), 0);
    assert_eq!(store.subscriber_count(&StorePath::user_following(&uid("viewer"))), 0);
}

#[tokio::test]
async fn test_store_outage_surfaces_on_error_channel() {
    let store = Arc::new(InMemoryGraphStore::new());
    seed_user(&store, "viewer");
    seed_post(&store, "viewer", "p1", 1);

    let handle = FanOutAggregator::new(Arc::clone(&store)).open(FeedRequest::UserPosts { user: uid("viewer") });
    wait_for(&handle, 1).await;
    let mut errors = handle.errors().updates();

    store.set_unavailable(true);
    seed_post(&store, "viewer", "p2", 2);

    let err = tokio::time::timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(err, TimelineError::StoreUnavailable(_)));
    assert_eq!(handle.latest().unwrap().len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Mutations
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_published_reply_reaches_thread_and_reply_feed() {
    let store = Arc::new(InMemoryGraphStore::new());
    let composer = PostComposer::new(Arc::clone(&store), TimelineConfig::default());
    composer.register_user(&uid("ada"), UserRecord::new("ada", "Ada")).await.unwrap();
    composer.register_user(&uid("bob"), UserRecord::new("bob", "Bob")).await.unwrap();

    let feed = FanOutAggregator::new(Arc::clone(&store)).open(FeedRequest::UserPosts { user: uid("ada") });
    composer.publish(&uid("ada"), "root post", Compose::Post).await.unwrap();
    let root = wait_for(&feed, 1).await.posts()[0].clone();

    let assembler = ReplyThreadAssembler::new(Arc::clone(&store));
    let thread = assembler.open_thread(&root);
    let reply_feed = assembler.open_user_replies(&uid("bob"));

    let reply_id = composer.publish(&uid("bob"), "nice", Compose::Reply(&root)).await.unwrap();

    let mut updates = thread.updates();
    let snapshot = tokio::time::timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(snapshot.root_id(), &root.id);
    assert_eq!(snapshot.replies()[0].id, reply_id);
    assert_eq!(snapshot.replies()[0].replying_to.as_deref(), Some("ada"));

    let replies = wait_for(&reply_feed, 1).await;
    assert_eq!(replies.ids(), vec![reply_id]);
    assert!(replies.posts()[0].is_reply());
}

#[tokio::test]
async fn test_like_toggle_twice_is_identity() {
    let store = Arc::new(InMemoryGraphStore::new());
    seed_user(&store, "ada");
    seed_post(&store, "ada", "p1", 1);

    let feed = FanOutAggregator::new(Arc::clone(&store)).open(FeedRequest::UserPosts { user: uid("ada") });
    let post = wait_for(&feed, 1).await.posts()[0].clone();
    let likes = LikeStateReconciler::new(Arc::clone(&store));
    let viewer = uid("bob");

    let liked = likes.toggle_like(&post, &viewer).await.unwrap();
    let liked_feed = FanOutAggregator::new(Arc::clone(&store)).open(FeedRequest::UserLikes { user: viewer.clone() });
    let liked_snapshot = wait_for(&liked_feed, 1).await;
    assert!(liked_snapshot.posts()[0].did_liked);
    assert_eq!(liked_snapshot.posts()[0].likes, 1);

    let restored = likes.toggle_like(&liked, &viewer).await.unwrap();
    assert_eq!((restored.likes, restored.did_liked), (post.likes, post.did_liked));
    assert!(!likes.check_index(&post, &viewer).await.unwrap());
    assert_eq!(store.get(&StorePath::post_likes_counter(&post.id)), Some(json!(0)));
}

#[tokio::test]
async fn test_quota_from_fetched_feed() {
    let store = Arc::new(InMemoryGraphStore::new());
    let config = TimelineConfig { daily_post_quota: 2, ..TimelineConfig::default() };
    let composer = PostComposer::new(Arc::clone(&store), config);
    let author = uid("ada");
    composer.register_user(&author, UserRecord::new("ada", "Ada")).await.unwrap();

    let feed = FanOutAggregator::new(Arc::clone(&store)).open(FeedRequest::UserPosts { user: author.clone() });
    composer.publish(&author, "one", Compose::Post).await.unwrap();
    composer.publish(&author, "two", Compose::Post).await.unwrap();
    let posts = wait_for(&feed, 2).await;

    let result = composer.publish_within_quota(&author, "three", Compose::Post, posts.posts(), &[]).await;
    assert_eq!(result, Err(TimelineError::QuotaExceeded { quota: 2 }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_directory_tracks_registrations_and_freed_handles() {
    let store = Arc::new(InMemoryGraphStore::new());
    let composer = PostComposer::new(Arc::clone(&store), TimelineConfig::default());
    composer.register_user(&uid("u1"), UserRecord::new("ada", "Ada")).await.unwrap();

    let directory = UserDirectoryAssembler::new(Arc::clone(&store)).open();
    let mut updates = directory.updates();
    let first = tokio::time::timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(first.handles(), vec!["ada"]);

    composer.register_user(&uid("u1"), UserRecord::new("countess", "Ada")).await.unwrap();
    composer.register_user(&uid("u2"), UserRecord::new("ada", "Another Ada")).await.unwrap();

    let users = tokio::time::timeout(WAIT, async {
        loop {
            let users = updates.recv().await.expect("directory closed");
            if users.len() >= 2 {
                return users;
            }
        }
    })
    .await
    .expect("directory did not converge");

    // u1 folded once, with the record it had when first delivered.
    let ids: Vec<_> = users.users().iter().map(|u| u.id.clone()).collect();
    assert_eq!(ids, vec![uid("u1"), uid("u2")]);
    assert_eq!(users.handles(), vec!["ada", "ada"]);
    assert_eq!(store.get(&StorePath::user_handle("ada")), Some(json!("u2")));
    assert_eq!(store.get(&StorePath::user_handle("countess")), Some(json!("u1")));
}
