//! Fan-out/fan-in feed aggregation.
//!
//! A feed request becomes a set of branches, each a child subscription on
//! one store path. Branch tasks resolve every child into a [`Post`] and
//! send it to a single fold task that owns the request's [`PostSet`]. The
//! fold task is the only writer: it drops duplicate ids and publishes a
//! fresh snapshot after every successful insert.
//!
//! ```text
//! userFollowing/{viewer} ──► PostIndex(userPosts/{followed}) ─┐
//! PostIndex(userPosts/{viewer}) ──────────────────────────────┼─► fold ─► ObservableValue<FeedSnapshot>
//!                                        (resolve per child) ─┘
//! ```
//!
//! Subscriptions never complete, so there is no final snapshot; every
//! published snapshot is the best state so far.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};
use uuid::Uuid;

use crate::error::TimelineError;
use crate::observable::{ObservableValue, SubscriptionId};
use crate::resolver::EntityResolver;
use crate::store::{ChildEvent, GraphStore, StorePath};
use crate::types::{FeedSnapshot, Post, PostId, PostSet, UserId};

/// Shape of a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRequest {
    /// The viewer's own posts plus the posts of everyone they follow.
    HomeTimeline {
        /// Whose timeline.
        viewer: UserId,
    },
    /// One user's posts.
    UserPosts {
        /// Whose posts.
        user: UserId,
    },
    /// Posts a user liked, each flagged `did_liked`.
    UserLikes {
        /// Whose likes.
        user: UserId,
    },
    /// Replies and reposts a user authored.
    UserReplies {
        /// Whose replies.
        user: UserId,
    },
}

impl FeedRequest {
    /// Branches the request starts with.
    pub fn branches(&self) -> Vec<BranchSpec> {
        match self {
            Self::HomeTimeline { viewer } => vec![
                BranchSpec::FollowingFanOut(StorePath::user_following(viewer)),
                BranchSpec::PostIndex(StorePath::user_posts(viewer)),
            ],
            Self::UserPosts { user } => vec![BranchSpec::PostIndex(StorePath::user_posts(user))],
            Self::UserLikes { user } => vec![BranchSpec::LikedIndex(StorePath::user_likes(user))],
            Self::UserReplies { user } => vec![BranchSpec::ReplyIndex(StorePath::user_replies(user))],
        }
    }

    /// Viewer that resolved users are relative to.
    pub fn viewer(&self) -> Option<&UserId> {
        match self {
            Self::HomeTimeline { viewer } => Some(viewer),
            _ => None,
        }
    }
}

/// One child subscription and how its children become posts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BranchSpec {
    /// Child keys are post ids resolved through `posts/{id}`.
    PostIndex(StorePath),
    /// Like `PostIndex`, with each post flagged as liked.
    LikedIndex(StorePath),
    /// Children are post records themselves.
    InlineRecords(StorePath),
    /// Child key is a root post id, value is a reply key under `postReplies/{root}`.
    ReplyIndex(StorePath),
    /// Child keys are user ids; each opens a `PostIndex` on `userPosts/{id}`.
    FollowingFanOut(StorePath),
    /// Children are user records, folded by the user directory.
    UserRecords(StorePath),
}

impl BranchSpec {
    /// Subscribed path.
    pub fn path(&self) -> &StorePath {
        match self {
            Self::PostIndex(path)
            | Self::LikedIndex(path)
            | Self::InlineRecords(path)
            | Self::ReplyIndex(path)
            | Self::FollowingFanOut(path)
            | Self::UserRecords(path) => path,
        }
    }
}

/// Cancellation state shared by a handle and its tasks.
#[derive(Default)]
pub(crate) struct SessionControl {
    tasks: Mutex<TaskRegistry>,
}

#[derive(Default)]
struct TaskRegistry {
    cancelled: bool,
    handles: Vec<AbortHandle>,
    opened: HashSet<BranchSpec>,
}

impl SessionControl {
    pub(crate) fn track(&self, handle: AbortHandle) {
        let mut tasks = self.tasks.lock();
        if tasks.cancelled {
            handle.abort();
        } else {
            tasks.handles.push(handle);
        }
    }

    /// Claim a branch. `false` when already opened or cancelled.
    pub(crate) fn claim(&self, spec: &BranchSpec) -> bool {
        let mut tasks = self.tasks.lock();
        !tasks.cancelled && tasks.opened.insert(spec.clone())
    }

    fn cancel(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.cancelled = true;
        let handles = std::mem::take(&mut tasks.handles);
        for handle in &handles {
            handle.abort();
        }
        handles.len()
    }

    fn is_cancelled(&self) -> bool {
        self.tasks.lock().cancelled
    }

    fn branch_count(&self) -> usize {
        self.tasks.lock().opened.len()
    }
}

/// Live aggregation owned by the caller.
///
/// Dropping the handle cancels the aggregation.
pub struct AggregationHandle<T: Clone + Send + Sync + 'static> {
    snapshots: ObservableValue<T>,
    errors: ObservableValue<TimelineError>,
    control: Arc<SessionControl>,
    request_id: Uuid,
}

/// Handle to a feed aggregation.
pub type FeedHandle = AggregationHandle<FeedSnapshot>;

impl<T: Clone + Send + Sync + 'static> AggregationHandle<T> {
    /// Wire a handle to observables that the caller's tasks publish on.
    pub(crate) fn new(
        snapshots: ObservableValue<T>,
        errors: ObservableValue<TimelineError>,
        control: Arc<SessionControl>,
        request_id: Uuid,
    ) -> Self {
        Self { snapshots, errors, control, request_id }
    }

    /// Identifier used in log spans.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Snapshot observable.
    pub fn snapshots(&self) -> &ObservableValue<T> {
        &self.snapshots
    }

    /// Most recent branch failure; use `updates()` on it to see every one.
    pub fn errors(&self) -> &ObservableValue<TimelineError> {
        &self.errors
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> Option<T> {
        self.snapshots.get()
    }

    /// Observe snapshots, starting with the latest one.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.snapshots.subscribe(callback)
    }

    /// Receive snapshots on an async channel that closes on cancel.
    pub fn updates(&self) -> mpsc::UnboundedReceiver<T> {
        self.snapshots.updates()
    }

    /// Number of branches opened so far, including fanned-out ones.
    pub fn branch_count(&self) -> usize {
        self.control.branch_count()
    }

    /// Stop the aggregation.
    ///
    /// No snapshot is published after this returns. Branch subscriptions are
    /// dropped; resolutions already in flight finish but their posts are discarded.
    pub fn cancel(&self) {
        if self.control.is_cancelled() {
            return;
        }
        self.snapshots.close();
        self.errors.close();
        let aborted = self.control.cancel();
        debug!(request_id = %self.request_id, aborted, "aggregation cancelled");
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for AggregationHandle<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Sending half of one aggregation, cloned into every branch task.
pub(crate) struct FoldSession<S: GraphStore> {
    resolver: EntityResolver<S>,
    posts: mpsc::UnboundedSender<Post>,
    errors: ObservableValue<TimelineError>,
    control: Arc<SessionControl>,
    span: Span,
}

impl<S: GraphStore> Clone for FoldSession<S> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            posts: self.posts.clone(),
            errors: self.errors.clone(),
            control: Arc::clone(&self.control),
            span: self.span.clone(),
        }
    }
}

impl<S: GraphStore + 'static> FoldSession<S> {
    /// Start the fold task and return the session plus the caller's handle.
    ///
    /// `build` turns the accumulated set into the published snapshot type.
    /// Must be called inside a Tokio runtime.
    pub(crate) fn start<T, F>(resolver: EntityResolver<S>, kind: &'static str, build: F) -> (Self, AggregationHandle<T>)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&PostSet, u64) -> T + Send + 'static,
    {
        let request_id = Uuid::new_v4();
        let span = info_span!("aggregation", kind, request_id = %request_id);
        let (tx, mut rx) = mpsc::unbounded_channel::<Post>();
        let snapshots = ObservableValue::new();
        let errors = ObservableValue::new();
        let control = Arc::new(SessionControl::default());

        let published = snapshots.clone();
        let fold = tokio::spawn(
            async move {
                let mut set = PostSet::new();
                let mut generation = 0u64;
                while let Some(post) = rx.recv().await {
                    let post_id = post.id.clone();
                    if !set.insert(post) {
                        trace!(post_id = %post_id, "duplicate delivery ignored");
                        continue;
                    }
                    generation += 1;
                    if !published.set(build(&set, generation)) {
                        break;
                    }
                    debug!(post_id = %post_id, generation, size = set.len(), "snapshot published");
                }
            }
            .instrument(span.clone()),
        );
        control.track(fold.abort_handle());

        let session = Self { resolver, posts: tx, errors: errors.clone(), control: Arc::clone(&control), span };
        let handle = AggregationHandle::new(snapshots, errors, control, request_id);
        (session, handle)
    }

    /// Spawn a branch unless it is already open or the aggregation is cancelled.
    pub(crate) fn open_branch(&self, spec: BranchSpec) {
        if !self.control.claim(&spec) {
            return;
        }
        let _enter = self.span.enter();
        debug!(path = %spec.path(), "branch opened");
        let task = tokio::spawn(self.clone().run_branch(spec).instrument(self.span.clone()));
        self.control.track(task.abort_handle());
    }

    fn run_branch(self, spec: BranchSpec) -> BoxFuture<'static, ()> {
        async move {
            let path = spec.path().clone();
            let mut children = match self.resolver.store().subscribe_children(&path).await {
                Ok(children) => children,
                Err(e) => {
                    let err = TimelineError::from_store(e);
                    warn!(path = %path, error = %err, "branch subscription failed");
                    self.errors.set(err);
                    return;
                }
            };

            while let Some(event) = children.next().await {
                if let BranchSpec::FollowingFanOut(_) = spec {
                    let followed = UserId::new(event.key);
                    self.open_branch(BranchSpec::PostIndex(StorePath::user_posts(&followed)));
                    continue;
                }

                match self.resolve(&spec, event).await {
                    Ok(post) => {
                        if self.posts.send(post).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.is_store_failure() => {
                        warn!(path = %path, error = %err, "branch stopped");
                        self.errors.set(err);
                        break;
                    }
                    Err(err) => {
                        warn!(path = %path, error = %err, "post dropped from feed");
                    }
                }
            }
        }
        .boxed()
    }

    async fn resolve(&self, spec: &BranchSpec, event: ChildEvent) -> Result<Post, TimelineError> {
        match spec {
            BranchSpec::PostIndex(_) => self.resolver.fetch_post(&PostId::new(event.key)).await,
            BranchSpec::LikedIndex(_) => {
                let mut post = self.resolver.fetch_post(&PostId::new(event.key)).await?;
                post.did_liked = true;
                Ok(post)
            }
            BranchSpec::InlineRecords(path) => {
                let post_id = PostId::new(event.key);
                let record_path = path.child(post_id.as_str());
                self.resolver.resolve_post(&event.value, &post_id, &record_path).await
            }
            BranchSpec::ReplyIndex(_) => {
                let root = PostId::new(event.key);
                let reply = match event.value.as_str() {
                    Some(reply) => PostId::new(reply),
                    None => {
                        return Err(TimelineError::MalformedRecord {
                            path: spec.path().child(root.as_str()).to_string(),
                            reason: "expected a reply key".to_string(),
                        });
                    }
                };
                let record_path = StorePath::post_replies(&root).child(reply.as_str());
                let raw = self
                    .resolver
                    .store()
                    .read_once(&record_path)
                    .await
                    .map_err(TimelineError::from_store)?
                    .ok_or_else(|| TimelineError::PostNotFound(reply.clone()))?;
                self.resolver.resolve_post(&raw, &reply, &record_path).await
            }
            BranchSpec::FollowingFanOut(path) | BranchSpec::UserRecords(path) => {
                Err(TimelineError::MalformedRecord {
                    path: path.to_string(),
                    reason: "branch does not resolve posts".to_string(),
                })
            }
        }
    }
}

/// Builds feeds by fanning out child subscriptions and folding the results.
pub struct FanOutAggregator<S: GraphStore> {
    store: Arc<S>,
    viewer: Option<UserId>,
}

impl<S: GraphStore + 'static> FanOutAggregator<S> {
    /// Create an aggregator over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store, viewer: None }
    }

    /// Resolve users relative to `viewer`.
    pub fn with_viewer(mut self, viewer: UserId) -> Self {
        self.viewer = Some(viewer);
        self
    }

    /// Open a feed. Must be called inside a Tokio runtime.
    ///
    /// Late follows open new branches as they arrive. Unfollows are not
    /// observed: posts already folded from an unfollowed user stay in
    /// later snapshots of the same handle.
    pub fn open(&self, request: FeedRequest) -> FeedHandle {
        let viewer = self.viewer.clone().or_else(|| request.viewer().cloned());
        info!(request = ?request, "opening feed");
        self.open_branches(viewer, request.branches())
    }

    /// Open a feed over explicit branches.
    pub fn open_branches(&self, viewer: Option<UserId>, branches: Vec<BranchSpec>) -> FeedHandle {
        let resolver = match viewer {
            Some(viewer) => EntityResolver::for_viewer(Arc::clone(&self.store), viewer),
            None => EntityResolver::new(Arc::clone(&self.store)),
        };
        let (session, handle) = FoldSession::start(resolver, "feed", FeedSnapshot::from_set);
        for spec in branches {
            session.open_branch(spec);
        }
        handle
    }
}
