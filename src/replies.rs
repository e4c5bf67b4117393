//! Reply threads and per-user reply feeds.
//!
//! Replies are stored twice: the record under `postReplies/{root}/{reply}`
//! and an index entry `userReplies/{uid}/{root} = reply`. A thread reads
//! the first directly; a user's reply feed walks the second and reads each
//! record it points to.

use std::sync::Arc;

use tracing::info;

use crate::aggregator::{AggregationHandle, BranchSpec, FanOutAggregator, FeedHandle, FeedRequest, FoldSession};
use crate::resolver::EntityResolver;
use crate::store::{GraphStore, StorePath};
use crate::types::{Post, PostId, ReplyThread, UserId};

/// Handle to a reply thread aggregation.
pub type ThreadHandle = AggregationHandle<ReplyThread>;

/// Assembles reply threads with the same dedup and ordering rules as feeds.
pub struct ReplyThreadAssembler<S: GraphStore> {
    store: Arc<S>,
    viewer: Option<UserId>,
}

impl<S: GraphStore + 'static> ReplyThreadAssembler<S> {
    /// Create an assembler over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store, viewer: None }
    }

    /// Resolve users relative to `viewer`.
    pub fn with_viewer(mut self, viewer: UserId) -> Self {
        self.viewer = Some(viewer);
        self
    }

    /// Open the thread under `root`. Must be called inside a Tokio runtime.
    pub fn open_thread(&self, root: &Post) -> ThreadHandle {
        self.open_thread_by_id(root.id.clone())
    }

    /// Open the thread under a root post id.
    pub fn open_thread_by_id(&self, root_id: PostId) -> ThreadHandle {
        info!(root = %root_id, "opening reply thread");
        let path = StorePath::post_replies(&root_id);
        let (session, handle) = FoldSession::start(self.resolver(), "thread", move |set, generation| {
            ReplyThread::from_set(root_id.clone(), set, generation)
        });
        session.open_branch(BranchSpec::InlineRecords(path));
        handle
    }

    /// Open the feed of replies and reposts `user` authored.
    pub fn open_user_replies(&self, user: &UserId) -> FeedHandle {
        let aggregator = FanOutAggregator::new(Arc::clone(&self.store));
        let aggregator = match &self.viewer {
            Some(viewer) => aggregator.with_viewer(viewer.clone()),
            None => aggregator,
        };
        aggregator.open(FeedRequest::UserReplies { user: user.clone() })
    }

    fn resolver(&self) -> EntityResolver<S> {
        match &self.viewer {
            Some(viewer) => EntityResolver::for_viewer(Arc::clone(&self.store), viewer.clone()),
            None => EntityResolver::new(Arc::clone(&self.store)),
        }
    }
}
