//! # timeline-kernel
//!
//! Live social timelines assembled from a child-subscription graph store.
//!
//! The kernel answers one question:
//!
//! > Given a viewer, which posts belong in their feed right now, and in what order?
//!
//! ## Core Contract
//!
//! 1. A feed request fans out into one child subscription per index path
//! 2. Every delivered child is resolved into a hydrated [`Post`]
//! 3. A single fold task deduplicates by post id and publishes an ordered [`FeedSnapshot`]
//!
//! ## Architecture
//!
//! ```text
//! FeedRequest → BranchSpec* → EntityResolver → fold (PostSet) → ObservableValue<FeedSnapshot>
//!                   ↓
//!              GraphStore (in-memory or any child-subscription backend)
//! ```
//!
//! ## Ordering Guarantees
//!
//! - Every snapshot is sorted newest first, ties broken by post id
//! - A post id appears at most once per snapshot, whatever the redelivery count
//! - No snapshot is published after [`AggregationHandle::cancel`] returns
//!
//! Writes ([`LikeStateReconciler`], [`RelationGraph`], [`PostComposer`])
//! are sequenced multi-path updates without transactions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod store;
pub mod canonical;
pub mod config;
pub mod error;
pub mod observable;
pub mod resolver;
pub mod aggregator;
pub mod replies;
pub mod directory;
pub mod likes;
pub mod rate_limit;
pub mod relations;
pub mod composer;

// Re-exports
pub use types::{PostId, UserId, User, UserRecord, RelationStats, Post, PostKind, PostRecord};
pub use types::{PostSet, FeedSnapshot, ReplyThread, UserDirectory};
pub use store::{GraphStore, ChildEvent, ChildStream, InMemoryGraphStore, InMemoryError, StorePath};
pub use canonical::{to_canonical_bytes, canonical_hash, canonical_hash_hex};
pub use config::TimelineConfig;
pub use error::TimelineError;
pub use observable::{ObservableValue, SubscriptionId};
pub use resolver::EntityResolver;
pub use aggregator::{AggregationHandle, BranchSpec, FanOutAggregator, FeedHandle, FeedRequest};
pub use replies::{ReplyThreadAssembler, ThreadHandle};
pub use directory::{DirectoryHandle, UserDirectoryAssembler};
pub use likes::{IndexRepair, LikeStateReconciler};
pub use rate_limit::{RateLimiter, RateWindow};
pub use relations::RelationGraph;
pub use composer::{Compose, PostComposer};

/// Version of the stored record layout under `posts/`, `users/` and the index paths.
pub const STORE_SCHEMA_VERSION: &str = "1.0.0";
