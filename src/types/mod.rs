//! Core types for the timeline engine.

pub mod ids;
pub mod user;
pub mod post;
pub mod snapshot;

pub use ids::{PostId, UserId};
pub use user::{User, UserRecord, RelationStats};
pub use post::{Post, PostKind, PostRecord};
pub use snapshot::{PostSet, FeedSnapshot, ReplyThread, UserDirectory};
