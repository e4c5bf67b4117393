//! Error types for the timeline engine.

use crate::types::{PostId, UserId};

/// Error type for resolution, aggregation and mutation operations.
///
/// Store failures are carried as strings so the error stays `Clone`
/// and can be published on an [`ObservableValue`](crate::ObservableValue).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    /// Post record has no `uid` field.
    #[error("Post {post_id} has no author reference")]
    MissingAuthorReference {
        /// The post whose record lacks an author.
        post_id: PostId,
    },
    /// Author id has no user record.
    #[error("Author {author_id} of post {post_id} not found")]
    AuthorNotFound {
        /// The post being resolved.
        post_id: PostId,
        /// The dangling author id.
        author_id: UserId,
    },
    /// Record exists but does not match the expected schema.
    #[error("Malformed record at {path}: {reason}")]
    MalformedRecord {
        /// Store path of the record.
        path: String,
        /// Decoder message.
        reason: String,
    },
    /// Post record not found.
    #[error("Post not found: {0}")]
    PostNotFound(PostId),
    /// User record not found.
    #[error("User not found: {0}")]
    UserNotFound(String),
    /// Underlying read, write or subscribe failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    /// The like relation and its reverse index disagree.
    #[error("Like index inconsistent for user {user_id} and post {post_id}")]
    IndexInconsistency {
        /// Viewer side of the relation.
        user_id: UserId,
        /// Post side of the relation.
        post_id: PostId,
    },
    /// Daily posting quota already reached.
    #[error("Daily quota of {quota} posts reached")]
    QuotaExceeded {
        /// Configured quota.
        quota: usize,
    },
    /// Post text is empty after trimming.
    #[error("Post text is empty")]
    EmptyText,
    /// Post text exceeds the configured limit.
    #[error("Post text has {len} characters, limit is {max}")]
    TextTooLong {
        /// Character count of the rejected text.
        len: usize,
        /// Configured limit.
        max: usize,
    },
    /// Handle is malformed, too long or already taken.
    #[error("Handle rejected: {0}")]
    InvalidHandle(String),
    /// A user tried to follow or unfollow themselves.
    #[error("User {0} cannot relate to themselves")]
    SelfRelation(UserId),
}

impl TimelineError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::StoreUnavailable(e.to_string())
    }

    /// Whether this error comes from the store rather than from record content.
    ///
    /// Aggregation branches stop on store errors and skip the post otherwise.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
