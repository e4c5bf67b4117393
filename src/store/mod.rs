//! Graph store contract and the bundled in-memory backend.

pub mod memory;
pub mod path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

pub use memory::{InMemoryError, InMemoryGraphStore};
pub use path::StorePath;

/// One child-added delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEvent {
    /// Key of the child under the subscribed path.
    pub key: String,
    /// Current value of the child.
    pub value: Value,
}

/// Unbounded stream of child-added events. Dropping it unsubscribes.
pub type ChildStream = BoxStream<'static, ChildEvent>;

/// Trait for graph store backends.
///
/// The store is a tree of JSON values addressed by [`StorePath`]. Child
/// subscriptions are at-least-once: every existing child is replayed on
/// subscribe, then each newly added child is delivered. Nothing is ordered
/// across paths and nothing is transactional across writes.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Subscribe to children added under `path`.
    async fn subscribe_children(&self, path: &StorePath) -> Result<ChildStream, Self::Error>;

    /// Read the current value at `path`, `None` when absent.
    async fn read_once(&self, path: &StorePath) -> Result<Option<Value>, Self::Error>;

    /// Set the value at `path`, creating intermediate nodes.
    async fn write(&self, path: &StorePath, value: Value) -> Result<(), Self::Error>;

    /// Remove the value at `path`.
    async fn delete(&self, path: &StorePath) -> Result<(), Self::Error>;
}
