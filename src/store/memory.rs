//! In-memory graph store for tests and the demo binary.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{ChildEvent, ChildStream, GraphStore, StorePath};

/// Error type for in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// Store switched offline with [`InMemoryGraphStore::set_unavailable`].
    #[error("Store unavailable while accessing {0}")]
    Unavailable(String),
    /// Write rejected by a configured fault.
    #[error("Write rejected at {0}")]
    WriteRejected(String),
    /// Empty path.
    #[error("Invalid path: {0:?}")]
    InvalidPath(String),
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    failing_prefixes: Vec<StorePath>,
    read_delay: Option<Duration>,
}

#[derive(Debug)]
struct Inner {
    root: Value,
    subscribers: HashMap<StorePath, Vec<UnboundedSender<ChildEvent>>>,
    faults: Faults,
}

/// In-memory graph store.
///
/// Values live in one JSON tree whose maps iterate in key order, so replays
/// are deterministic. Writing a value under a path that did not exist yet
/// fires child-added on every ancestor that gained a new child. Deletes
/// fire nothing and prune ancestors left empty.
///
/// Faults can be injected to exercise failure handling: the whole store can
/// be made unavailable, writes under a prefix can be rejected, and reads
/// can be delayed.
#[derive(Debug)]
pub struct InMemoryGraphStore {
    inner: Mutex<Inner>,
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGraphStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                root: Value::Object(Map::new()),
                subscribers: HashMap::new(),
                faults: Faults::default(),
            }),
        }
    }

    /// Seed a value synchronously, firing child-added like a write.
    pub fn put(&self, path: &StorePath, value: Value) -> Result<(), InMemoryError> {
        let mut inner = self.inner.lock();
        inner.apply_write(path, value)
    }

    /// Read a value synchronously.
    pub fn get(&self, path: &StorePath) -> Option<Value> {
        let inner = self.inner.lock();
        node_at(&inner.root, path.segments()).cloned()
    }

    /// Deliver an existing child again to current subscribers of `parent`.
    ///
    /// Simulates the duplicate deliveries an at-least-once backend may make.
    /// Returns `false` when the child does not exist.
    pub fn redeliver(&self, parent: &StorePath, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(value) = node_at(&inner.root, parent.child(key).segments()).cloned() else {
            return false;
        };
        inner.notify(parent, ChildEvent { key: key.to_string(), value });
        true
    }

    /// Number of live subscriptions on `path`.
    pub fn subscriber_count(&self, path: &StorePath) -> usize {
        let mut inner = self.inner.lock();
        match inner.subscribers.get_mut(path) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    /// Make every operation fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().faults.unavailable = unavailable;
    }

    /// Reject writes and deletes at or below `prefix`.
    pub fn fail_writes_under(&self, prefix: StorePath) {
        self.inner.lock().faults.failing_prefixes.push(prefix);
    }

    /// Clear write faults.
    pub fn clear_write_faults(&self) {
        self.inner.lock().faults.failing_prefixes.clear();
    }

    /// Delay every `read_once` by `delay`.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.inner.lock().faults.read_delay = delay;
    }

    fn check_write(&self, path: &StorePath) -> Result<(), InMemoryError> {
        let inner = self.inner.lock();
        if inner.faults.unavailable {
            return Err(InMemoryError::Unavailable(path.to_string()));
        }
        if inner.faults.failing_prefixes.iter().any(|p| path.starts_with(p)) {
            return Err(InMemoryError::WriteRejected(path.to_string()));
        }
        Ok(())
    }
}

impl Inner {
    fn apply_write(&mut self, path: &StorePath, value: Value) -> Result<(), InMemoryError> {
        let segments = path.segments();
        let Some((last, ancestors)) = segments.split_last() else {
            return Err(InMemoryError::InvalidPath(path.to_string()));
        };
        if value.is_null() {
            remove_at(&mut self.root, segments);
            return Ok(());
        }

        let existed: Vec<bool> = (1..=segments.len())
            .map(|depth| node_at(&self.root, &segments[..depth]).is_some())
            .collect();

        let mut node = &mut self.root;
        for segment in ancestors {
            node = as_object(node)
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        as_object(node).insert(last.clone(), value);

        // Each ancestor that gained a child fires child-added.
        for (depth, existed) in existed.into_iter().enumerate() {
            if existed {
                continue;
            }
            let parent = StorePath::parse(&segments[..depth].join("/"));
            let key = segments[depth].clone();
            if let Some(child) = node_at(&self.root, &segments[..=depth]).cloned() {
                self.notify(&parent, ChildEvent { key, value: child });
            }
        }
        Ok(())
    }

    fn notify(&mut self, parent: &StorePath, event: ChildEvent) {
        if let Some(senders) = self.subscribers.get_mut(parent) {
            senders.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
        }
    }
}

/// Coerce a node into a map, replacing leaves written earlier.
fn as_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

fn node_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

fn remove_at(node: &mut Value, segments: &[String]) -> bool {
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    match segments {
        [] => false,
        [last] => map.remove(last).is_some(),
        [head, rest @ ..] => {
            let Some(child) = map.get_mut(head) else {
                return false;
            };
            let removed = remove_at(child, rest);
            if removed && child.as_object().is_some_and(Map::is_empty) {
                map.remove(head);
            }
            removed
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    type Error = InMemoryError;

    async fn subscribe_children(&self, path: &StorePath) -> Result<ChildStream, Self::Error> {
        let mut inner = self.inner.lock();
        if inner.faults.unavailable {
            return Err(InMemoryError::Unavailable(path.to_string()));
        }

        let (tx, rx) = unbounded();
        // Replay under the same lock so no write slips between replay and registration.
        if let Some(Value::Object(children)) = node_at(&inner.root, path.segments()) {
            for (key, value) in children {
                let _ = tx.unbounded_send(ChildEvent { key: key.clone(), value: value.clone() });
            }
        }
        inner.subscribers.entry(path.clone()).or_default().push(tx);
        Ok(rx.boxed())
    }

    async fn read_once(&self, path: &StorePath) -> Result<Option<Value>, Self::Error> {
        let delay = {
            let inner = self.inner.lock();
            if inner.faults.unavailable {
                return Err(InMemoryError::Unavailable(path.to_string()));
            }
            inner.faults.read_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.get(path))
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), Self::Error> {
        self.check_write(path)?;
        self.inner.lock().apply_write(path, value)
    }

    async fn delete(&self, path: &StorePath) -> Result<(), Self::Error> {
        self.check_write(path)?;
        if path.segments().is_empty() {
            return Err(InMemoryError::InvalidPath(path.to_string()));
        }
        remove_at(&mut self.inner.lock().root, path.segments());
        Ok(())
    }
}
