//! Single-slot reactive container.

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;

/// Handle returned by [`ObservableValue::subscribe`].
pub type SubscriptionId = u64;

/// Callbacks return `false` to be dropped after the current notification.
type Callback<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct Slot<T> {
    value: Option<T>,
    subscribers: Vec<(SubscriptionId, Callback<T>)>,
    next_id: SubscriptionId,
    closed: bool,
}

struct Shared<T> {
    /// Serializes notification rounds so every subscriber sees values in set order.
    /// Reentrant so a callback may set or subscribe on the same thread.
    gate: ReentrantMutex<()>,
    slot: Mutex<Slot<T>>,
}

/// Holds at most one current value and notifies subscribers on every set.
///
/// - `set` stores the value and calls every registered subscriber, in
///   registration order, before returning.
/// - `subscribe` replays the current value (if any) and then registers.
/// - No history is kept and there is no backpressure.
/// - After [`close`](Self::close), sets are ignored and subscribers are released.
///
/// Clones share the same slot.
pub struct ObservableValue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ObservableValue<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> std::fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.shared.slot.lock();
        f.debug_struct("ObservableValue")
            .field("has_value", &slot.value.is_some())
            .field("subscribers", &slot.subscribers.len())
            .field("closed", &slot.closed)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ObservableValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> ObservableValue<T> {
    /// Create an empty container.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                gate: ReentrantMutex::new(()),
                slot: Mutex::new(Slot {
                    value: None,
                    subscribers: Vec::new(),
                    next_id: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Store `value` and notify subscribers.
    ///
    /// Returns `false` (and stores nothing) once closed.
    pub fn set(&self, value: T) -> bool {
        let _gate = self.shared.gate.lock();
        let callbacks = {
            let mut slot = self.shared.slot.lock();
            if slot.closed {
                return false;
            }
            slot.value = Some(value.clone());
            slot.subscribers.clone()
        };

        let dropped: Vec<SubscriptionId> = callbacks
            .iter()
            .filter(|(_, callback)| !callback(&value))
            .map(|(id, _)| *id)
            .collect();

        if !dropped.is_empty() {
            self.shared
                .slot
                .lock()
                .subscribers
                .retain(|(id, _)| !dropped.contains(id));
        }
        true
    }

    /// Current value, if any.
    pub fn get(&self) -> Option<T> {
        self.shared.slot.lock().value.clone()
    }

    /// Replay the current value to `callback`, then register it.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.register(Arc::new(move |value: &T| {
            callback(value);
            true
        }))
    }

    /// Remove a subscriber. Returns `false` when it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut slot = self.shared.slot.lock();
        let before = slot.subscribers.len();
        slot.subscribers.retain(|(sub, _)| *sub != id);
        slot.subscribers.len() != before
    }

    /// Receive the current value and every later one on an async channel.
    ///
    /// The channel closes when the container is closed. Dropping the
    /// receiver unregisters it on the next set.
    pub fn updates(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(Arc::new(move |value: &T| tx.send(value.clone()).is_ok()));
        rx
    }

    /// Stop accepting values and release all subscribers. The last value stays readable.
    pub fn close(&self) {
        let _gate = self.shared.gate.lock();
        let mut slot = self.shared.slot.lock();
        slot.closed = true;
        slot.subscribers.clear();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.shared.slot.lock().closed
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.slot.lock().subscribers.len()
    }

    fn register(&self, callback: Callback<T>) -> SubscriptionId {
        let _gate = self.shared.gate.lock();
        let (id, current) = {
            let mut slot = self.shared.slot.lock();
            let id = slot.next_id;
            slot.next_id += 1;
            if slot.closed {
                (id, slot.value.clone())
            } else {
                slot.subscribers.push((id, Arc::clone(&callback)));
                (id, slot.value.clone())
            }
        };

        if let Some(value) = current {
            if !callback(&value) {
                self.unsubscribe(id);
            }
        }
        id
    }
}
