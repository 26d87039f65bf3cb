//! Synchronous listener lists and the broadcast registry.
//!
//! Listeners are plain callbacks invoked on the caller's thread, in
//! subscription order, after the mutation they describe has been persisted.
//! The listener snapshot is taken under the lock but the callbacks run
//! outside it, so a listener may read from (or write to) the store.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use dashmap::DashMap;
use tracing::trace;
use uuid::Uuid;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Slots<E> {
    next_id: u64,
    listeners: Vec<(u64, Callback<E>)>,
}

/// Ordered list of callbacks for one event type.
pub struct ListenerList<E> {
    slots: Arc<Mutex<Slots<E>>>,
}

impl<E: 'static> ListenerList<E> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Register a callback. It stays registered while the returned
    /// [`Subscription`] is alive.
    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let id = slots.next_id;
            slots.next_id += 1;
            slots.listeners.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<Slots<E>>> = Arc::downgrade(&self.slots);
        Subscription::new(move || {
            if let Some(slots) = weak.upgrade() {
                slots
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .listeners
                    .retain(|(slot_id, _)| *slot_id != id);
            }
        })
    }

    /// Invoke every registered callback with `event`.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<Callback<E>> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.listeners.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for listener in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .clear();
    }
}

impl<E: 'static> Default for ListenerList<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by every `subscribe` call.
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) removes the
/// listener. Use [`Subscription::detach`] to keep the listener for the
/// lifetime of its list.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// One broadcast domain: "something in here changed, re-read it".
#[derive(Default)]
pub struct Broadcast {
    listeners: ListenerList<()>,
}

impl Broadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.listeners.subscribe(move |_: &()| listener())
    }

    pub fn notify(&self) {
        self.listeners.emit(&());
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Broadcast domains shared by the lifecycle manager and its observers:
/// the mission catalog, plus one segment list per mission.
#[derive(Default)]
pub struct BroadcastRegistry {
    catalog: Broadcast,
    segments: DashMap<Uuid, Arc<Broadcast>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &Broadcast {
        &self.catalog
    }

    /// Segment-list domain for a mission, created on first use.
    pub fn segments(&self, mission_id: Uuid) -> Arc<Broadcast> {
        Arc::clone(
            self.segments
                .entry(mission_id)
                .or_insert_with(|| Arc::new(Broadcast::new()))
                .value(),
        )
    }

    pub fn notify_catalog(&self) {
        trace!("Notifying mission catalog listeners");
        self.catalog.notify();
    }

    /// Notify segment listeners of a mission, if anyone ever subscribed.
    pub fn notify_segments(&self, mission_id: Uuid) {
        // Clone out of the map before calling listeners so no shard lock is held
        let domain = self
            .segments
            .get(&mission_id)
            .map(|entry| Arc::clone(entry.value()));
        if let Some(domain) = domain {
            trace!(mission_id = %mission_id, "Notifying segment listeners");
            domain.notify();
        }
    }

    /// Forget a mission's segment domain (after purge).
    pub fn remove_segments(&self, mission_id: Uuid) {
        self.segments.remove(&mission_id);
    }
}
