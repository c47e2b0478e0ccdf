//! Event bus for casework processes
//!
//! Synchronous, in-process publish/subscribe keyed by event name.
//! `publish` invokes every matching subscriber on the calling thread,
//! in registration order, before returning. There is no queue and no
//! redelivery.

use casework_types::Event;
use std::sync::{Arc, RwLock};

/// Callback type for event subscribers
pub type EventCallback = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Opaque handle identifying one subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Errors surfaced by the event bus
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Subscriber for '{event}' failed")]
    HandlerFailed {
        event: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Event bus lock poisoned")]
    LockPoisoned,
}

struct Subscription {
    handle: SubscriptionHandle,
    event_name: String,
    callback: EventCallback,
}

#[derive(Default)]
struct BusState {
    next_handle: u64,
    /// All subscriptions in registration order
    subscriptions: Vec<Subscription>,
}

/// Named publish/subscribe bus.
///
/// Cloning an `EventBus` yields another handle onto the same set of
/// subscriptions.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<RwLock<BusState>>,
}

impl EventBus {
    /// Create a new, empty event bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a callback to an event name
    pub fn subscribe<F>(
        &self,
        event_name: impl Into<String>,
        callback: F,
    ) -> Result<SubscriptionHandle, EventBusError>
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let event_name = event_name.into();
        let mut state = self.state.write().map_err(|_| EventBusError::LockPoisoned)?;
        state.next_handle += 1;
        let handle = SubscriptionHandle(state.next_handle);
        tracing::debug!(event = %event_name, subscription = %handle, "Subscribed");
        state.subscriptions.push(Subscription {
            handle,
            event_name,
            callback: Arc::new(callback),
        });
        Ok(handle)
    }

    /// Remove exactly one subscription.
    ///
    /// Returns `false` if the handle was unknown (already removed or
    /// cleared by [`unsubscribe_all`](Self::unsubscribe_all)).
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<bool, EventBusError> {
        let mut state = self.state.write().map_err(|_| EventBusError::LockPoisoned)?;
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.handle != handle);
        let removed = state.subscriptions.len() != before;
        if removed {
            tracing::debug!(subscription = %handle, "Unsubscribed");
        }
        Ok(removed)
    }

    /// Remove every subscription on this bus
    pub fn unsubscribe_all(&self) -> Result<(), EventBusError> {
        let mut state = self.state.write().map_err(|_| EventBusError::LockPoisoned)?;
        let count = state.subscriptions.len();
        state.subscriptions.clear();
        tracing::debug!(removed = count, "All subscriptions cleared");
        Ok(())
    }

    /// Publish an event to every current subscriber of `event.name`.
    ///
    /// Subscribers run after the internal lock is released, so they may
    /// publish follow-up events or change subscriptions. The first
    /// subscriber error stops delivery and is returned to the publisher.
    /// Returns the number of subscribers invoked.
    pub fn publish(&self, event: &Event) -> Result<usize, EventBusError> {
        let callbacks: Vec<EventCallback> = {
            let state = self.state.read().map_err(|_| EventBusError::LockPoisoned)?;
            state
                .subscriptions
                .iter()
                .filter(|s| s.event_name == event.name)
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };

        if callbacks.is_empty() {
            tracing::trace!(event = %event.name, "No subscribers");
            return Ok(0);
        }

        tracing::debug!(
            event = %event.name,
            event_id = %event.id,
            subscribers = callbacks.len(),
            "Publishing event"
        );

        for callback in &callbacks {
            callback(event).map_err(|source| EventBusError::HandlerFailed {
                event: event.name.clone(),
                source,
            })?;
        }

        Ok(callbacks.len())
    }

    /// Number of subscribers for an event name
    pub fn subscriber_count(&self, event_name: &str) -> usize {
        self.state
            .read()
            .map(|s| {
                s.subscriptions
                    .iter()
                    .filter(|sub| sub.event_name == event_name)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Total number of subscriptions across all event names
    pub fn total_subscriptions(&self) -> usize {
        self.state
            .read()
            .map(|s| s.subscriptions.len())
            .unwrap_or(0)
    }

    /// Poison the subscription lock by panicking while holding it
    #[cfg(test)]
    pub(crate) fn poison_lock(&self) {
        let state = Arc::clone(&self.state);
        let _ = std::thread::spawn(move || {
            let _guard = state.write().unwrap();
            panic!("subscriber table poisoned");
        })
        .join();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.total_subscriptions())
            .finish()
    }
}
