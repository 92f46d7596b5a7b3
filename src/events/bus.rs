//! In-process publish/subscribe with an append-only log

use crate::core::error::Advisory;
use crate::events::event::{Event, EventDraft, Recipient};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Id every event is additionally delivered to
pub const SUPERVISOR_CHANNEL: &str = "orchestrator";

const OBSERVER_CAPACITY: usize = 1024;

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Token returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Delivery problems. The event itself is always logged.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeliveryError {
    #[error("{} handler(s) panicked while handling event {event_id}", .subscriptions.len())]
    HandlerPanicked {
        event_id: Uuid,
        subscriptions: Vec<SubscriptionId>,
    },
}

struct Subscriber {
    id: SubscriptionId,
    handler: EventHandler,
}

#[derive(Default)]
struct BusState {
    log: Vec<Event>,
    subscribers: HashMap<String, Vec<Subscriber>>,
}

/// Synchronous, at-most-once, non-durable event bus.
///
/// Handlers run on the publisher's task, outside the bus lock, so a handler
/// may publish or subscribe itself.
pub struct EventBus {
    state: Mutex<BusState>,
    next_subscription: AtomicU64,
    observers: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            state: Mutex::new(BusState::default()),
            next_subscription: AtomicU64::new(1),
            observers,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an event.
    ///
    /// Appends to the log, then delivers to the subscribers of `to` (every
    /// subscriber for a broadcast), to the supervisory channel and to the
    /// observer stream. Each handler is invoked at most once per event.
    pub fn send(&self, draft: EventDraft) -> Advisory<Uuid, DeliveryError> {
        let event = draft.stamp();

        let handlers: Vec<(SubscriptionId, EventHandler)> = {
            let mut state = self.lock();
            state.log.push(event.clone());

            let selected = |sub: &Subscriber| (sub.id, Arc::clone(&sub.handler));
            match &event.to {
                Recipient::Broadcast => state
                    .subscribers
                    .values()
                    .flatten()
                    .map(selected)
                    .collect(),
                Recipient::Id(to) => {
                    let direct = state.subscribers.get(to.as_str()).into_iter().flatten();
                    let supervisor = if to != SUPERVISOR_CHANNEL {
                        state.subscribers.get(SUPERVISOR_CHANNEL)
                    } else {
                        None
                    };
                    direct
                        .chain(supervisor.into_iter().flatten())
                        .map(selected)
                        .collect()
                }
            }
        };

        debug!(
            "Event {} {:?} {} -> {} ({} handler(s))",
            event.id,
            event.kind,
            event.from,
            event.to,
            handlers.len()
        );

        let panicked: Vec<SubscriptionId> = handlers
            .into_iter()
            .filter_map(|(id, handler)| {
                catch_unwind(AssertUnwindSafe(|| handler(&event)))
                    .err()
                    .map(|_| id)
            })
            .collect();

        // No observers is fine
        let _ = self.observers.send(event.clone());

        if panicked.is_empty() {
            Ok(event.id)
        } else {
            warn!(
                "{} handler(s) panicked on event {}",
                panicked.len(),
                event.id
            );
            Err(DeliveryError::HandlerPanicked {
                event_id: event.id,
                subscriptions: panicked,
            })
        }
    }

    /// Register a handler for events addressed to `id`. Several handlers may
    /// share an id.
    pub fn subscribe<F>(&self, id: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let subscription = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .subscribers
            .entry(id.into())
            .or_default()
            .push(Subscriber {
                id: subscription,
                handler: Arc::new(handler),
            });
        subscription
    }

    /// Remove a single handler. Returns whether it was registered.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut state = self.lock();
        let mut removed = false;
        state.subscribers.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|sub| sub.id != subscription);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    /// Stream of every event published after the call
    pub fn observe(&self) -> broadcast::Receiver<Event> {
        self.observers.subscribe()
    }

    /// Full event log in publish order
    pub fn history(&self) -> Vec<Event> {
        self.lock().log.clone()
    }

    /// Events sent by or addressed to `id` (broadcasts included)
    pub fn history_for(&self, id: &str) -> Vec<Event> {
        self.lock()
            .log
            .iter()
            .filter(|event| event.from == id || event.is_addressed_to(id))
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("EventBus")
            .field("events", &state.log.len())
            .field("subscribed_ids", &state.subscribers.len())
            .finish()
    }
}
