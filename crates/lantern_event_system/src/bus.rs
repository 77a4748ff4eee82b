//! # Event Bus
//!
//! The [`EventBus`] is the hub that decouples game subsystems. It does two
//! independent jobs:
//!
//! - **Queueing**: every event type owns a FIFO [`Queue`], created lazily on
//!   first push or lookup. Drain loops poll these queues at their own pace.
//! - **Dispatch**: listeners registered for a type (or the [`WILDCARD`]) are
//!   invoked synchronously by [`EventBus::dispatch`].
//!
//! ## Requeue
//!
//! A listener that wants to see the event it is handling again on a later
//! pass calls [`EventBus::requeue`]. The event is parked in a per-type
//! pending buffer and only becomes visible the next time
//! [`EventBus::get_queue`] is called for that type. It is then inserted at
//! the head of the queue, in requeue order. Parking keeps the queue being
//! drained right now untouched, so a listener that always requeues cannot
//! livelock the drain loop.
//!
//! ## Dispatch order
//!
//! Wildcard listeners run first, then the type's own listeners, each list in
//! registration order (or at the front, for listeners registered with
//! `to_front`). The first listener returning [`ListenerResult::Halt`] stops
//! the chain and `dispatch` returns `false`.
//!
//! Listener lists are snapshotted before the chain runs. A listener added
//! while a dispatch is in flight may or may not see that event.

use crate::events::{downcast_event, Event, EventError, EventKind};
use crate::queue::Queue;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Listener key that receives every event type.
pub const WILDCARD: &str = "*";

/// Identifier returned by listener registration, used to unregister.
pub type ListenerId = u64;

/// A shared, type-erased event.
pub type SharedEvent = Arc<dyn Event>;

/// The per-type queue handed out by [`EventBus::get_queue`].
pub type EventQueue = Queue<SharedEvent>;

/// What a listener wants to happen to the rest of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerResult {
    /// Let the remaining listeners see the event
    Continue,
    /// Stop the chain here
    Halt,
}

/// Callback invoked for each dispatched event.
pub type Listener = Arc<dyn Fn(&dyn Event) -> ListenerResult + Send + Sync>;

#[derive(Clone)]
struct ListenerEntry {
    id: ListenerId,
    listener: Listener,
}

/// Running counters exposed through [`EventBus::stats`].
#[derive(Debug, Default)]
struct BusCounters {
    events_pushed: AtomicU64,
    events_requeued: AtomicU64,
    events_dispatched: AtomicU64,
    dispatches_halted: AtomicU64,
    type_mismatches: AtomicU64,
}

/// Point-in-time statistics for monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusStats {
    /// Events pushed through [`EventBus::push`]
    pub events_pushed: u64,
    /// Events parked through [`EventBus::requeue`]
    pub events_requeued: u64,
    /// Calls to [`EventBus::dispatch`]
    pub events_dispatched: u64,
    /// Dispatches stopped by a listener
    pub dispatches_halted: u64,
    /// Typed listeners handed an event of another concrete type
    pub type_mismatches: u64,
    /// Listeners currently registered, wildcard included
    pub total_listeners: usize,
    /// Per-type queues created so far
    pub queue_count: usize,
}

/// Typed event queues plus a listener registry.
///
/// Construct one per process (or per test) and share it as
/// `Arc<EventBus>`. Every method takes `&self`.
///
/// # Examples
///
/// ```rust
/// use lantern_event_system::{EventBus, Input, ListenerResult};
/// use std::sync::Arc;
///
/// let bus = EventBus::new();
/// bus.on(|input: &Input| {
///     println!("{} typed {}", input.connection_id, input.input_text);
///     ListenerResult::Continue
/// });
///
/// bus.push(Arc::new(Input { connection_id: 1, input_text: "look".into(), ..Default::default() }), false);
/// assert_eq!(bus.drain("Input"), 1);
/// ```
pub struct EventBus {
    queues: DashMap<String, Arc<EventQueue>>,
    pending: Mutex<HashMap<String, Vec<SharedEvent>>>,
    listeners: RwLock<HashMap<String, Vec<ListenerEntry>>>,
    next_listener_id: AtomicU64,
    counters: Arc<BusCounters>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(0),
            counters: Arc::new(BusCounters::default()),
        }
    }

    fn queue_for(&self, event_type: &str) -> Arc<EventQueue> {
        if let Some(queue) = self.queues.get(event_type) {
            return queue.clone();
        }
        self.queues
            .entry(event_type.to_string())
            .or_insert_with(|| Arc::new(Queue::new()))
            .clone()
    }

    // ------------------------------------------------------------------------
    // Queueing
    // ------------------------------------------------------------------------

    /// Routes `event` to its type's queue.
    ///
    /// The event goes to the tail, or to the head when `to_front` is set.
    pub fn push(&self, event: SharedEvent, to_front: bool) {
        let queue = self.queue_for(event.event_type());
        trace!(event_type = event.event_type(), to_front, "event pushed");
        if to_front {
            queue.shift(event);
        } else {
            queue.push(event);
        }
        self.counters.events_pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Convenience wrapper that boxes a concrete event and pushes it to the tail.
    pub fn emit<E: Event>(&self, event: E) {
        self.push(Arc::new(event), false);
    }

    /// Parks `event` until the next [`get_queue`](Self::get_queue) for its type.
    pub fn requeue(&self, event: SharedEvent) {
        let event_type = event.event_type();
        self.pending
            .lock()
            .entry(event_type.to_string())
            .or_default()
            .push(event);
        self.counters.events_requeued.fetch_add(1, Ordering::Relaxed);
        trace!(event_type, "event requeued");
    }

    /// Number of requeued events still waiting to be flushed for a type.
    pub fn pending_len(&self, event_type: &str) -> usize {
        self.pending
            .lock()
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Returns the live queue for `event_type`, creating it if needed.
    ///
    /// Any requeued events for the type are flushed to the head first,
    /// oldest requeue first.
    pub fn get_queue(&self, event_type: &str) -> Arc<EventQueue> {
        let queue = self.queue_for(event_type);
        let parked = self.pending.lock().remove(event_type);
        if let Some(parked) = parked {
            debug!(event_type, count = parked.len(), "flushing requeued events");
            queue.shift_all(parked);
        }
        queue
    }

    /// Like [`get_queue`](Self::get_queue), but never creates a queue.
    pub fn try_queue(&self, event_type: &str) -> Result<Arc<EventQueue>, EventError> {
        if !self.queues.contains_key(event_type) && self.pending_len(event_type) == 0 {
            return Err(EventError::QueueNotFound(event_type.to_string()));
        }
        Ok(self.get_queue(event_type))
    }

    /// Snapshot of every per-type queue created so far.
    ///
    /// Each call takes a fresh snapshot. Pending requeues are not flushed.
    pub fn iterate_queues(&self) -> impl Iterator<Item = (String, Arc<EventQueue>)> {
        let snapshot: Vec<(String, Arc<EventQueue>)> = self
            .queues
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        snapshot.into_iter()
    }

    /// Polls every queued event of `event_type` and dispatches it.
    ///
    /// Events requeued by listeners during the drain stay parked until the
    /// next drain. Returns how many events were dispatched.
    pub fn drain(&self, event_type: &str) -> usize {
        let queue = self.get_queue(event_type);
        let mut count = 0;
        while let Some(event) = queue.poll() {
            self.dispatch(event.as_ref());
            count += 1;
        }
        count
    }

    // ------------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------------

    /// Registers `listener` for `event_type` (or [`WILDCARD`]).
    ///
    /// The listener is appended, or placed first when `to_front` is set.
    /// Returns an id for [`unregister_listener`](Self::unregister_listener).
    pub fn register_listener(&self, event_type: &str, listener: Listener, to_front: bool) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = ListenerEntry { id, listener };

        let mut listeners = self.listeners.write();
        let list = listeners.entry(event_type.to_string()).or_default();
        if to_front {
            list.insert(0, entry);
        } else {
            list.push(entry);
        }

        debug!(event_type, listener_id = id, to_front, "listener registered");
        id
    }

    /// Removes one listener. Returns `false` if no such id is registered for the type.
    pub fn unregister_listener(&self, event_type: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(event_type) else {
            return false;
        };
        let Some(index) = list.iter().position(|entry| entry.id == id) else {
            return false;
        };
        list.remove(index);
        debug!(event_type, listener_id = id, "listener unregistered");
        true
    }

    /// Registers a listener for the concrete event type `E`.
    ///
    /// Events sharing `E`'s routing type but carrying a different concrete
    /// payload are logged, counted as type mismatches and passed over with
    /// [`ListenerResult::Continue`].
    pub fn on<E, F>(&self, listener: F) -> ListenerId
    where
        E: Event + EventKind,
        F: Fn(&E) -> ListenerResult + Send + Sync + 'static,
    {
        self.register_typed(listener, false)
    }

    /// Like [`on`](Self::on), but the listener runs before existing ones.
    pub fn on_front<E, F>(&self, listener: F) -> ListenerId
    where
        E: Event + EventKind,
        F: Fn(&E) -> ListenerResult + Send + Sync + 'static,
    {
        self.register_typed(listener, true)
    }

    fn register_typed<E, F>(&self, listener: F, to_front: bool) -> ListenerId
    where
        E: Event + EventKind,
        F: Fn(&E) -> ListenerResult + Send + Sync + 'static,
    {
        let counters = self.counters.clone();
        let erased: Listener = Arc::new(move |event: &dyn Event| {
            match downcast_event::<E>(event) {
                Ok(typed) => listener(typed),
                Err(e) => {
                    counters.type_mismatches.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %e, "typed listener skipped event");
                    ListenerResult::Continue
                }
            }
        });
        self.register_listener(E::EVENT_TYPE, erased, to_front)
    }

    /// Runs the listener chain for `event`.
    ///
    /// Returns `true` only when every applicable listener returned
    /// [`ListenerResult::Continue`].
    pub fn dispatch(&self, event: &dyn Event) -> bool {
        self.counters.events_dispatched.fetch_add(1, Ordering::Relaxed);

        let chain: Vec<ListenerEntry> = {
            let listeners = self.listeners.read();
            let wildcard = listeners.get(WILDCARD).into_iter().flatten();
            let typed = listeners.get(event.event_type()).into_iter().flatten();
            wildcard.chain(typed).cloned().collect()
        };

        for entry in chain {
            if (entry.listener)(event) == ListenerResult::Halt {
                self.counters.dispatches_halted.fetch_add(1, Ordering::Relaxed);
                trace!(
                    event_type = event.event_type(),
                    listener_id = entry.id,
                    "dispatch halted"
                );
                return false;
            }
        }
        true
    }

    /// Number of listeners registered for one key.
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners.read().get(event_type).map(Vec::len).unwrap_or(0)
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            events_pushed: self.counters.events_pushed.load(Ordering::Relaxed),
            events_requeued: self.counters.events_requeued.load(Ordering::Relaxed),
            events_dispatched: self.counters.events_dispatched.load(Ordering::Relaxed),
            dispatches_halted: self.counters.dispatches_halted.load(Ordering::Relaxed),
            type_mismatches: self.counters.type_mismatches.load(Ordering::Relaxed),
            total_listeners: self.listeners.read().values().map(Vec::len).sum(),
            queue_count: self.queues.len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("queues", &self.queues.len())
            .field("next_listener_id", &self.next_listener_id.load(Ordering::Relaxed))
            .finish()
    }
}
