//! # Lantern Event System
//!
//! The in-process messaging layer shared by the Lantern server and game
//! logic. It has two halves:
//!
//! - [`queue`] - thread-safe FIFO, dedupe and priority queues
//! - [`bus`] - the [`EventBus`], which keeps one queue per event type and a
//!   registry of synchronous listeners
//!
//! Event payloads live in [`events`]. Every payload implements [`Event`]
//! (routing type + JSON encoding) and [`EventKind`] (the same routing type as
//! a constant, for typed listener registration).
//!
//! ## Quick Start
//!
//! ```rust
//! use lantern_event_system::*;
//!
//! let bus = create_event_bus();
//!
//! bus.on(|msg: &Broadcast| {
//!     println!("broadcast: {}", msg.text);
//!     ListenerResult::Continue
//! });
//!
//! bus.emit(Broadcast { text: "Server restarting soon.".into(), skip_line_refresh: false });
//!
//! // Drain loops decide when queued events are dispatched.
//! for (event_type, _queue) in bus.iterate_queues() {
//!     bus.drain(&event_type);
//! }
//! ```

pub mod bus;
pub mod events;
pub mod queue;

pub use bus::{
    EventBus, EventBusStats, EventQueue, Listener, ListenerId, ListenerResult, SharedEvent,
    WILDCARD,
};
pub use events::*;
pub use queue::{DedupeQueue, PriorityQueue, Queue, UniqueNode};

// Used by `impl_event!` expansions in downstream crates.
pub use serde_json;

use std::sync::Arc;

/// Creates a new shared event bus.
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}
