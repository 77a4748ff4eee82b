//! Server orchestration: listeners, sessions and the round producer.

pub mod core;
pub mod session;

pub use self::core::{bind_listener, deliver, process_round, reap_zombies, LanternServer, OUTBOUND_EVENT_TYPES};
pub use session::{Session, READ_BUFFER_SIZE};
