//! Event trait, error type, and the game's standard event payloads.
//!
//! The bus routes on [`Event::event_type`] alone and never looks inside the
//! payload. Concrete payloads also implement [`EventKind`], which carries
//! the same type string as an associated constant. That lets typed
//! listeners be registered without first building an instance.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Errors raised by the event system.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Serialization failed when converting an event to bytes
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Deserialization failed when converting bytes to an event
    #[error("Deserialization error: {0}")]
    Deserialization(serde_json::Error),
    /// A typed listener was handed an event of a different concrete type
    #[error("Type mismatch for '{event_type}': expected {expected}")]
    TypeMismatch {
        event_type: String,
        expected: &'static str,
    },
    /// No queue has been created for the requested type
    #[error("Queue not found: {0}")]
    QueueNotFound(String),
}

/// A value that can travel through the [`EventBus`](crate::EventBus).
///
/// Events are immutable by convention once pushed. The bus shares them
/// between listeners as `Arc<dyn Event>`.
pub trait Event: Send + Sync + Any + fmt::Debug {
    /// The logical routing type of this event.
    fn event_type(&self) -> &'static str;

    /// Serializes the payload to JSON bytes.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>;

    /// Returns the event as `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Borrows `event` as the concrete payload `E`.
///
/// Several payloads may share one routing type (`GMCP` carries both
/// directions), so a matching type string does not guarantee the cast.
pub fn downcast_event<E: Event>(event: &dyn Event) -> Result<&E, EventError> {
    event.as_any().downcast_ref::<E>().ok_or_else(|| EventError::TypeMismatch {
        event_type: event.event_type().to_string(),
        expected: std::any::type_name::<E>(),
    })
}

/// Static routing type for a concrete event payload.
pub trait EventKind {
    const EVENT_TYPE: &'static str;

    /// Decodes a payload previously produced by [`Event::to_bytes`].
    fn from_bytes(data: &[u8]) -> Result<Self, EventError>
    where
        Self: Sized + serde::de::DeserializeOwned,
    {
        serde_json::from_slice(data).map_err(EventError::Deserialization)
    }
}

/// Implements [`Event`] and [`EventKind`] for a serde payload type.
///
/// ```rust
/// use lantern_event_system::impl_event;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Weather {
///     pub zone: String,
/// }
///
/// impl_event!(Weather, "Weather");
/// ```
#[macro_export]
macro_rules! impl_event {
    ($ty:ty, $name:expr) => {
        impl $crate::EventKind for $ty {
            const EVENT_TYPE: &'static str = $name;
        }

        impl $crate::Event for $ty {
            fn event_type(&self) -> &'static str {
                $name
            }

            fn to_bytes(&self) -> Result<Vec<u8>, $crate::EventError> {
                $crate::serde_json::to_vec(self).map_err($crate::EventError::Serialization)
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }
    };
}

// ============================================================================
// Standard event payloads
// ============================================================================

/// A command line submitted by a player or issued on behalf of a mob.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Input {
    pub connection_id: u64,
    pub mob_instance_id: i32,
    pub input_text: String,
    pub wait_turns: i32,
    pub flags: u64,
}

/// Text intended for every logged-in session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Broadcast {
    pub text: String,
    pub skip_line_refresh: bool,
}

/// Text aimed at one user or one room.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub user_id: i32,
    pub exclude_user_ids: Vec<i32>,
    pub room_id: i32,
    pub text: String,
    /// Only audible to characters with superior hearing
    pub is_quiet: bool,
    /// Speech or emote rather than narration
    pub is_communication: bool,
}

/// Server-level commands such as reloads and shutdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct System {
    pub command: String,
    pub data: Option<serde_json::Value>,
}

/// Instructions only the web client understands, e.g. `TEXTMASK:true`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WebClientCommand {
    pub connection_id: u64,
    pub text: String,
}

/// A GMCP package received from a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GmcpIn {
    pub connection_id: u64,
    pub command: String,
    pub json: Vec<u8>,
}

/// A GMCP package to send to a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GmcpOut {
    pub connection_id: u64,
    pub user_id: i32,
    pub module: String,
    pub payload: serde_json::Value,
}

/// Whether an [`Msp`] request plays a one-shot sound or background music.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SoundType {
    #[default]
    Sound,
    Music,
}

/// A request to play a sound or music track for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Msp {
    pub connection_id: u64,
    pub sound_type: SoundType,
    pub sound_file: String,
    /// 1-100
    pub volume: u8,
    pub category: String,
}

/// Apply or remove a buff.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Buff {
    pub user_id: i32,
    pub mob_instance_id: i32,
    pub buff_id: i32,
}

/// Give or take quest progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Quest {
    pub user_id: i32,
    pub quest_token: String,
}

/// A room-targeted action, optionally delayed by a number of turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoomAction {
    pub room_id: i32,
    pub source_user_id: i32,
    pub source_mob_id: i32,
    pub action: String,
    pub details: serde_json::Value,
    pub wait_turns: i32,
}

/// Emitted once a transport has been accepted and registered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionOpened {
    pub connection_id: u64,
    pub remote_addr: String,
    pub framed: bool,
}

/// Emitted when a session's transport is gone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionClosed {
    pub connection_id: u64,
    /// The session was parked as a zombie instead of being removed
    pub zombie: bool,
}

/// Emitted when the login dialog finishes successfully.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoginCompleted {
    pub connection_id: u64,
    pub username: String,
    pub new_account: bool,
}

/// Emitted by the round producer on every game tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoundTick {
    pub round: u64,
    pub timestamp: u64,
}

impl_event!(Input, "Input");
impl_event!(Broadcast, "Broadcast");
impl_event!(Message, "Message");
impl_event!(System, "System");
impl_event!(WebClientCommand, "WebClientCommand");
impl_event!(GmcpIn, "GMCP");
impl_event!(GmcpOut, "GMCP");
impl_event!(Msp, "MSP");
impl_event!(Buff, "Buff");
impl_event!(Quest, "Quest");
impl_event!(RoomAction, "RoomAction");
impl_event!(ConnectionOpened, "ConnectionOpened");
impl_event!(ConnectionClosed, "ConnectionClosed");
impl_event!(LoginCompleted, "LoginCompleted");
impl_event!(RoundTick, "RoundTick");

/// Current UNIX timestamp in seconds.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_event() {
        let event: &dyn Event = &GmcpIn {
            connection_id: 1,
            command: "Core.Ping".to_string(),
            json: Vec::new(),
        };
        assert_eq!(downcast_event::<GmcpIn>(event).map(|e| e.connection_id).ok(), Some(1));

        match downcast_event::<GmcpOut>(event) {
            Err(EventError::TypeMismatch { event_type, expected }) => {
                assert_eq!(event_type, "GMCP");
                assert!(expected.ends_with("GmcpOut"));
            }
            other => panic!("expected a type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_event_type_matches_kind_constant() {
        let input = Input {
            connection_id: 3,
            input_text: "look".to_string(),
            ..Default::default()
        };
        assert_eq!(input.event_type(), Input::EVENT_TYPE);
        assert_eq!(GmcpIn::EVENT_TYPE, GmcpOut::EVENT_TYPE);
        assert_eq!(Msp::default().event_type(), "MSP");
    }

    #[test]
    fn test_event_serialization_round_trip() {
        let original = RoomAction {
            room_id: 12,
            action: "collapse".to_string(),
            details: serde_json::json!({ "rubble": true }),
            wait_turns: 3,
            ..Default::default()
        };
        let bytes = original.to_bytes().unwrap();
        let decoded = RoomAction::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_deserialize_reports_bad_payload() {
        let result = Quest::from_bytes(b"not json");
        assert!(matches!(result, Err(EventError::Deserialization(_))));
    }

    #[test]
    fn test_downcast_through_any() {
        let event: Box<dyn Event> = Box::new(Broadcast {
            text: "The sun rises.".to_string(),
            skip_line_refresh: false,
        });
        let broadcast = event.as_any().downcast_ref::<Broadcast>();
        assert_eq!(broadcast.map(|b| b.text.as_str()), Some("The sun rises."));
        assert!(event.as_any().downcast_ref::<Message>().is_none());
    }
}
