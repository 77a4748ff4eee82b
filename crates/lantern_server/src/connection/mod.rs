//! Live sessions and the registry that owns them.

mod history;
mod record;
mod registry;
mod settings;

pub use history::{InputHistory, MAX_HISTORY};
pub use record::ConnectionRecord;
pub use registry::{ConnectionRegistry, ConnectionStats};
pub use settings::{ClientInfo, ClientSettings, DiscordInfo, DEFAULT_SCREEN_HEIGHT, DEFAULT_SCREEN_WIDTH};

use serde::Serialize;

/// Sequential session identity, starting at 1.
pub type ConnectionId = u64;

/// Externally observable session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ConnectState {
    /// Connected, still inside the login dialog
    Login = 0,
    LoggedIn = 1,
    /// Transport gone, world state retained
    Zombie = 2,
}

impl From<u8> for ConnectState {
    fn from(value: u8) -> Self {
        match value {
            1 => ConnectState::LoggedIn,
            2 => ConnectState::Zombie,
            _ => ConnectState::Login,
        }
    }
}

impl std::fmt::Display for ConnectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectState::Login => "login",
            ConnectState::LoggedIn => "logged-in",
            ConnectState::Zombie => "zombie",
        };
        f.write_str(name)
    }
}
