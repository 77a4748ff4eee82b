//! Generic MUD Communication Protocol.
//!
//! A GMCP message is `IAC SB GMCP <package> <json> IAC SE`. The JSON part is
//! optional. Only a handful of client packages change server-side state;
//! everything else is ignored.

use super::telnet::{TerminalCommand, DO, DONT, IAC, OPT_GMCP, SB, SE, WILL, WONT};
use crate::error::ProtocolError;
use serde::Deserialize;
use std::collections::HashMap;

pub const GMCP_ENABLE: TerminalCommand = TerminalCommand::new(&[IAC, WILL, OPT_GMCP], &[]);
pub const GMCP_DISABLE: TerminalCommand = TerminalCommand::new(&[IAC, WONT, OPT_GMCP], &[]);
pub const GMCP_ACCEPT: TerminalCommand = TerminalCommand::new(&[IAC, DO, OPT_GMCP], &[]);
pub const GMCP_REFUSE: TerminalCommand = TerminalCommand::new(&[IAC, DONT, OPT_GMCP], &[]);
pub const GMCP_PAYLOAD: TerminalCommand = TerminalCommand::new(&[IAC, SB, OPT_GMCP], &[IAC, SE]);

pub const CORE_HELLO: &str = "Core.Hello";
pub const CORE_SUPPORTS_SET: &str = "Core.Supports.Set";
pub const CORE_SUPPORTS_REMOVE: &str = "Core.Supports.Remove";
pub const DISCORD_HELLO: &str = "External.Discord.Hello";

pub fn is_gmcp_command(bytes: &[u8]) -> bool {
    bytes.len() > 2 && bytes[0] == IAC && bytes[2] == OPT_GMCP
}

/// `Core.Hello {"client": "Mudlet", "version": "4.17.2"}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Hello {
    #[serde(default, alias = "Client")]
    pub client: String,
    #[serde(default, alias = "Version")]
    pub version: String,
}

/// `External.Discord.Hello {"user": "name#1234", "private": false}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DiscordHello {
    #[serde(default, alias = "User")]
    pub user: String,
    #[serde(default, alias = "Private")]
    pub private: bool,
}

/// A decoded client package the server acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Package {
    Hello(Hello),
    /// Module name to version, parents included
    SupportsSet(HashMap<String, i32>),
    SupportsRemove(Vec<String>),
    DiscordHello(DiscordHello),
}

/// Splits a sub-negotiation body into package name and JSON payload.
pub fn split_body(body: &[u8]) -> (String, &[u8]) {
    match body.iter().position(|&b| b == b' ') {
        Some(space) if space > 0 => (String::from_utf8_lossy(&body[..space]).into_owned(), &body[space + 1..]),
        _ => (String::from_utf8_lossy(body).into_owned(), &[]),
    }
}

/// Decodes a supported package. `Ok(None)` for packages the server ignores.
pub fn parse_package(command: &str, payload: &[u8]) -> Result<Option<Package>, ProtocolError> {
    let package = match command {
        CORE_HELLO => Package::Hello(serde_json::from_slice(payload)?),
        CORE_SUPPORTS_SET => {
            let entries: Vec<String> = serde_json::from_slice(payload)?;
            Package::SupportsSet(supported_modules(&entries))
        }
        CORE_SUPPORTS_REMOVE => Package::SupportsRemove(serde_json::from_slice(payload)?),
        DISCORD_HELLO => Package::DiscordHello(serde_json::from_slice(payload)?),
        _ => return Ok(None),
    };
    Ok(Some(package))
}

/// Turns `["Char.Inventory.Backpack 1"]` into a version map that also
/// enables every parent module (`Char.Inventory`, `Char`).
pub fn supported_modules(entries: &[String]) -> HashMap<String, i32> {
    let mut modules = HashMap::new();
    for entry in entries {
        let mut parts = entry.split(' ');
        let (Some(name), Some(version), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let version = version.parse().unwrap_or(0);

        let mut name = name;
        loop {
            modules.insert(name.to_string(), version);
            match name.rfind('.') {
                Some(idx) => name = &name[..idx],
                None => break,
            }
        }
    }
    modules
}

/// Builds the outbound envelope for `module` with a JSON payload.
pub fn encode(module: &str, payload: &serde_json::Value) -> Vec<u8> {
    let body = if payload.is_null() {
        module.to_string()
    } else {
        format!("{} {}", module, payload)
    };
    GMCP_PAYLOAD.bytes_with_payload(body.as_bytes())
}
