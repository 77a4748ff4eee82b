//! Telnet command bytes and the structural matcher used for every
//! out-of-band sequence.
//!
//! Either side of a telnet session turns an option on or off with a three
//! byte `IAC <verb> <option>` sequence, where the verb is one of `WILL`,
//! `WONT`, `DO` or `DONT`. Options that need values use sub-negotiation:
//! `IAC SB <option> <payload> IAC SE`.

use crate::error::ProtocolError;
use std::fmt::Write as _;

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const GA: u8 = 249;
pub const EL: u8 = 248;
pub const EC: u8 = 247;
pub const AYT: u8 = 246;
pub const AO: u8 = 245;
pub const IP: u8 = 244;
pub const BRK: u8 = 243;
pub const DM: u8 = 242;
pub const NOP: u8 = 241;
pub const SE: u8 = 240;

pub const OPT_BINARY: u8 = 0;
pub const OPT_ECHO: u8 = 1;
pub const OPT_SUPPRESS_GO_AHEAD: u8 = 3;
pub const OPT_STATUS: u8 = 5;
pub const OPT_TIMING_MARK: u8 = 6;
pub const OPT_TERMINAL_TYPE: u8 = 24;
pub const OPT_NAWS: u8 = 31;
pub const OPT_TERMINAL_SPEED: u8 = 32;
pub const OPT_REMOTE_FLOW_CONTROL: u8 = 33;
pub const OPT_LINEMODE: u8 = 34;
pub const OPT_ENVIRON: u8 = 36;
pub const OPT_NEW_ENVIRON: u8 = 39;
pub const OPT_CHARSET: u8 = 42;
pub const OPT_MSDP: u8 = 69;
pub const OPT_MSP: u8 = 90;
pub const OPT_GMCP: u8 = 201;

pub const ASCII_NULL: u8 = 0;
pub const ASCII_BACKSPACE: u8 = 8;
pub const ASCII_TAB: u8 = 9;
pub const ASCII_LF: u8 = 10;
pub const ASCII_CR: u8 = 13;
pub const ASCII_SPACE: u8 = 32;
pub const ASCII_DELETE: u8 = 127;

pub const CRLF: &[u8] = b"\r\n";

/// Cursor back, blank, cursor back.
pub const BACKSPACE_SEQUENCE: &[u8] = &[ASCII_BACKSPACE, ASCII_SPACE, ASCII_BACKSPACE];

/// A fixed prefix plus an optional fixed suffix, with a payload in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalCommand {
    pub chars: &'static [u8],
    pub end_chars: &'static [u8],
}

impl TerminalCommand {
    pub const fn new(chars: &'static [u8], end_chars: &'static [u8]) -> Self {
        Self { chars, end_chars }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes_with_payload(&[])
    }

    /// `chars + payload + end_chars`.
    pub fn bytes_with_payload(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.chars.len() + payload.len() + self.end_chars.len());
        out.extend_from_slice(self.chars);
        out.extend_from_slice(payload);
        out.extend_from_slice(self.end_chars);
        out
    }

    /// Structural match against `input`.
    ///
    /// Returns the bytes between the prefix and suffix (empty when there are
    /// none), or `None` when the prefix or suffix differ. A command without
    /// end chars matches any input that starts with its prefix.
    pub fn matches<'a>(&self, input: &'a [u8]) -> Option<&'a [u8]> {
        if input.len() < self.chars.len() + self.end_chars.len() {
            return None;
        }
        if !input.starts_with(self.chars) {
            return None;
        }
        if self.end_chars.is_empty() {
            return Some(&input[self.chars.len()..]);
        }
        if !input.ends_with(self.end_chars) {
            return None;
        }
        Some(&input[self.chars.len()..input.len() - self.end_chars.len()])
    }

    pub fn debug_string(&self) -> String {
        match self.chars.first() {
            Some(&IAC) => format!("{}{}", command_to_string(self.chars), command_to_string(self.end_chars)),
            Some(&super::ansi::ESC) => format!(
                "{}{}",
                super::ansi::command_to_string(self.chars),
                super::ansi::command_to_string(self.end_chars)
            ),
            _ => "???".to_string(),
        }
    }
}

pub const SCREEN_SIZE_REQUEST: TerminalCommand = TerminalCommand::new(&[IAC, DO, OPT_NAWS], &[]);
pub const SCREEN_SIZE_RESPONSE: TerminalCommand = TerminalCommand::new(&[IAC, SB, OPT_NAWS], &[]);
pub const SUPPRESS_GO_AHEAD: TerminalCommand = TerminalCommand::new(&[IAC, WILL, OPT_SUPPRESS_GO_AHEAD], &[]);
pub const DONT_SUPPRESS_GO_AHEAD: TerminalCommand = TerminalCommand::new(&[IAC, DONT, OPT_SUPPRESS_GO_AHEAD], &[]);
pub const ECHO_ON: TerminalCommand = TerminalCommand::new(&[IAC, WILL, OPT_ECHO], &[]);
pub const ECHO_OFF: TerminalCommand = TerminalCommand::new(&[IAC, WONT, OPT_ECHO], &[]);
pub const LINEMODE_OFF: TerminalCommand = TerminalCommand::new(&[IAC, WONT, OPT_LINEMODE], &[]);
pub const GO_AHEAD: TerminalCommand = TerminalCommand::new(&[IAC, GA], &[]);

// Charset handshake, server driven:
//   server REQUEST_CHARSET -> client AGREE_CHARSET -> server CHARSET(" UTF-8")
//   -> client ACCEPTED_CHARSET or REJECTED_CHARSET
pub const REQUEST_CHARSET: TerminalCommand = TerminalCommand::new(&[IAC, WILL, OPT_CHARSET], &[]);
pub const AGREE_CHARSET: TerminalCommand = TerminalCommand::new(&[IAC, DO, OPT_CHARSET], &[]);
pub const CHARSET: TerminalCommand = TerminalCommand::new(&[IAC, SB, OPT_CHARSET, 1], &[IAC, SE]);
pub const ACCEPTED_CHARSET: TerminalCommand = TerminalCommand::new(&[IAC, SB, 2], &[IAC, SE]);
pub const REJECTED_CHARSET: TerminalCommand = TerminalCommand::new(&[IAC, SB, 3, IAC, SE], &[]);

/// Charset names offered to the client, space separated with a leading space.
pub const CHARSET_UTF8: &[u8] = b" UTF-8";

pub fn will(option: u8) -> [u8; 3] {
    [IAC, WILL, option]
}

pub fn wont(option: u8) -> [u8; 3] {
    [IAC, WONT, option]
}

pub fn do_(option: u8) -> [u8; 3] {
    [IAC, DO, option]
}

pub fn dont(option: u8) -> [u8; 3] {
    [IAC, DONT, option]
}

/// True iff the first byte is IAC.
pub fn is_command(bytes: &[u8]) -> bool {
    bytes.first() == Some(&IAC)
}

/// Splits a read that carries several stacked commands.
///
/// A new command starts at every IAC that begins a command. A doubled IAC
/// is an escaped data byte, so `IAC SB NAWS 0 255 255 0 24 IAC SE` stays
/// whole, and `IAC SE` closes the sub-negotiation it belongs to. A trailing
/// IAC stays with the preceding command.
pub fn split_stacked(bytes: &[u8]) -> Vec<&[u8]> {
    let mut commands = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != IAC {
            i += 1;
            continue;
        }
        let next = match bytes.get(i + 1) {
            Some(&b) => b,
            None => break,
        };
        // escaped data byte, or the end of the open sub-negotiation
        if next == IAC || next == SE {
            i += 2;
            continue;
        }
        if i > start {
            commands.push(&bytes[start..i]);
            start = i;
        }
        i += 2;
    }
    if start < bytes.len() {
        commands.push(&bytes[start..]);
    }
    commands
}

/// Collapses every `IAC IAC` in a sub-negotiation payload to a single 0xFF
/// data byte. Stops at an unescaped `IAC SE`, so the terminator may be left on.
pub fn unescape_iac(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    let mut i = 0;
    while i < payload.len() {
        if payload[i] == IAC {
            match payload.get(i + 1) {
                Some(&IAC) => i += 1,
                Some(&SE) => break,
                _ => {}
            }
        }
        out.push(payload[i]);
        i += 1;
    }
    out
}

/// Decodes a NAWS payload: width and height as big-endian u16.
pub fn parse_screen_size(payload: &[u8]) -> Result<(u16, u16), ProtocolError> {
    if payload.len() < 4 {
        return Err(ProtocolError::Truncated {
            expected: 4,
            actual: payload.len(),
        });
    }
    let width = u16::from_be_bytes([payload[0], payload[1]]);
    let height = u16::from_be_bytes([payload[2], payload[3]]);
    Ok((width, height))
}

/// Returns the payload of `IAC SB <option> ... IAC SE`.
pub fn sub_negotiation_payload(bytes: &[u8], option: u8) -> Result<&[u8], ProtocolError> {
    let header = [IAC, SB, option];
    if bytes.len() < header.len() {
        return Err(ProtocolError::Truncated {
            expected: header.len(),
            actual: bytes.len(),
        });
    }
    if let Some(offset) = (0..header.len()).find(|&i| bytes[i] != header[i]) {
        return Err(ProtocolError::UnexpectedByte {
            byte: bytes[offset],
            offset,
        });
    }
    if bytes.len() < 5 || !bytes.ends_with(&[IAC, SE]) {
        return Err(ProtocolError::Unterminated);
    }
    Ok(&bytes[3..bytes.len() - 2])
}

pub fn byte_name(b: u8) -> &'static str {
    match b {
        IAC => "IAC",
        DONT => "DONT",
        DO => "DO",
        WONT => "WONT",
        WILL => "WILL",
        SB => "SB",
        GA => "GA",
        EL => "EL",
        EC => "EC",
        AYT => "AYT",
        AO => "AO",
        IP => "IP",
        BRK => "BRK",
        DM => "DM",
        NOP => "NOP",
        SE => "SE",
        _ => "?",
    }
}

pub fn option_name(b: u8) -> &'static str {
    match b {
        OPT_BINARY => "OPT_BINARY",
        OPT_ECHO => "OPT_ECHO",
        OPT_SUPPRESS_GO_AHEAD => "OPT_SUPPRESS_GO_AHEAD",
        OPT_STATUS => "OPT_STATUS",
        OPT_TIMING_MARK => "OPT_TIMING_MARK",
        OPT_TERMINAL_TYPE => "OPT_TERMINAL_TYPE",
        OPT_NAWS => "OPT_NAWS",
        OPT_TERMINAL_SPEED => "OPT_TERMINAL_SPEED",
        OPT_REMOTE_FLOW_CONTROL => "OPT_REMOTE_FLOW_CONTROL",
        OPT_LINEMODE => "OPT_LINEMODE",
        OPT_ENVIRON => "OPT_ENVIRON",
        OPT_NEW_ENVIRON => "OPT_NEW_ENVIRON",
        OPT_CHARSET => "OPT_CHARSET",
        OPT_MSDP => "OPT_MSDP",
        OPT_MSP => "OPT_MSP",
        OPT_GMCP => "OPT_GMCP",
        _ => "?",
    }
}

/// Renders a command as `[255 IAC][251 WILL][1 OPT_ECHO]` for logs.
///
/// The byte after a verb or SB is named as an option.
pub fn command_to_string(bytes: &[u8]) -> String {
    let mut out = String::new();
    let mut option_next = false;
    for &b in bytes {
        let name = if option_next { option_name(b) } else { byte_name(b) };
        let _ = write!(out, "[{} {}]", b, name);
        option_next = matches!(b, WILL | WONT | DO | DONT | SB);
    }
    out
}

/// Plain numeric dump, e.g. `[255, 250, 31]`.
pub fn bytes_string(bytes: &[u8]) -> String {
    format!("{:?}", bytes)
}
