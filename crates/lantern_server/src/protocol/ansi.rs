//! ANSI escape sequences sent by terminal clients.

use super::telnet::TerminalCommand;
use crate::error::ProtocolError;
use std::fmt::Write as _;

pub const ESC: u8 = 27;

pub const MOVE_CURSOR_UP: TerminalCommand = TerminalCommand::new(&[ESC, b'['], b"A");
pub const MOVE_CURSOR_DOWN: TerminalCommand = TerminalCommand::new(&[ESC, b'['], b"B");
pub const MOVE_CURSOR_COLUMN: TerminalCommand = TerminalCommand::new(&[ESC, b'['], b"G");
pub const ERASE_LINE: TerminalCommand = TerminalCommand::new(&[ESC, b'['], b"2K");

/// Client reply to a cursor position request: `ESC [ rows ; cols R`.
pub const CLIENT_SCREEN_SIZE: TerminalCommand = TerminalCommand::new(&[ESC, b'['], b"R");

const SAVE_CURSOR: &[u8] = &[ESC, b'[', b's'];
const RESTORE_CURSOR: &[u8] = &[ESC, b'[', b'u'];
const MOVE_CURSOR_BOTTOM_RIGHT: &[u8] = &[ESC, b'[', b'9', b'9', b'9', b';', b'9', b'9', b'9', b'H'];
const REQUEST_CURSOR_POSITION: &[u8] = &[ESC, b'[', b'6', b'n'];

/// Asks the terminal for its size by parking the cursor in the far corner
/// and requesting its position.
pub fn request_resolution() -> Vec<u8> {
    [SAVE_CURSOR, MOVE_CURSOR_BOTTOM_RIGHT, REQUEST_CURSOR_POSITION, RESTORE_CURSOR].concat()
}

pub fn is_command(bytes: &[u8]) -> bool {
    bytes.first() == Some(&ESC)
}

/// Splits a read at every ESC after the first byte.
pub fn split_stacked(bytes: &[u8]) -> Vec<&[u8]> {
    let mut commands = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate().skip(1) {
        if b == ESC {
            commands.push(&bytes[start..i]);
            start = i;
        }
    }
    if start < bytes.len() {
        commands.push(&bytes[start..]);
    }
    commands
}

/// Parses the `rows;cols` payload of a screen size report into `(width, height)`.
pub fn parse_screen_size(payload: &[u8]) -> Result<(u16, u16), ProtocolError> {
    let text = std::str::from_utf8(payload)?;
    let (rows, cols) = text.split_once(';').ok_or(ProtocolError::Truncated {
        expected: 3,
        actual: payload.len(),
    })?;
    let parse = |s: &str, offset: usize| {
        s.trim().parse::<u16>().map_err(|_| ProtocolError::UnexpectedByte {
            byte: s.bytes().next().unwrap_or(0),
            offset,
        })
    };
    let height = parse(rows, 0)?;
    let width = parse(cols, rows.len() + 1)?;
    Ok((width, height))
}

pub fn command_to_string(bytes: &[u8]) -> String {
    let mut out = String::new();
    for &b in bytes {
        let _ = write!(out, "[{} {}]", b, if b == ESC { "ESC".to_string() } else { (b as char).to_string() });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_keys_match() {
        assert!(MOVE_CURSOR_UP.matches(&[ESC, b'[', b'A']).is_some());
        assert!(MOVE_CURSOR_DOWN.matches(&[ESC, b'[', b'B']).is_some());
        assert!(MOVE_CURSOR_UP.matches(&[ESC, b'[', b'B']).is_none());
    }

    #[test]
    fn test_screen_size_report() {
        let report = b"\x1b[40;132R";
        let payload = CLIENT_SCREEN_SIZE.matches(report).unwrap();
        assert_eq!(payload, b"40;132");
        assert_eq!(parse_screen_size(payload), Ok((132, 40)));
        assert!(parse_screen_size(b"40").is_err());
        assert!(parse_screen_size(b"x;1").is_err());
    }

    #[test]
    fn test_split_stacked_escapes() {
        let data = b"\x1b[A\x1b[B";
        let parts = split_stacked(data);
        assert_eq!(parts, vec![&b"\x1b[A"[..], &b"\x1b[B"[..]]);
    }

    #[test]
    fn test_request_resolution_layout() {
        let bytes = request_resolution();
        assert!(bytes.starts_with(SAVE_CURSOR));
        assert!(bytes.ends_with(RESTORE_CURSOR));
    }
}
