//! MUD Server Data Protocol.
//!
//! Variables travel as `VAR name VAL value` pairs. A value is an opaque
//! string, a table (`TABLE_OPEN (VAR name VAL value)* TABLE_CLOSE`) or an
//! array (`ARRAY_OPEN (VAL value)* ARRAY_CLOSE`), nested freely.

use super::telnet::{self, TerminalCommand, DO, DONT, IAC, OPT_MSDP, SB, SE, WILL, WONT};
use crate::error::ProtocolError;
use std::collections::BTreeMap;

pub const MSDP_VAR: u8 = 1;
pub const MSDP_VAL: u8 = 2;
pub const MSDP_TABLE_OPEN: u8 = 3;
pub const MSDP_TABLE_CLOSE: u8 = 4;
pub const MSDP_ARRAY_OPEN: u8 = 5;
pub const MSDP_ARRAY_CLOSE: u8 = 6;

pub const MSDP_ENABLE: TerminalCommand = TerminalCommand::new(&[IAC, WILL, OPT_MSDP], &[]);
pub const MSDP_DISABLE: TerminalCommand = TerminalCommand::new(&[IAC, WONT, OPT_MSDP], &[]);
pub const MSDP_ACCEPT: TerminalCommand = TerminalCommand::new(&[IAC, DO, OPT_MSDP], &[]);
pub const MSDP_REFUSE: TerminalCommand = TerminalCommand::new(&[IAC, DONT, OPT_MSDP], &[]);
pub const MSDP_PAYLOAD: TerminalCommand = TerminalCommand::new(&[IAC, SB, OPT_MSDP], &[IAC, SE]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsdpValue {
    String(String),
    Table(BTreeMap<String, MsdpValue>),
    Array(Vec<MsdpValue>),
}

impl From<&str> for MsdpValue {
    fn from(s: &str) -> Self {
        MsdpValue::String(s.to_string())
    }
}

impl From<String> for MsdpValue {
    fn from(s: String) -> Self {
        MsdpValue::String(s)
    }
}

fn is_control(b: u8) -> bool {
    (MSDP_VAR..=MSDP_ARRAY_CLOSE).contains(&b) || b == IAC
}

/// Encodes `vars` as a complete `IAC SB MSDP ... IAC SE` sub-negotiation.
pub fn encode(vars: &BTreeMap<String, MsdpValue>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in vars {
        body.push(MSDP_VAR);
        body.extend_from_slice(name.as_bytes());
        body.push(MSDP_VAL);
        write_value(&mut body, value);
    }
    MSDP_PAYLOAD.bytes_with_payload(&body)
}

fn write_value(out: &mut Vec<u8>, value: &MsdpValue) {
    match value {
        MsdpValue::String(s) => out.extend_from_slice(s.as_bytes()),
        MsdpValue::Table(table) => {
            out.push(MSDP_TABLE_OPEN);
            for (key, item) in table {
                out.push(MSDP_VAR);
                out.extend_from_slice(key.as_bytes());
                out.push(MSDP_VAL);
                write_value(out, item);
            }
            out.push(MSDP_TABLE_CLOSE);
        }
        MsdpValue::Array(items) => {
            out.push(MSDP_ARRAY_OPEN);
            for item in items {
                out.push(MSDP_VAL);
                write_value(out, item);
            }
            out.push(MSDP_ARRAY_CLOSE);
        }
    }
}

/// Decodes a full `IAC SB MSDP ... IAC SE` sub-negotiation.
pub fn decode(bytes: &[u8]) -> Result<BTreeMap<String, MsdpValue>, ProtocolError> {
    let body = telnet::unescape_iac(telnet::sub_negotiation_payload(bytes, OPT_MSDP)?);
    let mut reader = Reader { data: &body, pos: 0, base: 3 };
    let vars = reader.read_pairs(None)?;
    Ok(vars)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    /// Offset of `data` inside the original packet, for error reporting
    base: usize,
}

impl Reader<'_> {
    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), ProtocolError> {
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(ProtocolError::UnexpectedByte {
                byte: b,
                offset: self.base + self.pos,
            }),
            None => Err(ProtocolError::Truncated {
                expected: self.base + self.pos + 1,
                actual: self.base + self.data.len(),
            }),
        }
    }

    fn read_string(&mut self) -> Result<String, ProtocolError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_control(b) {
                break;
            }
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.data[start..self.pos])?;
        Ok(text.to_string())
    }

    /// Reads `(VAR name VAL value)*` until `close` or, at top level, the end.
    fn read_pairs(&mut self, close: Option<u8>) -> Result<BTreeMap<String, MsdpValue>, ProtocolError> {
        let mut vars = BTreeMap::new();
        loop {
            match (self.peek(), close) {
                (None, None) => return Ok(vars),
                (Some(b), Some(c)) if b == c => {
                    self.pos += 1;
                    return Ok(vars);
                }
                _ => {}
            }
            self.expect(MSDP_VAR)?;
            let name = self.read_string()?;
            self.expect(MSDP_VAL)?;
            let value = self.read_value()?;
            vars.insert(name, value);
        }
    }

    fn read_value(&mut self) -> Result<MsdpValue, ProtocolError> {
        match self.peek() {
            Some(MSDP_TABLE_OPEN) => {
                self.pos += 1;
                Ok(MsdpValue::Table(self.read_pairs(Some(MSDP_TABLE_CLOSE))?))
            }
            Some(MSDP_ARRAY_OPEN) => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    if self.peek() == Some(MSDP_ARRAY_CLOSE) {
                        self.pos += 1;
                        return Ok(MsdpValue::Array(items));
                    }
                    self.expect(MSDP_VAL)?;
                    items.push(self.read_value()?);
                }
            }
            _ => Ok(MsdpValue::String(self.read_string()?)),
        }
    }
}

/// Single-line dump of a packet, e.g.
/// `TELNET_IAC TELNET_SB MSDP MSDP_VAR "HEALTH" MSDP_VAL "100" TELNET_IAC TELNET_SE`.
pub fn format_packet(bytes: &[u8]) -> String {
    let mut parts = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let name = match b {
            IAC => Some("TELNET_IAC"),
            SB => Some("TELNET_SB"),
            SE => Some("TELNET_SE"),
            MSDP_VAR => Some("MSDP_VAR"),
            MSDP_VAL => Some("MSDP_VAL"),
            MSDP_TABLE_OPEN => Some("MSDP_TABLE_OPEN"),
            MSDP_TABLE_CLOSE => Some("MSDP_TABLE_CLOSE"),
            MSDP_ARRAY_OPEN => Some("MSDP_ARRAY_OPEN"),
            MSDP_ARRAY_CLOSE => Some("MSDP_ARRAY_CLOSE"),
            OPT_MSDP if i > 0 && bytes[i - 1] == SB => Some("MSDP"),
            _ => None,
        };

        if let Some(name) = name {
            parts.push(name.to_string());
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && !is_control(bytes[i]) && bytes[i] != SB && bytes[i] != SE {
            i += 1;
        }
        parts.push(format!("\"{}\"", String::from_utf8_lossy(&bytes[start..i])));
    }
    parts.join(" ")
}
