//! MUD Sound Protocol.
//!
//! Sound and music requests are short ASCII commands. Telnet clients get
//! them inside `IAC SB MSP ... IAC SE`; the web client receives the bare
//! text because a framed transport cannot carry IAC.

use super::telnet::{TerminalCommand, DO, DONT, IAC, OPT_MSP, SB, SE, WILL};
use lantern_event_system::{Msp, SoundType};
use std::fmt;

pub const MSP_ENABLE: TerminalCommand = TerminalCommand::new(&[IAC, WILL, OPT_MSP], &[]);
pub const MSP_ACCEPT: TerminalCommand = TerminalCommand::new(&[IAC, DO, OPT_MSP], &[]);
pub const MSP_REFUSE: TerminalCommand = TerminalCommand::new(&[IAC, DONT, OPT_MSP], &[]);
pub const MSP_COMMAND: TerminalCommand = TerminalCommand::new(&[IAC, SB, OPT_MSP], &[IAC, SE]);

pub const MUSIC_OFF: &str = "!!MUSIC(Off)";

pub fn is_msp_command(bytes: &[u8]) -> bool {
    bytes.len() > 2 && bytes[0] == IAC && bytes[2] == OPT_MSP
}

/// `!!SOUND(file T=category V=volume)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundCommand {
    pub file: String,
    pub category: String,
    pub volume: u8,
}

impl fmt::Display for SoundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!!SOUND({} T={} V={})", self.file, self.category, self.volume)
    }
}

/// `!!MUSIC(file V=volume L=loop C=continue)`
///
/// `loops` of -1 repeats forever. `continue_playing` keeps an already
/// playing copy of the same file going instead of restarting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicCommand {
    pub file: String,
    pub volume: u8,
    pub loops: i32,
    pub continue_playing: bool,
}

impl fmt::Display for MusicCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "!!MUSIC({} V={} L={} C={})",
            self.file,
            self.volume,
            self.loops,
            u8::from(self.continue_playing)
        )
    }
}

/// Sent right after a client accepts MSP so it knows where to fetch files.
pub fn sound_off(cdn_url: &str) -> String {
    format!("!!SOUND(Off U={})", cdn_url)
}

/// Wraps a command for the given transport type.
pub fn wrap(command: &str, framed: bool) -> Vec<u8> {
    if framed {
        command.as_bytes().to_vec()
    } else {
        MSP_COMMAND.bytes_with_payload(command.as_bytes())
    }
}

/// Renders an [`Msp`] event into the frames to send, oldest first.
///
/// Music is deduplicated against `last_music`: asking for the track that
/// is already playing sends nothing, and switching tracks stops the old one
/// first. A music request for `"Off"` stops playback.
pub fn render(event: &Msp, framed: bool, last_music: &mut Option<String>) -> Vec<Vec<u8>> {
    match event.sound_type {
        SoundType::Sound => {
            let command = SoundCommand {
                file: event.sound_file.clone(),
                category: event.category.clone(),
                volume: event.volume,
            };
            vec![wrap(&command.to_string(), framed)]
        }
        SoundType::Music => {
            if last_music.as_deref() == Some(event.sound_file.as_str()) {
                return Vec::new();
            }

            let mut frames = Vec::new();
            if last_music.take().is_some() {
                frames.push(wrap(MUSIC_OFF, framed));
            }
            if event.sound_file.eq_ignore_ascii_case("off") {
                return frames;
            }

            let command = MusicCommand {
                file: event.sound_file.clone(),
                volume: event.volume,
                loops: -1,
                continue_playing: true,
            };
            frames.push(wrap(&command.to_string(), framed));
            *last_music = Some(event.sound_file.clone());
            frames
        }
    }
}
