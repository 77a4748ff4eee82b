//! The stock handlers and the names they are registered under.

use super::{ClientInput, Disconnect, InputHandler, SharedState};
use crate::protocol::telnet::{self, ASCII_BACKSPACE, ASCII_CR, ASCII_DELETE, ASCII_LF, ASCII_NULL, ASCII_SPACE, ASCII_TAB, BACKSPACE_SEQUENCE, OPT_GMCP, OPT_MSDP};
use crate::protocol::{ansi, gmcp, msdp, msp};
use lantern_event_system::{GmcpIn, System};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const TELNET_IAC: &str = "telnet_iac";
pub const ANSI: &str = "ansi";
pub const SIGNAL: &str = "signal";
pub const CLEANSER: &str = "cleanser";
pub const LOGIN: &str = "login";
pub const ECHO: &str = "echo";
pub const HISTORY: &str = "history";
pub const SYSTEM_COMMAND: &str = "system_command";

pub const CTRL_P: u8 = 0x10;
pub const CTRL_Q: u8 = 0x11;
pub const CTRL_W: u8 = 0x17;
pub const CTRL_X: u8 = 0x18;

pub const SYSTEM_COMMAND_PREFIX: char = '/';
pub const DEFAULT_SHUTDOWN_SECS: u64 = 15;

/// Wraps a plain function as an [`InputHandler`].
pub fn handler<F>(f: F) -> InputHandler
where
    F: Fn(&mut ClientInput, &mut SharedState) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Consumes telnet commands. Never passes IAC input down the chain.
pub fn telnet_iac(input: &mut ClientInput, shared: &mut SharedState) -> bool {
    if !telnet::is_command(&input.data_in) {
        return true;
    }

    let id = input.connection_id;
    for cmd in telnet::split_stacked(&input.data_in) {
        if gmcp::is_gmcp_command(cmd) {
            handle_gmcp(cmd, shared);
            continue;
        }

        if msp::is_msp_command(cmd) {
            if msp::MSP_ACCEPT.matches(cmd).is_some() {
                debug!("Connection {} accepted MSP", id);
                shared.record.update_settings(|s| s.msp_enabled = true);
                let hello = msp::sound_off(&shared.context.msp_cdn_url);
                shared.send(msp::wrap(&hello, false));
            } else if msp::MSP_REFUSE.matches(cmd).is_some() {
                debug!("Connection {} refused MSP", id);
                shared.record.update_settings(|s| s.msp_enabled = false);
            }
            continue;
        }

        if cmd.len() > 2 && cmd[2] == OPT_MSDP {
            if msdp::MSDP_ACCEPT.matches(cmd).is_some() {
                debug!("Connection {} accepted MSDP", id);
                shared.record.update_settings(|s| s.msdp_enabled = true);
            } else if msdp::MSDP_REFUSE.matches(cmd).is_some() {
                shared.record.update_settings(|s| s.msdp_enabled = false);
            } else {
                debug!("Connection {} sent MSDP {}", id, msdp::format_packet(cmd));
            }
            continue;
        }

        if let Some(payload) = telnet::ACCEPTED_CHARSET.matches(cmd) {
            debug!("Connection {} accepted charset {}", id, String::from_utf8_lossy(payload));
            continue;
        }

        if telnet::REJECTED_CHARSET.matches(cmd).is_some() {
            debug!("Connection {} rejected charset", id);
            continue;
        }

        if telnet::AGREE_CHARSET.matches(cmd).is_some() {
            debug!("Connection {} agreed to charset negotiation", id);
            shared.send(telnet::CHARSET.bytes_with_payload(telnet::CHARSET_UTF8));
            continue;
        }

        if telnet::DONT_SUPPRESS_GO_AHEAD.matches(cmd).is_some() {
            debug!("Connection {} wants go-ahead", id);
            shared.record.update_settings(|s| s.send_go_ahead = true);
            continue;
        }

        if let Some(payload) = telnet::SCREEN_SIZE_RESPONSE.matches(cmd) {
            match telnet::parse_screen_size(&telnet::unescape_iac(payload)) {
                Ok((width, height)) => {
                    debug!("Connection {} screen size {}x{}", id, width, height);
                    shared.record.update_settings(|s| {
                        s.screen_width = u32::from(width);
                        s.screen_height = u32::from(height);
                    });
                }
                Err(e) => debug!("Connection {} sent bad NAWS {}: {}", id, telnet::bytes_string(payload), e),
            }
            continue;
        }

        debug!("Connection {} unhandled IAC {}", id, telnet::command_to_string(cmd));
    }

    false
}

fn handle_gmcp(cmd: &[u8], shared: &mut SharedState) {
    let id = shared.connection_id();

    if gmcp::GMCP_ACCEPT.matches(cmd).is_some() {
        debug!("Connection {} accepted GMCP", id);
        shared.record.update_settings(|s| s.gmcp_enabled = true);
        return;
    }
    if gmcp::GMCP_REFUSE.matches(cmd).is_some() {
        debug!("Connection {} refused GMCP", id);
        shared.record.update_settings(|s| s.gmcp_enabled = false);
        return;
    }

    let body = match telnet::sub_negotiation_payload(cmd, OPT_GMCP) {
        Ok(body) => body,
        Err(e) => {
            debug!("Connection {} sent malformed GMCP {}: {}", id, telnet::bytes_string(cmd), e);
            return;
        }
    };

    let body = telnet::unescape_iac(body);
    let (command, payload) = gmcp::split_body(&body);
    let package = match gmcp::parse_package(&command, payload) {
        Ok(Some(package)) => package,
        Ok(None) => {
            debug!("Connection {} GMCP {} ignored", id, command);
            return;
        }
        Err(e) => {
            debug!("Connection {} GMCP {} undecodable: {}", id, command, e);
            return;
        }
    };

    debug!("Connection {} GMCP {} handled", id, command);
    shared.record.update_settings(|s| match package {
        gmcp::Package::Hello(hello) => {
            s.client.is_mudlet = hello.client.eq_ignore_ascii_case("mudlet");
            s.client.name = hello.client;
            s.client.version = hello.version;
        }
        gmcp::Package::SupportsSet(modules) => s.gmcp_modules.extend(modules),
        gmcp::Package::SupportsRemove(names) => {
            for name in names {
                s.gmcp_modules.remove(&name);
            }
        }
        gmcp::Package::DiscordHello(discord) => {
            s.discord.user = discord.user;
            s.discord.private = discord.private;
        }
    });

    shared.emit(GmcpIn {
        connection_id: id,
        command,
        json: payload.to_vec(),
    });
}

/// Cursor keys walk the history; screen size reports update settings.
///
/// Recognised cursor keys rewrite `data_in` and pass it on so the cleanser
/// and echo redraw the recalled line. Everything else ANSI is consumed.
pub fn ansi(input: &mut ClientInput, shared: &mut SharedState) -> bool {
    if !ansi::is_command(&input.data_in) {
        return true;
    }

    let id = input.connection_id;
    let commands: Vec<Vec<u8>> = ansi::split_stacked(&input.data_in)
        .into_iter()
        .map(<[u8]>::to_vec)
        .collect();

    let mut next_handler = false;
    for cmd in commands {
        if let Some(payload) = ansi::CLIENT_SCREEN_SIZE.matches(&cmd) {
            match ansi::parse_screen_size(payload) {
                Ok((width, height)) => {
                    debug!("Connection {} ANSI screen size {}x{}", id, width, height);
                    shared.record.update_settings(|s| {
                        s.screen_width = u32::from(width);
                        s.screen_height = u32::from(height);
                    });
                }
                Err(e) => debug!("Connection {} sent bad ANSI screen size: {}", id, e),
            }
            continue;
        }

        let up = ansi::MOVE_CURSOR_UP.matches(&cmd).is_some();
        if up || ansi::MOVE_CURSOR_DOWN.matches(&cmd).is_some() {
            let len = input.buffer.len();
            let mut erase = vec![ASCII_BACKSPACE; len];
            erase.extend(std::iter::repeat(ASCII_SPACE).take(len));
            erase.extend(std::iter::repeat(ASCII_BACKSPACE).take(len));
            shared.send(erase);

            if up {
                input.history.previous();
            } else {
                input.history.next();
            }
            input.data_in = input.history.get().map(<[u8]>::to_vec).unwrap_or_default();
            input.buffer.clear();
            input.enter_pressed = false;
            next_handler = true;
            continue;
        }

        debug!("Connection {} unhandled ANSI {}", id, ansi::command_to_string(&cmd));
    }

    next_handler
}

/// Control-key shortcuts.
pub fn signal(input: &mut ClientInput, _shared: &mut SharedState) -> bool {
    let Some(&last) = input.data_in.last() else {
        return true;
    };

    let command: &[u8] = match last {
        CTRL_Q => b"/quit",
        CTRL_W => b"/who",
        CTRL_X => b"/shutdown 0",
        CTRL_P => {
            input.data_in = input.clipboard.clone();
            input.buffer.clear();
            input.enter_pressed = false;
            return true;
        }
        _ => return true,
    };

    input.data_in = command.to_vec();
    input.buffer.clear();
    input.enter_pressed = true;
    true
}

/// Handles backspace and line endings, strips non-printables and appends
/// what is left to the edit buffer.
pub fn cleanser(input: &mut ClientInput, shared: &mut SharedState) -> bool {
    let Some(&last) = input.data_in.last() else {
        return true;
    };

    if last == ASCII_DELETE || last == ASCII_BACKSPACE {
        input.bs_pressed = true;
        if input.buffer.pop().is_some() {
            shared.send(BACKSPACE_SEQUENCE);
        }
        input.data_in.pop();
        return true;
    }

    if last == ASCII_TAB {
        input.tab_pressed = true;
    } else if matches!(last, ASCII_NULL | ASCII_LF | ASCII_CR) {
        input.enter_pressed = true;
    }

    let printable: String = String::from_utf8_lossy(&input.data_in)
        .chars()
        .filter(|c| !c.is_control() && *c != char::REPLACEMENT_CHARACTER)
        .collect();
    input.data_in = printable.into_bytes();
    input.buffer.extend_from_slice(&input.data_in);
    true
}

/// Mirrors typed input back to the client.
///
/// Web clients edit locally and only get the submitted line back.
pub fn echo(input: &mut ClientInput, shared: &mut SharedState) -> bool {
    if shared.record.is_framed() {
        if input.enter_pressed {
            let mut line = input.buffer.clone();
            line.push(b'\n');
            shared.send(line);
        }
        return true;
    }

    if input.enter_pressed {
        shared.send(b"\n".to_vec());
    } else if !input.bs_pressed && !input.data_in.is_empty() {
        shared.send(input.data_in.clone());
    }
    true
}

/// Remembers submitted lines.
pub fn history(input: &mut ClientInput, _shared: &mut SharedState) -> bool {
    if input.enter_pressed && !input.buffer.trim_ascii().is_empty() {
        input.history.add(&input.buffer);
        input.last_submitted = input.buffer.clone();
    }
    true
}

/// Server-level slash commands: `/quit`, `/reload` and `/shutdown [secs]`.
pub fn system_command(input: &mut ClientInput, shared: &mut SharedState) -> bool {
    if !input.enter_pressed {
        return true;
    }

    let message = String::from_utf8_lossy(&input.buffer).trim().to_string();
    let Some(rest) = message.strip_prefix(SYSTEM_COMMAND_PREFIX) else {
        return true;
    };

    let (command, arg) = split_command(rest);
    match command.as_str() {
        "quit" => {
            info!("Connection {} issued /quit", input.connection_id);
            shared.send(b"Goodbye!\n".to_vec());
            shared.request_disconnect(Disconnect::Kick);
        }
        "reload" => {
            info!("Connection {} issued /reload", input.connection_id);
            shared.emit(System {
                command: "reload".to_string(),
                data: None,
            });
        }
        "shutdown" => {
            let secs = if arg.is_empty() {
                DEFAULT_SHUTDOWN_SECS
            } else {
                arg.parse().unwrap_or_else(|_| {
                    warn!("Invalid /shutdown delay {:?}, using {}s", arg, DEFAULT_SHUTDOWN_SECS);
                    DEFAULT_SHUTDOWN_SECS
                })
            };
            info!("Connection {} issued /shutdown {}", input.connection_id, secs);
            shared.shutdown_in = Some(secs);
        }
        _ => return true,
    }

    input.buffer.clear();
    false
}

/// `"Shutdown 30"` becomes `("shutdown", "30")`.
fn split_command(cmd: &str) -> (String, String) {
    let cmd = cmd.trim();
    match cmd.split_once(' ') {
        Some((command, arg)) => (command.to_lowercase(), arg.trim().to_string()),
        None => (cmd.to_lowercase(), String::new()),
    }
}

/// Whether the shutdown countdown announces `remaining` seconds.
///
/// The first second always announces; above a minute every 30s, above
/// 15s every 15s, then every 5s.
pub fn countdown_announces(remaining: u64, total: u64) -> bool {
    if remaining == total {
        return true;
    }
    if remaining > 60 {
        remaining % 30 == 0
    } else if remaining > 15 {
        remaining % 15 == 0
    } else {
        remaining % 5 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionRecord, ConnectionRegistry};
    use crate::input::{MemoryAccountStore, SessionContext};
    use crate::protocol::telnet::{DO, DONT, IAC, OPT_CHARSET, OPT_MSP, OPT_NAWS, OPT_SUPPRESS_GO_AHEAD, SB, SE};
    use crate::transport::MemoryTransport;
    use lantern_event_system::{EventBus, EventKind};

    fn setup(framed: bool) -> (ClientInput, SharedState, Arc<ConnectionRecord>) {
        let registry = ConnectionRegistry::new();
        let record = registry.add(MemoryTransport::new(framed));
        let mut context = SessionContext::new(Arc::new(EventBus::new()), Arc::new(MemoryAccountStore::new()));
        context.msp_cdn_url = "http://cdn/".to_string();
        let shared = SharedState::new(record.clone(), Arc::new(context));
        (ClientInput::new(record.id()), shared, record)
    }

    #[test]
    fn test_telnet_negotiation_updates_settings() {
        let (mut input, mut shared, record) = setup(false);
        input.data_in = vec![
            IAC, SB, OPT_NAWS, 0, 132, 0, 50, IAC, SE, IAC, DONT, OPT_SUPPRESS_GO_AHEAD, IAC, DO, OPT_MSP,
        ];
        assert!(!telnet_iac(&mut input, &mut shared));

        let settings = record.settings();
        assert_eq!((settings.screen_width, settings.screen_height), (132, 50));
        assert!(settings.send_go_ahead);
        assert!(settings.msp_enabled);

        let out = shared.take_outbound();
        assert_eq!(out.len(), 1);
        assert_eq!(msp::MSP_COMMAND.matches(&out[0]), Some(&b"!!SOUND(Off U=http://cdn/)"[..]));
    }

    #[test]
    fn test_screen_width_with_escaped_iac() {
        let (mut input, mut shared, record) = setup(false);
        // width 255 arrives as a doubled IAC
        input.data_in = vec![IAC, SB, OPT_NAWS, 0, IAC, IAC, 0, 24, IAC, SE, IAC, DO, OPT_MSP];
        telnet_iac(&mut input, &mut shared);

        let settings = record.settings();
        assert_eq!((settings.screen_width, settings.screen_height), (255, 24));
        assert!(settings.msp_enabled);
    }

    #[test]
    fn test_telnet_charset_agree_sends_name() {
        let (mut input, mut shared, _) = setup(false);
        input.data_in = vec![IAC, DO, OPT_CHARSET];
        telnet_iac(&mut input, &mut shared);
        assert_eq!(shared.take_outbound(), vec![telnet::CHARSET.bytes_with_payload(b" UTF-8")]);
    }

    #[test]
    fn test_plain_text_passes_telnet_and_ansi() {
        let (mut input, mut shared, _) = setup(false);
        input.data_in = b"look".to_vec();
        assert!(telnet_iac(&mut input, &mut shared));
        assert!(ansi(&mut input, &mut shared));
    }

    #[test]
    fn test_gmcp_packages_update_settings_and_emit() {
        let (mut input, mut shared, record) = setup(false);
        let mut hello = gmcp::GMCP_PAYLOAD.bytes_with_payload(br#"Core.Hello {"client":"Mudlet","version":"4.17"}"#);
        hello.extend(gmcp::GMCP_PAYLOAD.bytes_with_payload(br#"Core.Supports.Set ["Char.Vitals 1"]"#));
        hello.extend(gmcp::GMCP_PAYLOAD.bytes_with_payload(br#"Char.Unknown {}"#));
        input.data_in = [vec![IAC, DO, OPT_GMCP], hello].concat();

        assert!(!telnet_iac(&mut input, &mut shared));
        let settings = record.settings();
        assert!(settings.gmcp_enabled);
        assert!(settings.client.is_mudlet);
        assert_eq!(settings.client.version, "4.17");
        assert!(settings.gmcp_module_enabled("Char"));
        assert!(settings.gmcp_module_enabled("Char.Vitals"));

        let queue = shared.bus().get_queue(GmcpIn::EVENT_TYPE);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_cursor_up_recalls_history() {
        let (mut input, mut shared, _) = setup(false);
        input.history.add(b"say hi");
        input.buffer = b"ab".to_vec();
        input.data_in = vec![ansi::ESC, b'[', b'A'];

        assert!(ansi(&mut input, &mut shared));
        assert_eq!(input.data_in, b"say hi");
        assert!(input.buffer.is_empty());
        assert_eq!(shared.take_outbound(), vec![vec![8, 8, 32, 32, 8, 8]]);
    }

    #[test]
    fn test_signal_shortcuts() {
        let (mut input, mut shared, _) = setup(false);
        input.buffer = b"half typed".to_vec();
        input.data_in = vec![CTRL_Q];
        assert!(signal(&mut input, &mut shared));
        assert_eq!(input.data_in, b"/quit");
        assert!(input.buffer.is_empty());
        assert!(input.enter_pressed);

        input.reset();
        input.clipboard = b"get all".to_vec();
        input.data_in = vec![CTRL_P];
        signal(&mut input, &mut shared);
        assert_eq!(input.data_in, b"get all");
        assert!(!input.enter_pressed);
    }

    #[test]
    fn test_cleanser_backspace_and_enter() {
        let (mut input, mut shared, _) = setup(false);
        input.data_in = b"ab\x01c".to_vec();
        cleanser(&mut input, &mut shared);
        assert_eq!(input.buffer, b"abc");
        assert!(!input.enter_pressed);

        input.data_in = vec![ASCII_DELETE];
        cleanser(&mut input, &mut shared);
        assert!(input.bs_pressed);
        assert_eq!(input.buffer, b"ab");
        assert_eq!(shared.take_outbound(), vec![BACKSPACE_SEQUENCE.to_vec()]);

        input.data_in = b"\r\n".to_vec();
        cleanser(&mut input, &mut shared);
        assert!(input.enter_pressed);
        assert_eq!(input.buffer, b"ab");
    }

    #[test]
    fn test_backspace_on_empty_buffer_sends_nothing() {
        let (mut input, mut shared, _) = setup(false);
        input.data_in = vec![ASCII_BACKSPACE];
        cleanser(&mut input, &mut shared);
        assert!(input.bs_pressed);
        assert!(shared.take_outbound().is_empty());
    }

    #[test]
    fn test_history_ignores_blank_lines() {
        let (mut input, mut shared, _) = setup(false);
        input.enter_pressed = true;
        input.buffer = b"   ".to_vec();
        history(&mut input, &mut shared);
        assert!(input.history.is_empty());

        input.buffer = b"north".to_vec();
        history(&mut input, &mut shared);
        assert_eq!(input.history.get(), Some(&b"north"[..]));
        assert_eq!(input.last_submitted, b"north");
    }

    #[test]
    fn test_system_commands() {
        let (mut input, mut shared, _) = setup(false);
        input.enter_pressed = true;

        input.buffer = b"/Shutdown 30".to_vec();
        assert!(!system_command(&mut input, &mut shared));
        assert_eq!(shared.shutdown_in, Some(30));
        assert!(input.buffer.is_empty());

        input.buffer = b"/quit".to_vec();
        assert!(!system_command(&mut input, &mut shared));
        assert_eq!(shared.disconnect, Some(Disconnect::Kick));

        input.buffer = b"/who".to_vec();
        assert!(system_command(&mut input, &mut shared));
        assert_eq!(input.buffer, b"/who");

        input.buffer = b"/reload".to_vec();
        assert!(!system_command(&mut input, &mut shared));
        assert_eq!(shared.bus().get_queue(System::EVENT_TYPE).len(), 1);
    }

    #[test]
    fn test_countdown_schedule() {
        let announced: Vec<u64> = (1..=100).rev().filter(|&i| countdown_announces(i, 100)).collect();
        assert_eq!(announced, vec![100, 90, 60, 45, 30, 15, 10, 5]);
        assert!(countdown_announces(7, 7));
    }
}
