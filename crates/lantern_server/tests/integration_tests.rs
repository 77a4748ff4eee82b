//! Integration tests for sessions, the prompt engine and fan-out.
//!
//! Most tests drive sessions through the in-memory transport; the last one
//! logs in over a real loopback telnet socket.

use lantern_event_system::{downcast_event, ConnectionClosed, EventBus, EventKind, Input, ListenerResult, LoginCompleted};
use lantern_server::connection::{ConnectState, ConnectionRecord, ConnectionRegistry};
use lantern_server::input::handlers::handler;
use lantern_server::input::prompt::{prompt_handler, PromptStep, Results, TOO_MANY_MISTAKES};
use lantern_server::input::{ClientInput, Disconnect, Question, SessionContext, SharedState};
use lantern_server::protocol::telnet;
use lantern_server::server::{reap_zombies, Session};
use lantern_server::transport::MemoryTransport;
use lantern_server::{create_server_with_config, AccountStore, MemoryAccountStore, ServerConfig};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

fn context_with(accounts: Arc<MemoryAccountStore>) -> Arc<SessionContext> {
    Arc::new(SessionContext::new(Arc::new(EventBus::new()), accounts))
}

fn written_text(transport: &MemoryTransport) -> String {
    String::from_utf8_lossy(&transport.written()).into_owned()
}

fn inputs(bus: &EventBus) -> Vec<String> {
    let queue = bus.get_queue(Input::EVENT_TYPE);
    let mut texts = Vec::new();
    while let Some(event) = queue.poll() {
        if let Ok(input) = downcast_event::<Input>(event.as_ref()) {
            texts.push(input.input_text.clone());
        }
    }
    texts
}

#[tokio::test]
async fn test_fan_out_isolates_failed_writer() {
    let registry = ConnectionRegistry::new();
    let transports: Vec<_> = (0..3).map(|_| MemoryTransport::new(false)).collect();
    for transport in &transports {
        registry.add(transport.clone()).set_state(ConnectState::LoggedIn);
    }
    transports[1].set_fail_writes(true);

    let mut sent = registry.broadcast(b"The sun rises.\n", &[]).await;
    sent.sort_unstable();

    assert_eq!(sent, vec![1, 3]);
    assert_eq!(transports[0].written(), b"The sun rises.\r\n".to_vec());
    assert_eq!(transports[2].written(), b"The sun rises.\r\n".to_vec());
    assert!(registry.get(2).is_none());
    assert!(transports[1].is_closed());
    assert_eq!(registry.stats().disconnected, 1);
}

fn submit(record: &ConnectionRecord, input: &mut ClientInput, shared: &mut SharedState, line: &str) -> bool {
    input.buffer = line.as_bytes().to_vec();
    input.enter_pressed = true;
    let (continued, _) = record.handle_input(input, shared).unwrap();
    input.enter_pressed = false;
    continued
}

fn yes_no_dialog(completions: Arc<AtomicUsize>) -> lantern_server::input::InputHandler {
    let steps = vec![
        PromptStep::choice(
            "confirm",
            Question::new("Are you sure?", vec!["yes".to_string(), "no".to_string()], ""),
        ),
        PromptStep::new("reason", "Why? "),
    ];
    prompt_handler(
        steps,
        Arc::new(move |results: &Results, _shared: &mut SharedState| {
            completions.fetch_add(1, Ordering::SeqCst);
            results.get("confirm").map(String::as_str) == Some("yes")
        }),
    )
}

#[test]
fn test_prompt_three_strikes_disconnects_without_completion() {
    let transport = MemoryTransport::new(false);
    let record = Arc::new(ConnectionRecord::new(1, transport));
    let context = context_with(Arc::new(MemoryAccountStore::new()));
    let mut shared = SharedState::new(record.clone(), context);
    let mut input = ClientInput::new(1);

    let completions = Arc::new(AtomicUsize::new(0));
    record.add_handler("dialog", yes_no_dialog(completions.clone()), None);

    // first pass only sends the prompt
    assert!(!submit(&record, &mut input, &mut shared, ""));
    assert_eq!(shared.take_outbound(), vec![b"Are you sure? [yes/no] ".to_vec()]);

    for _ in 0..2 {
        assert!(!submit(&record, &mut input, &mut shared, "maybe"));
        assert_eq!(shared.disconnect, None);
    }
    assert!(!submit(&record, &mut input, &mut shared, "perhaps"));

    assert_eq!(shared.disconnect, Some(Disconnect::Remove));
    assert_eq!(completions.load(Ordering::SeqCst), 0);
    let sent: Vec<u8> = shared.take_outbound().concat();
    assert!(String::from_utf8_lossy(&sent).ends_with(TOO_MANY_MISTAKES));
}

#[test]
fn test_prompt_completes_once() {
    let record = Arc::new(ConnectionRecord::new(1, MemoryTransport::new(false)));
    let context = context_with(Arc::new(MemoryAccountStore::new()));
    let mut shared = SharedState::new(record.clone(), context);
    let mut input = ClientInput::new(1);

    let completions = Arc::new(AtomicUsize::new(0));
    record.add_handler("dialog", yes_no_dialog(completions.clone()), None);
    record.add_handler("after", handler(|_, _| true), None);

    assert!(!submit(&record, &mut input, &mut shared, ""));
    // one mistake does not end the dialog
    assert!(!submit(&record, &mut input, &mut shared, "hmm"));
    assert!(!submit(&record, &mut input, &mut shared, "yes"));
    assert!(submit(&record, &mut input, &mut shared, "just because"));

    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert!(shared.prompt.is_none());
    assert_eq!(shared.disconnect, None);
}

#[tokio::test]
async fn test_new_account_session() {
    let accounts = Arc::new(MemoryAccountStore::new());
    let context = context_with(accounts.clone());
    let registry = Arc::new(ConnectionRegistry::new());
    let transport = MemoryTransport::new(false);
    let record = registry.add(transport.clone());

    for line in ["new\r", "alice\r", "secret1\r", "secret1\r", "\r", "look\r", "/quit\r"] {
        transport.feed(line);
    }

    let session = Session::new(registry.clone(), context.clone(), record.clone());
    timeout(Duration::from_secs(5), session.run())
        .await
        .expect("session did not finish");

    assert!(accounts.verify("alice", "secret1"));
    assert_eq!(context.bus.get_queue(LoginCompleted::EVENT_TYPE).len(), 1);
    // the empty line is the login submission itself
    assert_eq!(inputs(&context.bus), vec!["".to_string(), "look".to_string()]);

    let text = written_text(&transport);
    assert!(text.contains("Welcome, alice!"));
    assert!(text.contains("Goodbye!"));
    assert!(!text.contains("secret1"));

    assert_eq!(record.state(), ConnectState::Zombie);
    assert!(registry.get(1).is_some());
    assert!(transport.is_closed());
}

#[tokio::test]
async fn test_wrong_password_removes_session() {
    let accounts = Arc::new(MemoryAccountStore::new());
    accounts.create("bob", "hunter22", None).unwrap();
    let context = context_with(accounts);
    let registry = Arc::new(ConnectionRegistry::new());
    let transport = MemoryTransport::new(false);
    let record = registry.add(transport.clone());

    transport.feed("bob\r");
    transport.feed("hunter23\r");

    timeout(Duration::from_secs(5), Session::new(registry.clone(), context.clone(), record).run())
        .await
        .expect("session did not finish");

    assert!(written_text(&transport).contains("Oops, bye!"));
    assert_eq!(registry.active_count(), 0);
    assert_eq!(context.bus.get_queue(LoginCompleted::EVENT_TYPE).len(), 0);
}

#[tokio::test]
async fn test_password_mismatch_asks_for_both_again() {
    let accounts = Arc::new(MemoryAccountStore::new());
    let context = context_with(accounts.clone());
    let registry = Arc::new(ConnectionRegistry::new());
    let transport = MemoryTransport::new(false);
    let record = registry.add(transport.clone());

    for line in ["new\r", "dave\r", "pass1\r", "pass2\r", "pass3\r", "pass3\r", "\r", "/quit\r"] {
        transport.feed(line);
    }

    timeout(Duration::from_secs(5), Session::new(registry.clone(), context.clone(), record).run())
        .await
        .expect("session did not finish");

    let text = written_text(&transport);
    assert!(text.contains("your passwords did not match"));
    assert_eq!(text.matches("Choose a password").count(), 2);
    assert_eq!(text.matches("Confirm password").count(), 2);
    assert!(text.contains("Welcome, dave!"));
    assert!(accounts.verify("dave", "pass3"));
    assert!(!accounts.verify("dave", "pass1"));
}

#[tokio::test]
async fn test_password_mismatches_share_one_strike_count() {
    let accounts = Arc::new(MemoryAccountStore::new());
    let context = context_with(accounts.clone());
    let registry = Arc::new(ConnectionRegistry::new());
    let transport = MemoryTransport::new(false);
    let record = registry.add(transport.clone());

    transport.feed("new\r");
    transport.feed("erin\r");
    for (first, second) in [("aaaa", "bbbb"), ("cccc", "dddd"), ("eeee", "ffff")] {
        transport.feed(format!("{first}\r"));
        transport.feed(format!("{second}\r"));
    }

    timeout(Duration::from_secs(5), Session::new(registry.clone(), context.clone(), record).run())
        .await
        .expect("session did not finish");

    let text = written_text(&transport);
    assert_eq!(text.matches("your passwords did not match").count(), 3);
    assert!(text.contains(TOO_MANY_MISTAKES));
    assert!(!accounts.exists("erin"));
    assert_eq!(registry.active_count(), 0);
    assert_eq!(context.bus.get_queue(LoginCompleted::EVENT_TYPE).len(), 0);
}

#[tokio::test]
async fn test_dropped_players_are_reaped() {
    let accounts = Arc::new(MemoryAccountStore::new());
    let context = context_with(accounts);
    let registry = Arc::new(ConnectionRegistry::new());

    for name in ["fern", "gus"] {
        let transport = MemoryTransport::new(false);
        let record = registry.add(transport.clone());
        let username = format!("{name}\r");
        for line in ["new\r", username.as_str(), "secret\r", "secret\r", "\r"] {
            transport.feed(line);
        }
        // connection lost without /quit
        transport.end();
        timeout(Duration::from_secs(5), Session::new(registry.clone(), context.clone(), record).run())
            .await
            .expect("session did not finish");
    }

    let stats = registry.stats();
    assert_eq!((stats.connected, stats.disconnected, stats.active, stats.zombies), (2, 2, 2, 2));
    assert_eq!(registry.live_count(), 0);

    assert_eq!(reap_zombies(&context.bus, &registry, Duration::from_secs(60)).await, 0);
    assert_eq!(reap_zombies(&context.bus, &registry, Duration::ZERO).await, 2);

    let stats = registry.stats();
    assert_eq!((stats.connected, stats.disconnected, stats.active, stats.zombies), (2, 2, 0, 0));

    let closed = context.bus.get_queue(ConnectionClosed::EVENT_TYPE);
    let mut final_closes = Vec::new();
    while let Some(event) = closed.poll() {
        if let Some(event) = event.as_any().downcast_ref::<ConnectionClosed>() {
            if !event.zombie {
                final_closes.push(event.connection_id);
            }
        }
    }
    assert_eq!(final_closes, vec![1, 2]);
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap()
}

/// Reads until `needle` shows up and returns everything read so far.
async fn read_until(stream: &mut TcpStream, seen: &mut Vec<u8>, needle: &str) -> Vec<u8> {
    let mut buf = [0u8; 512];
    while !String::from_utf8_lossy(seen).contains(needle) {
        let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("timed out waiting for server output")
            .unwrap();
        assert!(n > 0, "server closed before sending {:?}", needle);
        seen.extend_from_slice(&buf[..n]);
    }
    std::mem::take(seen)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_telnet_login_over_loopback() {
    let address = SocketAddr::from(([127, 0, 0, 1], free_port()));
    let config = ServerConfig {
        telnet_address: address,
        websocket_address: None,
        tick_interval_ms: 10,
        ..Default::default()
    };
    let server = Arc::new(create_server_with_config(config));
    let bus = server.get_event_bus();

    let logins = Arc::new(Mutex::new(Vec::new()));
    let seen_logins = logins.clone();
    bus.on(move |event: &LoginCompleted| {
        seen_logins.lock().push(event.username.clone());
        ListenerResult::Continue
    });
    let commands = Arc::new(Mutex::new(Vec::new()));
    let seen_commands = commands.clone();
    bus.on(move |event: &Input| {
        seen_commands.lock().push(event.input_text.clone());
        ListenerResult::Continue
    });

    let runner = server.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    let mut stream = None;
    for _ in 0..50 {
        if let Ok(s) = TcpStream::connect(address).await {
            stream = Some(s);
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    let mut stream = stream.expect("server never started listening");
    let mut seen = Vec::new();

    let greeting = read_until(&mut stream, &mut seen, "Username").await;
    for option in [telnet::OPT_CHARSET, telnet::OPT_GMCP, telnet::OPT_MSP, telnet::OPT_MSDP] {
        assert!(
            greeting.windows(3).any(|w| w == telnet::will(option)),
            "server never offered {}",
            telnet::option_name(option)
        );
    }
    for (answer, next) in [
        ("new\r\n", "Choose a username"),
        ("carol\r\n", "Choose a password"),
        ("lantern\r\n", "Confirm password"),
        ("lantern\r\n", "Email address"),
        ("\r\n", "Welcome, carol!"),
    ] {
        stream.write_all(answer.as_bytes()).await.unwrap();
        read_until(&mut stream, &mut seen, next).await;
    }
    stream.write_all(b"say hello\r\n").await.unwrap();

    timeout(Duration::from_secs(5), async {
        while !commands.lock().iter().any(|c| c == "say hello") {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("input never reached the bus");
    assert_eq!(logins.lock().as_slice(), ["carol".to_string()]);

    server.shutdown().await.unwrap();
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(server.get_registry().active_count(), 0);
}
