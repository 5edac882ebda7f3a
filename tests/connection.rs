//! Connection lifecycle: handshake, liveness, reconnection.

mod common;

use std::time::Duration;

use common::{conn_pair, connected_client, expect_event, MockTransport};
use tmi_sdk::config::{ClientConfig, Identity, TokenSource};
use tmi_sdk::{Error, Event};

fn test_config() -> ClientConfig {
    ClientConfig {
        channels: Vec::new(),
        ..Default::default()
    }
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test]
async fn anonymous_handshake() {
    let (transport, mut server) = MockTransport::single();
    let (handle, mut events) = tmi_sdk::spawn_with_transport(test_config(), transport);

    let connect = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.connect().await })
    };

    let caps = server.expect_line("CAP REQ").await;
    assert!(caps.contains("twitch.tv/tags"));
    assert!(caps.contains("twitch.tv/commands"));
    assert!(caps.contains("twitch.tv/membership"));

    let pass = server.expect_line("PASS").await;
    assert_eq!(pass, "PASS SCHMOOPIIE");

    let nick = server.handshake().await;
    assert!(nick.starts_with("justinfan"));
    let digits: String = nick.trim_start_matches("justinfan").to_string();
    let number: u32 = digits.parse().expect("anonymous nick has numeric suffix");
    assert!((1000..81000).contains(&number));

    let (server_name, port) = connect.await.unwrap().unwrap();
    assert_eq!(server_name, "irc-ws.chat.twitch.tv");
    assert_eq!(port, 443);

    expect_event(&mut events, 2000, |e| matches!(e, Event::Connecting { .. }), "Connecting").await;
    expect_event(&mut events, 2000, |e| matches!(e, Event::Logon), "Logon").await;
    expect_event(&mut events, 2000, |e| matches!(e, Event::Connected { .. }), "Connected").await;
}

#[tokio::test]
async fn authenticated_handshake() {
    let mut config = test_config();
    config.identity = Some(Identity {
        username: "Dallas".to_string(),
        password: Some(TokenSource::Static("abcdef123456".to_string())),
    });
    let (transport, mut server) = MockTransport::single();
    let (handle, _events) = tmi_sdk::spawn_with_transport(config, transport);

    let connect = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.connect().await })
    };

    let pass = server.expect_line("PASS").await;
    assert_eq!(pass, "PASS oauth:abcdef123456");
    let nick = server.handshake().await;
    assert_eq!(nick, "dallas");

    connect.await.unwrap().unwrap();
}

#[tokio::test]
async fn skip_membership_drops_capability() {
    let mut config = test_config();
    config.options.skip_membership = true;
    let (transport, mut server) = MockTransport::single();
    let (handle, _events) = tmi_sdk::spawn_with_transport(config, transport);

    let connect = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.connect().await })
    };

    let caps = server.expect_line("CAP REQ").await;
    assert!(!caps.contains("membership"));
    server.handshake().await;
    connect.await.unwrap().unwrap();
}

#[tokio::test]
async fn login_failure_rejects_connect_and_disables_reconnect() {
    let (transport, mut server) = MockTransport::single();
    let (handle, mut events) = tmi_sdk::spawn_with_transport(test_config(), transport);

    let connect = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.connect().await })
    };

    server.expect_line("NICK ").await;
    server
        .send(":tmi.twitch.tv NOTICE * :Login authentication failed")
        .await;

    let err = connect.await.unwrap().unwrap_err();
    assert_eq!(err, Error::Login("Login authentication failed".to_string()));

    let disconnected = expect_event(
        &mut events,
        2000,
        |e| matches!(e, Event::Disconnected { .. }),
        "Disconnected",
    )
    .await;
    if let Event::Disconnected { reason } = disconnected {
        assert!(reason.contains("Login authentication failed"));
    }
}

#[tokio::test]
async fn unable_to_connect() {
    let transport = MockTransport::new(Vec::new());
    let mut config = test_config();
    config.connection.reconnect = false;
    let (handle, _events) = tmi_sdk::spawn_with_transport(config, transport);
    assert_eq!(handle.connect().await.unwrap_err(), Error::UnableToConnect);
}

// ── Commands before the handshake ───────────────────────────────────

#[tokio::test]
async fn commands_before_connect_are_rejected() {
    let transport = MockTransport::new(Vec::new());
    let (handle, _events) = tmi_sdk::spawn_with_transport(test_config(), transport);

    assert_eq!(
        handle.ban("#dallas", "baduser", None).await.unwrap_err(),
        Error::NotConnected
    );
    assert_eq!(
        handle.say("#dallas", "hi").await.unwrap_err(),
        Error::NotConnected
    );
    assert_eq!(handle.ping().await.unwrap_err(), Error::NotConnected);
    assert_eq!(handle.join("#dallas").await.unwrap_err(), Error::NotConnected);
}

// ── Liveness ────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_roundtrip_resolves_latency() {
    let (handle, mut events, mut server, _nick) = connected_client(test_config()).await;

    let ping = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.ping().await })
    };
    server.expect_line("PING").await;
    server.send("PONG :tmi.twitch.tv").await;

    let latency = ping.await.unwrap().unwrap();
    assert!(latency < Duration::from_secs(5));

    expect_event(&mut events, 2000, |e| matches!(e, Event::Pong { .. }), "Pong").await;
}

#[tokio::test]
async fn ping_without_response_times_out() {
    let mut config = test_config();
    config.connection.timeout = Duration::from_millis(150);
    config.connection.reconnect = false;
    let (handle, _events, mut server, _nick) = connected_client(config).await;

    let started = tokio::time::Instant::now();
    // Whichever fires first — the caller's deadline or the liveness
    // force-close — the call must reject once the timeout elapses.
    assert!(handle.ping().await.is_err());
    assert!(started.elapsed() >= Duration::from_millis(100));
    server.expect_line("PING").await;
}

#[tokio::test]
async fn server_ping_is_answered() {
    let (_handle, mut events, mut server, _nick) = connected_client(test_config()).await;

    server.send("PING :tmi.twitch.tv").await;
    let pong = server.expect_line("PONG").await;
    assert_eq!(pong, "PONG :tmi.twitch.tv");
    expect_event(&mut events, 2000, |e| matches!(e, Event::Ping), "Ping").await;
}

#[tokio::test(start_paused = true)]
async fn silent_server_triggers_ping_timeout_and_reconnect() {
    let (conn_a, mut server_a) = conn_pair();
    let (conn_b, mut server_b) = conn_pair();
    let transport = MockTransport::new(vec![conn_a, conn_b]);

    let mut config = test_config();
    config.connection.reconnect = true;
    config.connection.reconnect_interval = Duration::from_millis(1000);
    let (handle, mut events) = tmi_sdk::spawn_with_transport(config, transport);

    let connect = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.connect().await })
    };
    server_a.handshake().await;
    connect.await.unwrap().unwrap();

    // After 60 seconds of silence the client probes; after the pong timeout
    // it force-closes and the reconnect policy kicks in.
    let long = Duration::from_secs(600);
    server_a.expect_line_within("PING", long).await;

    expect_event(
        &mut events,
        600_000,
        |e| matches!(e, Event::Disconnected { reason } if reason.contains("Ping timeout")),
        "Disconnected(ping timeout)",
    )
    .await;
    expect_event(&mut events, 600_000, |e| matches!(e, Event::Reconnect), "Reconnect").await;

    // The second connection attempt handshakes from scratch.
    server_b.expect_line_within("CAP REQ", long).await;
    server_b.handshake().await;
    expect_event(
        &mut events,
        600_000,
        |e| matches!(e, Event::Connected { .. }),
        "Connected after reconnect",
    )
    .await;
}

#[tokio::test]
async fn remote_close_reconnects_and_rejoins() {
    let (conn_a, mut server_a) = conn_pair();
    let (conn_b, mut server_b) = conn_pair();
    let transport = MockTransport::new(vec![conn_a, conn_b]);

    let mut config = test_config();
    config.connection.reconnect_interval = Duration::from_millis(20);
    config.channels = vec!["#dallas".to_string()];
    let (handle, mut events) = tmi_sdk::spawn_with_transport(config, transport);

    let connect = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.connect().await })
    };
    server_a.handshake().await;
    connect.await.unwrap().unwrap();
    server_a.expect_line("JOIN #dallas").await;

    // Server drops the connection.
    drop(server_a.to_client);

    expect_event(&mut events, 2000, |e| matches!(e, Event::Reconnect), "Reconnect").await;
    server_b.handshake().await;
    // The configured channel is rejoined through the join queue.
    server_b.expect_line("JOIN #dallas").await;
}

#[tokio::test]
async fn explicit_disconnect_suppresses_reconnect() {
    let (handle, mut events, mut server, _nick) = connected_client(test_config()).await;

    let (server_name, port) = handle.disconnect().await.unwrap();
    assert_eq!(server_name, "irc-ws.chat.twitch.tv");
    assert_eq!(port, 443);

    expect_event(
        &mut events,
        2000,
        |e| matches!(e, Event::Disconnected { .. }),
        "Disconnected",
    )
    .await;
    // The client settles idle: new commands are rejected, no reconnect
    // attempt consumes another transport connection.
    assert_eq!(
        handle.say("#dallas", "hi").await.unwrap_err(),
        Error::NotConnected
    );
    drop(server);
}
