//! Test harness: an in-memory transport and a scriptable mock server.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use tmi_sdk::event::Event;
use tmi_sdk::transport::{BoxFuture, Conn, Transport};
use tmi_sdk::Error;

/// The server side of an in-memory connection.
pub struct ServerEnd {
    pub from_client: mpsc::Receiver<String>,
    pub to_client: mpsc::Sender<String>,
}

/// Build one in-memory connection: the client half and the server half.
pub fn conn_pair() -> (Conn, ServerEnd) {
    let (out_tx, out_rx) = mpsc::channel(64);
    let (in_tx, in_rx) = mpsc::channel(64);
    (
        Conn {
            outgoing: out_tx,
            incoming: in_rx,
        },
        ServerEnd {
            from_client: out_rx,
            to_client: in_tx,
        },
    )
}

impl ServerEnd {
    /// Push one line to the client.
    pub async fn send(&self, line: &str) {
        self.to_client
            .send(line.to_string())
            .await
            .expect("client dropped its receiver");
    }

    /// Read lines until one contains `needle`; panics after five seconds.
    pub async fn expect_line(&mut self, needle: &str) -> String {
        self.expect_line_within(needle, Duration::from_secs(5)).await
    }

    pub async fn expect_line_within(&mut self, needle: &str, deadline: Duration) -> String {
        let start = tokio::time::Instant::now();
        loop {
            let remaining = deadline.saturating_sub(start.elapsed());
            match timeout(remaining, self.from_client.recv()).await {
                Ok(Some(line)) => {
                    if line.contains(needle) {
                        return line;
                    }
                }
                Ok(None) => panic!("connection closed while waiting for: {needle}"),
                Err(_) => panic!("timed out waiting for: {needle}"),
            }
        }
    }

    /// Answer the CAP/PASS/NICK sequence with a welcome, returning the nick
    /// the client registered with.
    pub async fn handshake(&mut self) -> String {
        let nick_line = self.expect_line("NICK ").await;
        let nick = nick_line.trim_start_matches("NICK ").trim().to_string();
        self.send(&format!(":tmi.twitch.tv 001 {nick} :Welcome, GLHF!"))
            .await;
        self.send(&format!(":tmi.twitch.tv 376 {nick} :>")).await;
        nick
    }
}

/// A transport that hands out pre-built connections, in order.
pub struct MockTransport {
    conns: Mutex<VecDeque<Conn>>,
}

impl MockTransport {
    pub fn new(conns: Vec<Conn>) -> Arc<Self> {
        Arc::new(Self {
            conns: Mutex::new(conns.into()),
        })
    }

    /// A transport with a single connection available.
    pub fn single() -> (Arc<Self>, ServerEnd) {
        let (conn, server) = conn_pair();
        (Self::new(vec![conn]), server)
    }
}

impl Transport for MockTransport {
    fn connect(
        &self,
        _server: &str,
        _port: u16,
        _secure: bool,
    ) -> BoxFuture<'static, Result<Conn, Error>> {
        let conn = self.conns.lock().unwrap().pop_front();
        Box::pin(async move { conn.ok_or(Error::UnableToConnect) })
    }
}

/// Wait for a specific event, with timeout.
pub async fn expect_event(
    events: &mut mpsc::Receiver<Event>,
    timeout_ms: u64,
    predicate: impl Fn(&Event) -> bool,
    description: &str,
) -> Event {
    let deadline = Duration::from_millis(timeout_ms);
    let start = tokio::time::Instant::now();
    loop {
        match timeout(deadline.saturating_sub(start.elapsed()), events.recv()).await {
            Ok(Some(event)) => {
                if predicate(&event) {
                    return event;
                }
                // Not the event we want, keep going
            }
            Ok(None) => panic!("Channel closed while waiting for: {description}"),
            Err(_) => panic!("Timeout waiting for: {description}"),
        }
    }
}

/// Install a test-writer subscriber so `RUST_LOG` surfaces client logs in
/// failing tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Spawn a client over a single mock connection and complete the handshake.
/// Returns the handle, the event stream, the server end, and the registered
/// nick.
pub async fn connected_client(
    config: tmi_sdk::ClientConfig,
) -> (
    tmi_sdk::ClientHandle,
    mpsc::Receiver<Event>,
    ServerEnd,
    String,
) {
    init_tracing();
    let (transport, mut server) = MockTransport::single();
    let (handle, mut events) = tmi_sdk::spawn_with_transport(config, transport);

    let connect = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.connect().await })
    };
    let nick = server.handshake().await;
    connect
        .await
        .expect("connect task panicked")
        .expect("handshake failed");
    expect_event(
        &mut events,
        2000,
        |e| matches!(e, Event::Connected { .. }),
        "Connected",
    )
    .await;

    (handle, events, server, nick)
}
