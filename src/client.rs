//! Connection core.
//!
//! One spawned task owns the socket and every piece of mutable state: the
//! handshake, liveness probing, reconnection, the dispatcher that turns wire
//! lines into events, and the registry of pending operations awaiting their
//! tag-identified server responses. The [`ClientHandle`] talks to it over a
//! request channel; events stream out on the receiver returned by [`spawn`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::{self, ClientConfig, MessageLogLevel};
use crate::error::Error;
use crate::event::Event;
use crate::irc::Message;
use crate::queue::DelayQueue;
use crate::state::ChatState;
use crate::tags::{self, Tag, Tags};
use crate::transport::{Conn, Transport, WsTransport};

/// Liveness probe interval while the connection is ready.
const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Outgoing chat messages longer than this are split.
const SPLIT_LIMIT: usize = 500;
/// Delay before the tail of a split message is sent.
const SPLIT_DELAY: Duration = Duration::from_millis(350);
/// Lower bound for the configured join interval.
const MIN_JOIN_INTERVAL: Duration = Duration::from_millis(300);

pub(crate) const COMMAND_DEADLINE_FLOOR: Duration = Duration::from_millis(600);
pub(crate) const COMMAND_DEADLINE_PADDING: Duration = Duration::from_millis(100);

/// Deadline for one correlated command, derived from the live latency sample.
pub(crate) fn command_deadline(latency: Duration) -> Duration {
    (latency + COMMAND_DEADLINE_PADDING).max(COMMAND_DEADLINE_FLOOR)
}

/// Start a client over the default WebSocket transport.
///
/// The returned handle carries the command surface (see the methods in
/// [`crate::commands`]); the receiver streams [`Event`]s. The client stays
/// idle until [`ClientHandle::connect`] is called.
pub fn spawn(config: ClientConfig) -> (ClientHandle, mpsc::Receiver<Event>) {
    spawn_with_transport(config, Arc::new(WsTransport))
}

/// Start a client over a caller-supplied transport.
pub fn spawn_with_transport(
    config: ClientConfig,
    transport: Arc<dyn Transport>,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (req_tx, req_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);
    let (latency_tx, latency_rx) = watch::channel(Duration::ZERO);

    let handle = ClientHandle {
        requests: req_tx,
        latency: latency_rx,
        config: Arc::new(config.clone()),
    };
    let actor = ClientActor {
        reconnect_timer: config.connection.reconnect_interval,
        config,
        transport,
        requests: req_rx,
        events: event_tx,
        latency_tx,
        connect_waiters: Vec::new(),
        state: ChatState::default(),
        reconnections: 0,
    };
    tokio::spawn(actor.run());

    (handle, event_rx)
}

/// A cloneable handle to a running client.
///
/// The chat command surface is implemented in [`crate::commands`].
#[derive(Clone)]
pub struct ClientHandle {
    pub(crate) requests: mpsc::Sender<Request>,
    pub(crate) latency: watch::Receiver<Duration>,
    pub(crate) config: Arc<ClientConfig>,
}

/// Requests from the handle to the actor.
pub(crate) enum Request {
    Connect {
        respond_to: oneshot::Sender<Result<(String, u16), Error>>,
    },
    Disconnect {
        respond_to: oneshot::Sender<Result<(String, u16), Error>>,
    },
    Ping {
        respond_to: oneshot::Sender<Result<Duration, Error>>,
    },
    Join {
        channels: Vec<String>,
        respond_to: oneshot::Sender<Result<Vec<String>, Error>>,
    },
    Say {
        channel: String,
        text: String,
        kind: SayKind,
        respond_to: oneshot::Sender<Result<(), Error>>,
    },
    Command {
        spec: CommandSpec,
        respond_to: oneshot::Sender<Result<Reply, Error>>,
    },
    Raw {
        line: String,
        respond_to: oneshot::Sender<Result<(), Error>>,
    },
    State {
        respond_to: oneshot::Sender<ChatState>,
    },
}

/// Flavor of an outgoing chat line.
#[derive(Debug, Clone)]
pub(crate) enum SayKind {
    Chat,
    Action,
    Announce,
    Reply(String),
}

/// A correlated command: what to send and which topic confirms it.
pub(crate) struct CommandSpec {
    pub channel: String,
    pub wire: Wire,
    pub topic: Topic,
}

pub(crate) enum Wire {
    /// `PRIVMSG <channel> :<text>` — the usual slash-command carrier.
    Chat(String),
    /// A raw protocol line.
    Line(String),
}

/// Internal completion topics, one per correlated command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Topic {
    Ban,
    Unban,
    Timeout,
    Clear,
    Color,
    Commercial,
    Delete,
    EmoteOnly,
    EmoteOnlyOff,
    Followers,
    FollowersOff,
    Slow,
    SlowOff,
    Subscribers,
    SubscribersOff,
    R9k,
    R9kOff,
    GrantMod,
    RevokeMod,
    GrantVip,
    RevokeVip,
    Mods,
    Vips,
    Host,
    Unhost,
    Raid,
    Unraid,
    Part,
    Whisper,
    Join,
}

/// Successful completion payloads.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Done,
    Names(Vec<String>),
    Remaining(Option<u64>),
}

enum PendingKind {
    Simple(oneshot::Sender<Result<Reply, Error>>),
    JoinMember { agg: u64 },
}

/// One in-flight command, keyed by its completion topic and channel.
struct Pending {
    topic: Topic,
    channel: String,
    kind: PendingKind,
}

struct JoinAgg {
    channels: Vec<String>,
    remaining: usize,
    respond_to: oneshot::Sender<Result<Vec<String>, Error>>,
}

#[derive(Debug)]
enum SessionEnd {
    UserDisconnect,
    AuthFailure(String),
    Remote(String),
    PingTimeout,
    ServerReconnect,
    HandleDropped,
}

#[derive(Clone, Copy)]
enum Step {
    Idle,
    ConnectNow,
    WaitThen(Duration),
}

/// Per-connection state, dropped (closing the socket) when the session ends.
struct Session {
    outgoing: mpsc::Sender<String>,
    ready: bool,
    pendings: Vec<Pending>,
    join_aggs: HashMap<u64, JoinAgg>,
    next_agg: u64,
    pending_pings: Vec<oneshot::Sender<Result<Duration, Error>>>,
    ping_sent: Option<Instant>,
    pong_deadline: Option<Instant>,
    next_ping: Instant,
    join_queue: DelayQueue<String>,
    deferred: DelayQueue<(String, String, SayKind)>,
    rejoin: Vec<String>,
    disconnect_waiter: Option<oneshot::Sender<Result<(String, u16), Error>>>,
    ended: Option<SessionEnd>,
}

impl Session {
    fn new(outgoing: mpsc::Sender<String>, join_interval: Duration) -> Self {
        Self {
            outgoing,
            ready: false,
            pendings: Vec::new(),
            join_aggs: HashMap::new(),
            next_agg: 0,
            pending_pings: Vec::new(),
            ping_sent: None,
            pong_deadline: None,
            next_ping: Instant::now() + PING_INTERVAL,
            join_queue: DelayQueue::new(join_interval.max(MIN_JOIN_INTERVAL)),
            deferred: DelayQueue::new(Duration::ZERO),
            rejoin: Vec::new(),
            disconnect_waiter: None,
            ended: None,
        }
    }

    fn earliest_deadline(&self) -> Instant {
        let mut deadline = self.next_ping;
        if let Some(at) = self.pong_deadline {
            deadline = deadline.min(at);
        }
        if self.ready {
            if let Some(at) = self.join_queue.next_deadline() {
                deadline = deadline.min(at);
            }
            if let Some(at) = self.deferred.next_deadline() {
                deadline = deadline.min(at);
            }
        }
        deadline
    }

    /// Complete the next pending operation on `topic` for `channel`.
    /// Listeners whose callers already timed out are pruned, so a late
    /// response is dropped silently.
    fn complete(&mut self, topic: Topic, channel: &str, result: Result<Reply, Error>) {
        self.pendings.retain(|p| match &p.kind {
            PendingKind::Simple(tx) => !tx.is_closed(),
            PendingKind::JoinMember { .. } => true,
        });
        let Some(idx) = self
            .pendings
            .iter()
            .position(|p| p.topic == topic && p.channel == channel)
        else {
            return;
        };
        let pending = self.pendings.remove(idx);
        match pending.kind {
            PendingKind::Simple(tx) => {
                let _ = tx.send(result);
            }
            PendingKind::JoinMember { agg } => {
                self.resolve_join_member(agg, result.map(|_| ()));
            }
        }
    }

    fn resolve_join_member(&mut self, agg: u64, result: Result<(), Error>) {
        match result {
            Ok(()) => {
                let finished = match self.join_aggs.get_mut(&agg) {
                    Some(entry) => {
                        entry.remaining = entry.remaining.saturating_sub(1);
                        entry.remaining == 0
                    }
                    None => false,
                };
                if finished {
                    if let Some(entry) = self.join_aggs.remove(&agg) {
                        let _ = entry.respond_to.send(Ok(entry.channels));
                    }
                }
            }
            Err(err) => {
                if let Some(entry) = self.join_aggs.remove(&agg) {
                    let _ = entry.respond_to.send(Err(err));
                }
                self.pendings
                    .retain(|p| !matches!(p.kind, PendingKind::JoinMember { agg: a } if a == agg));
            }
        }
    }

    /// Reject every outstanding operation for `channel`. Used for the
    /// generic permission class (`no_permission`, `msg_banned`, ...).
    fn fail_channel(&mut self, channel: &str, msg_id: &str) {
        let mut kept = Vec::new();
        let mut failed_aggs = Vec::new();
        for pending in self.pendings.drain(..) {
            if pending.channel != channel {
                kept.push(pending);
                continue;
            }
            match pending.kind {
                PendingKind::Simple(tx) => {
                    let _ = tx.send(Err(Error::Rejected(msg_id.to_string())));
                }
                PendingKind::JoinMember { agg } => failed_aggs.push(agg),
            }
        }
        self.pendings = kept;
        for agg in failed_aggs {
            if let Some(entry) = self.join_aggs.remove(&agg) {
                let _ = entry.respond_to.send(Err(Error::Rejected(msg_id.to_string())));
            }
            self.pendings
                .retain(|p| !matches!(p.kind, PendingKind::JoinMember { agg: a } if a == agg));
        }
    }

    fn fail_all(&mut self, err: Error) {
        for pending in self.pendings.drain(..) {
            if let PendingKind::Simple(tx) = pending.kind {
                let _ = tx.send(Err(err.clone()));
            }
        }
        for (_, agg) in self.join_aggs.drain() {
            let _ = agg.respond_to.send(Err(err.clone()));
        }
        for waiter in self.pending_pings.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
    }
}

pub(crate) struct ClientActor {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    requests: mpsc::Receiver<Request>,
    events: mpsc::Sender<Event>,
    latency_tx: watch::Sender<Duration>,
    connect_waiters: Vec<oneshot::Sender<Result<(String, u16), Error>>>,
    state: ChatState,
    reconnect_timer: Duration,
    reconnections: u64,
}

impl ClientActor {
    pub(crate) async fn run(mut self) {
        let server = self.config.connection.server.clone();
        let port = self.config.connection.port;
        let mut step = Step::Idle;

        loop {
            match step {
                Step::Idle => {
                    let Some(req) = self.requests.recv().await else {
                        return;
                    };
                    match req {
                        Request::Connect { respond_to } => {
                            self.connect_waiters.push(respond_to);
                            step = Step::ConnectNow;
                        }
                        other => self.reject_closed(other),
                    }
                }
                Step::WaitThen(delay) => {
                    let _ = self.events.send(Event::Reconnect).await;
                    info!(delay_ms = delay.as_millis() as u64, "reconnecting");
                    let deadline = Instant::now() + delay;
                    loop {
                        tokio::select! {
                            _ = time::sleep_until(deadline) => break,
                            req = self.requests.recv() => match req {
                                None => return,
                                Some(Request::Connect { respond_to }) => {
                                    self.connect_waiters.push(respond_to);
                                    break;
                                }
                                Some(other) => self.reject_closed(other),
                            }
                        }
                    }
                    step = Step::ConnectNow;
                }
                Step::ConnectNow => {
                    let _ = self
                        .events
                        .send(Event::Connecting {
                            server: server.clone(),
                            port,
                        })
                        .await;
                    let conn = self
                        .transport
                        .connect(&server, port, self.config.connection.secure)
                        .await;
                    match conn {
                        Err(_) => {
                            warn!(%server, port, "unable to connect");
                            self.fail_connect_waiters(Error::UnableToConnect);
                            let _ = self
                                .events
                                .send(Event::Disconnected {
                                    reason: "Unable to connect.".to_string(),
                                })
                                .await;
                            step = self.next_after_failure().await;
                        }
                        Ok(conn) => {
                            let end = self.run_session(conn).await;
                            let reason = match &end {
                                SessionEnd::AuthFailure(reason) => reason.clone(),
                                SessionEnd::PingTimeout => "Ping timeout.".to_string(),
                                _ => "Connection closed.".to_string(),
                            };
                            let _ = self.events.send(Event::Disconnected { reason }).await;
                            step = match end {
                                SessionEnd::HandleDropped => return,
                                SessionEnd::UserDisconnect | SessionEnd::AuthFailure(_) => {
                                    Step::Idle
                                }
                                SessionEnd::Remote(_)
                                | SessionEnd::PingTimeout
                                | SessionEnd::ServerReconnect => self.next_after_failure().await,
                            };
                        }
                    }
                }
            }
        }
    }

    /// Decide whether (and when) to reconnect after an unexpected close.
    async fn next_after_failure(&mut self) -> Step {
        if !self.config.connection.reconnect {
            return Step::Idle;
        }
        if self.reconnections >= self.config.connection.max_reconnect_attempts {
            let _ = self.events.send(Event::MaxReconnect).await;
            return Step::Idle;
        }
        self.reconnections += 1;
        let decayed = self.reconnect_timer.as_secs_f64() * self.config.connection.reconnect_decay;
        self.reconnect_timer = Duration::from_secs_f64(
            decayed.min(self.config.connection.max_reconnect_interval.as_secs_f64()),
        );
        Step::WaitThen(self.reconnect_timer)
    }

    /// Reply to requests received while no connection is open.
    fn reject_closed(&mut self, req: Request) {
        match req {
            Request::Connect { respond_to } => {
                // The run loop intercepts Connect; this arm is for safety.
                self.connect_waiters.push(respond_to);
            }
            Request::Disconnect { respond_to } => {
                let _ = respond_to.send(Err(Error::NotConnected));
            }
            Request::Ping { respond_to } => {
                let _ = respond_to.send(Err(Error::NotConnected));
            }
            Request::Join { respond_to, .. } => {
                let _ = respond_to.send(Err(Error::NotConnected));
            }
            Request::Say { respond_to, .. } => {
                let _ = respond_to.send(Err(Error::NotConnected));
            }
            Request::Command { respond_to, .. } => {
                let _ = respond_to.send(Err(Error::NotConnected));
            }
            Request::Raw { respond_to, .. } => {
                let _ = respond_to.send(Err(Error::NotConnected));
            }
            Request::State { respond_to } => {
                let _ = respond_to.send(self.state.clone());
            }
        }
    }

    fn fail_connect_waiters(&mut self, err: Error) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    /// Resolve the login to use for this session.
    async fn credentials(&mut self) -> Result<(String, Option<String>), Error> {
        match &self.config.identity {
            None => {
                // Anonymous read-only login; keep the synthesized name
                // stable across reconnects.
                let name = if config::is_justinfan(&self.state.username) {
                    self.state.username.clone()
                } else {
                    format!("justinfan{}", rand::random::<u32>() % 80_000 + 1_000)
                };
                Ok((name, Some("SCHMOOPIIE".to_string())))
            }
            Some(identity) => {
                let username = config::username(&identity.username);
                if config::is_justinfan(&username) {
                    return Ok((username, Some("SCHMOOPIIE".to_string())));
                }
                let password = match &identity.password {
                    Some(source) => Some(config::oauth_token(&source.resolve().await?)),
                    None => None,
                };
                Ok((username, password))
            }
        }
    }

    async fn run_session(&mut self, conn: Conn) -> SessionEnd {
        let Conn {
            outgoing,
            mut incoming,
        } = conn;

        let (nick, pass) = match self.credentials().await {
            Ok(pair) => pair,
            Err(err) => {
                self.fail_connect_waiters(err.clone());
                return SessionEnd::AuthFailure(err.to_string());
            }
        };

        // Channels to rejoin: the configured list plus whatever we were in
        // before an unexpected close.
        let mut rejoin: Vec<String> = self
            .config
            .channels
            .iter()
            .map(|c| config::channel(c))
            .collect();
        for channel in &self.state.channels {
            if !rejoin.contains(channel) {
                rejoin.push(channel.clone());
            }
        }
        self.state.reset_for_session();
        self.state.username = nick.clone();

        let mut sess = Session::new(outgoing, self.config.options.join_interval);
        sess.rejoin = rejoin;

        let caps = if self.config.options.skip_membership {
            "twitch.tv/tags twitch.tv/commands"
        } else {
            "twitch.tv/tags twitch.tv/commands twitch.tv/membership"
        };
        let mut sent = self.send(&mut sess, &format!("CAP REQ :{caps}")).await;
        if sent {
            if let Some(pass) = &pass {
                sent = self.send_secret(&mut sess, &format!("PASS {pass}")).await;
            }
        }
        if sent {
            sent = self.send(&mut sess, &format!("NICK {nick}")).await;
        }
        if !sent {
            self.fail_connect_waiters(Error::ConnectionClosed);
            return SessionEnd::Remote("Connection closed.".to_string());
        }
        let _ = self.events.send(Event::Logon).await;

        let end = loop {
            let deadline = sess.earliest_deadline();
            tokio::select! {
                frame = incoming.recv() => match frame {
                    None => break SessionEnd::Remote("Connection closed.".to_string()),
                    Some(data) => {
                        for line in data.split("\r\n") {
                            if line.is_empty() {
                                continue;
                            }
                            self.handle_line(&mut sess, line).await;
                            if sess.ended.is_some() {
                                break;
                            }
                        }
                        if let Some(end) = sess.ended.take() {
                            break end;
                        }
                    }
                },
                req = self.requests.recv() => match req {
                    None => break SessionEnd::HandleDropped,
                    Some(req) => {
                        self.handle_request(&mut sess, req).await;
                        if let Some(end) = sess.ended.take() {
                            break end;
                        }
                    }
                },
                _ = time::sleep_until(deadline) => {
                    self.on_tick(&mut sess).await;
                    if let Some(end) = sess.ended.take() {
                        break end;
                    }
                }
            }
        };

        drop(incoming);
        sess.fail_all(Error::ConnectionClosed);
        if !matches!(end, SessionEnd::AuthFailure(_)) {
            self.fail_connect_waiters(Error::ConnectionClosed);
        }
        if let Some(waiter) = sess.disconnect_waiter.take() {
            let _ = waiter.send(Ok((
                self.config.connection.server.clone(),
                self.config.connection.port,
            )));
        }
        end
    }

    async fn send(&self, sess: &mut Session, line: &str) -> bool {
        if self.config.options.debug {
            debug!(">> {line}");
        } else {
            trace!(">> {line}");
        }
        sess.outgoing.send(line.to_string()).await.is_ok()
    }

    /// Like [`Self::send`], but never logs the payload.
    async fn send_secret(&self, sess: &mut Session, line: &str) -> bool {
        if self.config.options.debug {
            debug!(">> PASS ******");
        } else {
            trace!(">> PASS ******");
        }
        sess.outgoing.send(line.to_string()).await.is_ok()
    }

    fn log_chat(&self, channel: &str, from: &str, text: &str) {
        match self.config.options.messages_log_level {
            MessageLogLevel::Error => error!("[{channel}] <{from}>: {text}"),
            MessageLogLevel::Warn => warn!("[{channel}] <{from}>: {text}"),
            MessageLogLevel::Info => info!("[{channel}] <{from}>: {text}"),
            MessageLogLevel::Debug => debug!("[{channel}] <{from}>: {text}"),
            MessageLogLevel::Trace => trace!("[{channel}] <{from}>: {text}"),
        }
    }

    /// Timer callback: pong deadline, liveness pings, queued joins and
    /// deferred message tails.
    async fn on_tick(&mut self, sess: &mut Session) {
        let now = Instant::now();
        if let Some(at) = sess.pong_deadline {
            if now >= at {
                warn!("ping timeout, closing connection");
                sess.ended = Some(SessionEnd::PingTimeout);
                return;
            }
        }
        if now >= sess.next_ping {
            sess.next_ping = now + PING_INTERVAL;
            if sess.ready && self.send(sess, "PING").await {
                sess.ping_sent = Some(now);
                sess.pong_deadline
                    .get_or_insert(now + self.config.connection.timeout);
            }
        }
        if sess.ready {
            while let Some(channel) = sess.join_queue.pop_ready(Instant::now()) {
                self.queue_join(sess, channel).await;
            }
            while let Some((channel, text, kind)) = sess.deferred.pop_ready(Instant::now()) {
                self.process_say(sess, &channel, &text, kind).await;
            }
        }
    }

    /// Execute one item of the join queue. The join still times out through
    /// the normal correlation path; a failure is logged, not fatal.
    async fn queue_join(&mut self, sess: &mut Session, channel: String) {
        let (tx, rx) = oneshot::channel();
        self.begin_join(sess, vec![channel.clone()], tx).await;
        let deadline = command_deadline(*self.latency_tx.borrow());
        tokio::spawn(async move {
            match time::timeout(deadline, rx).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(err))) => warn!(%channel, error = %err, "could not join channel"),
                Ok(Err(_)) => {}
                Err(_) => warn!(%channel, "could not join channel: no response"),
            }
        });
    }

    async fn begin_join(
        &mut self,
        sess: &mut Session,
        channels: Vec<String>,
        respond_to: oneshot::Sender<Result<Vec<String>, Error>>,
    ) {
        if !self.send(sess, &format!("JOIN {}", channels.join(","))).await {
            let _ = respond_to.send(Err(Error::ConnectionClosed));
            return;
        }
        let agg = sess.next_agg;
        sess.next_agg += 1;
        sess.join_aggs.insert(
            agg,
            JoinAgg {
                channels: channels.clone(),
                remaining: channels.len(),
                respond_to,
            },
        );
        for channel in channels {
            sess.pendings.push(Pending {
                topic: Topic::Join,
                channel,
                kind: PendingKind::JoinMember { agg },
            });
        }
    }

    async fn handle_request(&mut self, sess: &mut Session, req: Request) {
        match req {
            Request::Connect { respond_to } => {
                if sess.ready {
                    let _ = respond_to.send(Ok((
                        self.config.connection.server.clone(),
                        self.config.connection.port,
                    )));
                } else {
                    self.connect_waiters.push(respond_to);
                }
            }
            Request::Disconnect { respond_to } => {
                sess.disconnect_waiter = Some(respond_to);
                sess.ended = Some(SessionEnd::UserDisconnect);
            }
            Request::Ping { respond_to } => {
                let now = Instant::now();
                if self.send(sess, "PING").await {
                    sess.ping_sent = Some(now);
                    sess.pong_deadline
                        .get_or_insert(now + self.config.connection.timeout);
                    sess.pending_pings.push(respond_to);
                } else {
                    let _ = respond_to.send(Err(Error::NotConnected));
                }
            }
            Request::Join {
                channels,
                respond_to,
            } => {
                if !sess.ready {
                    let _ = respond_to.send(Err(Error::NotConnected));
                    return;
                }
                self.begin_join(sess, channels, respond_to).await;
            }
            Request::Say {
                channel,
                text,
                kind,
                respond_to,
            } => {
                if !sess.ready {
                    let _ = respond_to.send(Err(Error::NotConnected));
                    return;
                }
                self.process_say(sess, &channel, &text, kind).await;
                let _ = respond_to.send(Ok(()));
            }
            Request::Command { spec, respond_to } => {
                if !sess.ready {
                    let _ = respond_to.send(Err(Error::NotConnected));
                    return;
                }
                let line = match &spec.wire {
                    Wire::Chat(text) => format!("PRIVMSG {} :{}", spec.channel, text),
                    Wire::Line(line) => line.clone(),
                };
                if !self.send(sess, &line).await {
                    let _ = respond_to.send(Err(Error::ConnectionClosed));
                    return;
                }
                sess.pendings.push(Pending {
                    topic: spec.topic,
                    channel: spec.channel,
                    kind: PendingKind::Simple(respond_to),
                });
            }
            Request::Raw { line, respond_to } => {
                let sent = self.send(sess, &line).await;
                let _ = respond_to.send(if sent {
                    Ok(())
                } else {
                    Err(Error::NotConnected)
                });
            }
            Request::State { respond_to } => {
                let _ = respond_to.send(self.state.clone());
            }
        }
    }

    /// Send one chat line, splitting long messages: the head goes out now,
    /// the tail is re-enqueued after a short delay, recursively.
    async fn process_say(&mut self, sess: &mut Session, channel: &str, text: &str, kind: SayKind) {
        let (head, tail) = split_message(text);
        if let Some(tail) = tail {
            sess.deferred.push_after(
                (channel.to_string(), tail.to_string(), kind.clone()),
                SPLIT_DELAY,
            );
        }
        let line = match &kind {
            SayKind::Chat => format!("PRIVMSG {channel} :{head}"),
            SayKind::Action => format!("PRIVMSG {channel} :\u{1}ACTION {head}\u{1}"),
            SayKind::Announce => format!("PRIVMSG {channel} :/announce {head}"),
            SayKind::Reply(parent) => format!(
                "@reply-parent-msg-id={} PRIVMSG {channel} :{head}",
                tags::escape(parent)
            ),
        };
        if !self.send(sess, &line).await {
            return;
        }
        if matches!(kind, SayKind::Announce) {
            return;
        }

        // Local echo, shaped like the events other users' messages produce.
        let mut echo_tags = self
            .state
            .userstate
            .get(channel)
            .cloned()
            .unwrap_or_default();
        echo_tags.insert("username".to_string(), Tag::Str(self.state.username.clone()));
        self.log_chat(channel, &self.state.username, head);
        let event = match kind {
            SayKind::Action => {
                echo_tags.insert("message-type".to_string(), Tag::Str("action".to_string()));
                Event::Action {
                    channel: channel.to_string(),
                    tags: echo_tags,
                    message: head.to_string(),
                    is_self: true,
                }
            }
            _ => {
                echo_tags.insert("message-type".to_string(), Tag::Str("chat".to_string()));
                Event::Chat {
                    channel: channel.to_string(),
                    tags: echo_tags,
                    message: head.to_string(),
                    is_self: true,
                }
            }
        };
        let _ = self.events.send(event).await;
    }

    async fn handle_line(&mut self, sess: &mut Session, line: &str) {
        let Some(mut msg) = Message::parse(line) else {
            warn!(%line, "could not parse message");
            return;
        };
        if self.config.options.debug {
            debug!("<< {line}");
        } else {
            trace!("<< {line}");
        }
        tags::normalize(&mut msg.tags);
        let _ = self.events.send(Event::RawMessage(msg.clone())).await;

        match msg.prefix.as_deref() {
            None => self.on_no_prefix(sess, &msg).await,
            Some("tmi.twitch.tv") => self.on_tmi(sess, &msg).await,
            Some("jtv") => self.on_jtv(&msg).await,
            Some(_) => self.on_user_prefix(sess, &msg).await,
        }
    }

    async fn on_no_prefix(&mut self, sess: &mut Session, msg: &Message) {
        match msg.command.as_str() {
            "PING" => {
                let token = msg
                    .params
                    .first()
                    .map(String::as_str)
                    .unwrap_or("tmi.twitch.tv");
                let _ = self.send(sess, &format!("PONG :{token}")).await;
                let _ = self.events.send(Event::Ping).await;
            }
            "PONG" => {
                let latency = sess
                    .ping_sent
                    .take()
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                sess.pong_deadline = None;
                let _ = self.latency_tx.send(latency);
                for waiter in sess.pending_pings.drain(..) {
                    let _ = waiter.send(Ok(latency));
                }
                let _ = self.events.send(Event::Pong { latency }).await;
            }
            _ => warn!(command = %msg.command, "unhandled message without prefix"),
        }
    }

    async fn on_tmi(&mut self, sess: &mut Session, msg: &Message) {
        match msg.command.as_str() {
            "002" | "003" | "004" | "372" | "375" | "CAP" => {}
            // The server tells us which username it assigned us.
            "001" => {
                if let Some(name) = msg.params.first() {
                    self.state.username = name.clone();
                }
            }
            "376" => self.on_ready(sess).await,
            "NOTICE" => self.on_notice(sess, msg).await,
            "USERNOTICE" => self.on_usernotice(msg).await,
            "HOSTTARGET" => self.on_hosttarget(msg).await,
            "CLEARCHAT" => self.on_clearchat(sess, msg).await,
            "CLEARMSG" => self.on_clearmsg(msg).await,
            "RECONNECT" => {
                info!("server requested reconnect");
                sess.ended = Some(SessionEnd::ServerReconnect);
            }
            "USERSTATE" => self.on_userstate(msg).await,
            "GLOBALUSERSTATE" => self.on_globaluserstate(msg).await,
            "ROOMSTATE" => self.on_roomstate(sess, msg).await,
            "SERVERCHANGE" => {}
            _ => warn!(command = %msg.command, "unhandled message from tmi.twitch.tv"),
        }
    }

    /// Numeric 376: the handshake is complete.
    async fn on_ready(&mut self, sess: &mut Session) {
        if sess.ready {
            return;
        }
        sess.ready = true;
        self.reconnections = 0;
        self.reconnect_timer = self.config.connection.reconnect_interval;
        sess.next_ping = Instant::now() + PING_INTERVAL;
        let server = self.config.connection.server.clone();
        let port = self.config.connection.port;
        info!(%server, port, username = %self.state.username, "connected");
        let _ = self
            .events
            .send(Event::Connected {
                server: server.clone(),
                port,
            })
            .await;
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok((server.clone(), port)));
        }
        for channel in std::mem::take(&mut sess.rejoin) {
            sess.join_queue.push(channel);
        }
    }

    async fn on_notice(&mut self, sess: &mut Session, msg: &Message) {
        let channel = msg.params.first().cloned().unwrap_or_default();
        let text = msg.params.get(1).cloned().unwrap_or_default();
        let msg_id = msg
            .tags
            .get("msg-id")
            .and_then(Tag::as_str)
            .map(str::to_string);

        // Handshake failures end the session and disable reconnection.
        const LOGIN_FAILURES: [&str; 5] = [
            "Login unsuccessful",
            "Login authentication failed",
            "Error logging in",
            "Improperly formatted auth",
            "Invalid NICK",
        ];
        if LOGIN_FAILURES.iter().any(|needle| text.contains(needle)) {
            error!(%text, "authentication failed");
            self.fail_connect_waiters(Error::Login(text.clone()));
            sess.ended = Some(SessionEnd::AuthFailure(text));
            return;
        }

        if let Some(id) = msg_id.as_deref() {
            match id {
                "ban_success" => sess.complete(Topic::Ban, &channel, Ok(Reply::Done)),
                "unban_success" => sess.complete(Topic::Unban, &channel, Ok(Reply::Done)),
                "timeout_success" => sess.complete(Topic::Timeout, &channel, Ok(Reply::Done)),
                "color_changed" => sess.complete(Topic::Color, &channel, Ok(Reply::Done)),
                "commercial_success" => {
                    sess.complete(Topic::Commercial, &channel, Ok(Reply::Done))
                }
                "delete_message_success" => {
                    sess.complete(Topic::Delete, &channel, Ok(Reply::Done))
                }
                "mod_success" => sess.complete(Topic::GrantMod, &channel, Ok(Reply::Done)),
                "unmod_success" => sess.complete(Topic::RevokeMod, &channel, Ok(Reply::Done)),
                "vip_success" => sess.complete(Topic::GrantVip, &channel, Ok(Reply::Done)),
                "unvip_success" => sess.complete(Topic::RevokeVip, &channel, Ok(Reply::Done)),
                "unraid_success" => sess.complete(Topic::Unraid, &channel, Ok(Reply::Done)),
                "host_off" => sess.complete(Topic::Unhost, &channel, Ok(Reply::Done)),
                "hosts_remaining" => {
                    let remaining = text.split(' ').next().and_then(|n| n.parse().ok());
                    sess.complete(Topic::Host, &channel, Ok(Reply::Remaining(remaining)));
                }

                "emote_only_on" => {
                    let _ = self
                        .events
                        .send(Event::EmoteOnly {
                            channel: channel.clone(),
                            enabled: true,
                        })
                        .await;
                    sess.complete(Topic::EmoteOnly, &channel, Ok(Reply::Done));
                }
                "emote_only_off" => {
                    let _ = self
                        .events
                        .send(Event::EmoteOnly {
                            channel: channel.clone(),
                            enabled: false,
                        })
                        .await;
                    sess.complete(Topic::EmoteOnlyOff, &channel, Ok(Reply::Done));
                }
                "subs_on" => {
                    let _ = self
                        .events
                        .send(Event::Subscribers {
                            channel: channel.clone(),
                            enabled: true,
                        })
                        .await;
                    sess.complete(Topic::Subscribers, &channel, Ok(Reply::Done));
                }
                "subs_off" => {
                    let _ = self
                        .events
                        .send(Event::Subscribers {
                            channel: channel.clone(),
                            enabled: false,
                        })
                        .await;
                    sess.complete(Topic::SubscribersOff, &channel, Ok(Reply::Done));
                }
                "r9k_on" => {
                    let _ = self
                        .events
                        .send(Event::R9kBeta {
                            channel: channel.clone(),
                            enabled: true,
                        })
                        .await;
                    sess.complete(Topic::R9k, &channel, Ok(Reply::Done));
                }
                "r9k_off" => {
                    let _ = self
                        .events
                        .send(Event::R9kBeta {
                            channel: channel.clone(),
                            enabled: false,
                        })
                        .await;
                    sess.complete(Topic::R9kOff, &channel, Ok(Reply::Done));
                }
                // Followers-only transitions also arrive as ROOMSTATE
                // updates, which carry the duration and take precedence for
                // the event surface.
                "followers_on" | "followers_onzero" => {
                    sess.complete(Topic::Followers, &channel, Ok(Reply::Done))
                }
                "followers_off" => {
                    sess.complete(Topic::FollowersOff, &channel, Ok(Reply::Done))
                }

                "room_mods" | "no_mods" => {
                    let mods = parse_name_list(&text);
                    self.state.set_moderators(&channel, &mods);
                    let _ = self
                        .events
                        .send(Event::Mods {
                            channel: channel.clone(),
                            mods: mods.clone(),
                        })
                        .await;
                    sess.complete(Topic::Mods, &channel, Ok(Reply::Names(mods)));
                }
                "vips_success" | "no_vips" => {
                    let vips = parse_name_list(&text);
                    self.state.set_vips(&channel, &vips);
                    let _ = self
                        .events
                        .send(Event::Vips {
                            channel: channel.clone(),
                            vips: vips.clone(),
                        })
                        .await;
                    sess.complete(Topic::Vips, &channel, Ok(Reply::Names(vips)));
                }

                "msg_rejected" | "msg_rejected_mandatory" => {
                    let _ = self
                        .events
                        .send(Event::Automod {
                            channel: channel.clone(),
                            msg_id: id.to_string(),
                            message: text.clone(),
                        })
                        .await;
                }

                // The generic permission class rejects every outstanding
                // command for the implicated channel.
                "no_permission" | "msg_banned" | "msg_room_not_found"
                | "msg_channel_suspended" | "tos_ban" | "invalid_user" => {
                    sess.fail_channel(&channel, id);
                }

                other => {
                    if let Some(topic) = failure_topic(other) {
                        sess.complete(topic, &channel, Err(Error::Rejected(other.to_string())));
                    } else {
                        debug!(msg_id = other, "unrecognized notice");
                    }
                }
            }
        } else {
            debug!(%text, "notice without msg-id");
        }

        let _ = self
            .events
            .send(Event::Notice {
                channel,
                msg_id,
                message: text,
            })
            .await;
    }

    async fn on_usernotice(&mut self, msg: &Message) {
        let channel = msg.params.first().cloned().unwrap_or_default();
        let text = msg.params.get(1).cloned();
        let tags = msg.tags.clone();
        let id = tags
            .get("msg-id")
            .and_then(Tag::as_str)
            .unwrap_or("")
            .to_string();
        let login = tags
            .get("login")
            .and_then(Tag::as_str)
            .unwrap_or("")
            .to_string();
        fn tag_str(tags: &Tags, name: &str) -> String {
            tags.get(name)
                .and_then(Tag::as_str)
                .unwrap_or("")
                .to_string()
        }
        fn tag_num(tags: &Tags, name: &str) -> u64 {
            tags.get(name).map(Tag::as_number).unwrap_or(0)
        }

        let event = match id.as_str() {
            "sub" => Event::Subscription {
                channel,
                username: login,
                message: text,
                tags,
            },
            "resub" => Event::Resub {
                channel,
                username: login,
                months: tag_num(&tags, "msg-param-cumulative-months"),
                message: text,
                tags,
            },
            "subgift" => Event::SubGift {
                channel,
                gifter: login,
                recipient: tag_str(&tags, "msg-param-recipient-user-name"),
                tags,
            },
            "anonsubgift" => Event::AnonSubGift {
                channel,
                recipient: tag_str(&tags, "msg-param-recipient-user-name"),
                tags,
            },
            "submysterygift" => Event::SubMysteryGift {
                channel,
                gifter: login,
                count: tag_num(&tags, "msg-param-mass-gift-count"),
                tags,
            },
            "anonsubmysterygift" => Event::AnonSubMysteryGift {
                channel,
                count: tag_num(&tags, "msg-param-mass-gift-count"),
                tags,
            },
            "primepaidupgrade" => Event::PrimePaidUpgrade {
                channel,
                username: login,
                tags,
            },
            "giftpaidupgrade" => Event::GiftPaidUpgrade {
                channel,
                username: login,
                gifter: tag_str(&tags, "msg-param-sender-login"),
                tags,
            },
            "anongiftpaidupgrade" => Event::AnonGiftPaidUpgrade {
                channel,
                username: login,
                tags,
            },
            "announcement" => Event::Announcement {
                channel,
                tags,
                message: text.unwrap_or_default(),
            },
            "raid" => Event::Raided {
                channel,
                username: tag_str(&tags, "msg-param-login"),
                viewers: tag_num(&tags, "msg-param-viewerCount"),
                tags,
            },
            _ => Event::UserNotice {
                channel,
                msg_id: id.clone(),
                tags,
                message: text,
            },
        };
        let _ = self.events.send(event).await;
    }

    async fn on_hosttarget(&mut self, msg: &Message) {
        let channel = msg.params.first().cloned().unwrap_or_default();
        let payload = msg.params.get(1).cloned().unwrap_or_default();
        let mut parts = payload.split_whitespace();
        let target = parts.next().unwrap_or("-");
        let viewers = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        let event = if target.starts_with('-') {
            Event::Unhost { channel, viewers }
        } else {
            Event::Hosting {
                channel,
                target: target.to_string(),
                viewers,
            }
        };
        let _ = self.events.send(event).await;
    }

    async fn on_clearchat(&mut self, sess: &mut Session, msg: &Message) {
        let channel = msg.params.first().cloned().unwrap_or_default();
        let event = match msg.params.get(1) {
            Some(user) => {
                if let Some(Tag::Str(duration)) = msg.tags.get("ban-duration") {
                    Event::Timeout {
                        channel,
                        user: user.clone(),
                        duration: duration.parse().unwrap_or(0),
                        tags: msg.tags.clone(),
                    }
                } else {
                    Event::Ban {
                        channel,
                        user: user.clone(),
                        tags: msg.tags.clone(),
                    }
                }
            }
            None => {
                // A full chat clear confirms a pending `/clear`.
                sess.complete(Topic::Clear, &channel, Ok(Reply::Done));
                Event::ClearChat { channel }
            }
        };
        let _ = self.events.send(event).await;
    }

    async fn on_clearmsg(&mut self, msg: &Message) {
        let channel = msg.params.first().cloned().unwrap_or_default();
        let message = msg.params.get(1).cloned().unwrap_or_default();
        let user = msg
            .tags
            .get("login")
            .and_then(Tag::as_str)
            .unwrap_or("")
            .to_string();
        let _ = self
            .events
            .send(Event::MessageDeleted {
                channel,
                user,
                message,
                tags: msg.tags.clone(),
            })
            .await;
    }

    async fn on_userstate(&mut self, msg: &Message) {
        let channel = msg.params.first().cloned().unwrap_or_default();
        let mut state_tags = msg.tags.clone();
        state_tags.insert(
            "username".to_string(),
            Tag::Str(self.state.username.clone()),
        );
        if self.state.track_join(&channel) {
            info!(%channel, "joined channel");
            let _ = self
                .events
                .send(Event::Join {
                    channel: channel.clone(),
                    user: self.state.username.clone(),
                    is_self: true,
                })
                .await;
        }
        if state_tags.get("user-type").and_then(Tag::as_str) == Some("mod") {
            let username = self.state.username.clone();
            self.state.add_moderator(&channel, &username);
        }
        self.check_emote_sets(&state_tags).await;
        self.state.userstate.insert(channel, state_tags);
    }

    async fn on_globaluserstate(&mut self, msg: &Message) {
        self.state.globaluserstate = msg.tags.clone();
        self.check_emote_sets(&msg.tags).await;
        let _ = self
            .events
            .send(Event::GlobalUserState {
                tags: msg.tags.clone(),
            })
            .await;
    }

    async fn check_emote_sets(&mut self, from_tags: &Tags) {
        if let Some(Tag::Str(sets)) = from_tags.get("emote-sets") {
            if *sets != self.state.emote_sets {
                self.state.emote_sets = sets.clone();
                let _ = self
                    .events
                    .send(Event::EmoteSets { sets: sets.clone() })
                    .await;
            }
        }
    }

    async fn on_roomstate(&mut self, sess: &mut Session, msg: &Message) {
        let channel = msg.params.first().cloned().unwrap_or_default();
        // A ROOMSTATE for a channel confirms the pending join.
        sess.complete(Topic::Join, &channel, Ok(Reply::Done));
        self.state
            .roomstate
            .insert(channel.clone(), msg.tags.clone());
        let _ = self
            .events
            .send(Event::Roomstate {
                channel: channel.clone(),
                tags: msg.tags.clone(),
            })
            .await;

        // A partial update (no subs-only tag) signals a mode transition; its
        // duration values supersede the plain NOTICE stream.
        if msg.tags.contains_key("subs-only") {
            return;
        }
        if let Some(slow) = msg.tags.get("slow") {
            if matches!(slow, Tag::Bool(false)) {
                let _ = self
                    .events
                    .send(Event::Slow {
                        channel: channel.clone(),
                        enabled: false,
                        seconds: 0,
                    })
                    .await;
                sess.complete(Topic::SlowOff, &channel, Ok(Reply::Done));
            } else {
                let seconds = slow.as_number();
                let _ = self
                    .events
                    .send(Event::Slow {
                        channel: channel.clone(),
                        enabled: true,
                        seconds,
                    })
                    .await;
                sess.complete(Topic::Slow, &channel, Ok(Reply::Done));
            }
        }
        if let Some(followers) = msg.tags.get("followers-only") {
            let enabled = followers.as_str() != Some("-1");
            let minutes = if enabled { followers.as_number() } else { 0 };
            let _ = self
                .events
                .send(Event::FollowersOnly {
                    channel: channel.clone(),
                    enabled,
                    minutes,
                })
                .await;
            let topic = if enabled {
                Topic::Followers
            } else {
                Topic::FollowersOff
            };
            sess.complete(topic, &channel, Ok(Reply::Done));
        }
    }

    async fn on_jtv(&mut self, msg: &Message) {
        match msg.command.as_str() {
            "MODE" if msg.params.len() >= 3 => {
                let channel = msg.params[0].clone();
                let user = msg.params[2].clone();
                match msg.params[1].as_str() {
                    "+o" => {
                        self.state.add_moderator(&channel, &user);
                        let _ = self.events.send(Event::Mod { channel, user }).await;
                    }
                    "-o" => {
                        self.state.remove_moderator(&channel, &user);
                        let _ = self.events.send(Event::Unmod { channel, user }).await;
                    }
                    _ => {}
                }
            }
            // "<user> is now hosting you for N viewers."
            "PRIVMSG" => {
                let channel = msg.params.first().cloned().unwrap_or_default();
                let text = msg.params.get(1).cloned().unwrap_or_default();
                if text.contains("hosting you") {
                    let by = text.split(' ').next().unwrap_or("").to_string();
                    let viewers = text
                        .split_whitespace()
                        .find_map(|word| word.parse().ok())
                        .unwrap_or(0);
                    let auto = text.contains("auto hosting");
                    let _ = self
                        .events
                        .send(Event::Hosted {
                            channel,
                            by,
                            viewers,
                            auto,
                        })
                        .await;
                }
            }
            _ => {}
        }
    }

    async fn on_user_prefix(&mut self, sess: &mut Session, msg: &Message) {
        let nick = msg.prefix_nick().unwrap_or("").to_string();
        match msg.command.as_str() {
            "JOIN" => {
                let channel = msg.params.first().cloned().unwrap_or_default();
                if nick == self.state.username {
                    if self.state.track_join(&channel) {
                        // Anonymous logins never receive a USERSTATE, so the
                        // userstate entry is seeded here.
                        self.state.userstate.entry(channel.clone()).or_default();
                        info!(%channel, "joined channel");
                        let _ = self
                            .events
                            .send(Event::Join {
                                channel,
                                user: nick,
                                is_self: true,
                            })
                            .await;
                    }
                } else {
                    let _ = self
                        .events
                        .send(Event::Join {
                            channel,
                            user: nick,
                            is_self: false,
                        })
                        .await;
                }
            }
            "PART" => {
                let channel = msg.params.first().cloned().unwrap_or_default();
                let is_self = nick == self.state.username;
                if is_self {
                    sess.complete(Topic::Part, &channel, Ok(Reply::Done));
                    self.state.track_part(&channel);
                    info!(%channel, "left channel");
                }
                let _ = self
                    .events
                    .send(Event::Part {
                        channel,
                        user: nick,
                        is_self,
                    })
                    .await;
            }
            "353" => {
                if msg.params.len() >= 4 {
                    let channel = msg.params[2].clone();
                    let users = msg.params[3]
                        .split_whitespace()
                        .map(str::to_string)
                        .collect();
                    let _ = self.events.send(Event::Names { channel, users }).await;
                }
            }
            "366" => {}
            "WHISPER" => {
                let message = msg.params.get(1).cloned().unwrap_or_default();
                let mut whisper_tags = msg.tags.clone();
                whisper_tags.insert(
                    "message-type".to_string(),
                    Tag::Str("whisper".to_string()),
                );
                whisper_tags.insert("username".to_string(), Tag::Str(nick.clone()));
                let _ = self
                    .events
                    .send(Event::Whisper {
                        from: nick,
                        tags: whisper_tags,
                        message,
                        is_self: false,
                    })
                    .await;
            }
            "PRIVMSG" => self.on_privmsg(&nick, msg).await,
            _ => warn!(command = %msg.command, "unhandled message"),
        }
    }

    async fn on_privmsg(&mut self, nick: &str, msg: &Message) {
        let channel = msg.params.first().cloned().unwrap_or_default();
        let text = msg.params.get(1).cloned().unwrap_or_default();
        let mut chat_tags = msg.tags.clone();
        chat_tags.insert("username".to_string(), Tag::Str(nick.to_string()));

        if let Some(inner) = text
            .strip_prefix("\u{1}ACTION ")
            .and_then(|t| t.strip_suffix('\u{1}'))
        {
            chat_tags.insert("message-type".to_string(), Tag::Str("action".to_string()));
            self.log_chat(&channel, nick, inner);
            let _ = self
                .events
                .send(Event::Action {
                    channel,
                    tags: chat_tags,
                    message: inner.to_string(),
                    is_self: false,
                })
                .await;
            return;
        }

        if chat_tags.contains_key("bits") {
            chat_tags.insert("message-type".to_string(), Tag::Str("chat".to_string()));
            self.log_chat(&channel, nick, &text);
            let _ = self
                .events
                .send(Event::Cheer {
                    channel,
                    tags: chat_tags,
                    message: text,
                })
                .await;
            return;
        }

        // Channel-points redemptions ride on ordinary chat messages.
        let reward = chat_tags
            .get("custom-reward-id")
            .and_then(Tag::as_str)
            .map(str::to_string)
            .or_else(|| match chat_tags.get("msg-id").and_then(Tag::as_str) {
                Some(id @ ("highlighted-message" | "skip-subs-mode-message")) => {
                    Some(id.to_string())
                }
                _ => None,
            });
        if let Some(reward_type) = reward {
            let _ = self
                .events
                .send(Event::Redeem {
                    channel: channel.clone(),
                    user: nick.to_string(),
                    reward_type,
                    tags: chat_tags.clone(),
                    message: text.clone(),
                })
                .await;
        }

        chat_tags.insert("message-type".to_string(), Tag::Str("chat".to_string()));
        self.log_chat(&channel, nick, &text);
        let _ = self
            .events
            .send(Event::Chat {
                channel,
                tags: chat_tags,
                message: text,
                is_self: false,
            })
            .await;
    }
}

/// Split an outgoing chat message at the last space at or before the limit
/// (or hard at the limit when it contains no space). The two halves
/// concatenate back to the original text.
pub(crate) fn split_message(text: &str) -> (&str, Option<&str>) {
    if text.len() <= SPLIT_LIMIT {
        return (text, None);
    }
    let mut cut = SPLIT_LIMIT;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    if let Some(space) = text[..cut].rfind(' ') {
        if space > 0 {
            cut = space;
        }
    }
    (&text[..cut], Some(&text[cut..]))
}

/// Parse the name list out of a `room_mods` / `vips_success` notice.
fn parse_name_list(text: &str) -> Vec<String> {
    match text.split_once(':') {
        Some((_, list)) => list
            .trim()
            .trim_end_matches('.')
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        None => Vec::new(),
    }
}

/// Map a rejecting `msg-id` back to the command topic it fails.
fn failure_topic(msg_id: &str) -> Option<Topic> {
    let topic = match msg_id {
        "already_banned" | "bad_ban_admin" | "bad_ban_anon" | "bad_ban_broadcaster"
        | "bad_ban_global_mod" | "bad_ban_mod" | "bad_ban_self" | "bad_ban_staff"
        | "usage_ban" => Topic::Ban,
        "bad_unban_no_ban" | "usage_unban" => Topic::Unban,
        "bad_timeout_admin" | "bad_timeout_anon" | "bad_timeout_broadcaster"
        | "bad_timeout_duration" | "bad_timeout_global_mod" | "bad_timeout_mod"
        | "bad_timeout_self" | "bad_timeout_staff" | "usage_timeout" => Topic::Timeout,
        "usage_clear" => Topic::Clear,
        "usage_color" | "turbo_only_color" => Topic::Color,
        "usage_commercial" | "bad_commercial_error" => Topic::Commercial,
        "usage_delete" | "bad_delete_message_error" | "bad_delete_message_broadcaster"
        | "bad_delete_message_mod" => Topic::Delete,
        "already_emote_only_on" | "usage_emote_only_on" => Topic::EmoteOnly,
        "already_emote_only_off" | "usage_emote_only_off" => Topic::EmoteOnlyOff,
        "usage_followers_on" => Topic::Followers,
        "usage_followers_off" => Topic::FollowersOff,
        "usage_slow_on" => Topic::Slow,
        "usage_slow_off" => Topic::SlowOff,
        "already_subs_on" | "usage_subs_on" => Topic::Subscribers,
        "already_subs_off" | "usage_subs_off" => Topic::SubscribersOff,
        "already_r9k_on" | "usage_r9k_on" => Topic::R9k,
        "already_r9k_off" | "usage_r9k_off" => Topic::R9kOff,
        "usage_mod" | "bad_mod_banned" | "bad_mod_mod" => Topic::GrantMod,
        "usage_unmod" | "bad_unmod_mod" => Topic::RevokeMod,
        "usage_vip" | "bad_vip_grantee_banned" | "bad_vip_grantee_already_vip"
        | "bad_vip_max_vips_reached" | "bad_vip_achievement_incomplete" => Topic::GrantVip,
        "usage_unvip" | "bad_unvip_grantee_not_vip" => Topic::RevokeVip,
        "usage_mods" => Topic::Mods,
        "usage_vips" => Topic::Vips,
        "usage_host" | "bad_host_error" | "bad_host_hosting" | "bad_host_rate_exceeded"
        | "bad_host_rejected" | "bad_host_self" => Topic::Host,
        "usage_unhost" | "not_hosting" => Topic::Unhost,
        "usage_raid" | "raid_error_already_raiding" | "raid_error_forbidden"
        | "raid_error_self" | "raid_error_too_many_viewers" | "raid_error_unbanned_user" => {
            Topic::Raid
        }
        "usage_unraid" | "unraid_error_no_active_raid" => Topic::Unraid,
        "whisper_banned" | "whisper_banned_recipient" | "whisper_invalid_login"
        | "whisper_invalid_self" | "whisper_limit_per_min" | "whisper_limit_per_sec"
        | "whisper_restricted" | "whisper_restricted_recipient" => Topic::Whisper,
        _ => return None,
    };
    Some(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_short_message_untouched() {
        let (head, tail) = split_message("hello");
        assert_eq!(head, "hello");
        assert!(tail.is_none());
    }

    #[test]
    fn split_at_last_space() {
        let text = format!("{} {}", "a".repeat(490), "b".repeat(100));
        let (head, tail) = split_message(&text);
        assert_eq!(head.len(), 490);
        assert_eq!(format!("{head}{}", tail.unwrap()), text);
    }

    #[test]
    fn split_hard_without_space() {
        let text = "A".repeat(600);
        let (head, tail) = split_message(&text);
        assert_eq!(head.len(), 500);
        assert_eq!(tail.unwrap().len(), 100);
        assert_eq!(format!("{head}{}", tail.unwrap()), text);
    }

    #[test]
    fn split_respects_char_boundaries() {
        // 4-byte scorpions straddling the limit must not split mid-char.
        let text = "\u{1F982}".repeat(150);
        let (head, tail) = split_message(&text);
        assert!(head.len() <= 500);
        assert_eq!(format!("{head}{}", tail.unwrap()), text);
    }

    #[test]
    fn name_list_parsing() {
        assert_eq!(
            parse_name_list("The moderators of this channel are: alice, bob"),
            vec!["alice", "bob"]
        );
        assert_eq!(
            parse_name_list("The VIPs of this channel are: carol."),
            vec!["carol"]
        );
        assert!(parse_name_list("There are no moderators of this channel").is_empty());
    }

    #[test]
    fn failure_msg_ids_map_to_their_commands() {
        assert_eq!(failure_topic("already_banned"), Some(Topic::Ban));
        assert_eq!(failure_topic("usage_slow_on"), Some(Topic::Slow));
        assert_eq!(failure_topic("turbo_only_color"), Some(Topic::Color));
        assert_eq!(failure_topic("not_a_real_id"), None);
    }
}
