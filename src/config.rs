//! Client configuration and identifier normalization.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Top-level client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub options: Options,
    pub connection: ConnectionConfig,
    /// Login identity. `None` connects anonymously (read-only).
    pub identity: Option<Identity>,
    /// Channels joined automatically after the handshake.
    pub channels: Vec<String>,
}

/// Behavioral options outside the connection itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Log raw inbound/outbound traffic at debug level.
    pub debug: bool,
    /// Channel key under which non-channel-scoped command responses
    /// (color changes, whispers) are correlated.
    pub global_default_channel: String,
    /// Skip requesting the membership capability (JOIN/PART/NAMES for
    /// other users).
    pub skip_membership: bool,
    /// Delay between queued channel joins. Floored at 300ms.
    pub join_interval: Duration,
    /// Level at which incoming chat messages are logged.
    pub messages_log_level: MessageLogLevel,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            debug: false,
            global_default_channel: "#tmijs".to_string(),
            skip_membership: false,
            join_interval: Duration::from_millis(2000),
            messages_log_level: MessageLogLevel::Info,
        }
    }
}

/// Log level for incoming chat messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub server: String,
    pub port: u16,
    /// Use `wss://`. Plain `ws://` on port 80 is supported for tests.
    pub secure: bool,
    /// Reconnect automatically after an unexpected close.
    pub reconnect: bool,
    /// Multiplier applied to the reconnect delay before each new attempt.
    pub reconnect_decay: f64,
    /// Initial reconnect delay; also the value the delay resets to on a
    /// successful handshake.
    pub reconnect_interval: Duration,
    /// Upper bound for the decayed reconnect delay.
    pub max_reconnect_interval: Duration,
    /// Reconnection attempts before giving up. Unbounded by default.
    pub max_reconnect_attempts: u64,
    /// How long to wait for a PONG (both for liveness probes and `ping()`).
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server: "irc-ws.chat.twitch.tv".to_string(),
            port: 443,
            secure: true,
            reconnect: true,
            reconnect_decay: 1.5,
            reconnect_interval: Duration::from_millis(1000),
            max_reconnect_interval: Duration::from_millis(30000),
            max_reconnect_attempts: u64::MAX,
            timeout: Duration::from_millis(9999),
        }
    }
}

/// Login identity: username plus an optional OAuth token.
#[derive(Clone)]
pub struct Identity {
    pub username: String,
    pub password: Option<TokenSource>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<secret>"))
            .finish()
    }
}

/// OAuth token, static or produced on demand (refreshed from disk, a vault,
/// an auth flow, ...).
#[derive(Clone)]
pub enum TokenSource {
    Static(String),
    Provider(Arc<dyn Fn() -> BoxFuture<'static, Result<String, Error>> + Send + Sync>),
}

impl TokenSource {
    pub(crate) async fn resolve(&self) -> Result<String, Error> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Provider(f) => f().await,
        }
    }
}

/// Normalize a channel name: lowercase, with a leading `#`.
pub fn channel(name: &str) -> String {
    let name = name.trim().to_lowercase();
    if name.starts_with('#') {
        name
    } else {
        format!("#{name}")
    }
}

/// Normalize a username: lowercase, without a leading `#`.
pub fn username(name: &str) -> String {
    name.trim().trim_start_matches('#').to_lowercase()
}

/// Normalize an OAuth token: ensure the `oauth:` prefix, lowercase.
pub(crate) fn oauth_token(token: &str) -> String {
    let token = token.trim();
    if token.to_lowercase().starts_with("oauth:") {
        token.to_lowercase()
    } else {
        format!("oauth:{}", token.to_lowercase())
    }
}

/// Whether a username is an anonymous (`justinfan<digits>`) login.
pub(crate) fn is_justinfan(name: &str) -> bool {
    name.strip_prefix("justinfan")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_normalization_is_idempotent() {
        assert_eq!(channel("Dallas"), "#dallas");
        assert_eq!(channel("#Dallas"), "#dallas");
        assert_eq!(channel(&channel("Dallas")), channel("Dallas"));
    }

    #[test]
    fn username_strips_hash() {
        assert_eq!(username("#Dallas"), "dallas");
        assert_eq!(username("Dallas"), "dallas");
    }

    #[test]
    fn token_gets_oauth_prefix() {
        assert_eq!(oauth_token("abc123"), "oauth:abc123");
        assert_eq!(oauth_token("oauth:abc123"), "oauth:abc123");
        assert_eq!(oauth_token("OAuth:ABC"), "oauth:abc");
    }

    #[test]
    fn justinfan_detection() {
        assert!(is_justinfan("justinfan1234"));
        assert!(!is_justinfan("justinfan"));
        assert!(!is_justinfan("justinfan12x"));
        assert!(!is_justinfan("dallas"));
    }
}
