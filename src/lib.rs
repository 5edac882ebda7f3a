//! Twitch chat (TMI) client library.
//!
//! Connects to the Twitch chat service over a WebSocket, authenticates,
//! joins channels, parses the IRCv3 tag-carrying message stream into
//! semantic [`Event`]s, and turns chat commands into request/response
//! operations by correlating them with the delayed, tag-identified server
//! replies.
//!
//! # Modules
//!
//! - [`client`] — connection core: handshake, liveness, reconnection,
//!   dispatch, command correlation
//! - [`commands`] — the chat command surface on [`ClientHandle`]
//! - [`config`] — configuration and identifier normalization
//! - [`event`] — events delivered to the embedding application
//! - [`irc`] — IRC message parsing/formatting
//! - [`tags`] — IRCv3 tag codec and normalization
//! - [`transport`] — the WebSocket transport capability
//! - [`queue`] — the sequential delay queue throttling channel joins
//! - [`state`] — tracked chat state (userstate, rosters)
//!
//! # Example
//!
//! ```rust,no_run
//! use tmi_sdk::{config::ClientConfig, Event};
//!
//! # async fn run() -> Result<(), tmi_sdk::Error> {
//! let config = ClientConfig {
//!     channels: vec!["#twitchdev".to_string()],
//!     ..Default::default()
//! };
//! let (client, mut events) = tmi_sdk::spawn(config);
//! client.connect().await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let Event::Chat { channel, message, .. } = event {
//!         println!("[{channel}] {message}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod event;
pub mod irc;
pub mod queue;
pub mod state;
pub mod tags;
pub mod transport;

pub use client::{spawn, spawn_with_transport, ClientHandle};
pub use config::ClientConfig;
pub use error::Error;
pub use event::Event;
