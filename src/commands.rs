//! Chat command surface.
//!
//! One method per chat command, each returning once the server's
//! tag-identified response confirms or rejects it. The deadline for a
//! response is derived from the live latency sample; a command that sees no
//! recognizable response rejects with [`Error::NoResponse`].

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time;

use crate::client::{command_deadline, ClientHandle, CommandSpec, Reply, Request, SayKind, Topic, Wire};
use crate::config;
use crate::error::Error;
use crate::state::ChatState;

impl ClientHandle {
    /// Open the connection and wait for the handshake to complete.
    /// Resolves with `(server, port)` once numeric 376 arrives; rejects with
    /// the server's reason if the login is refused.
    pub async fn connect(&self) -> Result<(String, u16), Error> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Connect { respond_to: tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Close the connection. Reconnection is suppressed for this close.
    pub async fn disconnect(&self) -> Result<(String, u16), Error> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Disconnect { respond_to: tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Probe the server. Resolves with the measured round-trip latency.
    pub async fn ping(&self) -> Result<Duration, Error> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Ping { respond_to: tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        match time::timeout(self.config.connection.timeout, rx).await {
            Err(_) => Err(Error::NoResponse),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Ok(Ok(result)) => result,
        }
    }

    /// The most recent round-trip latency sample.
    pub fn latency(&self) -> Duration {
        *self.latency.borrow()
    }

    /// A snapshot of the tracked chat state (joined channels, userstate,
    /// rosters). Eventually consistent with the wire.
    pub async fn state(&self) -> Result<ChatState, Error> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::State { respond_to: tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Send a raw protocol line.
    pub async fn raw(&self, line: &str) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Raw {
                line: line.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    // ── Messages ────────────────────────────────────────────────────

    /// Send a chat message. Messages over 500 bytes are split and the tail
    /// is delivered shortly after the head.
    pub async fn say(&self, channel: &str, message: &str) -> Result<(), Error> {
        self.send_say(channel, message.to_string(), SayKind::Chat).await
    }

    /// Send a `/me` action message.
    pub async fn action(&self, channel: &str, message: &str) -> Result<(), Error> {
        self.send_say(channel, message.to_string(), SayKind::Action).await
    }

    /// Send a threaded reply to an existing message.
    pub async fn reply(
        &self,
        channel: &str,
        message: &str,
        reply_parent_msg_id: &str,
    ) -> Result<(), Error> {
        if reply_parent_msg_id.trim().is_empty() {
            return Err(Error::Usage(
                "The reply parent message id is required.".to_string(),
            ));
        }
        self.send_say(
            channel,
            message.to_string(),
            SayKind::Reply(reply_parent_msg_id.to_string()),
        )
        .await
    }

    /// Send a moderator announcement.
    pub async fn announce(&self, channel: &str, message: &str) -> Result<(), Error> {
        self.send_say(channel, message.to_string(), SayKind::Announce).await
    }

    /// Send a whisper. Twitch never confirms successful whispers, so the
    /// response deadline elapsing counts as success; an explicit
    /// `whisper_*` rejection still fails the call.
    pub async fn whisper(&self, username: &str, message: &str) -> Result<(String, String), Error> {
        let username = config::username(username);
        if username == self.state().await?.username {
            return Err(Error::Usage(
                "Cannot send a whisper to the same account.".to_string(),
            ));
        }
        let spec = CommandSpec {
            channel: self.config.options.global_default_channel.clone(),
            wire: Wire::Chat(format!("/w {username} {message}")),
            topic: Topic::Whisper,
        };
        match self.run_command(spec).await {
            Ok(_) | Err(Error::NoResponse) => Ok((username, message.to_string())),
            Err(err) => Err(err),
        }
    }

    // ── Channels ────────────────────────────────────────────────────

    /// Join a single channel. Resolves with the joined channel name once
    /// its ROOMSTATE arrives.
    pub async fn join(&self, channel: &str) -> Result<Vec<String>, Error> {
        self.join_many(&[channel]).await
    }

    /// Join several channels with one JOIN line. Resolves only after every
    /// channel is confirmed; a single rejection fails the whole call, and a
    /// timeout reports the channels that never confirmed.
    pub async fn join_many(&self, channels: &[&str]) -> Result<Vec<String>, Error> {
        if channels.is_empty() {
            return Err(Error::Usage("No channels to join.".to_string()));
        }
        let channels: Vec<String> = channels.iter().map(|c| config::channel(c)).collect();
        let deadline = self.deadline() * channels.len() as u32;

        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Join {
                channels: channels.clone(),
                respond_to: tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        match time::timeout(deadline, rx).await {
            Err(_) => {
                // State mutation is independent of future fulfilment: some
                // of the channels may well have been joined.
                let joined = self.state().await.map(|s| s.channels).unwrap_or_default();
                let failed = channels
                    .into_iter()
                    .filter(|c| !joined.contains(c))
                    .collect();
                Err(Error::JoinTimeout(failed))
            }
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Ok(Ok(result)) => result,
        }
    }

    /// Leave a channel. Resolves with the channel name.
    pub async fn part(&self, channel: &str) -> Result<String, Error> {
        let channel = config::channel(channel);
        let spec = CommandSpec {
            channel: channel.clone(),
            wire: Wire::Line(format!("PART {channel}")),
            topic: Topic::Part,
        };
        self.run_command(spec).await?;
        Ok(channel)
    }

    /// Alias for [`Self::part`].
    pub async fn leave(&self, channel: &str) -> Result<String, Error> {
        self.part(channel).await
    }

    // ── Moderation ──────────────────────────────────────────────────

    /// Ban a user. Resolves with `(channel, username, reason)`.
    pub async fn ban(
        &self,
        channel: &str,
        username: &str,
        reason: Option<&str>,
    ) -> Result<(String, String, Option<String>), Error> {
        let channel = config::channel(channel);
        let username = config::username(username);
        let text = match reason {
            Some(reason) => format!("/ban {username} {reason}"),
            None => format!("/ban {username}"),
        };
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(text),
            topic: Topic::Ban,
        })
        .await?;
        Ok((channel, username, reason.map(str::to_string)))
    }

    /// Lift a ban.
    pub async fn unban(&self, channel: &str, username: &str) -> Result<(String, String), Error> {
        let channel = config::channel(channel);
        let username = config::username(username);
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(format!("/unban {username}")),
            topic: Topic::Unban,
        })
        .await?;
        Ok((channel, username))
    }

    /// Time a user out for `seconds`.
    pub async fn timeout(
        &self,
        channel: &str,
        username: &str,
        seconds: u64,
        reason: Option<&str>,
    ) -> Result<(String, String, u64, Option<String>), Error> {
        let channel = config::channel(channel);
        let username = config::username(username);
        let text = match reason {
            Some(reason) => format!("/timeout {username} {seconds} {reason}"),
            None => format!("/timeout {username} {seconds}"),
        };
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(text),
            topic: Topic::Timeout,
        })
        .await?;
        Ok((channel, username, seconds, reason.map(str::to_string)))
    }

    /// Clear the chat. Confirmed by the resulting CLEARCHAT.
    pub async fn clear(&self, channel: &str) -> Result<String, Error> {
        let channel = config::channel(channel);
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat("/clear".to_string()),
            topic: Topic::Clear,
        })
        .await?;
        Ok(channel)
    }

    /// Delete a single message by its `id` tag.
    pub async fn delete_message(&self, channel: &str, message_id: &str) -> Result<String, Error> {
        let channel = config::channel(channel);
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(format!("/delete {message_id}")),
            topic: Topic::Delete,
        })
        .await?;
        Ok(channel)
    }

    /// Grant moderator status.
    pub async fn mod_user(&self, channel: &str, username: &str) -> Result<(String, String), Error> {
        let channel = config::channel(channel);
        let username = config::username(username);
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(format!("/mod {username}")),
            topic: Topic::GrantMod,
        })
        .await?;
        Ok((channel, username))
    }

    /// Revoke moderator status.
    pub async fn unmod_user(
        &self,
        channel: &str,
        username: &str,
    ) -> Result<(String, String), Error> {
        let channel = config::channel(channel);
        let username = config::username(username);
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(format!("/unmod {username}")),
            topic: Topic::RevokeMod,
        })
        .await?;
        Ok((channel, username))
    }

    /// Grant VIP status.
    pub async fn vip(&self, channel: &str, username: &str) -> Result<(String, String), Error> {
        let channel = config::channel(channel);
        let username = config::username(username);
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(format!("/vip {username}")),
            topic: Topic::GrantVip,
        })
        .await?;
        Ok((channel, username))
    }

    /// Revoke VIP status.
    pub async fn unvip(&self, channel: &str, username: &str) -> Result<(String, String), Error> {
        let channel = config::channel(channel);
        let username = config::username(username);
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(format!("/unvip {username}")),
            topic: Topic::RevokeVip,
        })
        .await?;
        Ok((channel, username))
    }

    /// Request the moderator roster.
    pub async fn mods(&self, channel: &str) -> Result<Vec<String>, Error> {
        let channel = config::channel(channel);
        let reply = self
            .run_command(CommandSpec {
                channel,
                wire: Wire::Chat("/mods".to_string()),
                topic: Topic::Mods,
            })
            .await?;
        match reply {
            Reply::Names(names) => Ok(names),
            _ => Ok(Vec::new()),
        }
    }

    /// Request the VIP roster.
    pub async fn vips(&self, channel: &str) -> Result<Vec<String>, Error> {
        let channel = config::channel(channel);
        let reply = self
            .run_command(CommandSpec {
                channel,
                wire: Wire::Chat("/vips".to_string()),
                topic: Topic::Vips,
            })
            .await?;
        match reply {
            Reply::Names(names) => Ok(names),
            _ => Ok(Vec::new()),
        }
    }

    // ── Room modes ──────────────────────────────────────────────────

    /// Enable emote-only mode.
    pub async fn emoteonly(&self, channel: &str) -> Result<String, Error> {
        self.mode_command(channel, "/emoteonly", Topic::EmoteOnly).await
    }

    /// Disable emote-only mode.
    pub async fn emoteonlyoff(&self, channel: &str) -> Result<String, Error> {
        self.mode_command(channel, "/emoteonlyoff", Topic::EmoteOnlyOff).await
    }

    /// Enable followers-only mode, requiring a follow age in minutes.
    /// Confirmed by the ROOMSTATE update carrying the new duration.
    pub async fn followersonly(&self, channel: &str, minutes: u64) -> Result<(String, u64), Error> {
        let channel = config::channel(channel);
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(format!("/followers {minutes}")),
            topic: Topic::Followers,
        })
        .await?;
        Ok((channel, minutes))
    }

    /// Disable followers-only mode.
    pub async fn followersonlyoff(&self, channel: &str) -> Result<String, Error> {
        self.mode_command(channel, "/followersoff", Topic::FollowersOff).await
    }

    /// Alias for [`Self::followersonly`].
    pub async fn followersmode(&self, channel: &str, minutes: u64) -> Result<(String, u64), Error> {
        self.followersonly(channel, minutes).await
    }

    /// Alias for [`Self::followersonlyoff`].
    pub async fn followersmodeoff(&self, channel: &str) -> Result<String, Error> {
        self.followersonlyoff(channel).await
    }

    /// Enable slow mode with a per-message cooldown in seconds. Confirmed
    /// by the ROOMSTATE update carrying the new duration.
    pub async fn slow(&self, channel: &str, seconds: u64) -> Result<(String, u64), Error> {
        let channel = config::channel(channel);
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(format!("/slow {seconds}")),
            topic: Topic::Slow,
        })
        .await?;
        Ok((channel, seconds))
    }

    /// Disable slow mode.
    pub async fn slowoff(&self, channel: &str) -> Result<String, Error> {
        self.mode_command(channel, "/slowoff", Topic::SlowOff).await
    }

    /// Alias for [`Self::slow`].
    pub async fn slowmode(&self, channel: &str, seconds: u64) -> Result<(String, u64), Error> {
        self.slow(channel, seconds).await
    }

    /// Alias for [`Self::slowoff`].
    pub async fn slowmodeoff(&self, channel: &str) -> Result<String, Error> {
        self.slowoff(channel).await
    }

    /// Enable subscribers-only mode.
    pub async fn subscribers(&self, channel: &str) -> Result<String, Error> {
        self.mode_command(channel, "/subscribers", Topic::Subscribers).await
    }

    /// Disable subscribers-only mode.
    pub async fn subscribersoff(&self, channel: &str) -> Result<String, Error> {
        self.mode_command(channel, "/subscribersoff", Topic::SubscribersOff).await
    }

    /// Enable unique-chat (r9k) mode.
    pub async fn r9kbeta(&self, channel: &str) -> Result<String, Error> {
        self.mode_command(channel, "/r9kbeta", Topic::R9k).await
    }

    /// Disable unique-chat (r9k) mode.
    pub async fn r9kbetaoff(&self, channel: &str) -> Result<String, Error> {
        self.mode_command(channel, "/r9kbetaoff", Topic::R9kOff).await
    }

    /// Alias for [`Self::r9kbeta`].
    pub async fn r9kmode(&self, channel: &str) -> Result<String, Error> {
        self.r9kbeta(channel).await
    }

    /// Alias for [`Self::r9kbeta`].
    pub async fn uniquechat(&self, channel: &str) -> Result<String, Error> {
        self.r9kbeta(channel).await
    }

    /// Alias for [`Self::r9kbetaoff`].
    pub async fn uniquechatoff(&self, channel: &str) -> Result<String, Error> {
        self.r9kbetaoff(channel).await
    }

    // ── Broadcast ───────────────────────────────────────────────────

    /// Change the bot's chat color. Correlated through the global default
    /// channel, since the response is not channel-scoped.
    pub async fn color(&self, value: &str) -> Result<String, Error> {
        self.run_command(CommandSpec {
            channel: self.config.options.global_default_channel.clone(),
            wire: Wire::Chat(format!("/color {value}")),
            topic: Topic::Color,
        })
        .await?;
        Ok(value.to_string())
    }

    /// Run a commercial break of `seconds` length.
    pub async fn commercial(&self, channel: &str, seconds: u64) -> Result<(String, u64), Error> {
        let channel = config::channel(channel);
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(format!("/commercial {seconds}")),
            topic: Topic::Commercial,
        })
        .await?;
        Ok((channel, seconds))
    }

    /// Host another channel. Resolves with the number of host commands
    /// remaining, when the server reports one.
    pub async fn host(&self, channel: &str, target: &str) -> Result<Option<u64>, Error> {
        let channel = config::channel(channel);
        let target = config::username(target);
        let reply = self
            .run_command(CommandSpec {
                channel,
                wire: Wire::Chat(format!("/host {target}")),
                topic: Topic::Host,
            })
            .await?;
        match reply {
            Reply::Remaining(remaining) => Ok(remaining),
            _ => Ok(None),
        }
    }

    /// Stop hosting.
    pub async fn unhost(&self, channel: &str) -> Result<String, Error> {
        self.mode_command(channel, "/unhost", Topic::Unhost).await
    }

    /// Raid another channel. Twitch sends no success confirmation, so the
    /// response deadline elapsing counts as success; an explicit
    /// `raid_error_*` rejection still fails the call.
    pub async fn raid(&self, channel: &str, target: &str) -> Result<(String, String), Error> {
        let channel = config::channel(channel);
        let target = config::username(target);
        let spec = CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(format!("/raid {target}")),
            topic: Topic::Raid,
        };
        match self.run_command(spec).await {
            Ok(_) | Err(Error::NoResponse) => Ok((channel, target)),
            Err(err) => Err(err),
        }
    }

    /// Cancel an outstanding raid. Like [`Self::raid`], silence counts as
    /// success.
    pub async fn unraid(&self, channel: &str) -> Result<String, Error> {
        let channel = config::channel(channel);
        let spec = CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat("/unraid".to_string()),
            topic: Topic::Unraid,
        };
        match self.run_command(spec).await {
            Ok(_) | Err(Error::NoResponse) => Ok(channel),
            Err(err) => Err(err),
        }
    }

    // ── Plumbing ────────────────────────────────────────────────────

    fn deadline(&self) -> Duration {
        command_deadline(*self.latency.borrow())
    }

    async fn run_command(&self, spec: CommandSpec) -> Result<Reply, Error> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Command {
                spec,
                respond_to: tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        match time::timeout(self.deadline(), rx).await {
            // The one-shot listener is abandoned here; the actor prunes it,
            // so a late response is dropped silently.
            Err(_) => Err(Error::NoResponse),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Ok(Ok(result)) => result,
        }
    }

    /// A room-mode toggle that resolves with the channel name.
    async fn mode_command(
        &self,
        channel: &str,
        text: &str,
        topic: Topic,
    ) -> Result<String, Error> {
        let channel = config::channel(channel);
        self.run_command(CommandSpec {
            channel: channel.clone(),
            wire: Wire::Chat(text.to_string()),
            topic,
        })
        .await?;
        Ok(channel)
    }

    async fn send_say(&self, channel: &str, text: String, kind: SayKind) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Say {
                channel: config::channel(channel),
                text,
                kind,
                respond_to: tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }
}
