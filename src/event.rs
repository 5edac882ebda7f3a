//! Events emitted by the client for the embedding application to consume.

use std::time::Duration;

use crate::irc::Message;
use crate::tags::Tags;

/// Events delivered on the receiver returned by [`crate::client::spawn`].
///
/// Chat payloads carry the normalized tag mapping of the originating IRC
/// message; see [`crate::tags::Tag`] for the value shapes.
#[derive(Debug, Clone)]
pub enum Event {
    /// A connection attempt is starting.
    Connecting { server: String, port: u16 },
    /// The handshake completed (numeric 376 received).
    Connected { server: String, port: u16 },
    /// Credentials were sent; waiting for the welcome.
    Logon,
    /// The connection closed.
    Disconnected { reason: String },
    /// A reconnection attempt is scheduled.
    Reconnect,
    /// Reconnection attempts are exhausted.
    MaxReconnect,

    /// The server pinged us (we answered automatically).
    Ping,
    /// The server answered our ping.
    Pong { latency: Duration },

    /// A user joined a channel. `is_self` marks our own join.
    Join {
        channel: String,
        user: String,
        is_self: bool,
    },
    /// A user left a channel.
    Part {
        channel: String,
        user: String,
        is_self: bool,
    },
    /// NAMES roster for a channel.
    Names { channel: String, users: Vec<String> },

    /// A regular chat message. `is_self` marks the local echo of our own
    /// outgoing messages.
    Chat {
        channel: String,
        tags: Tags,
        message: String,
        is_self: bool,
    },
    /// A `/me` action message.
    Action {
        channel: String,
        tags: Tags,
        message: String,
        is_self: bool,
    },
    /// A whisper (private message).
    Whisper {
        from: String,
        tags: Tags,
        message: String,
        is_self: bool,
    },
    /// A chat message carrying bits.
    Cheer {
        channel: String,
        tags: Tags,
        message: String,
    },
    /// A channel-points redemption attached to a chat message.
    Redeem {
        channel: String,
        user: String,
        reward_type: String,
        tags: Tags,
        message: String,
    },

    /// A server NOTICE, with its `msg-id` when present.
    Notice {
        channel: String,
        msg_id: Option<String>,
        message: String,
    },
    /// A message was held or rejected by AutoMod.
    Automod {
        channel: String,
        msg_id: String,
        message: String,
    },

    /// A user was permanently banned (their messages were purged).
    Ban {
        channel: String,
        user: String,
        tags: Tags,
    },
    /// A user was timed out for `duration` seconds.
    Timeout {
        channel: String,
        user: String,
        duration: u64,
        tags: Tags,
    },
    /// Chat was cleared by a moderator.
    ClearChat { channel: String },
    /// A single message was deleted.
    MessageDeleted {
        channel: String,
        user: String,
        message: String,
        tags: Tags,
    },

    /// Room mode flags for a channel (full or partial update).
    Roomstate { channel: String, tags: Tags },
    /// Emote-only mode toggled.
    EmoteOnly { channel: String, enabled: bool },
    /// Followers-only mode toggled; `minutes` is the required follow age.
    FollowersOnly {
        channel: String,
        enabled: bool,
        minutes: u64,
    },
    /// Slow mode toggled; `seconds` is the per-message cooldown.
    Slow {
        channel: String,
        enabled: bool,
        seconds: u64,
    },
    /// Subscribers-only mode toggled.
    Subscribers { channel: String, enabled: bool },
    /// Unique-chat (r9k) mode toggled.
    R9kBeta { channel: String, enabled: bool },

    /// A user subscribed for the first time.
    Subscription {
        channel: String,
        username: String,
        message: Option<String>,
        tags: Tags,
    },
    /// A user resubscribed; `months` is the cumulative total.
    Resub {
        channel: String,
        username: String,
        months: u64,
        message: Option<String>,
        tags: Tags,
    },
    /// A user gifted a subscription to a specific recipient.
    SubGift {
        channel: String,
        gifter: String,
        recipient: String,
        tags: Tags,
    },
    /// An anonymous gift to a specific recipient.
    AnonSubGift {
        channel: String,
        recipient: String,
        tags: Tags,
    },
    /// A user gifted a batch of subscriptions to random users.
    SubMysteryGift {
        channel: String,
        gifter: String,
        count: u64,
        tags: Tags,
    },
    /// An anonymous batch gift.
    AnonSubMysteryGift {
        channel: String,
        count: u64,
        tags: Tags,
    },
    /// A user continued a Prime subscription as a paid one.
    PrimePaidUpgrade {
        channel: String,
        username: String,
        tags: Tags,
    },
    /// A user continued a gifted subscription.
    GiftPaidUpgrade {
        channel: String,
        username: String,
        gifter: String,
        tags: Tags,
    },
    /// A user continued an anonymously gifted subscription.
    AnonGiftPaidUpgrade {
        channel: String,
        username: String,
        tags: Tags,
    },
    /// A moderator announcement.
    Announcement {
        channel: String,
        tags: Tags,
        message: String,
    },
    /// The channel was raided.
    Raided {
        channel: String,
        username: String,
        viewers: u64,
        tags: Tags,
    },
    /// A USERNOTICE whose `msg-id` has no dedicated variant.
    UserNotice {
        channel: String,
        msg_id: String,
        tags: Tags,
        message: Option<String>,
    },

    /// The channel started hosting another channel.
    Hosting {
        channel: String,
        target: String,
        viewers: u64,
    },
    /// The channel stopped hosting.
    Unhost { channel: String, viewers: u64 },
    /// Another channel is hosting us.
    Hosted {
        channel: String,
        by: String,
        viewers: u64,
        auto: bool,
    },

    /// Moderator roster reply (`/mods`).
    Mods { channel: String, mods: Vec<String> },
    /// VIP roster reply (`/vips`).
    Vips { channel: String, vips: Vec<String> },
    /// A user was granted moderator status.
    Mod { channel: String, user: String },
    /// A user lost moderator status.
    Unmod { channel: String, user: String },

    /// Our emote sets changed.
    EmoteSets { sets: String },
    /// Global user state for the logged-in user.
    GlobalUserState { tags: Tags },

    /// Every parsed incoming message, before dispatch.
    RawMessage(Message),
}
