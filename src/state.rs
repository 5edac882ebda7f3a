//! Auxiliary chat state tracked across a connection.

use std::collections::{HashMap, HashSet};

use crate::tags::Tags;

/// State owned by the connection actor. The handle side reads snapshots;
/// views are eventually consistent with the wire.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    /// The login we are connected as (server-assigned for anonymous logins).
    pub username: String,
    /// Channels we are currently joined to.
    pub channels: Vec<String>,
    /// Last USERSTATE tag set per channel.
    pub userstate: HashMap<String, Tags>,
    /// Tag set from GLOBALUSERSTATE.
    pub globaluserstate: Tags,
    /// Last ROOMSTATE tag set per channel.
    pub roomstate: HashMap<String, Tags>,
    /// Moderator roster per channel.
    pub moderators: HashMap<String, HashSet<String>>,
    /// VIP roster per channel.
    pub vips: HashMap<String, HashSet<String>>,
    /// Last observed `emote-sets` value.
    pub emote_sets: String,
    /// Channel most recently confirmed joined.
    pub last_joined: String,
}

impl ChatState {
    /// Record a confirmed join. Returns `true` if the channel was new.
    pub fn track_join(&mut self, channel: &str) -> bool {
        if self.channels.iter().any(|c| c == channel) {
            return false;
        }
        self.channels.push(channel.to_string());
        self.last_joined = channel.to_string();
        true
    }

    /// Record leaving a channel.
    pub fn track_part(&mut self, channel: &str) {
        self.channels.retain(|c| c != channel);
        self.userstate.remove(channel);
        self.roomstate.remove(channel);
    }

    pub fn add_moderator(&mut self, channel: &str, user: &str) -> bool {
        self.moderators
            .entry(channel.to_string())
            .or_default()
            .insert(user.to_string())
    }

    pub fn remove_moderator(&mut self, channel: &str, user: &str) -> bool {
        self.moderators
            .get_mut(channel)
            .is_some_and(|set| set.remove(user))
    }

    /// Replace the roster from a `/mods` reply.
    pub fn set_moderators(&mut self, channel: &str, users: &[String]) {
        self.moderators
            .insert(channel.to_string(), users.iter().cloned().collect());
    }

    /// Replace the roster from a `/vips` reply.
    pub fn set_vips(&mut self, channel: &str, users: &[String]) {
        self.vips
            .insert(channel.to_string(), users.iter().cloned().collect());
    }

    /// Forget per-session state at the start of a new connection. The caller
    /// is expected to have captured `channels` for the rejoin queue first.
    pub fn reset_for_session(&mut self) {
        self.channels.clear();
        self.userstate.clear();
        self.globaluserstate.clear();
        self.roomstate.clear();
        self.moderators.clear();
        self.vips.clear();
        self.last_joined.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_tracking_deduplicates() {
        let mut state = ChatState::default();
        assert!(state.track_join("#dallas"));
        assert!(!state.track_join("#dallas"));
        assert_eq!(state.channels, vec!["#dallas"]);
        assert_eq!(state.last_joined, "#dallas");
    }

    #[test]
    fn moderator_roster_add_remove() {
        let mut state = ChatState::default();
        assert!(state.add_moderator("#dallas", "alice"));
        assert!(!state.add_moderator("#dallas", "alice"));
        assert!(state.remove_moderator("#dallas", "alice"));
        assert!(!state.remove_moderator("#dallas", "alice"));
        assert!(state.moderators["#dallas"].is_empty());
    }

    #[test]
    fn part_drops_channel_state() {
        let mut state = ChatState::default();
        state.track_join("#dallas");
        state.userstate.insert("#dallas".into(), Tags::new());
        state.track_part("#dallas");
        assert!(state.channels.is_empty());
        assert!(!state.userstate.contains_key("#dallas"));
    }
}
