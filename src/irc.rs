//! IRC message parsing and formatting.
//!
//! Twitch speaks an IRCv3-derived dialect: `@tags :prefix COMMAND params`.
//! The parser is strictly positional and does not interpret tag values;
//! composite parsing and scalar normalization happen later, in the
//! dispatcher, via [`crate::tags::normalize`].

use std::fmt;

use crate::tags::{self, Tag, Tags};

/// A parsed IRC message. Immutable after parse.
#[derive(Debug, Clone)]
pub struct Message {
    /// The original line, without the trailing CRLF.
    pub raw: String,
    /// IRCv3 message tags. A tag without `=value` parses as `Tag::Bool(true)`.
    pub tags: Tags,
    /// Source of the message: `nick!user@host`, `tmi.twitch.tv`, or `jtv`.
    pub prefix: Option<String>,
    /// Command verb (`PRIVMSG`, `NOTICE`, numeric `001`, ...).
    pub command: String,
    /// Positional parameters; a trailing parameter introduced by `:` is last.
    pub params: Vec<String>,
}

impl Message {
    /// Parse a single raw IRC line.
    ///
    /// Returns `None` for an empty line, a `@` tag block with no following
    /// space, a `:` prefix with no following space, or a line with no
    /// extractable command.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }

        let raw = line.to_string();
        let mut rest = line;
        let mut tags = Tags::new();

        if let Some(stripped) = rest.strip_prefix('@') {
            let end = stripped.find(' ')?;
            for pair in stripped[..end].split(';') {
                if pair.is_empty() {
                    continue;
                }
                match pair.split_once('=') {
                    Some((key, value)) => {
                        tags.insert(key.to_string(), Tag::Str(value.to_string()))
                    }
                    None => tags.insert(pair.to_string(), Tag::Bool(true)),
                };
            }
            rest = stripped[end + 1..].trim_start_matches(' ');
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let end = stripped.find(' ')?;
            let prefix = stripped[..end].to_string();
            rest = stripped[end + 1..].trim_start_matches(' ');
            Some(prefix)
        } else {
            None
        };

        if rest.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        let command;
        if let Some(space) = rest.find(' ') {
            command = rest[..space].to_ascii_uppercase();
            rest = rest[space + 1..].trim_start_matches(' ');

            while !rest.is_empty() {
                if let Some(trailing) = rest.strip_prefix(':') {
                    params.push(trailing.to_string());
                    break;
                }
                if let Some(space) = rest.find(' ') {
                    params.push(rest[..space].to_string());
                    rest = rest[space + 1..].trim_start_matches(' ');
                } else {
                    params.push(rest.to_string());
                    break;
                }
            }
        } else {
            command = rest.to_ascii_uppercase();
        }

        Some(Message {
            raw,
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Create an outgoing message.
    pub fn new(command: &str, params: Vec<&str>) -> Self {
        Self {
            raw: String::new(),
            tags: Tags::new(),
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Create an outgoing message with tags.
    pub fn with_tags(tags: Tags, command: &str, params: Vec<&str>) -> Self {
        Self {
            tags,
            ..Self::new(command, params)
        }
    }

    /// The nick half of a `nick!user@host` prefix, or the prefix verbatim.
    pub fn prefix_nick(&self) -> Option<&str> {
        self.prefix.as_deref().and_then(|p| p.split('!').next())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            write!(f, "@")?;
            let mut first = true;
            for (key, value) in &self.tags {
                if !first {
                    write!(f, ";")?;
                }
                first = false;
                match value {
                    Tag::Bool(true) => write!(f, "{key}")?,
                    Tag::Bool(false) => write!(f, "{key}=0")?,
                    Tag::None => write!(f, "{key}=")?,
                    Tag::Str(s) => write!(f, "{key}={}", tags::escape(s))?,
                    Tag::Badges(badges) => {
                        write!(f, "{key}={}", tags::format_badges(badges))?
                    }
                    Tag::Emotes(emotes) => {
                        write!(f, "{key}={}", tags::format_emotes(emotes))?
                    }
                }
            }
            write!(f, " ")?;
        }

        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        for (i, param) in self.params.iter().enumerate() {
            if i == self.params.len() - 1
                && (param.contains(' ') || param.starts_with(':') || param.is_empty())
            {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let msg = Message::parse("PING :tmi.twitch.tv").unwrap();
        assert!(msg.tags.is_empty());
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["tmi.twitch.tv"]);
    }

    #[test]
    fn parse_privmsg_with_tags() {
        let msg = Message::parse(
            "@badges=moderator/1;color=#FF4500;display-name=Schmoopiie \
             :schmoopiie!schmoopiie@schmoopiie.tmi.twitch.tv PRIVMSG #schmoopiie :Hello world!",
        )
        .unwrap();
        assert_eq!(msg.tags.get("color"), Some(&Tag::Str("#FF4500".into())));
        assert_eq!(
            msg.prefix.as_deref(),
            Some("schmoopiie!schmoopiie@schmoopiie.tmi.twitch.tv")
        );
        assert_eq!(msg.prefix_nick(), Some("schmoopiie"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#schmoopiie", "Hello world!"]);
    }

    #[test]
    fn parse_keeps_raw_line() {
        let line = ":tmi.twitch.tv 001 justinfan123 :Welcome, GLHF!";
        let msg = Message::parse(&format!("{line}\r\n")).unwrap();
        assert_eq!(msg.raw, line);
        assert_eq!(msg.command, "001");
    }

    #[test]
    fn parse_valueless_tag_is_true() {
        let msg = Message::parse("@r9k :tmi.twitch.tv ROOMSTATE #dallas").unwrap();
        assert_eq!(msg.tags.get("r9k"), Some(&Tag::Bool(true)));
    }

    #[test]
    fn parse_does_not_unescape() {
        let msg =
            Message::parse("@system-msg=5\\smonths! :tmi.twitch.tv USERNOTICE #dallas").unwrap();
        assert_eq!(msg.tags.get("system-msg"), Some(&Tag::Str("5\\smonths!".into())));
    }

    #[test]
    fn parse_failure_sentinels() {
        assert!(Message::parse("").is_none());
        assert!(Message::parse("@badges=moderator/1").is_none());
        assert!(Message::parse(":tmi.twitch.tv").is_none());
        assert!(Message::parse("@a=b :prefix ").is_none());
    }

    #[test]
    fn parse_command_only() {
        let msg = Message::parse("RECONNECT").unwrap();
        assert_eq!(msg.command, "RECONNECT");
        assert!(msg.params.is_empty());
    }

    #[test]
    fn format_trailing_param() {
        let msg = Message::new("PRIVMSG", vec!["#dallas", "Hello world!"]);
        assert_eq!(msg.to_string(), "PRIVMSG #dallas :Hello world!");
    }

    #[test]
    fn format_with_tags_block() {
        let mut tags = Tags::new();
        tags.insert("reply-parent-msg-id".into(), Tag::Str("abc-123".into()));
        let msg = Message::with_tags(tags, "PRIVMSG", vec!["#dallas", "hi"]);
        assert_eq!(
            msg.to_string(),
            "@reply-parent-msg-id=abc-123 PRIVMSG #dallas :hi"
        );
    }
}
