//! IRCv3 tag values: escape codec, composite tags, normalization.
//!
//! Twitch attaches message metadata as IRCv3 tags. Three tags carry composite
//! payloads (`badges`, `badge-info`, `emotes`); the rest are scalars that the
//! dispatcher normalizes after parsing: `'1'` becomes `true`, `'0'` becomes
//! `false`, a valueless tag becomes [`Tag::None`], and any other string is
//! IRC-unescaped. `emote-sets`, `ban-duration` and `bits` are exempt and stay
//! raw strings.

use std::collections::HashMap;

/// A decoded tag value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    /// Boolean payload (`'1'`/`'0'`), or tag presence before normalization.
    Bool(bool),
    /// String payload.
    Str(String),
    /// Tag present without a usable value.
    None,
    /// Parsed `badges` / `badge-info` composite, wire order preserved.
    Badges(Vec<Badge>),
    /// Parsed `emotes` composite: emote id with its `(start, end)` ranges.
    Emotes(Vec<(String, Vec<(usize, usize)>)>),
}

/// Tag mapping attached to a message.
pub type Tags = HashMap<String, Tag>;

impl Tag {
    /// String payload, if this is a string tag.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness: `Bool(true)` or a non-empty string.
    pub fn is_truthy(&self) -> bool {
        match self {
            Tag::Bool(b) => *b,
            Tag::Str(s) => !s.is_empty(),
            _ => false,
        }
    }

    /// Numeric payload. Booleans count as 0/1, unparsable strings as 0.
    pub fn as_number(&self) -> u64 {
        match self {
            Tag::Bool(b) => *b as u64,
            Tag::Str(s) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }
}

/// One entry of a `badges` / `badge-info` composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badge {
    pub name: String,
    pub version: Option<String>,
}

/// Unescape an IRCv3 tag value.
/// `\:` → `;`, `\s` → space, `\\` → `\`, `\r` → CR, `\n` → LF.
/// An unknown escape yields the escaped byte itself.
pub fn unescape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(':') => result.push(';'),
                Some('s') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('r') => result.push('\r'),
                Some('n') => result.push('\n'),
                Some(other) => result.push(other),
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Escape a value for IRCv3 tag encoding, the inverse of [`unescape`].
pub fn escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ';' => result.push_str("\\:"),
            ' ' => result.push_str("\\s"),
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Parse a `badges` / `badge-info` composite: `key/version,key/version`.
/// A key without a `/` has no version.
pub fn parse_badges(raw: &str) -> Vec<Badge> {
    raw.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('/') {
            Some((name, version)) => Badge {
                name: name.to_string(),
                version: Some(version.to_string()),
            },
            None => Badge {
                name: part.to_string(),
                version: None,
            },
        })
        .collect()
}

/// Serialize a badge list back to wire form, preserving order.
pub fn format_badges(badges: &[Badge]) -> String {
    badges
        .iter()
        .map(|b| match &b.version {
            Some(v) => format!("{}/{}", b.name, v),
            None => b.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse an `emotes` composite: `id:start-end,start-end/id:start-end`.
/// Malformed ranges are skipped rather than failing the whole tag.
pub fn parse_emotes(raw: &str) -> Vec<(String, Vec<(usize, usize)>)> {
    raw.split('/')
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let (id, ranges) = part.split_once(':')?;
            let positions = ranges
                .split(',')
                .filter_map(|range| {
                    let (start, end) = range.split_once('-')?;
                    Some((start.parse().ok()?, end.parse().ok()?))
                })
                .collect();
            Some((id.to_string(), positions))
        })
        .collect()
}

/// Serialize an emote list back to wire form.
pub fn format_emotes(emotes: &[(String, Vec<(usize, usize)>)]) -> String {
    emotes
        .iter()
        .map(|(id, positions)| {
            let ranges = positions
                .iter()
                .map(|(start, end)| format!("{start}-{end}"))
                .collect::<Vec<_>>()
                .join(",");
            format!("{id}:{ranges}")
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Tags exempt from scalar normalization; their values stay raw strings.
const RAW_TAGS: [&str; 3] = ["emote-sets", "ban-duration", "bits"];

/// Normalize a freshly parsed tag mapping in place.
///
/// Composite tags are parsed first (the original wire strings are preserved
/// under `badges-raw` / `badge-info-raw` / `emotes-raw`), then every
/// remaining scalar is transformed as described in the module docs.
pub fn normalize(tags: &mut Tags) {
    for name in ["badges", "badge-info"] {
        if let Some(Tag::Str(raw)) = tags.get(name) {
            let raw = raw.clone();
            tags.insert(name.to_string(), Tag::Badges(parse_badges(&raw)));
            tags.insert(format!("{name}-raw"), Tag::Str(raw));
        }
    }
    if let Some(Tag::Str(raw)) = tags.get("emotes") {
        let raw = raw.clone();
        tags.insert("emotes".to_string(), Tag::Emotes(parse_emotes(&raw)));
        tags.insert("emotes-raw".to_string(), Tag::Str(raw));
    }

    for (name, value) in tags.iter_mut() {
        if RAW_TAGS.contains(&name.as_str()) || name.ends_with("-raw") {
            continue;
        }
        match value {
            Tag::Bool(true) => *value = Tag::None,
            Tag::Str(s) if s == "1" => *value = Tag::Bool(true),
            Tag::Str(s) if s == "0" => *value = Tag::Bool(false),
            Tag::Str(s) => *value = Tag::Str(unescape(s)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_roundtrip() {
        let original = "hello world; backslash\\ and\nnewline\rcr";
        assert_eq!(unescape(&escape(original)), original);
    }

    #[test]
    fn escape_produces_no_meta_characters() {
        let escaped = escape("a b;c\\d\ne\rf");
        assert!(!escaped.contains(' '));
        assert!(!escaped.contains(';'));
        assert!(!escaped.contains('\n'));
        assert!(!escaped.contains('\r'));
    }

    #[test]
    fn unknown_escape_yields_byte() {
        assert_eq!(unescape("a\\xb"), "axb");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    fn badges_roundtrip() {
        let raw = "broadcaster/1,subscriber/3012,premium/1";
        let parsed = parse_badges(raw);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].name, "broadcaster");
        assert_eq!(parsed[1].version.as_deref(), Some("3012"));
        assert_eq!(format_badges(&parsed), raw);
    }

    #[test]
    fn badge_without_version() {
        let parsed = parse_badges("vip");
        assert_eq!(parsed[0].version, None);
        assert_eq!(format_badges(&parsed), "vip");
    }

    #[test]
    fn emotes_roundtrip() {
        let raw = "25:0-4,12-16/1902:6-10";
        let parsed = parse_emotes(raw);
        assert_eq!(parsed[0], ("25".to_string(), vec![(0, 4), (12, 16)]));
        assert_eq!(parsed[1], ("1902".to_string(), vec![(6, 10)]));
        assert_eq!(format_emotes(&parsed), raw);
    }

    #[test]
    fn normalize_scalars() {
        let mut tags = Tags::new();
        tags.insert("mod".into(), Tag::Str("1".into()));
        tags.insert("subscriber".into(), Tag::Str("0".into()));
        tags.insert("turbo".into(), Tag::Bool(true));
        tags.insert("system-msg".into(), Tag::Str("5\\smonths!".into()));
        tags.insert("bits".into(), Tag::Str("100".into()));
        tags.insert("ban-duration".into(), Tag::Str("1".into()));
        normalize(&mut tags);

        assert_eq!(tags["mod"], Tag::Bool(true));
        assert_eq!(tags["subscriber"], Tag::Bool(false));
        assert_eq!(tags["turbo"], Tag::None);
        assert_eq!(tags["system-msg"], Tag::Str("5 months!".into()));
        // Exempt tags keep their raw string form.
        assert_eq!(tags["bits"], Tag::Str("100".into()));
        assert_eq!(tags["ban-duration"], Tag::Str("1".into()));
    }

    #[test]
    fn normalize_composites_preserve_raw() {
        let mut tags = Tags::new();
        tags.insert("badges".into(), Tag::Str("moderator/1,partner/1".into()));
        tags.insert("emotes".into(), Tag::Str("25:0-4".into()));
        normalize(&mut tags);

        assert!(matches!(tags["badges"], Tag::Badges(_)));
        assert_eq!(tags["badges-raw"], Tag::Str("moderator/1,partner/1".into()));
        assert!(matches!(tags["emotes"], Tag::Emotes(_)));
        assert_eq!(tags["emotes-raw"], Tag::Str("25:0-4".into()));
    }
}
