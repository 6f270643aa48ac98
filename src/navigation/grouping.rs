//! Group-key derivation from category names.
//!
//! Providers encode a coarse grouping into category names, e.g.
//! `"EN | Action"` or `"Sports - Football"`. A [`Separator`] describes how
//! to cut the group key out of such a name.

use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// Setting value selecting first-word grouping.
pub const FIRST_WORD: &str = "FIRST_WORD";

/// Literal delimiters a separator setting may name.
const LITERAL_SEPARATORS: [char; 3] = ['|', '-', '/'];

/// Rule used to derive a group key from a category name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// First whitespace-delimited token of the name.
    FirstWord,
    /// Text before the first occurrence of the delimiter, trimmed.
    Literal(char),
}

impl Separator {
    /// Resolve a raw setting value, falling back to first-word grouping.
    ///
    /// An unrecognized value never fails a tree build; it is logged and
    /// treated as [`Separator::FirstWord`].
    pub fn resolve(raw: &str) -> Self {
        match raw.parse() {
            Ok(separator) => separator,
            Err(e) => {
                tracing::debug!(separator = %raw, error = %e, "Falling back to first-word grouping");
                Separator::FirstWord
            }
        }
    }

    /// The setting value that parses back into this separator.
    pub fn as_setting(&self) -> String {
        match self {
            Separator::FirstWord => FIRST_WORD.to_string(),
            Separator::Literal(c) => c.to_string(),
        }
    }
}

impl Default for Separator {
    fn default() -> Self {
        Separator::FirstWord
    }
}

impl fmt::Display for Separator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_setting())
    }
}

impl FromStr for Separator {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case(FIRST_WORD) {
            return Ok(Separator::FirstWord);
        }

        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if LITERAL_SEPARATORS.contains(&c) => Ok(Separator::Literal(c)),
            _ => Err(SyncError::Config(format!(
                "unsupported separator '{}' (expected {}, '|', '-' or '/')",
                s, FIRST_WORD
            ))),
        }
    }
}

/// First whitespace-delimited token, or the whole name when it has none.
fn first_word(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}

/// Group key of a category name under a separator rule.
///
/// A literal separator that is absent from the name, or that leaves an empty
/// prefix (`"| Action"`), falls back to first-word extraction.
pub fn group_key<'a>(name: &'a str, separator: &Separator) -> &'a str {
    match separator {
        Separator::FirstWord => first_word(name),
        Separator::Literal(sep) => match name.find(*sep) {
            Some(idx) => {
                let prefix = name[..idx].trim();
                if prefix.is_empty() {
                    first_word(name)
                } else {
                    prefix
                }
            }
            None => first_word(name),
        },
    }
}

/// Display name of a category inside its group: the name without the group
/// key and separator (`"EN | Action"` → `"Action"`).
///
/// Returns the full name when stripping would leave nothing.
pub fn strip_group_prefix<'a>(name: &'a str, separator: &Separator) -> &'a str {
    let rest = match separator {
        Separator::Literal(sep) => match name.find(*sep) {
            Some(idx) if !name[..idx].trim().is_empty() => &name[idx + sep.len_utf8()..],
            _ => strip_first_word(name),
        },
        Separator::FirstWord => strip_first_word(name),
    };

    let rest = rest.trim();
    if rest.is_empty() {
        name.trim()
    } else {
        rest
    }
}

fn strip_first_word(name: &str) -> &str {
    let trimmed = name.trim_start();
    match trimmed.find(char::is_whitespace) {
        Some(idx) => &trimmed[idx..],
        None => "",
    }
}
