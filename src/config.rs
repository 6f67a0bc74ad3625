//! Line-oriented configuration key/value store.
//!
//! Grammar: `key value` per non-comment line; `;` starts a comment that runs
//! to end-of-line. Keys and values are bounded to 256 characters. Duplicate
//! keys overwrite the earlier value.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use log::warn;

use crate::error::{CoreError, CoreResult};

const MAX_TOKEN_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    PreKey,
    Key,
    PreVal,
    Val,
    PostVal,
    Error,
}

#[derive(Debug, Default, Clone)]
pub struct Config {
    entries: HashMap<String, String>,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        for k in keys {
            writeln!(f, "{} {}", k, self.entries[k])?;
        }
        Ok(())
    }
}

impl Config {
    pub fn new() -> Self {
        Config { entries: HashMap::new() }
    }

    pub fn load_file(path: &Path) -> CoreResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| CoreError::Io(format!("reading {}: {e}", path.display())))?;
        Ok(Self::parse(&text))
    }

    /// Parses line by line; malformed lines are logged and skipped rather
    /// than aborting the whole file, since one bad binding shouldn't cost
    /// every other setting in it.
    pub fn parse(text: &str) -> Self {
        let mut cfg = Config::new();
        for (lineno, raw_line) in text.lines().enumerate() {
            if let Some((key, val)) = parse_line(raw_line) {
                cfg.entries.insert(key, val);
            } else if !raw_line.trim().is_empty() {
                // A line that's non-blank after comment-stripping but failed
                // to parse as key/value.
                let stripped = strip_comment(raw_line);
                if !stripped.trim().is_empty() {
                    warn!("config: malformed line {}: {:?}", lineno + 1, raw_line);
                }
            }
        }
        cfg
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.entries.insert(key.into(), val.into());
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    /// Parses `#rrggbb` into `(r, g, b)`.
    pub fn get_rgb(&self, key: &str) -> Option<(u8, u8, u8)> {
        let val = self.get(key)?;
        let val = val.strip_prefix('#')?;
        if val.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&val[0..2], 16).ok()?;
        let g = u8::from_str_radix(&val[2..4], 16).ok()?;
        let b = u8::from_str_radix(&val[4..6], 16).ok()?;
        Some((r, g, b))
    }

    pub fn default_path() -> Option<std::path::PathBuf> {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return Some(Path::new(&xdg).join("washdc").join("wash.cfg"));
        }
        let home = std::env::var("HOME").ok()?;
        Some(Path::new(&home).join(".config").join("washdc").join("wash.cfg"))
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Runs the `PreKey -> Key -> PreVal -> Val -> PostVal` state machine over a
/// single line. Returns `None` for blank/comment-only lines as well as for
/// malformed ones (both are "nothing to insert" to the caller, which tells
/// them apart via `raw_line`'s own content for logging).
fn parse_line(raw_line: &str) -> Option<(String, String)> {
    let line = strip_comment(raw_line);
    let mut state = ParseState::PreKey;
    let mut key = String::new();
    let mut val = String::new();

    for ch in line.chars() {
        state = match state {
            ParseState::PreKey => {
                if ch.is_whitespace() {
                    ParseState::PreKey
                } else {
                    key.push(ch);
                    ParseState::Key
                }
            }
            ParseState::Key => {
                if ch.is_whitespace() {
                    ParseState::PreVal
                } else if key.len() >= MAX_TOKEN_LEN {
                    ParseState::Error
                } else {
                    key.push(ch);
                    ParseState::Key
                }
            }
            ParseState::PreVal => {
                if ch.is_whitespace() {
                    ParseState::PreVal
                } else {
                    val.push(ch);
                    ParseState::Val
                }
            }
            ParseState::Val => {
                if ch.is_whitespace() {
                    ParseState::PostVal
                } else if val.len() >= MAX_TOKEN_LEN {
                    ParseState::Error
                } else {
                    val.push(ch);
                    ParseState::Val
                }
            }
            ParseState::PostVal => {
                if ch.is_whitespace() {
                    ParseState::PostVal
                } else {
                    // Trailing garbage after the value is tolerated as part
                    // of the value's trailing whitespace run only; anything
                    // else is an error.
                    ParseState::Error
                }
            }
            ParseState::Error => ParseState::Error,
        };
        if state == ParseState::Error {
            return None;
        }
    }

    match state {
        ParseState::Val | ParseState::PostVal if !key.is_empty() && !val.is_empty() => {
            Some((key, val))
        }
        ParseState::PreKey => None, // blank line
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_documented_example() {
        let cfg = Config::parse("ui.bgcolor #3d77c0\nwin.vsync false\n");
        assert_eq!(cfg.get_rgb("ui.bgcolor"), Some((0x3d, 0x77, 0xc0)));
        assert_eq!(cfg.get_bool("win.vsync"), Some(false));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let cfg = Config::parse("; a comment\n\n   \nfoo bar ; trailing comment\n");
        assert_eq!(cfg.get("foo"), Some("bar"));
    }

    #[test]
    fn duplicate_keys_overwrite() {
        let cfg = Config::parse("k 1\nk 2\n");
        assert_eq!(cfg.get("k"), Some("2"));
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let cfg = Config::parse("good 1\n\"unterminated\nalso.good 2\n");
        assert_eq!(cfg.get("good"), Some("1"));
        assert_eq!(cfg.get("also.good"), Some("2"));
    }

    #[test]
    fn controller_binding_keys_round_trip() {
        let cfg = Config::parse("dc.ctrl.p0_0.a js0.axis0+\n");
        assert_eq!(cfg.get("dc.ctrl.p0_0.a"), Some("js0.axis0+"));
    }
}
