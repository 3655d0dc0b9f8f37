//! Minimal git config reader.
//!
//! Parses only what the daemon consumes: `branch.<name>.remote/merge`,
//! `remote.<name>.url`, `core.filemode`, `core.autocrlf`, `core.bare` and
//! `core.excludesfile`. Section and key names are case-insensitive;
//! subsection names are case-sensitive, per git. Unparseable lines are
//! skipped rather than failing the open.

use std::fs;
use std::path::Path;

use ahash::AHashMap;

/// Flat view of a config file: `section.subsection.key` → last value.
#[derive(Debug, Default)]
pub struct Config {
    values: AHashMap<String, String>,
}

impl Config {
    /// Loads a config file; a missing file yields an empty config.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let Ok(data) = fs::read(path) else {
            return Self::default();
        };
        Self::parse(&data)
    }

    /// Parses config text.
    #[must_use]
    pub fn parse(data: &[u8]) -> Self {
        let mut values = AHashMap::new();
        let mut section = String::new();

        for line in data.split(|&b| b == b'\n') {
            let text = String::from_utf8_lossy(line);
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            if let Some(header) = trimmed.strip_prefix('[') {
                let Some(header) = header.strip_suffix(']') else {
                    section.clear();
                    continue;
                };
                section = parse_section_header(header);
                continue;
            }

            if section.is_empty() {
                continue;
            }
            let Some((key, value)) = parse_key_value(trimmed) else {
                continue;
            };
            values.insert(format!("{section}.{key}"), value);
        }

        Self { values }
    }

    /// Returns the value for a full `section.subsection.key` path.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Boolean interpretation per git: yes/on/true/1 and no/off/false/0.
    /// A key present with no value means true.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        let value = self.get(key)?;
        match value.to_ascii_lowercase().as_str() {
            "" | "yes" | "on" | "true" | "1" => Some(true),
            "no" | "off" | "false" | "0" => Some(false),
            _ => None,
        }
    }
}

/// `core "sub"` → `core.sub`; bare `core` → `core` (lowercased).
fn parse_section_header(header: &str) -> String {
    let header = header.trim();
    match header.split_once(char::is_whitespace) {
        Some((name, rest)) => {
            let sub = rest.trim().trim_matches('"');
            let mut unescaped = String::with_capacity(sub.len());
            let mut chars = sub.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        unescaped.push(next);
                    }
                } else {
                    unescaped.push(c);
                }
            }
            format!("{}.{}", name.to_ascii_lowercase(), unescaped)
        }
        None => header.to_ascii_lowercase(),
    }
}

fn parse_key_value(line: &str) -> Option<(String, String)> {
    let (key, raw) = match line.split_once('=') {
        Some((key, raw)) => (key.trim(), raw.trim()),
        // A bare key means boolean true.
        None => (line.trim(), ""),
    };
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return None;
    }

    let mut value = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    match next {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        other => value.push(other),
                    }
                }
            }
            '"' => in_quotes = !in_quotes,
            '#' | ';' if !in_quotes => break,
            other => value.push(other),
        }
    }

    Some((key.to_ascii_lowercase(), value.trim_end().to_string()))
}
