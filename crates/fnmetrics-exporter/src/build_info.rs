//! `build_info` gauge published once at startup.
//!
//! Sources, first hit wins:
//! - version: `build.version`, then `APP_VERSION`
//! - service name: `build.service_name`, then `SERVICE_NAME`
//! - commit / branch: the `git.properties` file (`git.commit.id.full`, then
//!   `git.commit.id`; `git.branch`)
//!
//! Anything missing is reported as `"unknown"`.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use fnmetrics_core::backend::{MetricsBackend, BUILD_INFO_GAUGE};
use fnmetrics_core::error::Result;
use fnmetrics_core::identity::UNKNOWN;

use crate::config::BuildSection;

pub const VERSION_ENV: &str = "APP_VERSION";
pub const SERVICE_NAME_ENV: &str = "SERVICE_NAME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub branch: String,
    pub service_name: String,
}

impl BuildInfo {
    /// Resolve from config, process environment and the git.properties file.
    pub fn load(build: &BuildSection) -> Self {
        let git = match fs::read_to_string(&build.git_properties) {
            Ok(s) => parse_properties(&s),
            Err(e) => {
                tracing::warn!(
                    path = %build.git_properties,
                    error = %e,
                    "could not load git.properties"
                );
                HashMap::new()
            }
        };
        Self::resolve(build, &git, |k| std::env::var(k).ok())
    }

    pub fn resolve(
        build: &BuildSection,
        git: &HashMap<String, String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let version = build.version.clone().or_else(|| env(VERSION_ENV));
        let service_name = build.service_name.clone().or_else(|| env(SERVICE_NAME_ENV));
        let commit = git
            .get("git.commit.id.full")
            .or_else(|| git.get("git.commit.id"))
            .cloned();
        let branch = git.get("git.branch").cloned();

        Self {
            version: or_unknown(version),
            commit: or_unknown(commit),
            branch: or_unknown(branch),
            service_name: or_unknown(service_name),
        }
    }

    /// Register the constant `build_info` gauge (value 1).
    pub fn publish(&self, backend: &dyn MetricsBackend) -> Result<()> {
        backend.register_gauge(
            BUILD_INFO_GAUGE,
            &[
                ("version", self.version.as_str()),
                ("commit", self.commit.as_str()),
                ("branch", self.branch.as_str()),
                ("service.name", self.service_name.as_str()),
            ],
            Arc::new(|| 1_i64),
        )
    }
}

fn or_unknown(v: Option<String>) -> String {
    v.filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Parse a `java.util.Properties` text file, the format git.properties is
/// written in.
///
/// - `#` / `!` comment lines and blank lines are skipped
/// - a line ending in an odd number of `\` continues on the next line, whose
///   leading whitespace is dropped
/// - the key ends at the first unescaped `=`, `:` or whitespace; the value
///   starts after that separator and any surrounding whitespace
/// - `\t \n \r \f`, `\uXXXX` (UTF-16, surrogate pairs included) and `\X` for
///   any other `X` are unescaped in both key and value
pub fn parse_properties(s: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut lines = s.lines();

    while let Some(natural) = lines.next() {
        let natural = natural.trim_start_matches(is_blank);
        if natural.is_empty() || natural.starts_with(['#', '!']) {
            continue;
        }

        let mut logical = natural.to_string();
        while continues(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start_matches(is_blank)),
                None => break,
            }
        }

        let (key, value) = split_entry(&logical);
        let key = unescape(key);
        if !key.is_empty() {
            out.insert(key, unescape(value));
        }
    }
    out
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0c')
}

fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

fn split_entry(line: &str) -> (&str, &str) {
    let mut key_end = line.len();
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                key_end = i;
                break;
            }
            c if is_blank(c) => {
                key_end = i;
                break;
            }
            _ => {}
        }
    }

    let rest = line[key_end..].trim_start_matches(is_blank);
    let rest = rest.strip_prefix(['=', ':']).unwrap_or(rest);
    (&line[..key_end], rest.trim_start_matches(is_blank))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    // `\u` escapes are UTF-16 code units; pairs must be decoded together
    let mut units: Vec<u16> = Vec::new();
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            flush_utf16(&mut units, &mut out);
            out.push(c);
            continue;
        }
        let Some(escaped) = chars.next() else { break };
        if escaped == 'u' {
            let hex: String = chars.clone().take(4).collect();
            if hex.len() == 4 && hex.chars().all(|h| h.is_ascii_hexdigit()) {
                if let Ok(unit) = u16::from_str_radix(&hex, 16) {
                    units.push(unit);
                    let _ = chars.nth(3);
                    continue;
                }
            }
        }
        flush_utf16(&mut units, &mut out);
        out.push(match escaped {
            't' => '\t',
            'n' => '\n',
            'r' => '\r',
            'f' => '\x0c',
            other => other,
        });
    }
    flush_utf16(&mut units, &mut out);
    out
}

fn flush_utf16(units: &mut Vec<u16>, out: &mut String) {
    if units.is_empty() {
        return;
    }
    out.extend(
        char::decode_utf16(units.drain(..)).map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER)),
    );
}
