//! Approval expiry policy.
//!
//! TTL overrides come from the `## Approval Expiry` section of the company
//! handbook, a human-edited markdown file:
//!
//! ```text
//! ## Approval Expiry
//! - Default: 24 hours
//! - Payment: 4 hours
//! - Social post: 2 days
//! ```
//!
//! The text is untrusted. Lines that do not parse are ignored, TTLs are
//! capped at [`MAX_TTL_DAYS`], and a missing or unreadable handbook yields
//! no overrides.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use chrono::Duration;
use regex::Regex;
use tracing::{debug, warn};

const SECTION_HEADING: &str = "## Approval Expiry";
const DEFAULT_KEY: &str = "default";

/// Longest TTL a handbook line can set.
pub const MAX_TTL_DAYS: i64 = 365;

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s*(minute|min|hour|hr|day)s?\b").expect("Invalid duration regex")
    })
}

/// Per-action approval TTLs with a fallback.
#[derive(Debug, Clone)]
pub struct ExpiryPolicy {
    overrides: HashMap<String, Duration>,
    default_ttl: Duration,
}

impl ExpiryPolicy {
    /// A policy with no overrides.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            overrides: HashMap::new(),
            default_ttl,
        }
    }

    /// Parse overrides out of handbook text.
    pub fn from_handbook_text(text: &str, default_ttl: Duration) -> Self {
        let mut policy = Self::new(default_ttl);
        let mut in_section = false;
        for line in text.lines() {
            if line.trim_start().starts_with(SECTION_HEADING) {
                in_section = true;
                continue;
            }
            if !in_section {
                continue;
            }
            if line.starts_with("## ") {
                break;
            }
            let entry = line.trim().trim_start_matches(['-', '*']).trim();
            let Some((key, value)) = entry.split_once(':') else {
                continue;
            };
            let Some(mut ttl) = parse_duration(value) else {
                debug!(line = entry, "Ignoring unparseable expiry line");
                continue;
            };
            if ttl > Duration::days(MAX_TTL_DAYS) {
                warn!(line = entry, max_days = MAX_TTL_DAYS, "Expiry too long, capping");
                ttl = Duration::days(MAX_TTL_DAYS);
            }
            policy.overrides.insert(normalize_action(key), ttl);
        }
        policy
    }

    /// Load from the handbook at `path`. A missing or unreadable file gives
    /// a policy with no overrides.
    pub fn load(path: &Path, default_ttl: Duration) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let policy = Self::from_handbook_text(&text, default_ttl);
                debug!(
                    file = %path.display(),
                    overrides = policy.overrides.len(),
                    "Expiry policy loaded"
                );
                policy
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::new(default_ttl),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Could not read handbook, using default expiry");
                Self::new(default_ttl)
            }
        }
    }

    pub fn with_override(mut self, action: &str, ttl: Duration) -> Self {
        self.overrides.insert(normalize_action(action), ttl);
        self
    }

    /// TTL for `action`: its override, else the handbook default, else the
    /// configured default.
    pub fn ttl_for(&self, action: &str) -> Duration {
        self.overrides
            .get(&normalize_action(action))
            .or_else(|| self.overrides.get(DEFAULT_KEY))
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

/// `"Social post"` -> `"social_post"`. A bare `"social"` also means
/// `social_post`.
fn normalize_action(key: &str) -> String {
    let key = key
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace('-', "_");
    match key.as_str() {
        "social" | "social_posts" => "social_post".to_string(),
        _ => key,
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let caps = duration_re().captures(value)?;
    let n: i64 = caps[1].parse().ok()?;
    match caps[2].to_lowercase().as_str() {
        "minute" | "min" => Duration::try_minutes(n),
        "hour" | "hr" => Duration::try_hours(n),
        "day" => Duration::try_days(n),
        _ => None,
    }
}
