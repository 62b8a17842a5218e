//! Markdown documents with YAML front matter.
//!
//! Vault files are written by humans, LLMs and several processes, so the
//! parser is permissive: a missing or malformed header yields an empty
//! [`FrontMatter`] rather than an error, and the typed records fill absent
//! or ill-typed fields with documented defaults.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_yaml::{Mapping, Value};

use crate::error::Result;
use crate::types::{ApprovalStatus, Priority, TaskKind, TaskStatus};
use crate::vault::write_atomic;

/// Heading whose following paragraph is the outgoing message text.
pub const REPLY_BODY_HEADING: &str = "## Reply Body";

const DELIMITER: &str = "---";

/// Ordered key/value header of a vault file.
///
/// Values are typed through YAML, but the header text of every field is
/// kept as read. Untouched fields render back byte-for-byte, and numeric
/// or boolean scalars read as strings keep their written form, so
/// `to: +923001234567` stays `+923001234567`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatter {
    map: Mapping,
    raw: HashMap<String, String>,
}

impl FrontMatter {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_header(map: Mapping, header: &str) -> Self {
        let raw = split_entries(header)
            .into_iter()
            .filter(|(key, _)| map.contains_key(key.as_str()))
            .collect();
        Self { map, raw }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// Scalar value rendered as a string. `null` and empty strings are `None`.
    pub fn get_str(&self, key: &str) -> Option<String> {
        let s = match self.map.get(key)? {
            Value::String(s) => s.trim().to_string(),
            value @ (Value::Number(_) | Value::Bool(_)) => self.scalar_text(key, value),
            _ => return None,
        };
        (!s.is_empty()).then_some(s)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.map.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_datetime(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get_str(key).and_then(|s| parse_timestamp(&s))
    }

    /// Insert or overwrite `key`, keeping its original position if present.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.raw.remove(key);
        self.map.insert(Value::String(key.to_string()), value.into());
    }

    /// Every scalar field as a JSON string map, for audit parameters.
    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.map
            .iter()
            .filter_map(|(k, v)| {
                let key = k.as_str()?;
                let value = match v {
                    Value::Null => serde_json::Value::Null,
                    Value::String(s) => serde_json::Value::String(s.clone()),
                    Value::Number(_) => serde_json::Value::String(self.scalar_text(key, v)),
                    Value::Bool(b) => serde_json::Value::Bool(*b),
                    other => serde_json::Value::String(
                        serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
                    ),
                };
                Some((key.to_string(), value))
            })
            .collect()
    }

    /// Inline text of a plain scalar as written, falling back to the
    /// canonical form for fields set in memory.
    fn scalar_text(&self, key: &str, value: &Value) -> String {
        let written = self
            .raw
            .get(key)
            .and_then(|text| text.lines().next())
            .and_then(|line| line.split_once(':'))
            .map(|(_, rest)| rest.split(" #").next().unwrap_or_default().trim())
            .filter(|text| !text.is_empty());
        match (written, value) {
            (Some(text), _) => text.to_string(),
            (None, Value::Number(n)) => n.to_string(),
            (None, Value::Bool(b)) => b.to_string(),
            (None, _) => String::new(),
        }
    }

    fn render(&self) -> Result<String> {
        let mut out = String::new();
        for (key, value) in &self.map {
            match key.as_str().and_then(|k| self.raw.get(k)) {
                Some(text) => {
                    out.push_str(text);
                    if !text.ends_with('\n') {
                        out.push('\n');
                    }
                }
                None => {
                    let mut entry = Mapping::new();
                    entry.insert(key.clone(), value.clone());
                    out.push_str(&serde_yaml::to_string(&entry)?);
                }
            }
        }
        Ok(out)
    }
}

/// Split a header into top-level entries: a `key:` line at column zero
/// plus every following indented, list, comment or blank line.
fn split_entries(header: &str) -> Vec<(String, String)> {
    let mut entries: Vec<(String, String)> = Vec::new();
    for line in header.split_inclusive('\n') {
        if let Some(key) = entry_key(line) {
            entries.push((key, line.to_string()));
        } else if let Some((_, text)) = entries.last_mut() {
            text.push_str(line);
        }
    }
    entries
}

fn entry_key(line: &str) -> Option<String> {
    let first = line.chars().next()?;
    if first.is_whitespace() || matches!(first, '#' | '-' | '{' | '[' | '?') {
        return None;
    }
    let (key, _) = line.split_once(':')?;
    Some(key.trim().trim_matches(['"', '\'']).to_string())
}

/// A markdown file split into header and body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub front_matter: FrontMatter,
    pub body: String,
}

impl Document {
    pub fn new(front_matter: FrontMatter, body: impl Into<String>) -> Self {
        Self {
            front_matter,
            body: body.into(),
        }
    }

    /// Split `text` into front matter and body.
    ///
    /// Without an opening and closing `---` line the whole text is body.
    /// When the header is present but not a YAML mapping, the header is
    /// dropped and only the body is kept.
    pub fn parse(text: &str) -> Self {
        let Some((header, body)) = split_front_matter(text) else {
            return Self::new(FrontMatter::new(), text);
        };
        let front_matter = match serde_yaml::from_str::<Value>(header) {
            Ok(Value::Mapping(map)) => FrontMatter::from_header(map, header),
            _ => FrontMatter::new(),
        };
        Self::new(front_matter, body)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn render(&self) -> Result<String> {
        Ok(format!(
            "{DELIMITER}\n{}{DELIMITER}\n{}",
            self.front_matter.render()?,
            self.body
        ))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.render()?)
    }

    /// Paragraph under the `## Reply Body` heading, up to the next heading.
    pub fn reply_body(&self) -> Option<String> {
        let mut lines = self.body.lines().skip_while(|l| l.trim() != REPLY_BODY_HEADING);
        lines.next()?;
        let text = lines
            .take_while(|l| !l.starts_with("## "))
            .collect::<Vec<_>>()
            .join("\n");
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let rest = text
        .strip_prefix("---\r\n")
        .or_else(|| text.strip_prefix("---\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            let header = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

/// Parse an ISO-8601 timestamp. Offsets are honoured; naive times are UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

// =============================================================================
// Typed records
// =============================================================================

/// An inbound unit of work dropped into `Needs_Action/` by a watcher.
///
/// Defaults: unknown `type` is `None`, `priority` is normal, `status` is
/// pending, missing strings are empty.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskItem {
    pub kind: Option<TaskKind>,
    pub id: String,
    pub from: String,
    pub subject: String,
    pub received: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub plan_ref: Option<String>,
}

impl TaskItem {
    pub fn from_front_matter(fm: &FrontMatter) -> Self {
        Self {
            kind: fm.get_str("type").and_then(|s| s.parse().ok()),
            id: fm.get_str("id").unwrap_or_default(),
            from: fm.get_str("from").unwrap_or_default(),
            subject: fm.get_str("subject").unwrap_or_default(),
            received: fm.get_datetime("received"),
            priority: fm
                .get_str("priority")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            status: fm
                .get_str("status")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            plan_ref: fm.get_str("plan_ref").filter(|s| s != "null"),
        }
    }
}

/// A proposed side-effecting action awaiting sign-off.
///
/// `status` defaults to pending; `created`/`expires` are `None` when absent
/// or unparseable, and an approval without `expires` never auto-expires.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub action: String,
    pub id: String,
    pub recipient: String,
    pub to: Option<String>,
    pub amount: Option<f64>,
    pub reason: String,
    pub plan_ref: String,
    pub created: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub status: ApprovalStatus,
    /// Originating task filename (`source_whatsapp`, `source_email` or
    /// `source_file`, first one present).
    pub source: Option<String>,
    pub reply_body: Option<String>,
    /// The full header, for audit parameters and handler-specific fields.
    pub fields: FrontMatter,
}

impl ApprovalRequest {
    pub fn from_document(doc: &Document) -> Self {
        let fm = &doc.front_matter;
        Self {
            action: fm.get_str("action").unwrap_or_else(|| "unknown".to_string()),
            id: fm.get_str("id").unwrap_or_default(),
            recipient: fm.get_str("recipient").unwrap_or_default(),
            to: fm.get_str("to"),
            amount: fm.get_f64("amount"),
            reason: fm.get_str("reason").unwrap_or_default(),
            plan_ref: fm.get_str("plan_ref").unwrap_or_default(),
            created: fm.get_datetime("created"),
            expires: fm.get_datetime("expires"),
            status: fm
                .get_str("status")
                .and_then(|s| s.parse().ok())
                .unwrap_or(ApprovalStatus::Pending),
            source: ["source_whatsapp", "source_email", "source_file"]
                .iter()
                .find_map(|k| fm.get_str(k)),
            reply_body: doc.reply_body(),
            fields: fm.clone(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self::from_document(&Document::read(path)?))
    }

    /// Where the action is addressed: `to` if set, else `recipient`.
    pub fn target(&self) -> &str {
        self.to.as_deref().unwrap_or(&self.recipient)
    }
}
