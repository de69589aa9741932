//! Shared data types for the AMAN agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel a command arrived on. Responses are routed back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceChannel {
    Sms,
    MessagingApp,
}

impl std::fmt::Display for SourceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceChannel::Sms => write!(f, "sms"),
            SourceChannel::MessagingApp => write!(f, "messaging_app"),
        }
    }
}

/// Insertion-ordered parameter map with case-insensitive, unique keys.
///
/// Keys are lowercased on insert; re-inserting an existing key overwrites the
/// previous value in place (last-write-wins).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamMap {
    entries: Vec<(String, String)>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter, overwriting any existing value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_lowercase();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for ParamMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut map = ParamMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// A raw command string broken into an action plus parameters.
///
/// Built once per input by the parser and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lowercased first token.
    pub action: String,
    /// Remaining tokens, keyed.
    pub parameters: ParamMap,
    /// The trimmed input the command was parsed from.
    pub raw_text: String,
}

/// Outcome of validating a parsed command against its action's rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: String,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: String::new(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// A command waiting in the dispatcher's FIFO queue.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub command: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub source: SourceChannel,
}

impl PendingCommand {
    pub fn new(command: impl Into<String>, sender: impl Into<String>, source: SourceChannel) -> Self {
        Self {
            command: command.into(),
            sender: sender.into(),
            received_at: Utc::now(),
            source,
        }
    }
}

/// Result of one EXECUTING branch.
#[derive(Debug, Clone)]
pub struct HandlerResult {
    pub message: String,
    pub should_respond: bool,
}

impl HandlerResult {
    pub fn respond(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            should_respond: true,
        }
    }

    pub fn silent() -> Self {
        Self {
            message: String::new(),
            should_respond: false,
        }
    }
}

/// Append-only record of one processed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandLogRecord {
    pub id: String,
    pub action: String,
    pub sender: String,
    pub source: SourceChannel,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub error: Option<String>,
}

impl CommandLogRecord {
    pub fn new(
        action: impl Into<String>,
        sender: impl Into<String>,
        source: SourceChannel,
        success: bool,
        execution_time_ms: u64,
        error: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.into(),
            sender: sender.into(),
            source,
            success,
            timestamp: Utc::now(),
            execution_time_ms,
            error,
        }
    }
}

/// Append-only record of a module lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleLogRecord {
    pub id: String,
    pub module: String,
    pub event: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl ModuleLogRecord {
    pub fn new(module: impl Into<String>, event: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            module: module.into(),
            event: event.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Verdict of a sandbox test over one module candidate.
///
/// Transient; produced once per candidate and discarded after the load decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxReport {
    pub passed: bool,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub memory_delta_bytes: i64,
    pub elapsed_ms: i64,
}

impl SandboxReport {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(error.into()),
            warnings: Vec::new(),
            memory_delta_bytes: 0,
            elapsed_ms: 0,
        }
    }
}

/// Summary of one loaded module, as shown by `list_modules`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub name: String,
    pub version: String,
    pub load_time: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_map_preserves_insertion_order() {
        let mut map = ParamMap::new();
        map.insert("to", "123");
        map.insert("message", "hi");
        map.insert("url", "http://x");

        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["to", "message", "url"]);
    }

    #[test]
    fn param_map_last_write_wins() {
        let mut map = ParamMap::new();
        map.insert("to", "123");
        map.insert("TO", "456");

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("to"), Some("456"));
    }

    #[test]
    fn param_map_keys_case_insensitive() {
        let mut map = ParamMap::new();
        map.insert("Message", "hello");
        assert_eq!(map.get("MESSAGE"), Some("hello"));
    }
}
