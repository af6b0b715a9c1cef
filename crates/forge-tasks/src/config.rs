use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, TaskError};
use crate::task::Priority;

fn default_prefix() -> String {
    "TASK".to_string()
}

/// Store-level settings, persisted as `forge/tasks/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub zero_padding: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            zero_padding: 0,
            default_priority: None,
            default_labels: Vec::new(),
            project_name: None,
            extra: Map::new(),
        }
    }
}

impl StoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TaskError::NotInitialized(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| TaskError::MalformedTask {
            path: path.to_path_buf(),
            reason: format!("invalid config: {e}"),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self).map_err(|e| {
            TaskError::InvalidValue(format!("config serialization failed: {e}"))
        })?;
        fs::write(path, raw + "\n")?;
        Ok(())
    }

    /// Canonical ID for a numeric suffix, honoring `zero_padding`.
    pub fn format_id(&self, number: u64) -> String {
        format!(
            "{}-{:0width$}",
            self.prefix,
            number,
            width = self.zero_padding as usize
        )
    }

    /// Extracts the numeric suffix when `candidate` is an ID under this
    /// store's prefix (case-insensitive, padding-insensitive).
    pub fn parse_id(&self, candidate: &str) -> Option<u64> {
        let rest = candidate
            .trim()
            .strip_prefix_ignore_case(&self.prefix)?
            .strip_prefix('-')?;
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rest.parse().ok()
    }

    /// Maps user input to canonical ID form, erroring on non-ID strings.
    pub fn canonical_id(&self, candidate: &str) -> Result<String> {
        self.parse_id(candidate)
            .map(|n| self.format_id(n))
            .ok_or_else(|| TaskError::InvalidId(candidate.to_string()))
    }
}

trait StripPrefixIgnoreCase {
    fn strip_prefix_ignore_case<'a>(&'a self, prefix: &str) -> Option<&'a str>;
}

impl StripPrefixIgnoreCase for str {
    fn strip_prefix_ignore_case<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        if self.len() >= prefix.len()
            && self.is_char_boundary(prefix.len())
            && self[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            Some(&self[prefix.len()..])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_parsing_is_case_and_padding_insensitive() {
        let config = StoreConfig {
            zero_padding: 3,
            ..StoreConfig::default()
        };
        assert_eq!(config.parse_id("TASK-7"), Some(7));
        assert_eq!(config.parse_id("task-007"), Some(7));
        assert_eq!(config.parse_id("Task-42"), Some(42));
        assert_eq!(config.parse_id("OTHER-7"), None);
        assert_eq!(config.parse_id("TASK-"), None);
        assert_eq!(config.parse_id("TASK-x1"), None);
        assert_eq!(config.format_id(7), "TASK-007");
    }

    #[test]
    fn unknown_config_fields_round_trip() {
        let raw = r#"{"prefix":"JOB","zero_padding":2,"board":"kanban"}"#;
        let config: StoreConfig = serde_json::from_str(raw).expect("parse");
        assert_eq!(config.prefix, "JOB");
        assert_eq!(config.extra.get("board").and_then(Value::as_str), Some("kanban"));
        let out = serde_json::to_string(&config).expect("serialize");
        assert!(out.contains("kanban"));
    }
}
