//! Output records produced by registry plugins.

use crate::time::filetime_to_iso;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use winreg::HiveType;

/// Timestamp description labels.
pub mod timestamp_desc {
    pub const LAST_WRITTEN: &str = "Last written time";
    // The DynamicInfo field is either the registration or the last update time;
    // the label keeps the format's own name for it.
    pub const LAST_REGISTERED: &str = "Last registered time";
    pub const LAUNCH: &str = "Launch time";
}

/// A registry key was visited; carries the key's last-written time and a
/// set of display pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryKeyEvent {
    /// FILETIME.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    pub timestamp_desc: &'static str,
    pub key_path: String,
    pub offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_type: Option<HiveType>,
    pub values: BTreeMap<String, String>,
}

impl RegistryKeyEvent {
    pub fn new(
        timestamp: u64,
        key_path: impl Into<String>,
        offset: u64,
        registry_type: Option<HiveType>,
        values: BTreeMap<String, String>,
    ) -> Self {
        RegistryKeyEvent {
            timestamp,
            date_time: filetime_to_iso(timestamp),
            timestamp_desc: timestamp_desc::LAST_WRITTEN,
            key_path: key_path.into(),
            offset,
            registry_type,
            values,
        }
    }
}

/// A timestamped observation of a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskCacheEvent {
    /// FILETIME.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    pub timestamp_desc: &'static str,
    pub task_name: String,
    pub task_identifier: String,
    /// Path of the task's key under `Tasks`.
    pub key_path: String,
    pub offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_type: Option<HiveType>,
}

/// A record handed to the event sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "data_type")]
pub enum EventRecord {
    #[serde(rename = "windows:registry:key_value")]
    RegistryKey(RegistryKeyEvent),
    #[serde(rename = "task_scheduler:task_cache:entry")]
    TaskCache(TaskCacheEvent),
}

impl EventRecord {
    pub fn timestamp(&self) -> u64 {
        match self {
            EventRecord::RegistryKey(e) => e.timestamp,
            EventRecord::TaskCache(e) => e.timestamp,
        }
    }

    pub fn timestamp_desc(&self) -> &'static str {
        match self {
            EventRecord::RegistryKey(e) => e.timestamp_desc,
            EventRecord::TaskCache(e) => e.timestamp_desc,
        }
    }

    /// One-line human-readable description.
    pub fn message(&self) -> String {
        match self {
            EventRecord::RegistryKey(e) => {
                let pairs: Vec<String> = e
                    .values
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect();
                format!("[{}] {}", e.key_path, pairs.join(" "))
            }
            EventRecord::TaskCache(e) => {
                format!("Task: {} [Identifier: {}]", e.task_name, e.task_identifier)
            }
        }
    }
}

/// A record tagged with the plugin that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventEnvelope {
    pub plugin: &'static str,
    #[serde(flatten)]
    pub record: EventRecord,
}

impl fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when = filetime_to_iso(self.record.timestamp())
            .unwrap_or_else(|| format!("filetime:{}", self.record.timestamp()));
        write!(
            f,
            "{} {} [{}] {}",
            when,
            self.record.timestamp_desc(),
            self.plugin,
            self.record.message()
        )
    }
}
