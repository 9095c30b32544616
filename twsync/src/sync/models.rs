//! Sync models
//!
//! Strongly typed records for both sides of the sync and the links between
//! them. Collaborator adapters convert their wire formats into these types
//! at the boundary.

use super::translator::TranslationWarning;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Local task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
    #[default]
    None,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::None,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::None => "none",
        }
    }
}

/// Which edge of a geofence fires the reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerEdge {
    #[default]
    Arriving,
    Leaving,
}

impl TriggerEdge {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerEdge::Arriving => "arriving",
            TriggerEdge::Leaving => "leaving",
        }
    }

    /// Lenient parse used at adapter boundaries
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "arriving" | "arrive" | "enter" => Some(TriggerEdge::Arriving),
            "leaving" | "leave" | "exit" => Some(TriggerEdge::Leaving),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Location attached to a local task: a shortcut key, a literal name, or a
/// name with inline coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerEdge>,
}

impl LocationRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            coordinates: None,
            radius: None,
            trigger: None,
        }
    }
}

/// Location alarm on a remote reminder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    pub radius: f64,
    #[serde(default)]
    pub trigger: TriggerEdge,
}

/// A task as seen in the local task manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntity {
    pub local_id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub priority: Priority,
    pub due_at: Option<DateTime<Utc>>,
    pub is_done: bool,
    /// `None` maps to the remote default list
    pub project: Option<String>,
    pub location_ref: Option<LocationRef>,
    pub last_modified: DateTime<Utc>,
    /// Mirror id stamped on the task; not part of the fingerprint
    #[serde(default)]
    pub remote_ref: Option<String>,
    /// Only set on hook-delivered deletions
    #[serde(default)]
    pub is_deleted: bool,
    /// Fields the adapter had to drop or clamp while reading this task
    #[serde(skip)]
    pub read_warnings: Vec<TranslationWarning>,
}

impl TaskEntity {
    pub fn fields(&self) -> TaskFields {
        TaskFields {
            title: self.title.clone(),
            notes: self.notes.clone(),
            priority: self.priority,
            due_at: self.due_at,
            is_done: self.is_done,
            project: self.project.clone(),
            location_ref: self.location_ref.clone(),
            remote_ref: self.remote_ref.clone(),
        }
    }
}

/// Writable fields of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFields {
    pub title: String,
    pub notes: String,
    pub priority: Priority,
    pub due_at: Option<DateTime<Utc>>,
    pub is_done: bool,
    pub project: Option<String>,
    pub location_ref: Option<LocationRef>,
    pub remote_ref: Option<String>,
}

/// A reminder as seen in the remote reminders service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderEntity {
    pub remote_id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    /// Remote numeric scale: 0 none, 1 highest, 9 lowest
    #[serde(default)]
    pub priority: i64,
    pub due_at: Option<DateTime<Utc>>,
    pub is_done: bool,
    pub list_name: String,
    pub geofence: Option<Geofence>,
    pub last_modified: DateTime<Utc>,
    #[serde(skip)]
    pub read_warnings: Vec<TranslationWarning>,
}

impl ReminderEntity {
    pub fn fields(&self) -> ReminderFields {
        ReminderFields {
            title: self.title.clone(),
            notes: self.notes.clone(),
            priority: self.priority,
            due_at: self.due_at,
            is_done: self.is_done,
            list_name: self.list_name.clone(),
            geofence: self.geofence.clone(),
        }
    }
}

/// Writable fields of a reminder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderFields {
    pub title: String,
    pub notes: String,
    pub priority: i64,
    pub due_at: Option<DateTime<Utc>>,
    pub is_done: bool,
    pub list_name: String,
    pub geofence: Option<Geofence>,
}

/// Change fingerprint for one side of a link.
///
/// `done` is the completion state the digest was taken over. An empty
/// digest is unknown and never matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Fingerprint {
    pub digest: String,
    pub done: bool,
}

impl Fingerprint {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.digest.is_empty()
    }

    /// Same content, compared by digest only
    pub fn matches(&self, other: &Fingerprint) -> bool {
        !self.is_unknown() && self.digest == other.digest
    }
}

/// Durable pairing of one task with one reminder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLink {
    pub local_id: String,
    pub remote_id: String,
    pub local_fingerprint: Fingerprint,
    pub remote_fingerprint: Fingerprint,
    pub last_synced_at: DateTime<Utc>,
}

/// Named place from the shortcut table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationShortcut {
    pub key: String,
    pub display_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub default_radius: f64,
}

/// Side of the sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}
