//! Reminders bridge adapter
//!
//! The reminders service is reached through a small native helper binary.
//! Its protocol:
//!
//! | Command | Output |
//! | --- | --- |
//! | `export [--include-completed] [--ids a,b]` | JSON array of reminders |
//! | `lists` | JSON array of list names |
//! | `create <json>` / `update <json>` | JSON of the reminder after the write |
//! | `delete <id>` | nothing |
//! | `watch` | one line per store change, until killed |
//!
//! Exit codes follow sysexits: 66 not found, 75 temporary failure,
//! 77 permission denied.

use super::{ChangeToken, CollabResult, ReminderFilter, RemoteStore, Subscription};
use crate::config::DEFAULT_GEOFENCE_RADIUS_M;
use crate::error::CollaboratorError;
use crate::sync::models::{Coordinates, Geofence, ReminderEntity, ReminderFields, TriggerEdge};
use crate::sync::translator::parse_optional_timestamp;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

const EX_NOINPUT: i32 = 66;
const EX_TEMPFAIL: i32 = 75;
const EX_NOPERM: i32 = 77;

/// Reminder as exported by the bridge
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReminder {
    identifier: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    is_completed: bool,
    #[serde(default)]
    list: Option<String>,
    #[serde(default)]
    has_location: bool,
    #[serde(default)]
    location_name: Option<String>,
    #[serde(default)]
    location_latitude: Option<f64>,
    #[serde(default)]
    location_longitude: Option<f64>,
    #[serde(default)]
    location_radius: Option<f64>,
    #[serde(default)]
    location_trigger: Option<String>,
    #[serde(default)]
    modification_date: Option<String>,
}

/// Convert one bridge reminder into a `ReminderEntity`
pub fn reminder_from_json(value: &Value, default_list: &str) -> CollabResult<ReminderEntity> {
    let raw: RawReminder = serde_json::from_value(value.clone())
        .map_err(|e| CollaboratorError::Invalid(format!("reminder JSON: {}", e)))?;

    let mut warnings = Vec::new();
    let due_at = parse_optional_timestamp(raw.due_date.as_deref(), &mut warnings);
    let last_modified = parse_optional_timestamp(raw.modification_date.as_deref(), &mut warnings)
        .unwrap_or_else(Utc::now);

    let geofence = if raw.has_location || raw.location_name.is_some() {
        raw.location_name.filter(|n| !n.is_empty()).map(|name| Geofence {
            name,
            coordinates: match (raw.location_latitude, raw.location_longitude) {
                (Some(latitude), Some(longitude)) => Some(Coordinates {
                    latitude,
                    longitude,
                }),
                _ => None,
            },
            radius: raw.location_radius.unwrap_or(DEFAULT_GEOFENCE_RADIUS_M),
            trigger: raw
                .location_trigger
                .as_deref()
                .and_then(TriggerEdge::parse)
                .unwrap_or_default(),
        })
    } else {
        None
    };

    Ok(ReminderEntity {
        remote_id: raw.identifier,
        title: raw.title,
        notes: raw.notes.unwrap_or_default(),
        priority: raw.priority,
        due_at,
        is_done: raw.is_completed,
        list_name: raw
            .list
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| default_list.to_string()),
        geofence,
        last_modified,
        read_warnings: warnings,
    })
}

/// Payload for `create` / `update`
pub fn bridge_payload(fields: &ReminderFields, identifier: Option<&str>) -> Value {
    let mut obj = Map::new();
    if let Some(id) = identifier {
        obj.insert("identifier".into(), json!(id));
    }
    obj.insert("title".into(), json!(fields.title));
    obj.insert("list".into(), json!(fields.list_name));
    obj.insert("priority".into(), json!(fields.priority));
    obj.insert("notes".into(), json!(fields.notes));
    obj.insert("is_completed".into(), json!(fields.is_done));
    obj.insert(
        "due_date".into(),
        json!(fields.due_at.map(|d| d.to_rfc3339()).unwrap_or_default()),
    );
    match &fields.geofence {
        Some(fence) => {
            obj.insert("location_name".into(), json!(fence.name));
            if let Some(c) = fence.coordinates {
                obj.insert("location_lat".into(), json!(c.latitude));
                obj.insert("location_lon".into(), json!(c.longitude));
            }
            obj.insert("location_radius".into(), json!(fence.radius));
            obj.insert("location_trigger".into(), json!(fence.trigger.as_str()));
        }
        None => {
            obj.insert("location_name".into(), json!(""));
        }
    }
    Value::Object(obj)
}

/// `RemoteStore` backed by the bridge binary
#[derive(Debug, Clone)]
pub struct ReminderBridge {
    binary: PathBuf,
    default_list: String,
}

impl ReminderBridge {
    pub fn new(binary: PathBuf, default_list: String) -> Self {
        Self {
            binary,
            default_list,
        }
    }

    async fn run(&self, args: &[String]) -> CollabResult<String> {
        tracing::debug!("Running reminders bridge {:?}", args.first());

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                CollaboratorError::Fatal(format!("failed to run {:?}: {}", self.binary, e))
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(match output.status.code() {
            Some(EX_NOINPUT) => CollaboratorError::NotFound(stderr),
            Some(EX_NOPERM) => CollaboratorError::Unauthorized(stderr),
            Some(EX_TEMPFAIL) => CollaboratorError::Transient(stderr),
            Some(code) => CollaboratorError::Transient(format!("exit {}: {}", code, stderr)),
            None => CollaboratorError::Transient(format!("terminated by signal: {}", stderr)),
        })
    }

    fn parse_one(&self, out: &str) -> CollabResult<ReminderEntity> {
        let value: Value = serde_json::from_str(out)
            .map_err(|e| CollaboratorError::Invalid(format!("bridge output: {}", e)))?;
        reminder_from_json(&value, &self.default_list)
    }
}

#[async_trait]
impl RemoteStore for ReminderBridge {
    async fn list_reminders(&self, filter: &ReminderFilter) -> CollabResult<Vec<ReminderEntity>> {
        let mut args = vec!["export".to_string()];
        if filter.include_completed {
            args.push("--include-completed".into());
        }
        if let Some(ids) = &filter.ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            args.push("--ids".into());
            args.push(ids.join(","));
        }

        let out = self.run(&args).await?;
        let raw: Vec<Value> = serde_json::from_str(&out)
            .map_err(|e| CollaboratorError::Invalid(format!("bridge export: {}", e)))?;

        let mut reminders = Vec::with_capacity(raw.len());
        for value in &raw {
            match reminder_from_json(value, &self.default_list) {
                Ok(r) if filter.matches(&r) => reminders.push(r),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable reminder: {}", e),
            }
        }
        Ok(reminders)
    }

    async fn list_names(&self) -> CollabResult<Vec<String>> {
        let out = self.run(&["lists".to_string()]).await?;
        serde_json::from_str(&out)
            .map_err(|e| CollaboratorError::Invalid(format!("bridge lists: {}", e)))
    }

    async fn create_reminder(&self, fields: &ReminderFields) -> CollabResult<ReminderEntity> {
        let payload = bridge_payload(fields, None).to_string();
        let out = self.run(&["create".to_string(), payload]).await?;
        self.parse_one(&out)
    }

    async fn update_reminder(
        &self,
        remote_id: &str,
        fields: &ReminderFields,
    ) -> CollabResult<ReminderEntity> {
        let payload = bridge_payload(fields, Some(remote_id)).to_string();
        let out = self.run(&["update".to_string(), payload]).await?;
        self.parse_one(&out)
    }

    async fn delete_reminder(&self, remote_id: &str) -> CollabResult<()> {
        self.run(&["delete".to_string(), remote_id.to_string()])
            .await?;
        Ok(())
    }

    async fn subscribe(&self) -> CollabResult<Subscription> {
        let mut child = Command::new(&self.binary)
            .arg("watch")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CollaboratorError::Fatal(format!("failed to start {:?} watch: {}", self.binary, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CollaboratorError::Fatal("bridge watch has no stdout".into()))?;

        let (tx, rx) = mpsc::channel(64);
        let producer = tokio::spawn(async move {
            // Owning the child here ties its lifetime to the subscription
            let _child = child;
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(_)) => {
                        if tx.send(ChangeToken).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("Reminders bridge watch ended");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Reading reminders bridge watch failed: {}", e);
                        break;
                    }
                }
            }
        });

        tracing::info!("Subscribed to reminder store changes");
        Ok(Subscription::new(rx, Some(producer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reminder_from_export() {
        let value = json!({
            "identifier": "x-apple-1",
            "title": "Pick up parcel",
            "notes": "Post office",
            "priority": 5,
            "dueDate": "2026-03-01T09:30:00Z",
            "isCompleted": false,
            "list": "Errands",
            "hasLocation": true,
            "locationName": "Post Office",
            "locationLatitude": 52.0,
            "locationLongitude": 4.0,
            "locationTrigger": "leaving",
            "modificationDate": "2026-02-28T10:00:00Z"
        });

        let reminder = reminder_from_json(&value, "Reminders").unwrap();
        assert_eq!(reminder.remote_id, "x-apple-1");
        assert_eq!(reminder.priority, 5);
        assert_eq!(reminder.list_name, "Errands");
        assert_eq!(
            reminder.due_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap())
        );
        let fence = reminder.geofence.unwrap();
        assert_eq!(fence.trigger, TriggerEdge::Leaving);
        assert_eq!(fence.radius, DEFAULT_GEOFENCE_RADIUS_M);
    }

    #[test]
    fn test_missing_list_and_bad_date() {
        let value = json!({"identifier": "r", "title": "t", "dueDate": "not a date"});
        let reminder = reminder_from_json(&value, "Reminders").unwrap();
        assert_eq!(reminder.list_name, "Reminders");
        assert_eq!(reminder.due_at, None);
        assert_eq!(reminder.read_warnings.len(), 1);
        assert!(reminder.geofence.is_none());
    }

    #[test]
    fn test_payload_shape() {
        let fields = ReminderFields {
            title: "Buy milk".into(),
            notes: String::new(),
            priority: 0,
            due_at: None,
            is_done: false,
            list_name: "Shopping".into(),
            geofence: None,
        };
        let payload = bridge_payload(&fields, Some("r-1"));
        assert_eq!(payload["identifier"], "r-1");
        assert_eq!(payload["list"], "Shopping");
        assert_eq!(payload["priority"], 0);
        assert_eq!(payload["due_date"], "");
    }
}
