//! Taskwarrior adapter
//!
//! Talks to the `task` binary and converts its JSON export format to
//! `TaskEntity`. Every invocation runs with `rc.hooks=off` so that writes
//! made by a sync pass never re-enter our own hooks.
//!
//! User defined attributes carried on tasks:
//! - `reminder_id`: mirror id of the linked reminder
//! - `loc`: location shortcut key or literal place name
//! - `location_lat`, `location_lon`, `location_radius`, `location_trigger`

use super::{CollabResult, LocalStore};
use crate::error::CollaboratorError;
use crate::sync::models::{Coordinates, LocationRef, Priority, TaskEntity, TaskFields, TriggerEdge};
use crate::sync::translator::{parse_optional_timestamp, truncate_to_minute, TranslationWarning};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

const TW_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Deserialize)]
struct RawAnnotation {
    #[serde(default)]
    description: String,
}

/// Task as exported by Taskwarrior
#[derive(Debug, Deserialize)]
struct RawTask {
    uuid: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    due: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    annotations: Vec<RawAnnotation>,
    #[serde(default)]
    loc: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    location_lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    location_lon: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    location_radius: Option<f64>,
    #[serde(default)]
    location_trigger: Option<String>,
    #[serde(default)]
    modified: Option<String>,
    #[serde(default)]
    entry: Option<String>,
    #[serde(default)]
    reminder_id: Option<String>,
}

/// Numeric UDAs arrive as numbers or as strings depending on the version
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Taskwarrior H/M/L letter to a priority bucket
pub fn parse_priority(raw: Option<&str>) -> (Priority, Option<TranslationWarning>) {
    match raw.map(str::trim) {
        None | Some("") => (Priority::None, None),
        Some("H") | Some("h") => (Priority::High, None),
        Some("M") | Some("m") => (Priority::Medium, None),
        Some("L") | Some("l") => (Priority::Low, None),
        Some(other) => (
            Priority::None,
            Some(TranslationWarning::UnknownPriority {
                raw: other.to_string(),
            }),
        ),
    }
}

pub fn priority_letter(priority: Priority) -> Option<&'static str> {
    match priority {
        Priority::High => Some("H"),
        Priority::Medium => Some("M"),
        Priority::Low => Some("L"),
        Priority::None => None,
    }
}

pub fn format_tw_date(ts: DateTime<Utc>) -> String {
    ts.format(TW_DATE_FORMAT).to_string()
}

/// Convert one exported task (or hook payload) into a `TaskEntity`.
///
/// Malformed fields are dropped and recorded in `read_warnings`; only a
/// missing `uuid` is an error.
pub fn task_from_json(value: &Value) -> CollabResult<TaskEntity> {
    let raw: RawTask = serde_json::from_value(value.clone())
        .map_err(|e| CollaboratorError::Invalid(format!("task JSON: {}", e)))?;

    let mut warnings = Vec::new();

    let (priority, warning) = parse_priority(raw.priority.as_deref());
    if let Some(w) = warning {
        tracing::warn!("Task {}: {}", raw.uuid, w);
        warnings.push(w);
    }

    let due_at = parse_optional_timestamp(raw.due.as_deref(), &mut warnings);
    let last_modified = parse_optional_timestamp(raw.modified.as_deref(), &mut warnings)
        .or_else(|| parse_optional_timestamp(raw.entry.as_deref(), &mut warnings))
        .unwrap_or_else(Utc::now);

    let notes = raw
        .annotations
        .iter()
        .map(|a| a.description.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let location_ref = raw
        .loc
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|name| LocationRef {
            name: name.to_string(),
            coordinates: match (raw.location_lat, raw.location_lon) {
                (Some(latitude), Some(longitude)) => Some(Coordinates {
                    latitude,
                    longitude,
                }),
                _ => None,
            },
            radius: raw.location_radius,
            trigger: raw.location_trigger.as_deref().and_then(TriggerEdge::parse),
        });

    let status = raw.status.as_deref().unwrap_or("pending");

    let task = TaskEntity {
        local_id: raw.uuid,
        title: raw.description,
        notes,
        priority,
        due_at,
        is_done: status == "completed",
        project: raw.project.filter(|p| !p.trim().is_empty()),
        location_ref,
        last_modified,
        remote_ref: raw.reminder_id.filter(|r| !r.is_empty()),
        is_deleted: status == "deleted",
        read_warnings: warnings,
    };

    Ok(task)
}

fn set_or_remove(obj: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    match value {
        Some(v) => {
            obj.insert(key.to_string(), v);
        }
        None => {
            obj.remove(key);
        }
    }
}

/// Write sync fields into a raw task object, leaving every other attribute
/// (tags, urgency inputs, custom UDAs) as it was.
pub fn apply_fields(value: &mut Value, fields: &TaskFields) {
    if !value.is_object() {
        *value = json!({});
    }
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    let now = format_tw_date(Utc::now());

    obj.insert("description".into(), json!(fields.title));
    set_or_remove(obj, "priority", priority_letter(fields.priority).map(|p| json!(p)));
    set_or_remove(
        obj,
        "due",
        fields.due_at.map(|d| json!(format_tw_date(truncate_to_minute(d)))),
    );
    set_or_remove(obj, "project", fields.project.as_ref().map(|p| json!(p)));

    let current_notes = obj
        .get("annotations")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|a| a.get("description").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    if current_notes != fields.notes {
        let annotations = if fields.notes.is_empty() {
            None
        } else {
            Some(json!([{ "entry": now, "description": fields.notes }]))
        };
        set_or_remove(obj, "annotations", annotations);
    }

    let was_done = obj.get("status").and_then(Value::as_str) == Some("completed");
    if fields.is_done {
        obj.insert("status".into(), json!("completed"));
        if !was_done {
            obj.insert("end".into(), json!(now));
        }
    } else {
        obj.insert("status".into(), json!("pending"));
        obj.remove("end");
    }

    let loc = fields.location_ref.as_ref();
    set_or_remove(obj, "loc", loc.map(|l| json!(l.name)));
    set_or_remove(
        obj,
        "location_lat",
        loc.and_then(|l| l.coordinates).map(|c| json!(c.latitude)),
    );
    set_or_remove(
        obj,
        "location_lon",
        loc.and_then(|l| l.coordinates).map(|c| json!(c.longitude)),
    );
    set_or_remove(obj, "location_radius", loc.and_then(|l| l.radius).map(|r| json!(r)));
    set_or_remove(
        obj,
        "location_trigger",
        loc.and_then(|l| l.trigger).map(|t| json!(t.as_str())),
    );

    if let Some(remote_ref) = &fields.remote_ref {
        obj.insert("reminder_id".into(), json!(remote_ref));
    }
    obj.insert("modified".into(), json!(now));
}

/// `LocalStore` backed by the `task` command
#[derive(Debug, Clone)]
pub struct TaskwarriorCli {
    binary: PathBuf,
    data_location: Option<PathBuf>,
}

impl TaskwarriorCli {
    pub fn new(binary: PathBuf, data_location: Option<PathBuf>) -> Self {
        Self {
            binary,
            data_location,
        }
    }

    async fn run(&self, args: &[&str], stdin: Option<String>) -> CollabResult<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "rc.hooks=off",
            "rc.confirmation=off",
            "rc.verbose=nothing",
            "rc.json.array=on",
        ]);
        if let Some(data) = &self.data_location {
            cmd.arg(format!("rc.data.location={}", data.display()));
        }
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("Running task {:?}", args);

        let mut child = cmd.spawn().map_err(|e| {
            CollaboratorError::Fatal(format!("failed to run {:?}: {}", self.binary, e))
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| CollaboratorError::Transient(format!("task stdin: {}", e)))?;
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CollaboratorError::Transient(format!("task: {}", e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(&stderr))
    }

    async fn export_raw(&self, local_id: &str) -> CollabResult<Value> {
        let out = self.run(&[local_id, "export"], None).await?;
        let mut tasks: Vec<Value> = serde_json::from_str(&out)
            .map_err(|e| CollaboratorError::Invalid(format!("task export: {}", e)))?;
        if tasks.is_empty() {
            return Err(CollaboratorError::NotFound(local_id.to_string()));
        }
        Ok(tasks.swap_remove(0))
    }

    async fn export_one(&self, local_id: &str) -> CollabResult<TaskEntity> {
        let raw = self.export_raw(local_id).await?;
        task_from_json(&raw)
    }

    async fn import(&self, value: &Value) -> CollabResult<()> {
        let payload = serde_json::to_string(&json!([value]))
            .map_err(|e| CollaboratorError::Invalid(e.to_string()))?;
        self.run(&["import", "-"], Some(payload)).await?;
        Ok(())
    }
}

fn classify_failure(stderr: &str) -> CollaboratorError {
    let lower = stderr.to_lowercase();
    if lower.contains("no tasks specified") || lower.contains("no matches") {
        CollaboratorError::NotFound(stderr.to_string())
    } else if lower.contains("permission denied") {
        CollaboratorError::Unauthorized(stderr.to_string())
    } else {
        // Lock contention on the task database and everything unknown
        CollaboratorError::Transient(stderr.to_string())
    }
}

#[async_trait]
impl LocalStore for TaskwarriorCli {
    async fn list_tasks(&self) -> CollabResult<Vec<TaskEntity>> {
        let out = self
            .run(
                &[
                    "(",
                    "status:pending",
                    "or",
                    "status:completed",
                    "or",
                    "status:waiting",
                    ")",
                    "export",
                ],
                None,
            )
            .await?;
        let raw: Vec<Value> = serde_json::from_str(&out)
            .map_err(|e| CollaboratorError::Invalid(format!("task export: {}", e)))?;

        let mut tasks = Vec::with_capacity(raw.len());
        for value in &raw {
            match task_from_json(value) {
                Ok(task) => tasks.push(task),
                Err(e) => tracing::warn!("Skipping unreadable task: {}", e),
            }
        }
        Ok(tasks)
    }

    async fn create_task(&self, fields: &TaskFields) -> CollabResult<TaskEntity> {
        let uuid = Uuid::new_v4().to_string();
        let mut value = json!({
            "uuid": uuid,
            "entry": format_tw_date(Utc::now()),
            "status": "pending",
        });
        apply_fields(&mut value, fields);
        self.import(&value).await?;
        self.export_one(&uuid).await
    }

    async fn update_task(&self, local_id: &str, fields: &TaskFields) -> CollabResult<TaskEntity> {
        let mut value = self.export_raw(local_id).await?;
        apply_fields(&mut value, fields);
        self.import(&value).await?;
        self.export_one(local_id).await
    }

    async fn mark_done(&self, local_id: &str) -> CollabResult<TaskEntity> {
        self.run(&[local_id, "done"], None).await?;
        self.export_one(local_id).await
    }

    async fn delete_task(&self, local_id: &str) -> CollabResult<()> {
        self.run(&[local_id, "delete"], None).await?;
        Ok(())
    }

    async fn set_remote_ref(&self, local_id: &str, remote_id: &str) -> CollabResult<TaskEntity> {
        let mut value = self.export_raw(local_id).await?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("reminder_id".into(), json!(remote_id));
        }
        self.import(&value).await?;
        self.export_one(local_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_task_from_hook_payload() {
        let payload = json!({
            "uuid": "0b5c7c0e-1111-4a4a-9c9c-123456789abc",
            "description": "Buy milk",
            "status": "pending",
            "project": "Shopping",
            "priority": "H",
            "due": "20260301T093000Z",
            "entry": "20260201T080000Z",
            "modified": "20260202T080000Z",
            "annotations": [{"entry": "20260201T080000Z", "description": "2 litres"}],
            "loc": "home",
            "location_radius": "250"
        });

        let task = task_from_json(&payload).unwrap();
        assert!(task.read_warnings.is_empty());
        assert_eq!(task.title, "Buy milk");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.project.as_deref(), Some("Shopping"));
        assert_eq!(task.notes, "2 litres");
        assert_eq!(task.due_at, Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()));
        assert_eq!(
            task.last_modified,
            Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap()
        );
        let loc = task.location_ref.unwrap();
        assert_eq!(loc.name, "home");
        assert_eq!(loc.radius, Some(250.0));
        assert!(loc.coordinates.is_none());
        assert!(!task.is_done && !task.is_deleted);
    }

    #[test]
    fn test_bad_priority_and_date_are_warnings() {
        let payload = json!({
            "uuid": "u-1",
            "description": "x",
            "priority": "urgent",
            "due": "someday",
        });
        let task = task_from_json(&payload).unwrap();
        assert_eq!(task.priority, Priority::None);
        assert_eq!(task.due_at, None);
        assert_eq!(task.read_warnings.len(), 2);
    }

    #[test]
    fn test_status_mapping() {
        let done = task_from_json(&json!({"uuid": "a", "status": "completed"})).unwrap();
        assert!(done.is_done);
        let deleted = task_from_json(&json!({"uuid": "b", "status": "deleted"})).unwrap();
        assert!(deleted.is_deleted);
        assert!(task_from_json(&json!({"description": "no uuid"})).is_err());
    }

    #[test]
    fn test_apply_fields_preserves_unrelated_attributes() {
        let mut raw = json!({
            "uuid": "u-1",
            "description": "old",
            "tags": ["errand"],
            "priority": "L",
            "status": "pending",
        });
        let fields = TaskFields {
            title: "new".into(),
            notes: String::new(),
            priority: Priority::None,
            due_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 59).unwrap()),
            is_done: true,
            project: None,
            location_ref: Some(LocationRef::named("office")),
            remote_ref: Some("rem-7".into()),
        };
        apply_fields(&mut raw, &fields);

        assert_eq!(raw["description"], "new");
        assert_eq!(raw["tags"], json!(["errand"]));
        assert!(raw.get("priority").is_none());
        assert_eq!(raw["due"], "20260301T093000Z");
        assert_eq!(raw["status"], "completed");
        assert!(raw.get("end").is_some());
        assert_eq!(raw["loc"], "office");
        assert_eq!(raw["reminder_id"], "rem-7");

        let task = task_from_json(&raw).unwrap();
        assert_eq!(task.title, "new");
        assert!(task.is_done);
    }

    #[test]
    fn test_failure_classification() {
        assert!(matches!(
            classify_failure("No tasks specified."),
            CollaboratorError::NotFound(_)
        ));
        assert!(classify_failure("database is locked").is_transient());
    }
}
