//! Change fingerprints
//!
//! SHA-256 over the fields that matter for sync, serialized in a fixed
//! order. Modification timestamps and `remote_ref` are not part of the
//! digest.

use super::models::{
    Fingerprint, Geofence, LocationRef, Priority, ReminderEntity, TaskEntity,
};
use super::translator::truncate_to_minute;
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Serialize)]
struct TaskCanon<'a> {
    title: &'a str,
    notes: &'a str,
    priority: Priority,
    due_minute: Option<i64>,
    done: bool,
    project: Option<&'a str>,
    location: Option<&'a LocationRef>,
}

#[derive(Serialize)]
struct ReminderCanon<'a> {
    title: &'a str,
    notes: &'a str,
    priority: i64,
    due_minute: Option<i64>,
    done: bool,
    list: &'a str,
    geofence: Option<&'a Geofence>,
}

/// Fingerprint of a local task
pub fn task_fingerprint(task: &TaskEntity) -> Fingerprint {
    let canon = TaskCanon {
        title: task.title.trim(),
        notes: task.notes.trim(),
        priority: task.priority,
        due_minute: task.due_at.map(|d| truncate_to_minute(d).timestamp()),
        done: task.is_done,
        project: task.project.as_deref(),
        location: task.location_ref.as_ref(),
    };
    Fingerprint {
        digest: calculate_digest(&canon),
        done: task.is_done,
    }
}

/// Fingerprint of a remote reminder
pub fn reminder_fingerprint(reminder: &ReminderEntity) -> Fingerprint {
    let canon = ReminderCanon {
        title: reminder.title.trim(),
        notes: reminder.notes.trim(),
        priority: reminder.priority,
        due_minute: reminder.due_at.map(|d| truncate_to_minute(d).timestamp()),
        done: reminder.is_done,
        list: &reminder.list_name,
        geofence: reminder.geofence.as_ref(),
    };
    Fingerprint {
        digest: calculate_digest(&canon),
        done: reminder.is_done,
    }
}

fn calculate_digest<T: Serialize>(canon: &T) -> String {
    // Serializing plain structs of strings and numbers cannot fail.
    let bytes = serde_json::to_vec(canon).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn task() -> TaskEntity {
        TaskEntity {
            local_id: "t-1".into(),
            title: "Buy milk".into(),
            notes: String::new(),
            priority: Priority::None,
            due_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 12).unwrap()),
            is_done: false,
            project: Some("Shopping".into()),
            location_ref: None,
            last_modified: Utc::now(),
            remote_ref: None,
            is_deleted: false,
            read_warnings: Vec::new(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_modification_time_and_seconds() {
        let a = task();
        let mut b = task();
        b.last_modified = a.last_modified + chrono::Duration::hours(3);
        b.due_at = Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 48).unwrap());
        b.remote_ref = Some("r-9".into());

        assert_eq!(task_fingerprint(&a), task_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_tracks_content_and_done() {
        let a = task();
        let mut b = task();
        b.title = "Buy oat milk".into();
        assert_ne!(task_fingerprint(&a).digest, task_fingerprint(&b).digest);

        let mut c = task();
        c.is_done = true;
        let fp = task_fingerprint(&c);
        assert!(fp.done);
        assert_ne!(fp.digest, task_fingerprint(&a).digest);
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let fp = task_fingerprint(&task());
        assert_eq!(fp.digest.len(), 64);
        assert!(fp.digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
