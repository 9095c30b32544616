//! Change classifier
//!
//! Decides what happened to one entity since its link was last refreshed.

use super::fingerprint::{reminder_fingerprint, task_fingerprint};
use super::models::{Fingerprint, ReminderEntity, Side, SyncLink, TaskEntity};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Updated,
    Completed,
    Deleted,
    Unchanged,
}

impl ChangeKind {
    pub fn is_change(self) -> bool {
        matches!(self, ChangeKind::Updated | ChangeKind::Completed)
    }
}

/// Common view over tasks and reminders for classification
pub trait SyncEntity {
    const SIDE: Side;

    fn id(&self) -> &str;
    fn fingerprint(&self) -> Fingerprint;
}

impl SyncEntity for TaskEntity {
    const SIDE: Side = Side::Local;

    fn id(&self) -> &str {
        &self.local_id
    }

    fn fingerprint(&self) -> Fingerprint {
        task_fingerprint(self)
    }
}

impl SyncEntity for ReminderEntity {
    const SIDE: Side = Side::Remote;

    fn id(&self) -> &str {
        &self.remote_id
    }

    fn fingerprint(&self) -> Fingerprint {
        reminder_fingerprint(self)
    }
}

impl SyncLink {
    /// Stored fingerprint for one side
    pub fn fingerprint(&self, side: Side) -> &Fingerprint {
        match side {
            Side::Local => &self.local_fingerprint,
            Side::Remote => &self.remote_fingerprint,
        }
    }
}

/// Classify one entity against its link.
///
/// `entity` is `None` when the id is absent from the current snapshot.
/// Completion outranks other edits: an entity that was edited and completed
/// since the last sync is `Completed`, and the caller carries its fields.
pub fn classify<E: SyncEntity>(entity: Option<&E>, link: Option<&SyncLink>) -> ChangeKind {
    match (entity, link) {
        (Some(_), None) => ChangeKind::New,
        (None, Some(_)) => ChangeKind::Deleted,
        (None, None) => ChangeKind::Unchanged,
        (Some(entity), Some(link)) => {
            let stored = link.fingerprint(E::SIDE);
            let current = entity.fingerprint();

            if stored.matches(&current) {
                ChangeKind::Unchanged
            } else if current.done && !stored.done {
                ChangeKind::Completed
            } else {
                ChangeKind::Updated
            }
        }
    }
}
