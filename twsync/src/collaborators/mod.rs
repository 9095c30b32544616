//! Collaborator interfaces
//!
//! The reconciler talks to the task manager and the reminders service only
//! through these traits. Adapters translate their wire formats into the
//! typed records of `sync::models` before anything reaches the core.

pub mod memory;
pub mod reminders;
pub mod taskwarrior;

pub use memory::{MemoryReminderStore, MemoryTaskStore};
pub use reminders::ReminderBridge;
pub use taskwarrior::TaskwarriorCli;

use crate::error::CollaboratorError;
use crate::sync::models::{ReminderEntity, ReminderFields, TaskEntity, TaskFields};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// Which reminders to list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReminderFilter {
    pub include_completed: bool,
    /// Restrict to these ids
    pub ids: Option<Vec<String>>,
}

impl ReminderFilter {
    pub fn everything() -> Self {
        Self {
            include_completed: true,
            ids: None,
        }
    }

    pub fn by_ids(ids: Vec<String>) -> Self {
        Self {
            include_completed: true,
            ids: Some(ids),
        }
    }

    pub fn matches(&self, reminder: &ReminderEntity) -> bool {
        if !self.include_completed && reminder.is_done {
            return false;
        }
        match &self.ids {
            Some(ids) => ids.iter().any(|id| id == &reminder.remote_id),
            None => true,
        }
    }
}

/// Local task manager. Writes return the post-write task.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Pending and completed tasks; deleted tasks are never listed
    async fn list_tasks(&self) -> CollabResult<Vec<TaskEntity>>;
    async fn create_task(&self, fields: &TaskFields) -> CollabResult<TaskEntity>;
    async fn update_task(&self, local_id: &str, fields: &TaskFields) -> CollabResult<TaskEntity>;
    async fn mark_done(&self, local_id: &str) -> CollabResult<TaskEntity>;
    async fn delete_task(&self, local_id: &str) -> CollabResult<()>;
    /// Stamp the mirror id onto the task
    async fn set_remote_ref(&self, local_id: &str, remote_id: &str) -> CollabResult<TaskEntity>;
}

/// Remote reminders service. Writes return the post-write reminder.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_reminders(&self, filter: &ReminderFilter) -> CollabResult<Vec<ReminderEntity>>;
    /// Names of the lists that exist remotely
    async fn list_names(&self) -> CollabResult<Vec<String>>;
    async fn create_reminder(&self, fields: &ReminderFields) -> CollabResult<ReminderEntity>;
    async fn update_reminder(
        &self,
        remote_id: &str,
        fields: &ReminderFields,
    ) -> CollabResult<ReminderEntity>;
    async fn delete_reminder(&self, remote_id: &str) -> CollabResult<()>;
    /// Change notifications; each token means "something changed, re-list"
    async fn subscribe(&self) -> CollabResult<Subscription>;
}

/// Payload-free change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeToken;

/// Cancellable stream of change tokens.
///
/// Dropping the subscription or calling `cancel` stops the producer.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<ChangeToken>,
    producer: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<ChangeToken>, producer: Option<JoinHandle<()>>) -> Self {
        Self { rx, producer }
    }

    /// Wait for the next token; `None` once the source is gone
    pub async fn next(&mut self) -> Option<ChangeToken> {
        self.rx.recv().await
    }

    /// Discard every token already queued, returning how many there were
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    pub fn cancel(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
