//! In-memory collaborators
//!
//! Used by the test suite. Both stores count the writes made through their
//! trait methods and can be told to fail upcoming calls. The "external" edit
//! helpers behave like a user changing data in the real application and are
//! not counted as sync writes.

use super::{
    ChangeToken, CollabResult, LocalStore, ReminderFilter, RemoteStore, Subscription,
};
use crate::config::DEFAULT_LIST;
use crate::error::CollaboratorError;
use crate::sync::models::{ReminderEntity, ReminderFields, TaskEntity, TaskFields};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Injected failures and latency shared by both stores
#[derive(Debug, Default)]
struct Faults {
    pending: Mutex<HashMap<String, VecDeque<CollaboratorError>>>,
    delay: Mutex<Option<Duration>>,
}

impl Faults {
    fn push(&self, op: &str, err: CollaboratorError, times: usize) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let queue = pending.entry(op.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(err.clone());
        }
    }

    async fn check(&self, op: &str) -> CollabResult<()> {
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        match pending.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }
}

// ===== Tasks =====

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<BTreeMap<String, TaskEntity>>,
    writes: AtomicUsize,
    faults: Faults,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes made through `LocalStore`
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Fail the next `times` calls of `op` (trait method name)
    pub fn fail_next(&self, op: &str, err: CollaboratorError, times: usize) {
        self.faults.push(op, err, times);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.faults.set_delay(delay);
    }

    pub fn get(&self, local_id: &str) -> Option<TaskEntity> {
        self.lock().get(local_id).cloned()
    }

    pub fn all(&self) -> Vec<TaskEntity> {
        self.lock().values().cloned().collect()
    }

    /// User adds a task directly in the task manager
    pub fn insert_external(&self, fields: TaskFields) -> TaskEntity {
        let task = entity_from_fields(Uuid::new_v4().to_string(), &fields);
        self.lock().insert(task.local_id.clone(), task.clone());
        task
    }

    /// User edits a task; `last_modified` is bumped before `edit` runs
    pub fn edit_external(
        &self,
        local_id: &str,
        edit: impl FnOnce(&mut TaskEntity),
    ) -> Option<TaskEntity> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(local_id)?;
        task.last_modified = Utc::now();
        edit(task);
        Some(task.clone())
    }

    /// User deletes a task
    pub fn remove_external(&self, local_id: &str) -> Option<TaskEntity> {
        self.lock().remove(local_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, TaskEntity>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write<T>(
        &self,
        local_id: &str,
        apply: impl FnOnce(&mut TaskEntity) -> T,
    ) -> CollabResult<T> {
        let mut tasks = self.lock();
        let task = tasks
            .get_mut(local_id)
            .ok_or_else(|| CollaboratorError::NotFound(local_id.to_string()))?;
        task.last_modified = Utc::now();
        let out = apply(task);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(out)
    }
}

fn entity_from_fields(local_id: String, fields: &TaskFields) -> TaskEntity {
    TaskEntity {
        local_id,
        title: fields.title.clone(),
        notes: fields.notes.clone(),
        priority: fields.priority,
        due_at: fields.due_at,
        is_done: fields.is_done,
        project: fields.project.clone(),
        location_ref: fields.location_ref.clone(),
        last_modified: Utc::now(),
        remote_ref: fields.remote_ref.clone(),
        is_deleted: false,
        read_warnings: Vec::new(),
    }
}

#[async_trait]
impl LocalStore for MemoryTaskStore {
    async fn list_tasks(&self) -> CollabResult<Vec<TaskEntity>> {
        self.faults.check("list_tasks").await?;
        Ok(self.all())
    }

    async fn create_task(&self, fields: &TaskFields) -> CollabResult<TaskEntity> {
        self.faults.check("create_task").await?;
        let task = entity_from_fields(Uuid::new_v4().to_string(), fields);
        self.lock().insert(task.local_id.clone(), task.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(task)
    }

    async fn update_task(&self, local_id: &str, fields: &TaskFields) -> CollabResult<TaskEntity> {
        self.faults.check("update_task").await?;
        self.write(local_id, |task| {
            let remote_ref = fields.remote_ref.clone().or_else(|| task.remote_ref.clone());
            *task = TaskEntity {
                remote_ref,
                last_modified: task.last_modified,
                ..entity_from_fields(task.local_id.clone(), fields)
            };
            task.clone()
        })
    }

    async fn mark_done(&self, local_id: &str) -> CollabResult<TaskEntity> {
        self.faults.check("mark_done").await?;
        self.write(local_id, |task| {
            task.is_done = true;
            task.clone()
        })
    }

    async fn delete_task(&self, local_id: &str) -> CollabResult<()> {
        self.faults.check("delete_task").await?;
        self.lock()
            .remove(local_id)
            .ok_or_else(|| CollaboratorError::NotFound(local_id.to_string()))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_remote_ref(&self, local_id: &str, remote_id: &str) -> CollabResult<TaskEntity> {
        self.faults.check("set_remote_ref").await?;
        self.write(local_id, |task| {
            task.remote_ref = Some(remote_id.to_string());
            task.clone()
        })
    }
}

// ===== Reminders =====

#[derive(Debug)]
pub struct MemoryReminderStore {
    reminders: Mutex<BTreeMap<String, ReminderEntity>>,
    lists: Mutex<BTreeSet<String>>,
    subscribers: Mutex<Vec<mpsc::Sender<ChangeToken>>>,
    writes: AtomicUsize,
    faults: Faults,
}

impl Default for MemoryReminderStore {
    fn default() -> Self {
        Self {
            reminders: Mutex::new(BTreeMap::new()),
            lists: Mutex::new([DEFAULT_LIST.to_string()].into_iter().collect()),
            subscribers: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
            faults: Faults::default(),
        }
    }
}

impl MemoryReminderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lists<I, S>(lists: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        store
            .lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(lists.into_iter().map(Into::into));
        store
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, op: &str, err: CollaboratorError, times: usize) {
        self.faults.push(op, err, times);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.faults.set_delay(delay);
    }

    pub fn get(&self, remote_id: &str) -> Option<ReminderEntity> {
        self.lock().get(remote_id).cloned()
    }

    pub fn all(&self) -> Vec<ReminderEntity> {
        self.lock().values().cloned().collect()
    }

    /// User adds a reminder on another device
    pub fn insert_external(&self, fields: ReminderFields) -> ReminderEntity {
        let reminder = self.entity_from_fields(format!("rem-{}", Uuid::new_v4()), &fields);
        self.lock().insert(reminder.remote_id.clone(), reminder.clone());
        self.notify();
        reminder
    }

    /// User edits a reminder; `last_modified` is bumped before `edit` runs
    pub fn edit_external(
        &self,
        remote_id: &str,
        edit: impl FnOnce(&mut ReminderEntity),
    ) -> Option<ReminderEntity> {
        let edited = {
            let mut reminders = self.lock();
            let reminder = reminders.get_mut(remote_id)?;
            reminder.last_modified = Utc::now();
            edit(reminder);
            reminder.clone()
        };
        self.notify();
        Some(edited)
    }

    pub fn remove_external(&self, remote_id: &str) -> Option<ReminderEntity> {
        let removed = self.lock().remove(remote_id);
        self.notify();
        removed
    }

    /// Fire a change notification to every subscriber
    pub fn notify(&self) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            let _ = tx.try_send(ChangeToken);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ReminderEntity>> {
        self.reminders.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Unknown lists land in the default list, like the real service
    fn entity_from_fields(&self, remote_id: String, fields: &ReminderFields) -> ReminderEntity {
        let known = self
            .lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&fields.list_name);
        ReminderEntity {
            remote_id,
            title: fields.title.clone(),
            notes: fields.notes.clone(),
            priority: fields.priority,
            due_at: fields.due_at,
            is_done: fields.is_done,
            list_name: if known {
                fields.list_name.clone()
            } else {
                DEFAULT_LIST.to_string()
            },
            geofence: fields.geofence.clone(),
            last_modified: Utc::now(),
            read_warnings: Vec::new(),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryReminderStore {
    async fn list_reminders(&self, filter: &ReminderFilter) -> CollabResult<Vec<ReminderEntity>> {
        self.faults.check("list_reminders").await?;
        Ok(self
            .lock()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn list_names(&self) -> CollabResult<Vec<String>> {
        self.faults.check("list_names").await?;
        Ok(self
            .lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect())
    }

    async fn create_reminder(&self, fields: &ReminderFields) -> CollabResult<ReminderEntity> {
        self.faults.check("create_reminder").await?;
        let reminder = self.entity_from_fields(format!("rem-{}", Uuid::new_v4()), fields);
        self.lock().insert(reminder.remote_id.clone(), reminder.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.notify();
        Ok(reminder)
    }

    async fn update_reminder(
        &self,
        remote_id: &str,
        fields: &ReminderFields,
    ) -> CollabResult<ReminderEntity> {
        self.faults.check("update_reminder").await?;
        if !self.lock().contains_key(remote_id) {
            return Err(CollaboratorError::NotFound(remote_id.to_string()));
        }
        let reminder = self.entity_from_fields(remote_id.to_string(), fields);
        self.lock().insert(remote_id.to_string(), reminder.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.notify();
        Ok(reminder)
    }

    async fn delete_reminder(&self, remote_id: &str) -> CollabResult<()> {
        self.faults.check("delete_reminder").await?;
        self.lock()
            .remove(remote_id)
            .ok_or_else(|| CollaboratorError::NotFound(remote_id.to_string()))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.notify();
        Ok(())
    }

    async fn subscribe(&self) -> CollabResult<Subscription> {
        self.faults.check("subscribe").await?;
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        Ok(Subscription::new(rx, None))
    }
}
