//! Reconciler
//!
//! Runs one sync pass: Lock, Load, Classify, Plan, Apply, Persist. The map is
//! written once at the end; a fatal error leaves the persisted state as it
//! was before the pass.

use super::fingerprint::{reminder_fingerprint, task_fingerprint};
use super::models::{ReminderEntity, Side, SyncLink, TaskEntity, TaskFields};
use super::plan::{plan_full, plan_local, Action, OpCategory, Plan, PlannedOp};
use super::summary::{LinkedPair, SyncSummary};
use super::translator::{
    project_lands_in, reminder_to_task, task_to_reminder, TranslateContext, TranslationWarning,
};
use crate::collaborators::{CollabResult, LocalStore, ReminderFilter, RemoteStore};
use crate::config;
use crate::error::{AppError, CollaboratorError, Result};
use crate::storage::{IdentityMap, IdentityMapStore, LocationTable, StateLock};
use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What started the pass
#[derive(Debug, Clone)]
pub enum Trigger {
    /// A task delivered by a Taskwarrior hook; only that task is in scope
    Local(TaskEntity),
    /// A change notification or an explicit full sync
    Remote,
}

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub operation_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub lock_wait: Duration,
    pub default_list: String,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(config::DEFAULT_OPERATION_TIMEOUT_MS),
            max_retries: config::DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(config::DEFAULT_RETRY_BACKOFF_MS),
            lock_wait: Duration::from_millis(config::DEFAULT_LOCK_WAIT_MS),
            default_list: config::DEFAULT_LIST.to_string(),
        }
    }
}

/// A collaborator call that failed after retries
#[derive(Debug)]
struct Failed {
    operation: &'static str,
    error: CollaboratorError,
}

impl Failed {
    fn is_not_found(&self) -> bool {
        matches!(self.error, CollaboratorError::NotFound(_))
    }
}

type OpResult<T> = std::result::Result<T, Failed>;

pub struct Reconciler {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    store: IdentityMapStore,
    locations_path: PathBuf,
    options: ReconcilerOptions,
}

impl Reconciler {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        store: IdentityMapStore,
        locations_path: PathBuf,
        options: ReconcilerOptions,
    ) -> Self {
        Self {
            local,
            remote,
            store,
            locations_path,
            options,
        }
    }

    pub fn store(&self) -> &IdentityMapStore {
        &self.store
    }

    pub fn options(&self) -> &ReconcilerOptions {
        &self.options
    }

    /// Run one pass.
    ///
    /// Item failures are collected in the summary. `Err` means the pass was
    /// aborted and nothing was persisted.
    pub async fn run_sync_pass(&self, trigger: Trigger) -> Result<SyncSummary> {
        let started = Instant::now();
        let scope = match &trigger {
            Trigger::Local(task) => format!("task {}", task.local_id),
            Trigger::Remote => "full".to_string(),
        };
        tracing::info!("Starting sync pass ({})", scope);

        let _lock = StateLock::acquire(self.store.path(), self.options.lock_wait).await?;
        let mut map = self.store.load().await?;
        let locations = LocationTable::load(&self.locations_path).await?;
        let mut summary = SyncSummary::default();

        let local_pass = matches!(trigger, Trigger::Local(_));
        let plan = match trigger {
            Trigger::Remote => self.plan_full_pass(&map, &mut summary).await?,
            Trigger::Local(task) => self.plan_local_pass(&map, task, &mut summary).await?,
        };

        for deferral in &plan.deferred {
            summary.defer(&deferral.item, deferral.reason);
        }

        let known_lists = if needs_list_names(&plan) {
            self.known_lists(&mut summary).await?
        } else {
            None
        };
        let ctx = TranslateContext {
            locations: &locations,
            known_lists: known_lists.as_ref(),
            default_list: &self.options.default_list,
        };

        tracing::debug!("Planned {} operation(s)", plan.ops.len());
        for op in plan.ops {
            let item = op.item();
            match self.apply(op, &mut map, &ctx, local_pass, &mut summary).await {
                Ok(()) => {}
                Err(failed) if failed.error.is_fatal() => {
                    tracing::error!(
                        "Aborting sync pass: {} failed for {}: {}",
                        failed.operation,
                        item,
                        failed.error
                    );
                    return Err(AppError::Collaborator(failed.error));
                }
                Err(failed) => summary.error(&item, failed.operation, &failed.error),
            }
        }

        map.mark_synced(Utc::now());
        self.store.save(&map).await?;

        tracing::info!(
            "Sync pass ({}) finished in {:?}: {}",
            scope,
            started.elapsed(),
            summary
        );
        Ok(summary)
    }

    async fn plan_full_pass(&self, map: &IdentityMap, summary: &mut SyncSummary) -> Result<Plan> {
        let local = self.local.as_ref();
        let remote = self.remote.as_ref();
        let filter = ReminderFilter::everything();

        let mut tasks = self
            .call("list_tasks", || local.list_tasks())
            .await
            .map_err(load_error)?;
        let mut reminders = self
            .call("list_reminders", || remote.list_reminders(&filter))
            .await
            .map_err(load_error)?;
        tracing::debug!(
            "Loaded {} task(s), {} reminder(s), {} link(s)",
            tasks.len(),
            reminders.len(),
            map.len()
        );

        for task in &mut tasks {
            take_read_warnings(task, summary);
        }
        for reminder in &mut reminders {
            take_read_warnings(reminder, summary);
        }

        Ok(plan_full(map, tasks, reminders))
    }

    async fn plan_local_pass(
        &self,
        map: &IdentityMap,
        mut task: TaskEntity,
        summary: &mut SyncSummary,
    ) -> Result<Plan> {
        take_read_warnings(&mut task, summary);

        let link = map.lookup_by_local(&task.local_id);
        let wanted = match link {
            Some(link) => Some(link.remote_id.clone()),
            None if !task.is_deleted && !task.is_done => task.remote_ref.clone(),
            None => None,
        };

        let mut found = match wanted {
            Some(id) => {
                let remote = self.remote.as_ref();
                let filter = ReminderFilter::by_ids(vec![id]);
                self.call("list_reminders", || remote.list_reminders(&filter))
                    .await
                    .map_err(load_error)?
                    .into_iter()
                    .next()
            }
            None => None,
        };
        if let Some(reminder) = found.as_mut() {
            take_read_warnings(reminder, summary);
        }

        let (mirror, adoptable) = if link.is_some() {
            (found, None)
        } else {
            let adoptable = found.filter(|r| map.lookup_by_remote(&r.remote_id).is_none());
            (None, adoptable)
        };

        Ok(plan_local(map, task, mirror, adoptable))
    }

    /// Remote list names, or `None` when they could not be fetched
    async fn known_lists(&self, summary: &mut SyncSummary) -> Result<Option<HashSet<String>>> {
        let remote = self.remote.as_ref();
        match self.call("list_names", || remote.list_names()).await {
            Ok(names) => Ok(Some(names.into_iter().collect())),
            Err(failed) if failed.error.is_fatal() => Err(AppError::Collaborator(failed.error)),
            Err(failed) => {
                summary.warn("lists", format!("list names unavailable: {}", failed.error));
                Ok(None)
            }
        }
    }

    /// Call a collaborator with the per-operation timeout, retrying
    /// transient failures with exponential backoff.
    async fn call<T, F, Fut>(&self, operation: &'static str, mut f: F) -> OpResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CollabResult<T>>,
    {
        let timeout = self.options.operation_timeout;
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout(timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.options.max_retries => {
                    let delay = self
                        .options
                        .retry_backoff
                        .saturating_mul(1u32 << attempt.min(16));
                    tracing::warn!(
                        "{} failed (attempt {}): {}; retrying in {:?}",
                        operation,
                        attempt + 1,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(Failed { operation, error }),
            }
        }
    }

    async fn apply(
        &self,
        op: PlannedOp,
        map: &mut IdentityMap,
        ctx: &TranslateContext<'_>,
        local_pass: bool,
        summary: &mut SyncSummary,
    ) -> OpResult<()> {
        let local = self.local.as_ref();
        let remote = self.remote.as_ref();
        let item = op.item();

        match op.action {
            Action::Unlink { link } => {
                tracing::debug!("Both sides gone, dropping link {}", item);
                map.remove_by_local(&link.local_id);
            }

            Action::DeleteRemote { link } => {
                let id = link.remote_id.as_str();
                match self.call("delete_reminder", || remote.delete_reminder(id)).await {
                    Ok(()) => summary.deleted += 1,
                    Err(failed) if failed.is_not_found() => {
                        tracing::debug!("Reminder {} already gone", id)
                    }
                    Err(failed) => return Err(failed),
                }
                map.remove_by_local(&link.local_id);
                tracing::info!("Deleted reminder {} (task {} gone)", id, link.local_id);
            }

            Action::DeleteLocal { link } => {
                let id = link.local_id.as_str();
                match self.call("delete_task", || local.delete_task(id)).await {
                    Ok(()) => summary.deleted += 1,
                    Err(failed) if failed.is_not_found() => {
                        tracing::debug!("Task {} already gone", id)
                    }
                    Err(failed) => return Err(failed),
                }
                map.remove_by_local(id);
                tracing::info!("Deleted task {} (reminder {} gone)", id, link.remote_id);
            }

            Action::Converge {
                link,
                task,
                reminder,
                source,
                complete,
            } => {
                let converged = match source {
                    Side::Local => {
                        self.push_local(&item, &link, task, reminder, complete, ctx, summary)
                            .await
                    }
                    Side::Remote => {
                        self.pull_remote(&item, &link, task, reminder, complete, ctx, summary)
                            .await
                    }
                };

                let (post_task, post_reminder, wrote) = match converged {
                    Ok(result) => result,
                    Err(failed) if failed.is_not_found() => {
                        tracing::info!(
                            "{} vanished during {}; leaving link",
                            item,
                            failed.operation
                        );
                        return Ok(());
                    }
                    Err(failed) => return Err(failed),
                };

                let adopted = map.lookup_by_local(&link.local_id).is_none();
                self.record_link(map, &post_task, &post_reminder);
                if adopted {
                    tracing::info!("Adopted existing pair {}", item);
                    summary.linked.push(LinkedPair {
                        local_id: post_task.local_id.clone(),
                        remote_id: post_reminder.remote_id.clone(),
                    });
                }
                if wrote {
                    if op.category == OpCategory::Completion {
                        summary.completed += 1;
                    } else {
                        summary.updated += 1;
                    }
                }
            }

            Action::CreateRemote { task } => {
                let translated = task_to_reminder(&task.fields(), ctx);
                record_warnings(&item, translated.warnings, summary);
                let fields = translated.value;

                let created = self
                    .call("create_reminder", || remote.create_reminder(&fields))
                    .await?;
                tracing::info!("Created reminder {} for task {}", created.remote_id, task.local_id);
                self.record_link(map, &task, &created);
                summary.created += 1;
                summary.linked.push(LinkedPair {
                    local_id: task.local_id.clone(),
                    remote_id: created.remote_id.clone(),
                });

                if !local_pass {
                    let (task_id, remote_id) = (task.local_id.as_str(), created.remote_id.as_str());
                    match self
                        .call("set_remote_ref", || local.set_remote_ref(task_id, remote_id))
                        .await
                    {
                        Ok(stamped) => self.record_link(map, &stamped, &created),
                        Err(failed) if failed.error.is_fatal() => return Err(failed),
                        Err(failed) => summary.warn(
                            &item,
                            format!("could not stamp reminder id: {}", failed.error),
                        ),
                    }
                }
            }

            Action::CreateLocal { reminder } => {
                let translated = reminder_to_task(&reminder.fields(), ctx);
                record_warnings(&item, translated.warnings, summary);
                let mut fields = translated.value;
                fields.remote_ref = Some(reminder.remote_id.clone());

                let created = self.call("create_task", || local.create_task(&fields)).await?;
                tracing::info!(
                    "Created task {} for reminder {}",
                    created.local_id,
                    reminder.remote_id
                );
                self.record_link(map, &created, &reminder);
                summary.created += 1;
                summary.linked.push(LinkedPair {
                    local_id: created.local_id.clone(),
                    remote_id: reminder.remote_id.clone(),
                });
            }
        }

        Ok(())
    }

    /// Local fields win. Returns the post-write pair and whether anything was written.
    #[allow(clippy::too_many_arguments)]
    async fn push_local(
        &self,
        item: &str,
        link: &SyncLink,
        task: TaskEntity,
        reminder: ReminderEntity,
        complete: bool,
        ctx: &TranslateContext<'_>,
        summary: &mut SyncSummary,
    ) -> OpResult<(TaskEntity, ReminderEntity, bool)> {
        let local = self.local.as_ref();
        let remote = self.remote.as_ref();
        let mut wrote = false;

        let mut fields = task.fields();
        fields.is_done |= complete;
        let translated = task_to_reminder(&fields, ctx);
        record_warnings(item, translated.warnings, summary);
        let target = translated.value;

        let post_reminder = if target == reminder.fields() {
            reminder
        } else {
            let id = link.remote_id.as_str();
            wrote = true;
            self.call("update_reminder", || remote.update_reminder(id, &target))
                .await?
        };

        let post_task = if complete && !task.is_done {
            let id = link.local_id.as_str();
            wrote = true;
            self.call("mark_done", || local.mark_done(id)).await?
        } else {
            task
        };

        Ok((post_task, post_reminder, wrote))
    }

    /// Remote fields win. Returns the post-write pair and whether anything was written.
    #[allow(clippy::too_many_arguments)]
    async fn pull_remote(
        &self,
        item: &str,
        link: &SyncLink,
        task: TaskEntity,
        reminder: ReminderEntity,
        complete: bool,
        ctx: &TranslateContext<'_>,
        summary: &mut SyncSummary,
    ) -> OpResult<(TaskEntity, ReminderEntity, bool)> {
        let local = self.local.as_ref();
        let remote = self.remote.as_ref();
        let mut wrote = false;

        let mut remote_fields = reminder.fields();
        remote_fields.is_done |= complete;
        let translated = reminder_to_task(&remote_fields, ctx);
        record_warnings(item, translated.warnings, summary);
        let mut target = translated.value;
        target.remote_ref = Some(link.remote_id.clone());

        // A project with no remote list was mirrored into the default list
        if target.project != task.project
            && project_lands_in(task.project.as_deref(), &reminder.list_name, ctx)
        {
            target.project = task.project.clone();
        }

        // Completion goes through mark_done so the task manager records it as such
        let finish = target.is_done && !task.is_done;
        if finish {
            target.is_done = false;
        }

        let local_id = link.local_id.as_str();
        let mut post_task = if same_task_content(&target, &task.fields()) {
            task
        } else {
            wrote = true;
            self.call("update_task", || local.update_task(local_id, &target))
                .await?
        };
        if finish {
            wrote = true;
            post_task = self.call("mark_done", || local.mark_done(local_id)).await?;
        }

        let post_reminder = if complete && !reminder.is_done {
            let id = link.remote_id.as_str();
            wrote = true;
            self.call("update_reminder", || remote.update_reminder(id, &remote_fields))
                .await?
        } else {
            reminder
        };

        Ok((post_task, post_reminder, wrote))
    }

    fn record_link(&self, map: &mut IdentityMap, task: &TaskEntity, reminder: &ReminderEntity) {
        let evicted = map.upsert(SyncLink {
            local_id: task.local_id.clone(),
            remote_id: reminder.remote_id.clone(),
            local_fingerprint: task_fingerprint(task),
            remote_fingerprint: reminder_fingerprint(reminder),
            last_synced_at: Utc::now(),
        });
        for old in evicted {
            if old.local_id != task.local_id || old.remote_id != reminder.remote_id {
                tracing::warn!(
                    "Replaced stale link {} <-> {}",
                    old.local_id,
                    old.remote_id
                );
            }
        }
    }
}

fn load_error(failed: Failed) -> AppError {
    tracing::error!("{} failed while loading: {}", failed.operation, failed.error);
    AppError::Collaborator(failed.error)
}

/// Entities whose adapter dropped or clamped fields while reading them
trait ReadWarnings {
    fn item(&self) -> String;
    fn warnings_mut(&mut self) -> &mut Vec<TranslationWarning>;
}

impl ReadWarnings for TaskEntity {
    fn item(&self) -> String {
        format!("task {}", self.local_id)
    }

    fn warnings_mut(&mut self) -> &mut Vec<TranslationWarning> {
        &mut self.read_warnings
    }
}

impl ReadWarnings for ReminderEntity {
    fn item(&self) -> String {
        format!("reminder {}", self.remote_id)
    }

    fn warnings_mut(&mut self) -> &mut Vec<TranslationWarning> {
        &mut self.read_warnings
    }
}

fn take_read_warnings(entity: &mut impl ReadWarnings, summary: &mut SyncSummary) {
    let warnings = std::mem::take(entity.warnings_mut());
    if !warnings.is_empty() {
        let item = entity.item();
        record_warnings(&item, warnings, summary);
    }
}

fn record_warnings(item: &str, warnings: Vec<TranslationWarning>, summary: &mut SyncSummary) {
    for warning in warnings {
        summary.warn(item, warning);
    }
}

/// List names decide where a task's project lands, in either direction
fn needs_list_names(plan: &Plan) -> bool {
    plan.ops.iter().any(|op| {
        matches!(op.action, Action::CreateRemote { .. } | Action::Converge { .. })
    })
}

/// Equal ignoring the stamped mirror id
fn same_task_content(a: &TaskFields, b: &TaskFields) -> bool {
    let strip = |f: &TaskFields| TaskFields {
        remote_ref: None,
        ..f.clone()
    };
    strip(a) == strip(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MemoryReminderStore, MemoryTaskStore};
    use crate::sync::models::Priority;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        tasks: Arc<MemoryTaskStore>,
        reminders: Arc<MemoryReminderStore>,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let tasks = Arc::new(MemoryTaskStore::new());
        let reminders = Arc::new(MemoryReminderStore::new());
        let options = ReconcilerOptions {
            operation_timeout: Duration::from_millis(200),
            max_retries: 2,
            retry_backoff: Duration::from_millis(1),
            lock_wait: Duration::from_millis(200),
            default_list: "Reminders".into(),
        };
        let reconciler = Reconciler::new(
            tasks.clone(),
            reminders.clone(),
            IdentityMapStore::new(dir.path().join("sync_state.json")),
            dir.path().join("locations.json"),
            options,
        );
        Harness {
            _dir: dir,
            tasks,
            reminders,
            reconciler,
        }
    }

    fn task_fields(title: &str) -> TaskFields {
        TaskFields {
            title: title.into(),
            notes: String::new(),
            priority: Priority::None,
            due_at: None,
            is_done: false,
            project: None,
            location_ref: None,
            remote_ref: None,
        }
    }

    #[tokio::test]
    async fn test_new_task_gets_mirror_and_stamp() {
        let h = harness();
        let task = h.tasks.insert_external(task_fields("Buy milk"));

        let summary = h.reconciler.run_sync_pass(Trigger::Remote).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.exit_code(), 0);

        let reminders = h.reminders.all();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].title, "Buy milk");
        assert_eq!(
            h.tasks.get(&task.local_id).unwrap().remote_ref.as_deref(),
            Some(reminders[0].remote_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let h = harness();
        h.tasks.insert_external(task_fields("A"));
        h.reconciler.run_sync_pass(Trigger::Remote).await.unwrap();

        let task_writes = h.tasks.writes();
        let reminder_writes = h.reminders.writes();
        let summary = h.reconciler.run_sync_pass(Trigger::Remote).await.unwrap();

        assert_eq!(summary.changes(), 0);
        assert_eq!(h.tasks.writes(), task_writes);
        assert_eq!(h.reminders.writes(), reminder_writes);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let h = harness();
        h.tasks.insert_external(task_fields("A"));
        h.reminders
            .fail_next("create_reminder", CollaboratorError::Transient("busy".into()), 2);

        let summary = h.reconciler.run_sync_pass(Trigger::Remote).await.unwrap();
        assert_eq!(summary.created, 1);
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_item_error() {
        let h = harness();
        h.tasks.insert_external(task_fields("A"));
        h.reminders
            .fail_next("create_reminder", CollaboratorError::Transient("busy".into()), 3);

        let summary = h.reconciler.run_sync_pass(Trigger::Remote).await.unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].operation, "create_reminder");
        assert_eq!(summary.exit_code(), 1);

        // Nothing linked, so the next pass tries again
        let summary = h.reconciler.run_sync_pass(Trigger::Remote).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(h.reminders.all().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_collaborator_times_out() {
        let h = harness();
        h.tasks.insert_external(task_fields("A"));
        h.reconciler.run_sync_pass(Trigger::Remote).await.unwrap();

        h.reminders.set_delay(Some(Duration::from_secs(5)));
        let err = h.reconciler.run_sync_pass(Trigger::Remote).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Collaborator(CollaboratorError::Timeout(_))
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fatal_error_persists_nothing() {
        let h = harness();
        h.tasks.insert_external(task_fields("A"));
        h.tasks.insert_external(task_fields("B"));
        h.reminders.fail_next(
            "create_reminder",
            CollaboratorError::Unauthorized("revoked".into()),
            1,
        );

        let err = h.reconciler.run_sync_pass(Trigger::Remote).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(!h.reconciler.store().path().exists());
    }
}
