//! Pass planning
//!
//! Turns classified snapshots into an ordered list of operations. Planning
//! is pure; the reconciler executes the result.

use super::classifier::{classify, ChangeKind};
use super::models::{Fingerprint, ReminderEntity, Side, SyncLink, TaskEntity};
use crate::storage::IdentityMap;
use chrono::Utc;
use std::collections::{HashMap, HashSet};

/// Execution order of a pass: deletions, completions, updates, creations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OpCategory {
    Deletion,
    Completion,
    Update,
    Creation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Both sides are gone; forget the link
    Unlink { link: SyncLink },
    /// The task is gone; delete its mirror
    DeleteRemote { link: SyncLink },
    /// The reminder is gone; delete its mirror
    DeleteLocal { link: SyncLink },
    /// Bring both sides to the state of `source`, completed if `complete`
    Converge {
        link: SyncLink,
        task: TaskEntity,
        reminder: ReminderEntity,
        source: Side,
        complete: bool,
    },
    CreateRemote { task: TaskEntity },
    CreateLocal { reminder: ReminderEntity },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOp {
    pub category: OpCategory,
    pub action: Action,
}

impl PlannedOp {
    fn new(category: OpCategory, action: Action) -> Self {
        Self { category, action }
    }

    /// Identifier used in logs and item errors
    pub fn item(&self) -> String {
        match &self.action {
            Action::Unlink { link }
            | Action::DeleteRemote { link }
            | Action::DeleteLocal { link }
            | Action::Converge { link, .. } => {
                format!("{} <-> {}", link.local_id, link.remote_id)
            }
            Action::CreateRemote { task } => format!("task {}", task.local_id),
            Action::CreateLocal { reminder } => format!("reminder {}", reminder.remote_id),
        }
    }
}

/// A pair that cannot be handled in the current pass
#[derive(Debug, Clone, PartialEq)]
pub struct Deferral {
    pub item: String,
    pub reason: &'static str,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub ops: Vec<PlannedOp>,
    pub deferred: Vec<Deferral>,
}

impl Plan {
    fn push(&mut self, category: OpCategory, action: Action) {
        self.ops.push(PlannedOp::new(category, action));
    }

    fn finish(mut self) -> Self {
        self.ops.sort_by_key(|op| op.category);
        self
    }
}

/// Decide the direction for a linked pair whose sides both exist.
///
/// Returns the side whose fields win and whether the result is completed,
/// or `None` when nothing needs to happen.
pub fn resolve_pair(
    local: ChangeKind,
    remote: ChangeKind,
    task: &TaskEntity,
    reminder: &ReminderEntity,
) -> Option<(Side, bool)> {
    let completed = local == ChangeKind::Completed || remote == ChangeKind::Completed;
    match (local.is_change(), remote.is_change()) {
        (false, false) => None,
        (true, false) => Some((Side::Local, completed)),
        (false, true) => Some((Side::Remote, completed)),
        (true, true) => {
            let source = if task.last_modified >= reminder.last_modified {
                Side::Local
            } else {
                Side::Remote
            };
            Some((source, completed))
        }
    }
}

fn converge_category(
    task: &TaskEntity,
    reminder: &ReminderEntity,
    complete: bool,
    source: Side,
) -> OpCategory {
    let final_done = complete
        || match source {
            Side::Local => task.is_done,
            Side::Remote => reminder.is_done,
        };
    if final_done && !(task.is_done && reminder.is_done) {
        OpCategory::Completion
    } else {
        OpCategory::Update
    }
}

fn converge(
    plan: &mut Plan,
    link: SyncLink,
    task: TaskEntity,
    reminder: ReminderEntity,
    source: Side,
    complete: bool,
) {
    let category = converge_category(&task, &reminder, complete, source);
    plan.push(
        category,
        Action::Converge {
            link,
            task,
            reminder,
            source,
            complete,
        },
    );
}

/// Link for a task that already carries the id of an unlinked reminder
fn adoption_link(task: &TaskEntity, reminder: &ReminderEntity) -> SyncLink {
    SyncLink {
        local_id: task.local_id.clone(),
        remote_id: reminder.remote_id.clone(),
        local_fingerprint: Fingerprint::unknown(),
        remote_fingerprint: Fingerprint::unknown(),
        last_synced_at: Utc::now(),
    }
}

fn adoption_source(task: &TaskEntity, reminder: &ReminderEntity) -> Side {
    if task.last_modified >= reminder.last_modified {
        Side::Local
    } else {
        Side::Remote
    }
}

/// Plan a full pass over complete snapshots of both sides
pub fn plan_full(
    map: &IdentityMap,
    tasks: Vec<TaskEntity>,
    reminders: Vec<ReminderEntity>,
) -> Plan {
    let mut plan = Plan::default();

    let mut tasks: HashMap<String, TaskEntity> =
        tasks.into_iter().map(|t| (t.local_id.clone(), t)).collect();
    let mut reminders: HashMap<String, ReminderEntity> =
        reminders.into_iter().map(|r| (r.remote_id.clone(), r)).collect();

    // Linked pairs
    for link in map.links() {
        let task = tasks.remove(&link.local_id);
        let reminder = reminders.remove(&link.remote_id);
        let local = classify(task.as_ref(), Some(link));
        let remote = classify(reminder.as_ref(), Some(link));

        match (task, reminder) {
            (None, None) => plan.push(OpCategory::Deletion, Action::Unlink { link: link.clone() }),
            (None, Some(_)) => {
                plan.push(OpCategory::Deletion, Action::DeleteRemote { link: link.clone() })
            }
            (Some(_), None) => {
                plan.push(OpCategory::Deletion, Action::DeleteLocal { link: link.clone() })
            }
            (Some(task), Some(reminder)) => {
                if let Some((source, complete)) = resolve_pair(local, remote, &task, &reminder) {
                    converge(&mut plan, link.clone(), task, reminder, source, complete);
                }
            }
        }
    }

    // Unlinked tasks: adopt an existing mirror or create one
    let mut adopted: HashSet<String> = HashSet::new();
    let mut new_tasks: Vec<TaskEntity> = tasks.into_values().collect();
    new_tasks.sort_by(|a, b| a.local_id.cmp(&b.local_id));
    for task in new_tasks {
        let mirror = task
            .remote_ref
            .as_ref()
            .filter(|id| !adopted.contains(*id))
            .and_then(|id| reminders.get(id));

        if let Some(reminder) = mirror {
            let reminder = reminder.clone();
            adopted.insert(reminder.remote_id.clone());
            let link = adoption_link(&task, &reminder);
            let source = adoption_source(&task, &reminder);
            plan.push(
                OpCategory::Creation,
                Action::Converge {
                    link,
                    task,
                    reminder,
                    source,
                    complete: false,
                },
            );
        } else if task.is_done {
            tracing::debug!("Skipping completed unsynced task {}", task.local_id);
        } else {
            plan.push(OpCategory::Creation, Action::CreateRemote { task });
        }
    }

    // Unlinked reminders
    let mut new_reminders: Vec<ReminderEntity> = reminders
        .into_values()
        .filter(|r| !adopted.contains(&r.remote_id))
        .collect();
    new_reminders.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
    for reminder in new_reminders {
        if reminder.is_done {
            tracing::debug!("Skipping completed unsynced reminder {}", reminder.remote_id);
        } else {
            plan.push(OpCategory::Creation, Action::CreateLocal { reminder });
        }
    }

    plan.finish()
}

/// Plan a pass for one hook-delivered task.
///
/// `mirror` is the linked reminder as currently listed, or `None` when the
/// task is unlinked or the reminder no longer exists. The local side cannot
/// be written during a hook, so anything that needs a local write is
/// deferred.
pub fn plan_local(
    map: &IdentityMap,
    task: TaskEntity,
    mirror: Option<ReminderEntity>,
    adoptable: Option<ReminderEntity>,
) -> Plan {
    let mut plan = Plan::default();
    let link = map.lookup_by_local(&task.local_id).cloned();

    let Some(link) = link else {
        if task.is_deleted || task.is_done {
            tracing::debug!("Nothing to sync for unlinked task {}", task.local_id);
            return plan;
        }
        match adoptable {
            Some(reminder) => {
                let link = adoption_link(&task, &reminder);
                plan.push(
                    OpCategory::Creation,
                    Action::Converge {
                        link,
                        task,
                        reminder,
                        source: Side::Local,
                        complete: false,
                    },
                );
            }
            None => plan.push(OpCategory::Creation, Action::CreateRemote { task }),
        }
        return plan.finish();
    };

    if task.is_deleted {
        match mirror {
            Some(_) => plan.push(OpCategory::Deletion, Action::DeleteRemote { link }),
            None => plan.push(OpCategory::Deletion, Action::Unlink { link }),
        }
        return plan.finish();
    }

    let local = classify(Some(&task), Some(&link));
    let remote = classify(mirror.as_ref(), Some(&link));

    match (mirror, remote) {
        (None, _) => plan.deferred.push(Deferral {
            item: task.local_id.clone(),
            reason: "mirror reminder no longer exists",
        }),
        (Some(_), remote) if remote.is_change() => plan.deferred.push(Deferral {
            item: task.local_id.clone(),
            reason: "reminder changed concurrently",
        }),
        (Some(reminder), _) => {
            if local.is_change() {
                let complete = local == ChangeKind::Completed;
                converge(&mut plan, link, task, reminder, Side::Local, complete);
            }
        }
    }

    plan.finish()
}
