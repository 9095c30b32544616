//! Taskwarrior hook handling
//!
//! Taskwarrior runs `on-add` with the new task on stdin and `on-modify`
//! with the original and modified task on two lines. The hook must print
//! the (possibly amended) task JSON as its first output line and exit 0,
//! otherwise Taskwarrior rejects the change. Anything after the JSON is
//! shown to the user as feedback.

use crate::collaborators::taskwarrior::task_from_json;
use crate::sync::{Reconciler, SyncSummary, Trigger};
use serde_json::Value;

/// Attribute that carries the mirror id on a task
pub const REMINDER_ID_ATTR: &str = "reminder_id";

/// What the hook prints
#[derive(Debug, Clone, PartialEq)]
pub struct HookOutput {
    /// Task JSON for Taskwarrior
    pub task_json: String,
    /// Lines shown to the user after the task JSON
    pub feedback: Vec<String>,
}

impl HookOutput {
    fn echo(task_json: &str, feedback: Vec<String>) -> Self {
        Self {
            task_json: task_json.trim().to_string(),
            feedback,
        }
    }

    /// Text to write to stdout
    pub fn render(&self) -> String {
        let mut out = self.task_json.clone();
        out.push('\n');
        for line in &self.feedback {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

pub struct HookService<'a> {
    reconciler: &'a Reconciler,
}

impl<'a> HookService<'a> {
    pub fn new(reconciler: &'a Reconciler) -> Self {
        Self { reconciler }
    }

    /// Handle `on-add`: `input` holds the new task on its first line
    pub async fn on_add(&self, input: &str) -> HookOutput {
        let Some(line) = input.lines().find(|l| !l.trim().is_empty()) else {
            return HookOutput::echo("", vec!["twsync: no task on stdin".to_string()]);
        };

        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return HookOutput::echo(line, vec!["twsync: could not parse task JSON".to_string()]);
        };

        // Created by a sync pass, or imported with its mirror id
        if has_reminder_id(&value) {
            tracing::debug!("on-add: task already carries a reminder id");
            return HookOutput::echo(line, Vec::new());
        }

        self.sync_task(line, value).await
    }

    /// Handle `on-modify`: `input` holds the original and the modified task
    pub async fn on_modify(&self, input: &str) -> HookOutput {
        let mut lines = input.lines().filter(|l| !l.trim().is_empty());
        let original = lines.next();
        let Some(modified) = lines.next().or(original) else {
            return HookOutput::echo("", vec!["twsync: no task on stdin".to_string()]);
        };

        let Ok(value) = serde_json::from_str::<Value>(modified) else {
            return HookOutput::echo(
                modified,
                vec!["twsync: could not parse task JSON".to_string()],
            );
        };

        self.sync_task(modified, value).await
    }

    async fn sync_task(&self, line: &str, mut value: Value) -> HookOutput {
        let task = match task_from_json(&value) {
            Ok(task) => task,
            Err(e) => return HookOutput::echo(line, vec![format!("twsync: {}", e)]),
        };
        let local_id = task.local_id.clone();

        match self.reconciler.run_sync_pass(Trigger::Local(task)).await {
            Ok(summary) => {
                let mut amended = false;
                if let Some(pair) = summary.linked.iter().find(|p| p.local_id == local_id) {
                    if let Some(obj) = value.as_object_mut() {
                        obj.insert(
                            REMINDER_ID_ATTR.to_string(),
                            Value::String(pair.remote_id.clone()),
                        );
                        amended = true;
                    }
                }

                let feedback = feedback_lines(&summary);
                if amended {
                    match serde_json::to_string(&value) {
                        Ok(json) => HookOutput {
                            task_json: json,
                            feedback,
                        },
                        Err(e) => {
                            tracing::error!("Failed to serialize hook task: {}", e);
                            HookOutput::echo(line, feedback)
                        }
                    }
                } else {
                    HookOutput::echo(line, feedback)
                }
            }
            Err(e) => {
                tracing::error!("Hook sync pass failed: {}", e);
                HookOutput::echo(line, vec![format!("twsync: sync skipped: {}", e)])
            }
        }
    }
}

fn has_reminder_id(value: &Value) -> bool {
    value
        .get(REMINDER_ID_ATTR)
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty())
}

fn feedback_lines(summary: &SyncSummary) -> Vec<String> {
    let mut lines: Vec<String> = summary
        .errors
        .iter()
        .map(|e| format!("twsync: {} failed for {}: {}", e.operation, e.item, e.message))
        .collect();
    lines.extend(summary.warnings.iter().map(|w| format!("twsync: warning: {}", w)));
    lines.extend(summary.deferred.iter().map(|d| format!("twsync: deferred {}", d)));
    lines
}
