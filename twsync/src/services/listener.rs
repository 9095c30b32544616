//! Change listener
//!
//! Long-lived loop behind `twsync listen`. Runs a full pass at startup and
//! one per change notification. Notifications that arrive while a pass is
//! running are coalesced into a single follow-up pass.

use crate::collaborators::{RemoteStore, Subscription};
use crate::config;
use crate::error::{AppError, Result};
use crate::sync::{Reconciler, Trigger};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Exit after this many fatal passes in a row
    pub max_consecutive_fatal: u32,
    /// Delay before retrying a pass that failed
    pub retry_delay: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            max_consecutive_fatal: config::DEFAULT_MAX_CONSECUTIVE_FATAL,
            retry_delay: Duration::from_millis(config::CONTENTION_RETRY_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub passes: usize,
    pub failed_passes: usize,
}

pub struct Listener {
    reconciler: Arc<Reconciler>,
    remote: Arc<dyn RemoteStore>,
    options: ListenerOptions,
}

impl Listener {
    pub fn new(
        reconciler: Arc<Reconciler>,
        remote: Arc<dyn RemoteStore>,
        options: ListenerOptions,
    ) -> Self {
        Self {
            reconciler,
            remote,
            options,
        }
    }

    /// Run until `shutdown` resolves or too many fatal passes happen in a row
    pub async fn run<F>(&self, shutdown: F) -> Result<ListenerStats>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut subscription = self.subscribe().await?;
        let mut stats = ListenerStats::default();
        let mut consecutive_fatal: u32 = 0;
        let mut retry_at: Option<Instant> = None;

        tracing::info!("Listening for reminder changes");

        loop {
            match self.reconciler.run_sync_pass(Trigger::Remote).await {
                Ok(summary) => {
                    stats.passes += 1;
                    consecutive_fatal = 0;
                    retry_at = None;
                    if !summary.is_success() {
                        tracing::warn!(
                            "Pass finished with {} item error(s)",
                            summary.errors.len()
                        );
                    }
                }
                Err(e) => {
                    stats.failed_passes += 1;
                    if e.is_fatal() {
                        consecutive_fatal += 1;
                        tracing::error!(
                            "Sync pass failed ({}/{}): {}",
                            consecutive_fatal,
                            self.options.max_consecutive_fatal,
                            e
                        );
                        if consecutive_fatal >= self.options.max_consecutive_fatal {
                            return Err(e);
                        }
                    } else if matches!(e, AppError::LockContention { .. }) {
                        tracing::info!("State is locked by another pass, retrying shortly");
                    } else {
                        tracing::warn!("Sync pass failed, retrying shortly: {}", e);
                    }
                    retry_at = Some(Instant::now() + self.options.retry_delay);
                }
            }

            let coalesced = subscription.drain();
            if coalesced > 0 {
                tracing::debug!("Coalesced {} notification(s) into one pass", coalesced);
                continue;
            }

            let deadline = retry_at;
            let retry = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Listener shutting down");
                    subscription.cancel();
                    return Ok(stats);
                }
                token = subscription.next() => {
                    if token.is_none() {
                        tracing::warn!("Change subscription ended, resubscribing");
                        subscription = self.subscribe().await?;
                    }
                }
                _ = retry => retry_at = None,
            }
        }
    }

    async fn subscribe(&self) -> Result<Subscription> {
        Ok(self.remote.subscribe().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MemoryReminderStore, MemoryTaskStore};
    use crate::error::CollaboratorError;
    use crate::storage::{IdentityMapStore, StateLock};
    use crate::sync::models::{Priority, ReminderFields, TaskFields};
    use crate::sync::ReconcilerOptions;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    struct Setup {
        dir: TempDir,
        tasks: Arc<MemoryTaskStore>,
        reminders: Arc<MemoryReminderStore>,
        reconciler: Arc<Reconciler>,
    }

    fn setup() -> Setup {
        let dir = TempDir::new().unwrap();
        let tasks = Arc::new(MemoryTaskStore::new());
        let reminders = Arc::new(MemoryReminderStore::new());
        let options = ReconcilerOptions {
            retry_backoff: Duration::from_millis(1),
            lock_wait: Duration::from_millis(20),
            ..ReconcilerOptions::default()
        };
        let reconciler = Arc::new(Reconciler::new(
            tasks.clone(),
            reminders.clone(),
            IdentityMapStore::new(dir.path().join("sync_state.json")),
            dir.path().join("locations.json"),
            options,
        ));
        Setup {
            dir,
            tasks,
            reminders,
            reconciler,
        }
    }

    fn listener(s: &Setup, max_consecutive_fatal: u32) -> Listener {
        Listener::new(
            s.reconciler.clone(),
            s.reminders.clone(),
            ListenerOptions {
                max_consecutive_fatal,
                retry_delay: Duration::from_millis(30),
            },
        )
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
    async fn test_notifications_during_a_pass_coalesce() {
        let s = setup();
        for title in ["A", "B", "C"] {
            s.tasks.insert_external(task_fields(title));
        }

        let (tx, rx) = oneshot::channel::<()>();
        let l = listener(&s, 3);
        let handle = tokio::spawn(async move {
            l.run(async {
                let _ = rx.await;
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(()).unwrap();
        let stats = handle.await.unwrap().unwrap();

        // Startup pass creates three mirrors (three notifications), then one follow-up
        assert_eq!(s.reminders.all().len(), 3);
        assert_eq!(stats.passes, 2);
    }

    #[tokio::test]
    async fn test_remote_change_triggers_pass() {
        let s = setup();
        let (tx, rx) = oneshot::channel::<()>();
        let l = listener(&s, 3);
        let handle = tokio::spawn(async move {
            l.run(async {
                let _ = rx.await;
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        s.reminders.insert_external(ReminderFields {
            title: "Call mom".into(),
            notes: String::new(),
            priority: 0,
            due_at: None,
            is_done: false,
            list_name: "Reminders".into(),
            geofence: None,
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let tasks = s.tasks.all();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Call mom");
    }

    #[tokio::test]
    async fn test_exits_after_consecutive_fatal_passes() {
        let s = setup();
        s.reminders.fail_next(
            "list_reminders",
            CollaboratorError::Unauthorized("access revoked".into()),
            10,
        );

        let err = listener(&s, 3)
            .run(std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Collaborator(CollaboratorError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_contention_is_retried_not_fatal() {
        let s = setup();
        s.tasks.insert_external(task_fields("A"));
        let held = StateLock::acquire(&s.dir.path().join("sync_state.json"), Duration::ZERO)
            .await
            .unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let l = listener(&s, 1);
        let handle = tokio::spawn(async move {
            l.run(async {
                let _ = rx.await;
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(held);
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(()).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert!(stats.failed_passes >= 1);
        assert!(stats.passes >= 1);
        assert_eq!(s.reminders.all().len(), 1);
    }
}
