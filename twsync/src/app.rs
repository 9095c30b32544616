//! Application state and initialization
//!
//! Resolves the data directory and settings once per process and builds the
//! collaborators and the reconciler from them.

use crate::collaborators::{LocalStore, ReminderBridge, RemoteStore, TaskwarriorCli};
use crate::config;
use crate::error::Result;
use crate::services::{ListenerOptions, SettingsService, SyncSettings};
use crate::storage::{IdentityMapStore, StateLock};
use crate::sync::Reconciler;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Central application state
#[derive(Debug, Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub settings: SyncSettings,
    pub state_path: PathBuf,
    pub locations_path: PathBuf,
}

/// Output of `twsync status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub data_dir: PathBuf,
    pub state_path: PathBuf,
    pub locations_path: PathBuf,
    pub links: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub default_list: String,
}

impl AppState {
    /// Create the data directory if needed and load settings from it
    pub async fn initialize(data_dir: PathBuf) -> Result<Self> {
        tracing::debug!("Data directory: {:?}", data_dir);
        tokio::fs::create_dir_all(&data_dir).await?;

        let settings = SettingsService::new(data_dir.clone()).load().await?;
        Ok(Self::with_settings(data_dir, settings))
    }

    pub fn with_settings(data_dir: PathBuf, settings: SyncSettings) -> Self {
        let state_path = settings
            .state_path
            .clone()
            .unwrap_or_else(|| data_dir.join(config::SYNC_STATE_FILE));
        let locations_path = settings
            .locations_path
            .clone()
            .unwrap_or_else(|| data_dir.join(config::LOCATIONS_FILE));
        Self {
            data_dir,
            settings,
            state_path,
            locations_path,
        }
    }

    pub fn task_store(&self) -> Arc<dyn LocalStore> {
        Arc::new(TaskwarriorCli::new(
            self.settings.task_binary.clone(),
            self.settings.task_data_location.clone(),
        ))
    }

    pub fn reminder_store(&self) -> Arc<dyn RemoteStore> {
        Arc::new(ReminderBridge::new(
            self.settings.bridge_binary.clone(),
            self.settings.default_list.clone(),
        ))
    }

    pub fn reconciler(
        &self,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Reconciler {
        Reconciler::new(
            local,
            remote,
            IdentityMapStore::new(self.state_path.clone()),
            self.locations_path.clone(),
            self.settings.reconciler_options(),
        )
    }

    pub fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            max_consecutive_fatal: self.settings.max_consecutive_fatal,
            ..ListenerOptions::default()
        }
    }

    /// Read the identity map under the state lock
    pub async fn status(&self) -> Result<StatusReport> {
        let wait = Duration::from_millis(self.settings.lock_wait_ms);
        let _lock = StateLock::acquire(&self.state_path, wait).await?;
        let map = IdentityMapStore::new(self.state_path.clone()).load().await?;

        Ok(StatusReport {
            data_dir: self.data_dir.clone(),
            state_path: self.state_path.clone(),
            locations_path: self.locations_path.clone(),
            links: map.len(),
            last_sync: map.last_sync(),
            default_list: self.settings.default_list.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_initialize_creates_dir_and_default_paths() {
        let temp = TempDir::new().unwrap();
        let data_dir = temp.path().join("tw-reminders");

        let state = AppState::initialize(data_dir.clone()).await.unwrap();
        assert!(data_dir.join("settings.json").exists());
        assert_eq!(state.state_path, data_dir.join("sync_state.json"));
        assert_eq!(state.locations_path, data_dir.join("locations.json"));
    }

    #[tokio::test]
    async fn test_settings_override_paths() {
        let temp = TempDir::new().unwrap();
        let settings = SyncSettings {
            state_path: Some(temp.path().join("elsewhere.json")),
            ..SyncSettings::default()
        };

        let state = AppState::with_settings(temp.path().to_path_buf(), settings);
        assert_eq!(state.state_path, temp.path().join("elsewhere.json"));

        let report = state.status().await.unwrap();
        assert_eq!(report.links, 0);
        assert!(report.last_sync.is_none());
    }
}
