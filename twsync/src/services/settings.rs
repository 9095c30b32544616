//! Settings service
//!
//! Manages twsync settings persistence using JSON file storage. Missing
//! fields take their defaults; out-of-range values are clamped on load.

use crate::config;
use crate::error::{AppError, Result};
use crate::sync::ReconcilerOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// Sync settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Remote list used for tasks without a project
    #[serde(default = "default_list")]
    pub default_list: String,
    /// Taskwarrior executable
    #[serde(default = "default_task_binary")]
    pub task_binary: PathBuf,
    /// Overrides Taskwarrior's data.location
    #[serde(default)]
    pub task_data_location: Option<PathBuf>,
    /// Reminders bridge executable
    #[serde(default = "default_bridge_binary")]
    pub bridge_binary: PathBuf,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
    /// Listener gives up after this many fatal passes in a row
    #[serde(default = "default_max_consecutive_fatal")]
    pub max_consecutive_fatal: u32,
    /// Overrides `<data dir>/sync_state.json`
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    /// Overrides `<data dir>/locations.json`
    #[serde(default)]
    pub locations_path: Option<PathBuf>,
}

fn default_list() -> String {
    config::DEFAULT_LIST.to_string()
}

fn default_task_binary() -> PathBuf {
    PathBuf::from("task")
}

fn default_bridge_binary() -> PathBuf {
    PathBuf::from("reminders-bridge")
}

fn default_operation_timeout_ms() -> u64 {
    config::DEFAULT_OPERATION_TIMEOUT_MS
}

fn default_max_retries() -> u32 {
    config::DEFAULT_MAX_RETRIES
}

fn default_retry_backoff_ms() -> u64 {
    config::DEFAULT_RETRY_BACKOFF_MS
}

fn default_lock_wait_ms() -> u64 {
    config::DEFAULT_LOCK_WAIT_MS
}

fn default_max_consecutive_fatal() -> u32 {
    config::DEFAULT_MAX_CONSECUTIVE_FATAL
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_list: default_list(),
            task_binary: default_task_binary(),
            task_data_location: None,
            bridge_binary: default_bridge_binary(),
            operation_timeout_ms: default_operation_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            lock_wait_ms: default_lock_wait_ms(),
            max_consecutive_fatal: default_max_consecutive_fatal(),
            state_path: None,
            locations_path: None,
        }
    }
}

impl SyncSettings {
    /// Bring every value into its allowed range
    pub fn clamped(mut self) -> Self {
        self.operation_timeout_ms = self.operation_timeout_ms.clamp(
            config::MIN_OPERATION_TIMEOUT_MS,
            config::MAX_OPERATION_TIMEOUT_MS,
        );
        self.max_retries = self.max_retries.min(config::MAX_RETRIES_LIMIT);
        self.retry_backoff_ms = self.retry_backoff_ms.min(config::MAX_RETRY_BACKOFF_MS);
        self.lock_wait_ms = self.lock_wait_ms.min(config::MAX_LOCK_WAIT_MS);
        self.max_consecutive_fatal = self.max_consecutive_fatal.max(1);

        let list = self.default_list.trim();
        self.default_list = if list.is_empty() {
            default_list()
        } else {
            list.to_string()
        };
        self
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            lock_wait: Duration::from_millis(self.lock_wait_ms),
            default_list: self.default_list.clone(),
        }
    }
}

/// Service for managing twsync settings
#[derive(Clone)]
pub struct SettingsService {
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            settings_path: data_dir.join(config::SETTINGS_FILE),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.settings_path
    }

    /// Load settings from disk or create default if not exists
    pub async fn load(&self) -> Result<SyncSettings> {
        if !self.settings_path.exists() {
            tracing::info!("Settings file not found, creating default settings");
            let default = SyncSettings::default();
            self.save(&default).await?;
            return Ok(default);
        }

        let content = fs::read_to_string(&self.settings_path).await?;
        let settings: SyncSettings = serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse settings: {}", e)))?;

        let clamped = settings.clone().clamped();
        if clamped != settings {
            tracing::warn!("Some settings were out of range and have been clamped");
        }
        Ok(clamped)
    }

    /// Save settings to disk
    pub async fn save(&self, settings: &SyncSettings) -> Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(settings)?;

        fs::write(&self.settings_path, content).await?;
        tracing::info!("Settings saved to {:?}", self.settings_path);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_service() -> (SettingsService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let service = SettingsService::new(temp_dir.path().to_path_buf());
        (service, temp_dir)
    }

    #[tokio::test]
    async fn test_default_settings_created_on_load() {
        let (service, _temp) = create_test_service();

        let settings = service.load().await.unwrap();

        assert_eq!(settings.default_list, "Reminders");
        assert_eq!(settings.task_binary, PathBuf::from("task"));
        assert_eq!(settings.operation_timeout_ms, 10_000);
        assert_eq!(settings.max_retries, 3);
        assert!(service.path().exists());
    }

    #[tokio::test]
    async fn test_missing_fields_take_defaults() {
        let (service, _temp) = create_test_service();
        fs::write(service.path(), r#"{"default_list": "Inbox"}"#)
            .await
            .unwrap();

        let settings = service.load().await.unwrap();
        assert_eq!(settings.default_list, "Inbox");
        assert_eq!(settings.retry_backoff_ms, 200);
        assert_eq!(settings.max_consecutive_fatal, 5);
    }

    #[tokio::test]
    async fn test_out_of_range_values_are_clamped() {
        let (service, _temp) = create_test_service();
        fs::write(
            service.path(),
            r#"{"operation_timeout_ms": 1, "max_retries": 99, "default_list": "  "}"#,
        )
        .await
        .unwrap();

        let settings = service.load().await.unwrap();
        assert_eq!(settings.operation_timeout_ms, 100);
        assert_eq!(settings.max_retries, 10);
        assert_eq!(settings.default_list, "Reminders");
    }

    #[tokio::test]
    async fn test_settings_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().to_path_buf();

        {
            let service = SettingsService::new(data_dir.clone());
            let settings = SyncSettings {
                bridge_binary: PathBuf::from("/opt/bridge"),
                lock_wait_ms: 2_000,
                ..SyncSettings::default()
            };
            service.save(&settings).await.unwrap();
        }

        {
            let service = SettingsService::new(data_dir);
            let loaded = service.load().await.unwrap();
            assert_eq!(loaded.bridge_binary, PathBuf::from("/opt/bridge"));
            assert_eq!(loaded.reconciler_options().lock_wait, Duration::from_secs(2));
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_config_error() {
        let (service, _temp) = create_test_service();
        fs::write(service.path(), "{ not json").await.unwrap();

        let err = service.load().await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
