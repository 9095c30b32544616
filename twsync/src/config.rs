//! Application configuration constants
//!
//! Central location for all configuration constants, resource limits,
//! and validation boundaries used throughout the application.

use std::path::PathBuf;

// ===== Files and Directories =====

/// Directory name under the platform data dir (`~/.local/share` on Linux)
pub const DATA_DIR_NAME: &str = "tw-reminders";

/// Identity map file name inside the data dir
pub const SYNC_STATE_FILE: &str = "sync_state.json";

/// Location shortcut table file name inside the data dir
pub const LOCATIONS_FILE: &str = "locations.json";

/// Settings file name inside the data dir
pub const SETTINGS_FILE: &str = "settings.json";

/// Environment variable overriding the data dir
pub const DATA_DIR_ENV: &str = "TWSYNC_DATA_DIR";

// ===== Translation Defaults =====

/// Remote list used when a task has no project or its list does not exist
pub const DEFAULT_LIST: &str = "Reminders";

/// Geofence radius in meters when neither the task nor the shortcut sets one
pub const DEFAULT_GEOFENCE_RADIUS_M: f64 = 100.0;

// ===== Collaborator Calls =====

/// Default timeout for a single collaborator call
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 10_000;

/// Below this a healthy call to the bridge binary cannot finish
pub const MIN_OPERATION_TIMEOUT_MS: u64 = 100;

/// Two minutes. A call slower than this is treated as hung.
pub const MAX_OPERATION_TIMEOUT_MS: u64 = 120_000;

/// Default number of retries after the first attempt of a transient failure
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound on retries per operation
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Base delay between retries, doubled on each attempt
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

/// Upper bound on the base retry delay
pub const MAX_RETRY_BACKOFF_MS: u64 = 10_000;

// ===== Locking =====

/// Default bounded wait for the identity map lock
pub const DEFAULT_LOCK_WAIT_MS: u64 = 10_000;

/// Upper bound on the lock wait (hooks block the task command while waiting)
pub const MAX_LOCK_WAIT_MS: u64 = 60_000;

/// Interval between lock attempts
pub const LOCK_POLL_INTERVAL_MS: u64 = 50;

// ===== Listener =====

/// Consecutive fatal passes after which the listener gives up
pub const DEFAULT_MAX_CONSECUTIVE_FATAL: u32 = 5;

/// Delay before re-running a pass that lost the lock race
pub const CONTENTION_RETRY_DELAY_MS: u64 = 1_000;

/// Resolve the data directory: explicit override, else the platform default
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_data_dir_wins() {
        let dir = resolve_data_dir(Some(PathBuf::from("/tmp/custom")));
        assert_eq!(dir, PathBuf::from("/tmp/custom"));
    }

    #[test]
    fn test_default_data_dir_ends_with_app_dir() {
        let dir = resolve_data_dir(None);
        assert!(dir.ends_with(DATA_DIR_NAME));
    }
}
