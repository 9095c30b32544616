//! Location shortcut table
//!
//! Read-only `locations.json`, loaded once per pass:
//!
//! ```json
//! { "locations": { "home": { "name": "Home", "lat": 52.37, "lon": 4.89, "radius": 150 } } }
//! ```

use crate::config::DEFAULT_GEOFENCE_RADIUS_M;
use crate::error::{AppError, Result};
use crate::sync::models::LocationShortcut;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Default)]
struct LocationsFile {
    #[serde(default)]
    locations: BTreeMap<String, LocationEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LocationEntry {
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default = "default_radius")]
    radius: f64,
}

fn default_radius() -> f64 {
    DEFAULT_GEOFENCE_RADIUS_M
}

/// Shortcuts keyed by lowercase key, iterated in key order
#[derive(Debug, Clone, Default)]
pub struct LocationTable {
    shortcuts: BTreeMap<String, LocationShortcut>,
}

impl LocationTable {
    pub fn from_shortcuts(shortcuts: Vec<LocationShortcut>) -> Self {
        let shortcuts = shortcuts
            .into_iter()
            .map(|mut s| {
                s.key = s.key.to_lowercase();
                (s.key.clone(), s)
            })
            .collect();
        Self { shortcuts }
    }

    /// Load the table; a missing file is an empty table
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No locations file at {:?}", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).await?;
        let file: LocationsFile = serde_json::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse locations file {:?}: {}", path, e))
        })?;

        let shortcuts = file
            .locations
            .into_iter()
            .map(|(key, entry)| LocationShortcut {
                key,
                display_name: entry.name,
                latitude: entry.lat,
                longitude: entry.lon,
                default_radius: entry.radius,
            })
            .collect();

        let table = Self::from_shortcuts(shortcuts);
        tracing::debug!("Loaded {} location shortcuts", table.len());
        Ok(table)
    }

    /// Exact key lookup
    pub fn get(&self, key: &str) -> Option<&LocationShortcut> {
        self.shortcuts.get(key)
    }

    pub fn find_by_display_name(&self, name: &str) -> Option<&LocationShortcut> {
        let needle = name.trim().to_lowercase();
        self.shortcuts
            .values()
            .find(|s| s.display_name.to_lowercase() == needle)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocationShortcut> {
        self.shortcuts.values()
    }

    pub fn len(&self) -> usize {
        self.shortcuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shortcuts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_table() {
        let temp = TempDir::new().unwrap();
        let table = LocationTable::load(&temp.path().join("locations.json"))
            .await
            .unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_load_original_format() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("locations.json");
        std::fs::write(
            &path,
            r#"{"locations": {
                "Home": {"name": "Home", "lat": 52.37, "lon": 4.89, "radius": 150},
                "gym": {"name": "Fitness First", "lat": 52.1, "lon": 4.2}
            }}"#,
        )
        .unwrap();

        let table = LocationTable::load(&path).await.unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("home").unwrap().default_radius, 150.0);
        assert_eq!(table.get("gym").unwrap().default_radius, DEFAULT_GEOFENCE_RADIUS_M);
        assert_eq!(table.find_by_display_name("fitness first").unwrap().key, "gym");
    }

    #[tokio::test]
    async fn test_malformed_file_is_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("locations.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = LocationTable::load(&path).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
