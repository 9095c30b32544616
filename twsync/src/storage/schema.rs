//! Sync state file schema and migrations
//!
//! Version 1 is the layout written by the original hook scripts:
//! `{"version": 1, "mappings": {uuid: {uuid, reminder_id, tw_modified,
//! reminder_modified}}, "last_sync": ...}`. Version 2 stores full links with
//! per-side fingerprints.

use crate::sync::models::{Fingerprint, SyncLink};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const CURRENT_VERSION: u32 = 2;

/// On-disk layout of the identity map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    /// Keyed by local id
    #[serde(default)]
    pub mappings: BTreeMap<String, SyncLink>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            last_sync: None,
            mappings: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct V1Mapping {
    uuid: String,
    reminder_id: String,
}

/// Parse any known version into the current layout
pub fn parse_state(content: &str) -> std::result::Result<StateFile, String> {
    if content.trim().is_empty() {
        return Ok(StateFile::default());
    }

    let value: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let version = match value.get("version") {
        // The original scripts treat a file without a version as fresh
        None => return Ok(StateFile::default()),
        Some(v) => v.as_u64().ok_or("version is not a number")?,
    };

    match version {
        1 => migrate_v1(value),
        2 => serde_json::from_value(value).map_err(|e| e.to_string()),
        other => Err(format!(
            "unsupported sync state version {} (newest known is {})",
            other, CURRENT_VERSION
        )),
    }
}

/// Version 1 links carry no fingerprints; both sides start unknown and the
/// first pass re-derives them.
fn migrate_v1(value: Value) -> std::result::Result<StateFile, String> {
    tracing::info!("Migrating sync state from version 1 to {}", CURRENT_VERSION);

    let last_sync = value
        .get("last_sync")
        .and_then(Value::as_str)
        .and_then(parse_legacy_timestamp);

    let raw: BTreeMap<String, V1Mapping> = match value.get("mappings") {
        Some(m) => serde_json::from_value(m.clone()).map_err(|e| e.to_string())?,
        None => BTreeMap::new(),
    };

    let synced_at = last_sync.unwrap_or_else(Utc::now);
    let mut mappings = BTreeMap::new();
    for (_, m) in raw {
        if m.reminder_id.is_empty() {
            continue;
        }
        mappings.insert(
            m.uuid.clone(),
            SyncLink {
                local_id: m.uuid,
                remote_id: m.reminder_id,
                local_fingerprint: Fingerprint::unknown(),
                remote_fingerprint: Fingerprint::unknown(),
                last_synced_at: synced_at,
            },
        );
    }

    Ok(StateFile {
        version: CURRENT_VERSION,
        last_sync,
        mappings,
    })
}

fn parse_legacy_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
