//! Identity map
//!
//! Bidirectional, one-to-one mapping between task ids and reminder ids with
//! the per-side fingerprints recorded at the last sync. `IdentityMap` is the
//! in-memory view a pass works on; `IdentityMapStore` loads and atomically
//! replaces the JSON file.

use super::schema::{parse_state, StateFile, CURRENT_VERSION};
use crate::error::{AppError, Result};
use crate::sync::models::SyncLink;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    /// Keyed by local id
    links: BTreeMap<String, SyncLink>,
    /// remote id -> local id
    by_remote: HashMap<String, String>,
    last_sync: Option<DateTime<Utc>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_state(state: StateFile) -> Self {
        let mut map = Self {
            last_sync: state.last_sync,
            ..Self::default()
        };
        for (_, link) in state.mappings {
            let evicted = map.upsert(link);
            if !evicted.is_empty() {
                tracing::warn!(
                    "Dropped {} duplicate link(s) while loading sync state",
                    evicted.len()
                );
            }
        }
        map
    }

    fn to_state(&self) -> StateFile {
        StateFile {
            version: CURRENT_VERSION,
            last_sync: self.last_sync,
            mappings: self.links.clone(),
        }
    }

    pub fn lookup_by_local(&self, local_id: &str) -> Option<&SyncLink> {
        self.links.get(local_id)
    }

    pub fn lookup_by_remote(&self, remote_id: &str) -> Option<&SyncLink> {
        self.by_remote
            .get(remote_id)
            .and_then(|local_id| self.links.get(local_id))
    }

    /// Insert or replace a link.
    ///
    /// Any other link that shares either id is evicted and returned, so the
    /// map stays one-to-one.
    pub fn upsert(&mut self, link: SyncLink) -> Vec<SyncLink> {
        let mut evicted = Vec::new();

        if let Some(old) = self.links.remove(&link.local_id) {
            self.by_remote.remove(&old.remote_id);
            if old.remote_id != link.remote_id {
                evicted.push(old);
            }
        }
        if let Some(other_local) = self.by_remote.remove(&link.remote_id) {
            if let Some(old) = self.links.remove(&other_local) {
                evicted.push(old);
            }
        }

        self.by_remote
            .insert(link.remote_id.clone(), link.local_id.clone());
        self.links.insert(link.local_id.clone(), link);
        evicted
    }

    pub fn remove_by_local(&mut self, local_id: &str) -> Option<SyncLink> {
        let link = self.links.remove(local_id)?;
        self.by_remote.remove(&link.remote_id);
        Some(link)
    }

    pub fn remove_by_remote(&mut self, remote_id: &str) -> Option<SyncLink> {
        let local_id = self.by_remote.remove(remote_id)?;
        self.links.remove(&local_id)
    }

    /// All links in local id order
    pub fn links(&self) -> impl Iterator<Item = &SyncLink> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_sync = Some(at);
    }
}

/// Durable home of the identity map
#[derive(Debug, Clone)]
pub struct IdentityMapStore {
    path: PathBuf,
}

impl IdentityMapStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the map. A missing file is an empty map; anything unreadable is
    /// `CorruptState`.
    pub async fn load(&self) -> Result<IdentityMap> {
        if !self.path.exists() {
            tracing::info!("Sync state not found at {:?}, starting empty", self.path);
            return Ok(IdentityMap::new());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.corrupt(e.to_string()))?;
        let state = parse_state(&content).map_err(|reason| self.corrupt(reason))?;
        let map = IdentityMap::from_state(state);

        tracing::debug!("Loaded {} sync links from {:?}", map.len(), self.path);
        Ok(map)
    }

    /// Replace the file atomically: write a temp file, fsync, rename.
    pub async fn save(&self, map: &IdentityMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(&map.to_state())?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;

        tracing::debug!("Saved {} sync links to {:?}", map.len(), self.path);
        Ok(())
    }

    fn corrupt(&self, reason: String) -> AppError {
        AppError::CorruptState {
            path: self.path.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::Fingerprint;
    use tempfile::TempDir;

    fn link(local: &str, remote: &str) -> SyncLink {
        SyncLink {
            local_id: local.into(),
            remote_id: remote.into(),
            local_fingerprint: Fingerprint {
                digest: format!("l-{}", local),
                done: false,
            },
            remote_fingerprint: Fingerprint {
                digest: format!("r-{}", remote),
                done: false,
            },
            last_synced_at: Utc::now(),
        }
    }

    #[test]
    fn test_lookup_both_directions() {
        let mut map = IdentityMap::new();
        map.upsert(link("t1", "r1"));
        map.upsert(link("t2", "r2"));

        assert_eq!(map.lookup_by_local("t1").unwrap().remote_id, "r1");
        assert_eq!(map.lookup_by_remote("r2").unwrap().local_id, "t2");
        assert!(map.lookup_by_remote("r3").is_none());
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_upsert_keeps_one_to_one() {
        let mut map = IdentityMap::new();
        map.upsert(link("t1", "r1"));
        map.upsert(link("t2", "r2"));

        // t1 now points at r2: both old links are displaced
        let evicted = map.upsert(link("t1", "r2"));
        assert_eq!(evicted.len(), 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map.lookup_by_remote("r2").unwrap().local_id, "t1");
        assert!(map.lookup_by_remote("r1").is_none());
        assert!(map.lookup_by_local("t2").is_none());
    }

    #[test]
    fn test_upsert_same_pair_refreshes() {
        let mut map = IdentityMap::new();
        map.upsert(link("t1", "r1"));
        let mut refreshed = link("t1", "r1");
        refreshed.local_fingerprint.digest = "new".into();

        assert!(map.upsert(refreshed).is_empty());
        assert_eq!(map.lookup_by_remote("r1").unwrap().local_fingerprint.digest, "new");
    }

    #[test]
    fn test_remove_either_side() {
        let mut map = IdentityMap::new();
        map.upsert(link("t1", "r1"));
        map.upsert(link("t2", "r2"));

        assert!(map.remove_by_local("t1").is_some());
        assert!(map.lookup_by_remote("r1").is_none());
        assert!(map.remove_by_remote("r2").is_some());
        assert!(map.lookup_by_local("t2").is_none());
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let store = IdentityMapStore::new(temp.path().join("sync_state.json"));

        let mut map = IdentityMap::new();
        map.upsert(link("t1", "r1"));
        map.mark_synced(Utc::now());
        store.save(&map).await.unwrap();

        assert!(!temp.path().join("sync_state.json.tmp").exists());

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.lookup_by_local("t1"), map.lookup_by_local("t1"));
        assert!(loaded.last_sync().is_some());

        // Human-readable on disk
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"mappings\""));
        assert!(raw.contains("\"remote_id\": \"r1\""));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_fatal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync_state.json");
        std::fs::write(&path, "{\"version\": 2, \"mappings\": [").unwrap();

        let err = IdentityMapStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, AppError::CorruptState { .. }));
        assert!(err.is_fatal());
    }
}
