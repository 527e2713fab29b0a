//! Handoff store - durable, session-scoped persistence of one job record
//!
//! Lets a watched job survive a full navigation between the "watching" view
//! and the "background" view without re-fetching. The snapshot lives under
//! a well-known key and is consumed at most once: `take` deletes the file
//! before returning it, so a page reload cannot adopt the same snapshot
//! twice and duplicate history.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tracing::{debug, warn};

use crate::domain::job::entities::HandoffSnapshot;

/// Well-known snapshot file name
const HANDOFF_FILE_NAME: &str = "handoff.json";

/// File-backed, read-once snapshot store.
pub struct HandoffStore {
    path: PathBuf,
}

impl HandoffStore {
    /// Store under the platform data directory.
    pub fn new() -> Result<Self> {
        let dirs = ProjectDirs::from("dev", "scanwatch", "scanwatch")
            .context("Failed to determine data directory")?;
        let data_dir = dirs.data_dir();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        Ok(Self {
            path: data_dir.join(HANDOFF_FILE_NAME),
        })
    }

    /// Store under an explicit path. Used by tests and embedders that
    /// scope the handoff to a session directory.
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Persist a snapshot, replacing any previous one.
    pub fn put(&self, snapshot: &HandoffSnapshot) -> Result<()> {
        let content =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write handoff snapshot: {:?}", self.path))?;
        debug!(job_id = %snapshot.job_id, "Persisted handoff snapshot");
        Ok(())
    }

    /// Read and delete the snapshot. Returns `None` when there is nothing
    /// to adopt; a corrupted file is discarded rather than propagated so a
    /// bad snapshot can never wedge the next view.
    pub fn take(&self) -> Result<Option<HandoffSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read handoff snapshot: {:?}", self.path))?;

        // Single-consumption: the file goes away no matter what it held.
        fs::remove_file(&self.path)
            .with_context(|| format!("Failed to delete handoff snapshot: {:?}", self.path))?;

        match serde_json::from_str::<HandoffSnapshot>(&content) {
            Ok(snapshot) => {
                debug!(job_id = %snapshot.job_id, "Consumed handoff snapshot");
                Ok(Some(snapshot))
            }
            Err(e) => {
                warn!("Handoff snapshot corrupted, discarding: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::entities::{JobRecord, JobStatus};
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_store() -> (HandoffStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = HandoffStore::with_path(temp_dir.path().join(HANDOFF_FILE_NAME));
        (store, temp_dir)
    }

    fn snapshot(job_id: &str) -> HandoffSnapshot {
        let mut record =
            JobRecord::accepted(job_id, "https://example.com", JobStatus::Processing, Some(60))
                .unwrap();
        record.progress_percent = 42;
        record.stage = "probe".into();
        HandoffSnapshot::from_record(&record, Utc::now())
    }

    #[test]
    fn test_put_then_take_roundtrip() {
        let (store, _temp) = test_store();
        store.put(&snapshot("J1")).unwrap();

        let taken = store.take().unwrap().unwrap();
        assert_eq!(taken.job_id, "J1");
        assert_eq!(taken.progress_percent, 42);
        assert_eq!(taken.status, JobStatus::Processing);
    }

    #[test]
    fn test_take_is_single_consumption() {
        let (store, _temp) = test_store();
        store.put(&snapshot("J1")).unwrap();

        assert!(store.take().unwrap().is_some());
        // Second adoption attempt yields nothing
        assert!(store.take().unwrap().is_none());
    }

    #[test]
    fn test_take_on_empty_store() {
        let (store, _temp) = test_store();
        assert!(store.take().unwrap().is_none());
    }

    #[test]
    fn test_corrupted_snapshot_is_discarded() {
        let (store, _temp) = test_store();
        fs::write(&store.path, "{not json").unwrap();

        assert!(store.take().unwrap().is_none());
        // And it was deleted, not left behind
        assert!(store.take().unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_previous_snapshot() {
        let (store, _temp) = test_store();
        store.put(&snapshot("J1")).unwrap();
        store.put(&snapshot("J2")).unwrap();

        let taken = store.take().unwrap().unwrap();
        assert_eq!(taken.job_id, "J2");
    }
}
