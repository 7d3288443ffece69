//! Watch state: when the last successful run started and how many there were.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, json_err, SyncError};

/// Persisted as `_course_metadata/watch_state.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchState {
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_count: u64,
}

impl WatchState {
    /// Missing or empty file means "never ran".
    pub fn load_at(path: &Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(WatchState::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        if raw.trim().is_empty() {
            return Ok(WatchState::default());
        }
        serde_json::from_str(&raw).map_err(|e| json_err(path, e))
    }

    pub fn save_at(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| json_err(path, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
        Ok(())
    }

    /// Record a successful run that started at `started_at`.
    pub fn advance(&mut self, started_at: DateTime<Utc>) {
        self.last_run_at = Some(started_at);
        self.run_count += 1;
    }

    /// `last_run_at` as a [`SystemTime`] for mtime comparisons.
    pub fn last_run_system_time(&self) -> Option<SystemTime> {
        self.last_run_at.map(SystemTime::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_state_is_default() {
        let tmp = TempDir::new().expect("tmp");
        let state = WatchState::load_at(&tmp.path().join("watch_state.json")).expect("load");
        assert_eq!(state, WatchState::default());
        assert!(state.last_run_system_time().is_none());
    }

    #[test]
    fn advance_and_round_trip() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("meta").join("watch_state.json");
        let started = Utc::now();

        let mut state = WatchState::default();
        state.advance(started);
        state.save_at(&path).expect("save");

        let loaded = WatchState::load_at(&path).expect("load");
        assert_eq!(loaded.run_count, 1);
        assert_eq!(loaded.last_run_at, Some(started));
    }

    #[test]
    fn accepts_null_timestamp() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("watch_state.json");
        std::fs::write(&path, r#"{"last_run_at": null, "run_count": 3}"#).expect("write");
        let state = WatchState::load_at(&path).expect("load");
        assert_eq!(state.run_count, 3);
        assert!(state.last_run_at.is_none());
    }
}
