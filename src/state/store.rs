//! Atomic checkpoint persistence and history archival (C2).
//!
//! `save` always writes the full document to a sibling temp file, fsyncs it,
//! then renames it over the live state file. A reader that successfully
//! opens the state file therefore never sees a partial write.

use super::model::UpgradeState;
use crate::errors::RuntimeError;
use chrono::Utc;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct StateStore {
    state_file: PathBuf,
    history_dir: PathBuf,
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(state_file: PathBuf, history_dir: PathBuf) -> Self {
        Self {
            state_file,
            history_dir,
            lock: Mutex::new(()),
        }
    }

    /// Build a fresh `UpgradeState` for a new run. Does not persist it.
    pub fn init(&self, cluster_name: &str, from: &str, to: &str) -> UpgradeState {
        let upgrade_id = format!("upg-{}", Utc::now().timestamp());
        UpgradeState::new(
            upgrade_id,
            cluster_name.to_string(),
            from.to_string(),
            to.to_string(),
            super::model::PromptLevel::None,
        )
    }

    pub fn exists(&self) -> bool {
        self.state_file.exists()
    }

    pub fn load(&self) -> Result<UpgradeState, RuntimeError> {
        let _guard = self.lock.lock().unwrap();
        if !self.state_file.exists() {
            return Err(RuntimeError::StateNotFound(self.state_file.clone()));
        }
        let contents = fs::read_to_string(&self.state_file).map_err(RuntimeError::StateIOError)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| RuntimeError::StateIOError(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    /// Atomic write: encode, write to `<state_file>.tmp`, fsync, rename over
    /// the target. Bumps `checkpoint_count` and refreshes timestamps.
    pub fn save(&self, state: &mut UpgradeState) -> Result<(), RuntimeError> {
        let _guard = self.lock.lock().unwrap();
        let now = Utc::now();
        state.checkpoint_count += 1;
        state.last_updated = now;
        state.last_checkpoint_at = Some(now);

        let encoded = serde_yaml::to_string(state)
            .map_err(|e| RuntimeError::StateIOError(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        self.write_atomic(&self.state_file, &encoded)
    }

    /// `save` plus a log entry recording why the checkpoint happened.
    pub fn checkpoint(&self, state: &mut UpgradeState, reason: &str) -> Result<(), RuntimeError> {
        self.save(state)?;
        tracing::info!(reason, checkpoint = state.checkpoint_count, "checkpoint");
        Ok(())
    }

    /// Copy the live state into the history archive and remove it.
    pub fn archive(&self, state: &UpgradeState) -> Result<PathBuf, RuntimeError> {
        let _guard = self.lock.lock().unwrap();
        fs::create_dir_all(&self.history_dir).map_err(RuntimeError::StateIOError)?;

        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let archive_path = self
            .history_dir
            .join(format!("upgrade-{}-{}.yaml", state.upgrade_id, timestamp));

        let encoded = serde_yaml::to_string(state)
            .map_err(|e| RuntimeError::StateIOError(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        self.write_atomic(&archive_path, &encoded)?;

        if self.state_file.exists() {
            fs::remove_file(&self.state_file).map_err(RuntimeError::StateIOError)?;
        }
        Ok(archive_path)
    }

    fn write_atomic(&self, target: &Path, contents: &str) -> Result<(), RuntimeError> {
        let tmp_path = target.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path).map_err(RuntimeError::StateIOError)?;
            tmp.write_all(contents.as_bytes())
                .map_err(RuntimeError::StateIOError)?;
            tmp.sync_all().map_err(RuntimeError::StateIOError)?;
        }
        fs::rename(&tmp_path, target).map_err(RuntimeError::StateIOError)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::model::PromptLevel;
    use tempfile::tempdir;

    fn store(dir: &Path) -> StateStore {
        StateStore::new(dir.join("upgrade-state.yaml"), dir.join("upgrade-history"))
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let mut state = store.init("cluster0", "7.0.1", "7.0.26");
        store.save(&mut state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.cluster_name, "cluster0");
        assert_eq!(loaded.checkpoint_count, 1);
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let mut state = store.init("cluster0", "7.0.1", "7.0.26");
        store.save(&mut state).unwrap();

        assert!(!dir.path().join("upgrade-state.tmp").exists());
    }

    #[test]
    fn checkpoint_count_is_monotonic() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let mut state = store.init("cluster0", "7.0.1", "7.0.26");
        store.save(&mut state).unwrap();
        store.save(&mut state).unwrap();
        store.save(&mut state).unwrap();
        assert_eq!(state.checkpoint_count, 3);
    }

    #[test]
    fn load_without_prior_save_is_not_found() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        assert!(matches!(
            store.load(),
            Err(RuntimeError::StateNotFound(_))
        ));
    }

    #[test]
    fn archive_removes_live_state_and_writes_history_record() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let mut state = store.init("cluster0", "7.0.1", "7.0.26");
        state.prompt_level = PromptLevel::None;
        store.save(&mut state).unwrap();

        let archive_path = store.archive(&state).unwrap();
        assert!(archive_path.exists());
        assert!(!store.exists());
    }
}
