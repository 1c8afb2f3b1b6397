//! Experiment directory management for weights and trainer state.

use super::state::TrainerState;
use crate::{PufferError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tch::nn;

/// Name of the shared trainer state record
pub const STATE_FILE: &str = "trainer_state.bin";

/// Saves and restores checkpoints under `data_dir/exp_id`.
///
/// # Example
///
/// ```ignore
/// let manager = CheckpointManager::new("experiments", "run-1");
///
/// // After an update:
/// if let Some(path) = manager.save_model(&vs, epoch)? {
///     manager.save_state(&TrainerState::new(global_step, epoch, file_name(&path), "run-1"))?;
/// }
///
/// // On startup:
/// if let Some(state) = manager.try_load(&mut vs)? {
///     println!("Resumed from epoch {}", state.epoch);
/// }
/// ```
#[derive(Clone, Debug)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(data_dir: impl AsRef<Path>, exp_id: &str) -> Self {
        Self {
            dir: data_dir.as_ref().join(exp_id),
        }
    }

    /// Experiment directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_name(epoch: u64) -> String {
        format!("model_{:06}.pt", epoch)
    }

    pub fn model_path(&self, epoch: u64) -> PathBuf {
        self.dir.join(Self::model_name(epoch))
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Write the weights for `epoch`.
    ///
    /// Returns `None` without touching the file when this epoch was already
    /// saved.
    pub fn save_model(&self, vs: &nn::VarStore, epoch: u64) -> Result<Option<PathBuf>> {
        let path = self.model_path(epoch);
        if path.exists() {
            tracing::debug!(path = %path.display(), "Checkpoint already exists, skipping");
            return Ok(None);
        }
        fs::create_dir_all(&self.dir)?;
        vs.save(&path)?;
        tracing::info!(path = %path.display(), epoch, "Saved model");
        Ok(Some(path))
    }

    /// Atomically replace the trainer state record
    pub fn save_state(&self, state: &TrainerState) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.state_path();
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, state.to_bytes()?)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!(path = %path.display(), epoch = state.epoch, "Saved trainer state");
        Ok(path)
    }

    pub fn load_state(&self) -> Result<Option<TrainerState>> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        Ok(Some(TrainerState::from_bytes(&data)?))
    }

    /// Restore weights and return the trainer state of the latest save.
    ///
    /// A missing directory or state record is not an error: the run starts
    /// fresh.
    pub fn try_load(&self, vs: &mut nn::VarStore) -> Result<Option<TrainerState>> {
        let state = match self.load_state()? {
            Some(state) => state,
            None => {
                tracing::info!(dir = %self.dir.display(), "No checkpoints found. Assuming new experiment");
                return Ok(None);
            }
        };

        let model_path = self.dir.join(&state.model_name);
        if !model_path.exists() {
            return Err(PufferError::Checkpoint(format!(
                "trainer state references missing weights {}",
                model_path.display()
            )));
        }
        vs.load(&model_path)?;
        tracing::info!(
            path = %model_path.display(),
            epoch = state.epoch,
            global_step = state.global_step,
            "Resumed from checkpoint"
        );
        Ok(Some(state))
    }

    /// Saved weight files, oldest first
    pub fn list_models(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return Ok(Vec::new()),
        };

        let mut models: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("model_") && n.ends_with(".pt"))
                    .unwrap_or(false)
            })
            .collect();

        models.sort();
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};
    use tempfile::tempdir;

    fn store(value: f64) -> nn::VarStore {
        let vs = nn::VarStore::new(Device::Cpu);
        let w = vs.root().zeros("w", &[2, 3]);
        tch::no_grad(|| {
            let _ = w.shallow_clone().fill_(value);
        });
        vs
    }

    fn weight(vs: &nn::VarStore) -> f64 {
        vs.variables()["w"].sum(Kind::Float).double_value(&[])
    }

    #[test]
    fn test_model_name_padding() {
        assert_eq!(CheckpointManager::model_name(7), "model_000007.pt");
    }

    #[test]
    fn test_save_model_skips_existing_epoch() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), "exp");

        assert!(manager.save_model(&store(1.0), 3).unwrap().is_some());
        assert!(manager.save_model(&store(2.0), 3).unwrap().is_none());

        let mut restored = store(0.0);
        restored.load(manager.model_path(3)).unwrap();
        assert_eq!(weight(&restored), 6.0);
        assert_eq!(manager.list_models().unwrap().len(), 1);
    }

    #[test]
    fn test_state_written_atomically() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), "exp");
        let state = TrainerState::new(128, 1, "model_000001.pt", "exp");
        manager.save_state(&state).unwrap();

        assert!(manager.state_path().exists());
        assert!(!manager.state_path().with_extension("bin.tmp").exists());
        assert_eq!(manager.load_state().unwrap(), Some(state));
    }

    #[test]
    fn test_try_load_without_checkpoint() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), "missing");
        let mut vs = store(0.0);
        assert!(manager.try_load(&mut vs).unwrap().is_none());
    }

    #[test]
    fn test_try_load_restores_weights() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), "exp");
        manager.save_model(&store(0.5), 2).unwrap();
        manager
            .save_state(&TrainerState::new(64, 2, CheckpointManager::model_name(2), "exp"))
            .unwrap();

        let mut vs = store(0.0);
        let state = manager.try_load(&mut vs).unwrap().unwrap();
        assert_eq!(state.epoch, 2);
        assert_eq!(state.global_step, 64);
        assert_eq!(weight(&vs), 3.0);
    }

    #[test]
    fn test_try_load_missing_weights_is_error() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), "exp");
        manager
            .save_state(&TrainerState::new(64, 2, "model_000002.pt", "exp"))
            .unwrap();
        let mut vs = store(0.0);
        assert!(matches!(manager.try_load(&mut vs), Err(PufferError::Checkpoint(_))));
    }
}
