//! Trainer state record and the checkpointing trait.

use crate::Result;
use serde::{Deserialize, Serialize};

/// Trait for components that can be checkpointed.
///
/// # Example
///
/// ```ignore
/// impl Checkpointable for MyOptimizer {
///     fn save_state(&self) -> Result<Vec<u8>> {
///         Ok(bincode::serialize(&self.state)?)
///     }
///
///     fn load_state(&mut self, data: &[u8]) -> Result<()> {
///         self.state = bincode::deserialize(data)?;
///         Ok(())
///     }
/// }
/// ```
pub trait Checkpointable {
    /// Serialize the component's state to bytes.
    fn save_state(&self) -> Result<Vec<u8>>;

    /// Restore the component's state from bytes.
    fn load_state(&mut self, data: &[u8]) -> Result<()>;
}

/// Everything besides the weights that is needed to resume a run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TrainerState {
    /// Serialized optimizer state
    pub optimizer_state: Vec<u8>,
    /// Environment steps collected so far
    pub global_step: u64,
    /// Agent steps as reported by the environment
    pub agent_step: u64,
    /// Completed updates
    pub epoch: u64,
    /// File name of the weights saved with this state
    pub model_name: String,
    pub exp_id: String,
    /// Crate version that wrote the record
    pub version: String,
    /// Seconds since the UNIX epoch
    pub timestamp: u64,
}

impl TrainerState {
    pub fn new(global_step: u64, epoch: u64, model_name: impl Into<String>, exp_id: impl Into<String>) -> Self {
        Self {
            optimizer_state: Vec::new(),
            global_step,
            agent_step: global_step,
            epoch,
            model_name: model_name.into(),
            exp_id: exp_id.into(),
            version: crate::VERSION.to_string(),
            timestamp: unix_timestamp(),
        }
    }

    pub fn with_optimizer_state(mut self, state: Vec<u8>) -> Self {
        self.optimizer_state = state;
        self
    }

    pub fn with_agent_step(mut self, agent_step: u64) -> Self {
        self.agent_step = agent_step;
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

fn unix_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_bytes_round_trip() {
        let state = TrainerState::new(4096, 2, "model_000002.pt", "run")
            .with_optimizer_state(vec![7, 8, 9])
            .with_agent_step(4100);
        let restored = TrainerState::from_bytes(&state.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.version, crate::VERSION);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(TrainerState::from_bytes(&[1, 2]).is_err());
    }
}
