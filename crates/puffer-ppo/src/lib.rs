//! # puffer-ppo
//!
//! On-policy PPO training core for asynchronously stepped, multi-agent
//! vectorized simulators.
//!
//! ## Overview
//!
//! - `ExperienceBuffer` - fixed-capacity flat rollout storage that restores
//!   per-agent chronological order before training
//! - `Trainer` - rollout collection (`evaluate`), GAE, clipped PPO update
//!   (`train`), checkpoint/resume
//! - `VecEnv` - the asynchronous reset/recv/step contract the collector drives
//! - `Policy` - the actor-critic contract consumed by the trainer
//! - `Utilization` / `Profile` - background utilization sampling and timing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use puffer_ppo::prelude::*;
//! use puffer_ppo_envs::Rendezvous;
//!
//! let vecenv = Serial::new(|| Rendezvous::new(4, 16), 2);
//! let policy = MlpPolicy::new(obs_size, num_actions, false, MlpConfig::default(), device);
//! let mut trainer = Trainer::new(TrainerConfig::default(), vecenv, policy, Box::new(NoOpLogger))?;
//! trainer.run()?;
//! trainer.close();
//! ```

pub mod buffer;
pub mod checkpoint;
pub mod env;
pub mod log;
pub mod monitor;
pub mod policy;
pub mod spaces;
pub mod training;
pub mod utils;
pub mod vector;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::buffer::{ExperienceBuffer, Minibatch, TrainingBatch};
    pub use crate::checkpoint::{CheckpointManager, Checkpointable, TrainerState};
    pub use crate::env::{Info, InfoValue, MultiAgentEnv, MultiAgentStep};
    pub use crate::log::{CompositeLogger, ConsoleLogger, MetricLogger, MetricsSnapshot, NoOpLogger};
    #[cfg(feature = "tensorboard")]
    pub use crate::log::TensorBoardLogger;
    pub use crate::monitor::{Profile, Utilization};
    pub use crate::policy::{Distribution, HasVarStore, LstmPolicy, MlpConfig, MlpPolicy, Policy};
    pub use crate::spaces::{Discrete, DynSpace, Space};
    pub use crate::training::{compute_gae, Losses, Trainer, TrainerConfig};
    pub use crate::vector::{AsyncVecEnv, RecvBatch, Serial, VecEnv};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum PufferError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    #[error("Environment error: {0}")]
    Env(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tensor error: {0}")]
    Tensor(#[from] tch::TchError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = core::result::Result<T, PufferError>;
