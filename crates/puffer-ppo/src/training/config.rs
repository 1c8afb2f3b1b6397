//! Trainer configuration.

use crate::{PufferError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tch::Device;

/// Configuration for the PPO trainer
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    // Run
    /// Environment name shown on the dashboard
    pub env_name: String,
    /// Experiment id; checkpoints live in `data_dir/exp_id`
    pub exp_id: String,
    pub data_dir: PathBuf,
    pub seed: u64,
    /// Request deterministic libtorch kernels
    pub torch_deterministic: bool,
    #[serde(skip, default = "default_device")]
    pub device: Device,
    /// Keep rollout observations in host memory
    pub cpu_offload: bool,

    // Training
    /// Total agent steps to train
    pub total_timesteps: u64,
    /// Transitions per rollout, across all agents
    pub batch_size: usize,
    pub minibatch_size: usize,
    /// Contiguous steps per minibatch row
    pub bptt_horizon: usize,
    /// Number of passes over each rollout
    pub update_epochs: usize,

    // PPO hyperparameters
    pub learning_rate: f64,
    pub anneal_lr: bool,
    /// Discount factor
    pub gamma: f64,
    pub gae_lambda: f64,
    /// Normalize advantages per minibatch
    pub norm_adv: bool,
    /// PPO clipping coefficient
    pub clip_coef: f64,
    pub clip_vloss: bool,
    /// Value function clipping coefficient
    pub vf_clip_coef: f64,
    pub ent_coef: f64,
    pub vf_coef: f64,
    pub max_grad_norm: f64,
    /// Stop the update once a minibatch's approximate KL exceeds this
    pub target_kl: Option<f64>,
    /// Run GAE separately over each agent's sorted segment
    pub gae_agent_reset: bool,

    // Intervals
    /// Checkpoint interval (epochs)
    pub checkpoint_interval: u64,
    /// Evaluation rollout interval (epochs), 0 disables
    pub eval_interval: u64,
    /// Step cap for one evaluation rollout
    pub eval_max_steps: usize,
    /// Minimum seconds between dashboard refreshes
    pub dashboard_interval_s: f64,
}

fn default_device() -> Device {
    Device::Cpu
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            env_name: "puffer".to_string(),
            exp_id: "ppo".to_string(),
            data_dir: PathBuf::from("experiments"),
            seed: 1,
            torch_deterministic: true,
            device: Device::Cpu,
            cpu_offload: false,

            total_timesteps: 10_000_000,
            batch_size: 8192,
            minibatch_size: 2048,
            bptt_horizon: 16,
            update_epochs: 4,

            learning_rate: 0.0003,
            anneal_lr: true,
            gamma: 0.99,
            gae_lambda: 0.95,
            norm_adv: true,
            clip_coef: 0.2,
            clip_vloss: true,
            vf_clip_coef: 0.2,
            ent_coef: 0.01,
            vf_coef: 0.5,
            max_grad_norm: 0.5,
            target_kl: None,
            gae_agent_reset: true,

            checkpoint_interval: 100,
            eval_interval: 0,
            eval_max_steps: 1024,
            dashboard_interval_s: 1.0,
        }
    }
}

impl TrainerConfig {
    /// Create config for CUDA device
    pub fn cuda(mut self) -> Self {
        self.device = Device::Cuda(0);
        self
    }

    /// Set total timesteps
    pub fn with_timesteps(mut self, timesteps: u64) -> Self {
        self.total_timesteps = timesteps;
        self
    }

    /// Set learning rate
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Set batch, minibatch and BPTT sizes together
    pub fn with_batch(mut self, batch_size: usize, minibatch_size: usize, bptt_horizon: usize) -> Self {
        self.batch_size = batch_size;
        self.minibatch_size = minibatch_size;
        self.bptt_horizon = bptt_horizon;
        self
    }

    /// Set checkpoint location
    pub fn with_checkpoint_dir(mut self, data_dir: impl Into<PathBuf>, exp_id: impl Into<String>) -> Self {
        self.data_dir = data_dir.into();
        self.exp_id = exp_id.into();
        self
    }

    /// Number of minibatches per epoch
    pub fn num_minibatches(&self) -> usize {
        self.batch_size / self.minibatch_size.max(1)
    }

    /// Directory holding this experiment's checkpoints
    pub fn experiment_dir(&self) -> PathBuf {
        self.data_dir.join(&self.exp_id)
    }

    /// Reject sizes the buffer cannot lay out and non-finite coefficients
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.minibatch_size == 0 || self.bptt_horizon == 0 {
            return Err(PufferError::Config(
                "batch_size, minibatch_size and bptt_horizon must be positive".into(),
            ));
        }
        if self.batch_size % self.minibatch_size != 0 {
            return Err(PufferError::Config(format!(
                "batch_size ({}) must be divisible by minibatch_size ({})",
                self.batch_size, self.minibatch_size
            )));
        }
        if self.minibatch_size % self.bptt_horizon != 0 {
            return Err(PufferError::Config(format!(
                "minibatch_size ({}) must be divisible by bptt_horizon ({})",
                self.minibatch_size, self.bptt_horizon
            )));
        }
        if self.update_epochs == 0 {
            return Err(PufferError::Config("update_epochs must be positive".into()));
        }
        if self.checkpoint_interval == 0 {
            return Err(PufferError::Config("checkpoint_interval must be positive".into()));
        }
        let coefs = [
            self.learning_rate,
            self.gamma,
            self.gae_lambda,
            self.clip_coef,
            self.vf_clip_coef,
            self.ent_coef,
            self.vf_coef,
            self.max_grad_norm,
        ];
        if coefs.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(PufferError::Config(
                "PPO coefficients must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }
}
