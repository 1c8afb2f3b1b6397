//! Asynchronous vectorized environment contract.

use crate::env::{Frame, Info};
use crate::spaces::DynSpace;
use crate::{PufferError, Result};
use ndarray::Array2;
use tch::{Device, Kind, Tensor};

/// Observation batch that can reside on CPU or on a torch device
#[derive(Debug)]
pub enum ObservationBatch {
    /// Host array, one flattened observation per row
    Cpu(Array2<f32>),
    /// LibTorch tensor (possibly on GPU), leading dimension is the row
    Torch(Tensor),
}

impl Clone for ObservationBatch {
    fn clone(&self) -> Self {
        match self {
            Self::Cpu(a) => Self::Cpu(a.clone()),
            Self::Torch(t) => Self::Torch(t.shallow_clone()),
        }
    }
}

impl ObservationBatch {
    pub fn num_rows(&self) -> usize {
        match self {
            Self::Cpu(a) => a.nrows(),
            Self::Torch(t) => t.size().first().copied().unwrap_or(0) as usize,
        }
    }

    /// Materialize as a float tensor of shape `[rows, *obs_dims]` on `device`
    pub fn to_tensor(&self, obs_dims: &[i64], device: Device) -> Result<Tensor> {
        let rows = self.num_rows() as i64;
        let mut shape = vec![rows];
        shape.extend_from_slice(obs_dims);
        let tensor = match self {
            Self::Cpu(a) => {
                let data = a
                    .as_slice()
                    .map(Tensor::from_slice)
                    .unwrap_or_else(|| Tensor::from_slice(&a.iter().copied().collect::<Vec<f32>>()));
                data.f_reshape(shape.as_slice())?
            }
            Self::Torch(t) => t.to_kind(Kind::Float).f_reshape(shape.as_slice())?,
        };
        Ok(tensor.to_device(device))
    }
}

/// One receive from the vectorized environment.
///
/// Rows are agent slots. Rows whose `mask` entry is true carry a real
/// transition; active rows are packed before inactive ones. `env_ids` holds
/// the stable global agent id of every row and is unique within a batch.
#[derive(Clone, Debug)]
pub struct RecvBatch {
    pub observations: ObservationBatch,
    pub rewards: Vec<f32>,
    /// Episode ended for this agent, by termination or truncation
    pub dones: Vec<bool>,
    pub truncated: Vec<bool>,
    pub infos: Vec<Info>,
    pub env_ids: Vec<i64>,
    pub mask: Vec<bool>,
}

impl RecvBatch {
    pub fn num_rows(&self) -> usize {
        self.env_ids.len()
    }

    /// Number of masked-in rows
    pub fn num_active(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// True when no agent is stepping or every active row reports done;
    /// the collector answers such a batch with a full reset.
    pub fn is_idle(&self) -> bool {
        self.num_active() == 0
            || self
                .mask
                .iter()
                .zip(&self.dones)
                .filter(|(&m, _)| m)
                .all(|(_, &d)| d)
    }

    /// Number of active rows, checking they are packed before the inactive ones
    pub fn active_prefix(&self) -> Result<usize> {
        let n = self.num_active();
        if self.mask[..n].iter().any(|&m| !m) {
            return Err(PufferError::Env(
                "active rows must precede inactive rows in a receive batch".into(),
            ));
        }
        Ok(n)
    }

    /// Check that all per-row fields agree on the row count
    pub fn validate(&self) -> Result<()> {
        let rows = self.num_rows();
        let lens = [
            self.observations.num_rows(),
            self.rewards.len(),
            self.dones.len(),
            self.truncated.len(),
            self.mask.len(),
        ];
        if lens.iter().any(|&l| l != rows) {
            return Err(PufferError::Env(format!(
                "inconsistent receive batch: {} env ids, field lengths {:?}",
                rows, lens
            )));
        }
        Ok(())
    }
}

/// Trait for asynchronously stepped vectorized environments.
///
/// The protocol is `async_reset` → `recv` → `step` → `recv` → `step` ...;
/// `async_reset` may be issued again at any point after a `recv`.
pub trait VecEnv: Send {
    /// Observation space of a single agent
    fn single_observation_space(&self) -> DynSpace;

    /// Action space of a single agent
    fn action_space(&self) -> DynSpace;

    /// Total number of agent slots, which is also the row count of every
    /// `RecvBatch`
    fn num_agents(&self) -> usize;

    /// Number of agents controlled by the learning policy
    fn controlled_num_agents(&self) -> usize;

    /// Request a reset of every sub-environment
    fn async_reset(&mut self, seed: Option<u64>) -> Result<()>;

    /// Block until the next batch is available
    fn recv(&mut self) -> Result<RecvBatch>;

    /// Send one action row per row of the last received batch
    fn step(&mut self, actions: &Tensor) -> Result<()>;

    /// Optional: Render the first sub-environment
    fn render(&mut self) -> Result<Option<Frame>> {
        Ok(None)
    }

    /// Close all environments
    fn close(&mut self) {}
}
