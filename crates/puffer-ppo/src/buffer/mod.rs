//! Experience buffer for storing rollout data.
//!
//! Transitions arrive in receive order, interleaved across agents. The
//! buffer records an `(agent_id, arrival_step)` key for every slot and
//! restores per-agent chronological order in `sort_training_data` before
//! any training-time gather, so each minibatch row is a contiguous
//! `bptt_horizon` run from one agent.

mod batch;
mod recurrent;

pub use batch::{Minibatch, TrainingBatch};
pub use recurrent::RecurrentArena;

use crate::spaces::DynSpace;
use crate::{PufferError, Result};
use ndarray::{s, Array1, Axis};
use tch::{Device, Kind, Tensor};

/// Agent-then-time order of one rollout, produced by `sort_training_data`
#[derive(Clone, Debug)]
pub struct SortedOrder {
    /// Write positions in sorted order
    pub indices: Vec<usize>,
    /// Agent id of each sorted position
    pub agent_ids: Vec<i64>,
}

impl SortedOrder {
    /// Half-open ranges of sorted positions sharing one agent id
    pub fn segments(&self) -> Vec<std::ops::Range<usize>> {
        let mut segments = Vec::new();
        let mut start = 0;
        for i in 1..=self.agent_ids.len() {
            if i == self.agent_ids.len() || self.agent_ids[i] != self.agent_ids[start] {
                segments.push(start..i);
                start = i;
            }
        }
        segments
    }
}

/// Fixed-capacity flat rollout storage
pub struct ExperienceBuffer {
    /// Observations `[batch_size, *obs_shape]`, on the observation device
    pub obs: Tensor,
    /// Actions `[batch_size, *action_shape]`, on CPU
    pub actions: Tensor,
    pub values: Array1<f32>,
    pub logprobs: Array1<f32>,
    pub rewards: Array1<f32>,
    /// 1.0 where the transition ended an episode (terminal or truncated)
    pub dones: Array1<f32>,
    pub truncateds: Array1<f32>,

    sort_keys: Vec<(i64, u64)>,
    /// Retained gather indices `[num_minibatches, minibatch_rows, bptt_horizon]`
    b_idxs: Option<Tensor>,
    lstm: Option<RecurrentArena>,

    obs_dims: Vec<i64>,
    action_dims: Vec<i64>,
    action_kind: Kind,
    batch_size: usize,
    minibatch_size: usize,
    bptt_horizon: usize,
    num_minibatches: usize,
    minibatch_rows: usize,
    ptr: usize,
    step: u64,
    device: Device,
    obs_device: Device,
}

impl ExperienceBuffer {
    /// Allocate storage for one rollout.
    ///
    /// Fails unless `batch_size` is divisible by `minibatch_size` and
    /// `minibatch_size` by `bptt_horizon`. With `cpu_offload` observations
    /// stay in host memory and are moved per minibatch during training.
    pub fn new(
        batch_size: usize,
        minibatch_size: usize,
        bptt_horizon: usize,
        obs_space: &DynSpace,
        action_space: &DynSpace,
        device: Device,
        cpu_offload: bool,
    ) -> Result<Self> {
        if batch_size == 0 || minibatch_size == 0 || bptt_horizon == 0 {
            return Err(PufferError::Config(
                "batch_size, minibatch_size and bptt_horizon must be positive".into(),
            ));
        }
        if batch_size % minibatch_size != 0 {
            return Err(PufferError::Config(format!(
                "batch_size ({}) must be divisible by minibatch_size ({})",
                batch_size, minibatch_size
            )));
        }
        if minibatch_size % bptt_horizon != 0 {
            return Err(PufferError::Config(format!(
                "minibatch_size ({}) must be divisible by bptt_horizon ({})",
                minibatch_size, bptt_horizon
            )));
        }

        let obs_device = if cpu_offload { Device::Cpu } else { device };
        let obs_dims = obs_space.dims();
        let action_dims = action_space.storage_dims();
        let action_kind = action_space.storage_kind();

        let n = batch_size as i64;
        let obs = Tensor::zeros(&with_leading(n, &obs_dims), (Kind::Float, obs_device));
        let actions = Tensor::zeros(&with_leading(n, &action_dims), (action_kind, Device::Cpu));

        Ok(Self {
            obs,
            actions,
            values: Array1::zeros(batch_size),
            logprobs: Array1::zeros(batch_size),
            rewards: Array1::zeros(batch_size),
            dones: Array1::zeros(batch_size),
            truncateds: Array1::zeros(batch_size),
            sort_keys: Vec::with_capacity(batch_size),
            b_idxs: None,
            lstm: None,
            obs_dims,
            action_dims,
            action_kind,
            batch_size,
            minibatch_size,
            bptt_horizon,
            num_minibatches: batch_size / minibatch_size,
            minibatch_rows: minibatch_size / bptt_horizon,
            ptr: 0,
            step: 0,
            device,
            obs_device,
        })
    }

    /// Attach zeroed recurrent state for `total_agents` agent ids
    pub fn with_recurrent(mut self, num_layers: i64, total_agents: usize, hidden_size: i64) -> Self {
        self.lstm = Some(RecurrentArena::new(
            num_layers,
            total_agents as i64,
            hidden_size,
            self.device,
        ));
        self
    }

    pub fn recurrent(&self) -> Option<&RecurrentArena> {
        self.lstm.as_ref()
    }

    pub fn recurrent_mut(&mut self) -> Option<&mut RecurrentArena> {
        self.lstm.as_mut()
    }

    /// Store the masked-in rows of one receive batch.
    ///
    /// Active rows are expected first; only the first `count(mask)` rows are
    /// read. Anything past the remaining capacity is dropped. Returns the
    /// number of transitions written.
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &mut self,
        obs: &Tensor,
        value: &Tensor,
        action: &Tensor,
        logprob: &Tensor,
        reward: &[f32],
        done: &[bool],
        truncated: &[bool],
        agent_ids: &[i64],
        mask: &[bool],
    ) -> Result<usize> {
        let active = mask.iter().filter(|&&m| m).count();
        let n = active.min(self.batch_size - self.ptr);
        let rows = [reward.len(), done.len(), truncated.len(), agent_ids.len()];
        if rows.iter().any(|&len| len < n) {
            return Err(PufferError::ShapeMismatch {
                expected: vec![n as i64],
                actual: rows.iter().map(|&l| l as i64).collect(),
            });
        }

        if n > 0 {
            let (start, len) = (self.ptr as i64, n as i64);
            let src = obs
                .narrow(0, 0, len)
                .to_kind(Kind::Float)
                .f_reshape(&with_leading(len, &self.obs_dims))?
                .to_device(self.obs_device);
            self.obs.narrow(0, start, len).copy_(&src);

            let src = action
                .narrow(0, 0, len)
                .to_device(Device::Cpu)
                .to_kind(self.action_kind)
                .f_reshape(&with_leading(len, &self.action_dims))?;
            self.actions.narrow(0, start, len).copy_(&src);

            let end = self.ptr + n;
            write_rows(&mut self.values, self.ptr, &host_vec(value, n)?);
            write_rows(&mut self.logprobs, self.ptr, &host_vec(logprob, n)?);
            write_rows(&mut self.rewards, self.ptr, &reward[..n]);
            let done: Vec<f32> = done[..n].iter().map(|&d| d as u8 as f32).collect();
            write_rows(&mut self.dones, self.ptr, &done);
            let trunc: Vec<f32> = truncated[..n].iter().map(|&t| t as u8 as f32).collect();
            write_rows(&mut self.truncateds, self.ptr, &trunc);

            let step = self.step;
            self.sort_keys
                .extend(agent_ids[..n].iter().map(|&id| (id, step)));
            self.ptr = end;
        }
        self.step += 1;
        Ok(n)
    }

    /// True once `batch_size` transitions are stored
    pub fn full(&self) -> bool {
        self.ptr >= self.batch_size
    }

    /// Establish agent-then-time order and retain the minibatch gather
    /// indices. Resets the write cursor for the next rollout.
    pub fn sort_training_data(&mut self) -> Result<SortedOrder> {
        if !self.full() {
            return Err(PufferError::Training(format!(
                "cannot sort a partial rollout ({} of {} transitions)",
                self.ptr, self.batch_size
            )));
        }

        let mut indices: Vec<usize> = (0..self.sort_keys.len()).collect();
        indices.sort_by_key(|&i| self.sort_keys[i]);
        let agent_ids = indices.iter().map(|&i| self.sort_keys[i].0).collect();

        let idxs: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
        let b_idxs = Tensor::from_slice(&idxs)
            .reshape([
                self.minibatch_rows as i64,
                self.num_minibatches as i64,
                self.bptt_horizon as i64,
            ])
            .transpose(0, 1)
            .contiguous();
        self.b_idxs = Some(b_idxs);

        self.sort_keys.clear();
        self.ptr = 0;
        self.step = 0;
        Ok(SortedOrder { indices, agent_ids })
    }

    /// `(dones, values, rewards)` in sorted order, the inputs to GAE
    pub fn gae_inputs(&self, order: &SortedOrder) -> (Array1<f32>, Array1<f32>, Array1<f32>) {
        (
            self.dones.select(Axis(0), &order.indices),
            self.values.select(Axis(0), &order.indices),
            self.rewards.select(Axis(0), &order.indices),
        )
    }

    /// Gather every stored field through the retained indices.
    ///
    /// `advantages` are indexed by sorted position. Observations stay on
    /// their storage device; everything else moves to the compute device.
    pub fn flatten_batch(&self, order: &SortedOrder, advantages: &Array1<f32>) -> Result<TrainingBatch> {
        let b_idxs = self
            .b_idxs
            .as_ref()
            .ok_or_else(|| PufferError::Training("flatten_batch called before sort_training_data".into()))?;
        if advantages.len() != self.batch_size {
            return Err(PufferError::ShapeMismatch {
                expected: vec![self.batch_size as i64],
                actual: vec![advantages.len() as i64],
            });
        }

        let (nmb, rows, bptt) = (
            self.num_minibatches as i64,
            self.minibatch_rows as i64,
            self.bptt_horizon as i64,
        );
        let mbsize = self.minibatch_size as i64;
        let flat = b_idxs.reshape([-1]);
        let seq_shape = [nmb, rows, bptt];

        let obs = self
            .obs
            .index_select(0, &flat.to_device(self.obs_device))
            .reshape(&with_leading_all(&seq_shape, &self.obs_dims));
        let actions = self
            .actions
            .index_select(0, &flat)
            .reshape(&with_leading_all(&seq_shape, &self.action_dims))
            .to_device(self.device);
        let gather = |arr: &Array1<f32>, shape: &[i64]| {
            Tensor::from_slice(&arr.to_vec())
                .index_select(0, &flat)
                .reshape(shape)
                .to_device(self.device)
        };
        let logprobs = gather(&self.logprobs, &seq_shape);
        let dones = gather(&self.dones, &seq_shape);
        let values = gather(&self.values, &[nmb, mbsize]);

        let b_advantages = Tensor::from_slice(&advantages.to_vec())
            .reshape([rows, nmb, bptt])
            .transpose(0, 1)
            .reshape([nmb, mbsize])
            .to_device(self.device);
        let returns = &b_advantages + &values;

        let host_values = self.values.select(Axis(0), &order.indices);
        let host_returns = advantages + &host_values;

        Ok(TrainingBatch {
            obs,
            actions,
            logprobs,
            dones,
            values,
            advantages: b_advantages,
            returns,
            host_values,
            host_returns,
        })
    }

    /// Number of episode ends recorded in the current rollout
    pub fn done_count(&self) -> f32 {
        self.dones.sum()
    }

    pub fn len(&self) -> usize {
        self.ptr
    }

    pub fn is_empty(&self) -> bool {
        self.ptr == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn minibatch_size(&self) -> usize {
        self.minibatch_size
    }

    pub fn bptt_horizon(&self) -> usize {
        self.bptt_horizon
    }

    pub fn num_minibatches(&self) -> usize {
        self.num_minibatches
    }

    pub fn minibatch_rows(&self) -> usize {
        self.minibatch_rows
    }

    /// Collection ticks seen since the last sort
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn sort_keys(&self) -> &[(i64, u64)] {
        &self.sort_keys
    }

    pub fn obs_device(&self) -> Device {
        self.obs_device
    }
}

fn with_leading(n: i64, dims: &[i64]) -> Vec<i64> {
    with_leading_all(&[n], dims)
}

fn with_leading_all(lead: &[i64], dims: &[i64]) -> Vec<i64> {
    lead.iter().chain(dims).copied().collect()
}

/// First `n` entries of a tensor as host floats
fn host_vec(t: &Tensor, n: usize) -> Result<Vec<f32>> {
    let flat = t
        .detach()
        .reshape([-1])
        .narrow(0, 0, n as i64)
        .to_device(Device::Cpu)
        .to_kind(Kind::Float);
    Ok(Vec::<f32>::try_from(&flat)?)
}

fn write_rows(dst: &mut Array1<f32>, start: usize, src: &[f32]) {
    dst.slice_mut(s![start..start + src.len()])
        .iter_mut()
        .zip(src)
        .for_each(|(d, &s)| *d = s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spaces::{Box as BoxSpace, Discrete};

    fn buffer(batch_size: usize, minibatch_size: usize, bptt: usize) -> Result<ExperienceBuffer> {
        let obs_space = DynSpace::Box(BoxSpace::uniform(&[3], -1.0, 1.0));
        let action_space = DynSpace::Discrete(Discrete::new(4));
        ExperienceBuffer::new(
            batch_size,
            minibatch_size,
            bptt,
            &obs_space,
            &action_space,
            Device::Cpu,
            false,
        )
    }

    /// Store active rows for `ids` followed by `pad` masked-out rows.
    /// Observations are `[agent, t, 0]`, values are `t`.
    fn store_rows(buf: &mut ExperienceBuffer, ids: &[i64], t: f32, pad: usize) -> usize {
        let rows = ids.len() + pad;
        let mut agent_ids = ids.to_vec();
        agent_ids.extend((0..pad).map(|p| 1000 + p as i64));
        let obs_data: Vec<f32> = agent_ids
            .iter()
            .flat_map(|&id| [id as f32, t, 0.0])
            .collect();
        let obs = Tensor::from_slice(&obs_data).reshape([rows as i64, 3]);
        let value = Tensor::from_slice(&vec![t; rows]);
        let action = Tensor::ones([rows as i64], (Kind::Int64, Device::Cpu));
        let logprob = Tensor::zeros([rows as i64], (Kind::Float, Device::Cpu));
        let reward: Vec<f32> = agent_ids.iter().map(|&id| id as f32 * 100.0 + t).collect();
        let mut mask = vec![true; ids.len()];
        mask.extend(vec![false; pad]);
        let flags = vec![false; rows];

        buf.store(&obs, &value, &action, &logprob, &reward, &flags, &flags, &agent_ids, &mask)
            .unwrap()
    }

    #[test]
    fn test_divisibility_checked_at_construction() {
        let buf = buffer(32, 16, 4).unwrap();
        assert_eq!(buf.num_minibatches(), 2);
        assert_eq!(buf.minibatch_rows(), 4);
        assert!(buf.is_empty());
        assert!(!buf.full());

        assert!(matches!(buffer(30, 16, 4), Err(PufferError::Config(_))));
        assert!(matches!(buffer(32, 16, 5), Err(PufferError::Config(_))));
        assert!(matches!(buffer(32, 0, 4), Err(PufferError::Config(_))));
    }

    #[test]
    fn test_store_caps_at_capacity() {
        let mut buf = buffer(8, 4, 2).unwrap();
        let mut last = 0;
        for (t, expected) in [(0.0, 3), (1.0, 3), (2.0, 2), (3.0, 0)] {
            let written = store_rows(&mut buf, &[0, 1, 2], t, 2);
            assert_eq!(written, expected);
            assert!(buf.len() >= last);
            assert!(buf.len() <= 8);
            assert_eq!(buf.sort_keys().len(), buf.len());
            assert_eq!(buf.full(), buf.len() == 8);
            last = buf.len();
        }
        assert!(buf.full());
        assert_eq!(buf.step(), 4);
        // Masked-out padding never reaches storage
        assert!(buf.sort_keys().iter().all(|&(id, _)| id < 1000));
    }

    #[test]
    fn test_sort_groups_agents_chronologically() {
        let mut buf = buffer(8, 4, 2).unwrap();
        assert!(buf.sort_training_data().is_err());

        store_rows(&mut buf, &[2, 0], 0.0, 1);
        store_rows(&mut buf, &[0, 2], 1.0, 1);
        store_rows(&mut buf, &[1, 2, 0], 2.0, 0);
        store_rows(&mut buf, &[1], 3.0, 2);

        let order = buf.sort_training_data().unwrap();
        assert_eq!(order.indices, vec![1, 2, 6, 4, 7, 0, 3, 5]);
        assert_eq!(order.agent_ids, vec![0, 0, 0, 1, 1, 2, 2, 2]);
        assert_eq!(order.segments(), vec![0..3, 3..5, 5..8]);

        let (_, values, rewards) = buf.gae_inputs(&order);
        assert_eq!(values.to_vec(), vec![0.0, 1.0, 2.0, 2.0, 3.0, 0.0, 1.0, 2.0]);
        assert_eq!(rewards[3], 102.0);

        // The cursor is reset for the next rollout
        assert!(buf.is_empty());
        assert_eq!(buf.step(), 0);
        assert!(buf.sort_keys().is_empty());
    }

    #[test]
    fn test_flatten_layout_and_returns() {
        let mut buf = buffer(8, 4, 2).unwrap();
        let order_none = SortedOrder {
            indices: vec![],
            agent_ids: vec![],
        };
        assert!(buf.flatten_batch(&order_none, &Array1::zeros(8)).is_err());

        for t in 0..4 {
            store_rows(&mut buf, &[1, 0], t as f32, 0);
        }
        let order = buf.sort_training_data().unwrap();
        let advantages = Array1::from_iter((0..8).map(|k| k as f32));
        let batch = buf.flatten_batch(&order, &advantages).unwrap();

        assert_eq!(batch.num_minibatches(), 2);
        assert_eq!(batch.obs.size(), [2, 2, 2, 3]);
        assert_eq!(batch.actions.size(), [2, 2, 2]);
        assert_eq!(batch.logprobs.size(), [2, 2, 2]);
        assert_eq!(batch.dones.size(), [2, 2, 2]);
        assert_eq!(batch.values.size(), [2, 4]);
        assert_eq!(batch.advantages.size(), [2, 4]);
        assert!(batch
            .returns
            .allclose(&(&batch.advantages + &batch.values), 1e-6, 1e-6, false));

        // Each row is one agent's consecutive steps
        let mb = batch.minibatch(0);
        let agents = Vec::<f32>::try_from(&mb.obs.select(2, 0).reshape([-1])).unwrap();
        let steps = Vec::<f32>::try_from(&mb.obs.select(2, 1).reshape([-1])).unwrap();
        assert_eq!(agents, vec![0.0, 0.0, 1.0, 1.0]);
        assert_eq!(steps, vec![0.0, 1.0, 0.0, 1.0]);

        assert_eq!(Vec::<f32>::try_from(&mb.advantages).unwrap(), vec![0.0, 1.0, 4.0, 5.0]);
        assert_eq!(Vec::<f32>::try_from(&mb.values).unwrap(), vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(Vec::<f32>::try_from(&mb.returns).unwrap(), vec![0.0, 2.0, 4.0, 6.0]);

        let expected = &advantages + &batch.host_values;
        assert_eq!(batch.host_returns, expected);
        assert_eq!(batch.host_values.to_vec(), vec![0.0, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_recurrent_arena_is_sized_by_agents() {
        let buf = buffer(8, 4, 2).unwrap().with_recurrent(2, 6, 16);
        let arena = buf.recurrent().unwrap();
        assert_eq!(arena.h.size(), [2, 6, 16]);
        assert_eq!(arena.total_agents(), 6);
    }
}
