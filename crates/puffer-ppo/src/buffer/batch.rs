//! Training-time views of a sorted rollout.

use ndarray::Array1;
use tch::Tensor;

/// Every stored field gathered into minibatch-major layout.
///
/// Sequence fields are `[num_minibatches, minibatch_rows, bptt_horizon, ...]`,
/// flat fields `[num_minibatches, minibatch_size]`.
pub struct TrainingBatch {
    pub obs: Tensor,
    pub actions: Tensor,
    pub logprobs: Tensor,
    pub dones: Tensor,
    pub values: Tensor,
    pub advantages: Tensor,
    /// `advantages + values`
    pub returns: Tensor,
    /// Value estimates in sorted order, on the host
    pub host_values: Array1<f32>,
    /// Returns in sorted order, on the host
    pub host_returns: Array1<f32>,
}

impl TrainingBatch {
    pub fn num_minibatches(&self) -> i64 {
        self.values.size()[0]
    }

    /// Slice out minibatch `mb`
    pub fn minibatch(&self, mb: i64) -> Minibatch {
        Minibatch {
            obs: self.obs.get(mb),
            actions: self.actions.get(mb),
            logprobs: self.logprobs.get(mb),
            values: self.values.get(mb),
            advantages: self.advantages.get(mb),
            returns: self.returns.get(mb),
        }
    }
}

/// One minibatch: `minibatch_rows` sequences of `bptt_horizon` steps
pub struct Minibatch {
    /// `[rows, bptt, *obs_shape]`, still on the observation device
    pub obs: Tensor,
    /// `[rows, bptt, *action_shape]`
    pub actions: Tensor,
    /// `[rows, bptt]`
    pub logprobs: Tensor,
    pub values: Tensor,
    pub advantages: Tensor,
    pub returns: Tensor,
}
