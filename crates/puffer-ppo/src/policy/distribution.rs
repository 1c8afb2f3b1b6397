//! Probability distributions for RL policies.

use tch::{Kind, Tensor};

/// Enum for different types of probability distributions
pub enum Distribution {
    Categorical { logits: Tensor },
    Gaussian { mean: Tensor, std: Tensor },
}

impl Distribution {
    /// Build the distribution an actor head parameterizes. Continuous heads
    /// emit the mean and log-std side by side.
    pub fn from_head(actor_out: Tensor, is_continuous: bool) -> Self {
        if is_continuous {
            let mean_logstd = actor_out.chunk(2, -1);
            let mean = mean_logstd[0].shallow_clone();
            // log_std clamped for stability
            let log_std = mean_logstd[1].clamp(-20.0, 2.0);
            Distribution::Gaussian {
                mean,
                std: log_std.exp(),
            }
        } else {
            Distribution::Categorical { logits: actor_out }
        }
    }

    /// Sample raw actions from the distribution
    pub fn sample(&self) -> Tensor {
        match self {
            Distribution::Categorical { logits } => logits
                .softmax(-1, Kind::Float)
                .multinomial(1, true)
                .squeeze_dim(-1),
            Distribution::Gaussian { mean, std } => {
                let noise = Tensor::randn_like(mean);
                mean + noise * std
            }
        }
    }

    /// Compute log probabilities for given actions
    pub fn log_prob(&self, actions: &Tensor) -> Tensor {
        match self {
            Distribution::Categorical { logits } => {
                let log_probs = logits.log_softmax(-1, Kind::Float);
                let indices = if actions.dim() == log_probs.dim() {
                    actions.to_kind(Kind::Int64)
                } else {
                    actions.unsqueeze(-1).to_kind(Kind::Int64)
                };
                log_probs.gather(-1, &indices, false).squeeze_dim(-1)
            }
            Distribution::Gaussian { mean, std } => {
                let actions = actions.to_kind(Kind::Float).reshape_as(mean);
                let var = std.pow_tensor_scalar(2.0);
                let log_2pi = (2.0 * std::f64::consts::PI).ln();
                let sq_diff = (&actions - mean).pow_tensor_scalar(2.0);
                let element_wise = (sq_diff / (var + 1e-8) + std.log() * 2.0 + log_2pi) * -0.5;
                element_wise.sum_dim_intlist([-1i64].as_slice(), false, Kind::Float)
            }
        }
    }

    /// Compute entropy of the distribution
    pub fn entropy(&self) -> Tensor {
        match self {
            Self::Categorical { logits } => {
                let probs = logits.softmax(-1, Kind::Float);
                let log_probs = logits.log_softmax(-1, Kind::Float);
                -(probs * log_probs).sum_dim_intlist(Some(&[-1_i64][..]), false, Kind::Float)
            }
            Self::Gaussian { mean: _, std } => {
                let entropy = std.log() + 0.5 + 0.5 * (2.0 * std::f64::consts::PI).ln();
                entropy.sum_dim_intlist(Some(&[-1_i64][..]), false, Kind::Float)
            }
        }
    }
}
