//! Neural network policies.
//!
//! Provides the actor-critic contract the trainer consumes and two
//! architectures:
//! - `MlpPolicy` - feed-forward encoder for flat observations
//! - `LstmPolicy` - encoder followed by a stacked LSTM

mod distribution;
mod lstm;
mod mlp;

pub use distribution::Distribution;
pub use lstm::LstmPolicy;
pub use mlp::{Activation, MlpConfig, MlpPolicy};

use tch::{nn, Tensor};

/// Recurrent `(h, c)` state, each of shape `[num_layers, batch, hidden]`
pub type RecurrentState = (Tensor, Tensor);

/// Trait for policies that have a VarStore for optimization
pub trait HasVarStore {
    /// Get mutable reference to the VarStore
    fn var_store_mut(&mut self) -> &mut nn::VarStore;

    /// Get reference to the VarStore
    fn var_store(&self) -> &nn::VarStore;

    /// Number of trainable parameters
    fn num_parameters(&self) -> i64 {
        self.var_store()
            .trainable_variables()
            .iter()
            .map(|v| v.numel() as i64)
            .sum()
    }
}

/// Everything a policy evaluation produces for a batch of observations
pub struct PolicyOutput {
    /// Sampled (or supplied) actions
    pub action: Tensor,
    pub log_prob: Tensor,
    pub entropy: Tensor,
    /// Value estimates, shape `[N]`
    pub value: Tensor,
    /// Updated recurrent state, `None` for feed-forward policies
    pub state: Option<RecurrentState>,
}

/// Trait for RL policies
pub trait Policy: Send {
    /// Forward pass returning action distribution, value estimate, and new state.
    ///
    /// Feed-forward policies take `[N, features]`. Recurrent policies also
    /// accept `[N, T, features]` sequences, in which case every output is
    /// flattened to `N * T` rows in row-major `(n, t)` order.
    fn forward(
        &self,
        observations: &Tensor,
        state: Option<&RecurrentState>,
    ) -> (Distribution, Tensor, Option<RecurrentState>);

    /// `(num_layers, hidden_size)` of the recurrent state, if any
    fn recurrent_shape(&self) -> Option<(i64, i64)> {
        None
    }

    /// Sample actions, or score the given ones when `action` is supplied
    fn evaluate(
        &self,
        observations: &Tensor,
        state: Option<&RecurrentState>,
        action: Option<&Tensor>,
    ) -> PolicyOutput {
        let (dist, value, state) = self.forward(observations, state);
        let action = match action {
            Some(a) => a.shallow_clone(),
            None => dist.sample(),
        };
        let log_prob = dist.log_prob(&action);
        let entropy = dist.entropy();
        PolicyOutput {
            action,
            log_prob,
            entropy,
            value,
            state,
        }
    }
}
