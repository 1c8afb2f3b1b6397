//! Multi-layer perceptron policy.

use super::{Distribution, HasVarStore, Policy, RecurrentState};
use crate::spaces::DynSpace;
use tch::{nn, nn::Module, Device, Kind, Tensor};

/// Configuration for MLP policy
#[derive(Clone, Debug)]
pub struct MlpConfig {
    /// Hidden layer size
    pub hidden_size: i64,
    /// Number of hidden layers
    pub num_layers: usize,
    pub activation: Activation,
}

#[derive(Clone, Debug, Copy)]
pub enum Activation {
    ReLU,
    Tanh,
    Gelu,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_size: 128,
            num_layers: 2,
            activation: Activation::ReLU,
        }
    }
}

/// Build a stack of linear layers with the configured activation
pub(crate) fn encoder(path: &nn::Path, obs_size: i64, config: &MlpConfig) -> nn::Sequential {
    let mut encoder = nn::seq();
    let mut in_size = obs_size;

    for i in 0..config.num_layers {
        let layer = nn::linear(
            path / format!("encoder_{}", i),
            in_size,
            config.hidden_size,
            Default::default(),
        );
        encoder = encoder.add(layer);

        match config.activation {
            Activation::ReLU => encoder = encoder.add_fn(|x| x.relu()),
            Activation::Tanh => encoder = encoder.add_fn(|x| x.tanh()),
            Activation::Gelu => encoder = encoder.add_fn(|x| x.gelu("none")),
        }

        in_size = config.hidden_size;
    }
    encoder
}

/// Small normal weights and zero biases
pub(crate) fn init_weights(vs: &nn::VarStore) {
    tch::no_grad(|| {
        for (name, mut var) in vs.variables() {
            if name.contains("weight") {
                var.copy_(&(Tensor::randn_like(&var) * 0.01));
            } else if name.contains("bias") {
                let _ = var.zero_();
            }
        }
    });
}

/// `(head input width, continuous?)` for an action space
pub(crate) fn action_head(action_space: &DynSpace) -> (i64, bool) {
    (action_space.head_size(), !action_space.is_discrete())
}

/// Multi-layer perceptron policy
pub struct MlpPolicy {
    vs: nn::VarStore,
    encoder: nn::Sequential,
    /// Actor head (action logits, or mean and log-std)
    actor: nn::Linear,
    /// Critic head (value estimate)
    critic: nn::Linear,
    is_continuous: bool,
    device: Device,
}

impl MlpPolicy {
    /// Create a new MLP policy
    pub fn new(
        obs_size: i64,
        num_actions: i64,
        is_continuous: bool,
        config: MlpConfig,
        device: Device,
    ) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();

        let encoder = encoder(&root, obs_size, &config);
        let actor_out = if is_continuous {
            num_actions * 2
        } else {
            num_actions
        };
        let actor = nn::linear(
            &root / "actor",
            config.hidden_size,
            actor_out,
            Default::default(),
        );
        let critic = nn::linear(&root / "critic", config.hidden_size, 1, Default::default());

        init_weights(&vs);

        Self {
            vs,
            encoder,
            actor,
            critic,
            is_continuous,
            device,
        }
    }

    pub fn from_spaces(
        obs_space: &DynSpace,
        action_space: &DynSpace,
        config: MlpConfig,
        device: Device,
    ) -> Self {
        let (n_actions, is_cont) = action_head(action_space);
        Self::new(obs_space.flat_size(), n_actions, is_cont, config, device)
    }
}

impl HasVarStore for MlpPolicy {
    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}

impl Policy for MlpPolicy {
    fn forward(
        &self,
        observations: &Tensor,
        _state: Option<&RecurrentState>,
    ) -> (Distribution, Tensor, Option<RecurrentState>) {
        let obs = observations
            .to_device(self.device)
            .to_kind(Kind::Float)
            .flatten(1, -1);
        let hidden = self.encoder.forward(&obs);
        let actor_out = self.actor.forward(&hidden);
        let value = self.critic.forward(&hidden).squeeze_dim(-1);

        (Distribution::from_head(actor_out, self.is_continuous), value, None)
    }
}
