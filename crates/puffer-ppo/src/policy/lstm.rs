//! LSTM policy.

use super::mlp::{action_head, encoder, MlpConfig};
use super::{Distribution, HasVarStore, Policy, RecurrentState};
use crate::spaces::DynSpace;
use tch::{nn, nn::Module, nn::RNN, Device, Kind, Tensor};

/// Encoder, stacked LSTM, then actor and critic heads.
///
/// State tensors are `[num_layers, batch, hidden_size]`. The LSTM runs
/// batch-first, so a `[B, T, F]` input is a batch of `B` sequences.
pub struct LstmPolicy {
    hidden_size: i64,
    num_layers: i64,
    lstm: nn::LSTM,
    vs: nn::VarStore,
    actor: nn::Linear,
    critic: nn::Linear,
    encoder: nn::Sequential,
    is_continuous: bool,
    device: Device,
}

impl LstmPolicy {
    /// Create a new LSTM policy
    pub fn new(
        obs_size: i64,
        num_actions: i64,
        is_continuous: bool,
        hidden_size: i64,
        num_layers: i64,
        device: Device,
    ) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();

        let config = MlpConfig {
            hidden_size,
            num_layers: 1,
            ..Default::default()
        };
        let encoder = encoder(&root, obs_size, &config);

        let lstm = nn::lstm(
            &root / "lstm",
            hidden_size,
            hidden_size,
            nn::RNNConfig {
                num_layers,
                batch_first: true,
                ..Default::default()
            },
        );

        let actor_out = if is_continuous {
            num_actions * 2
        } else {
            num_actions
        };
        let actor = nn::linear(&root / "actor", hidden_size, actor_out, Default::default());
        let critic = nn::linear(&root / "critic", hidden_size, 1, Default::default());

        Self {
            hidden_size,
            num_layers,
            lstm,
            vs,
            actor,
            critic,
            encoder,
            is_continuous,
            device,
        }
    }

    pub fn from_spaces(
        obs_space: &DynSpace,
        action_space: &DynSpace,
        hidden_size: i64,
        num_layers: i64,
        device: Device,
    ) -> Self {
        let (n_actions, is_cont) = action_head(action_space);
        Self::new(
            obs_space.flat_size(),
            n_actions,
            is_cont,
            hidden_size,
            num_layers,
            device,
        )
    }

    /// Zeroed state for `batch_size` sequences
    pub fn initial_state(&self, batch_size: i64) -> RecurrentState {
        let shape = [self.num_layers, batch_size, self.hidden_size];
        (
            Tensor::zeros(shape, (Kind::Float, self.device)),
            Tensor::zeros(shape, (Kind::Float, self.device)),
        )
    }
}

impl HasVarStore for LstmPolicy {
    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}

impl Policy for LstmPolicy {
    fn forward(
        &self,
        observations: &Tensor,
        state: Option<&RecurrentState>,
    ) -> (Distribution, Tensor, Option<RecurrentState>) {
        let obs = observations.to_device(self.device).to_kind(Kind::Float);
        // [B, F] is one step per sequence, [B, T, F] a batch of sequences
        let sequence = obs.dim() == 3;
        let obs = if sequence { obs } else { obs.unsqueeze(1) };
        let (batch, steps) = (obs.size()[0], obs.size()[1]);

        let encoded = self.encoder.forward(&obs.reshape([batch * steps, -1]));
        let encoded = encoded.reshape([batch, steps, self.hidden_size]);

        let (h0, c0) = match state {
            Some((h, c)) => (h.shallow_clone(), c.shallow_clone()),
            None => self.initial_state(batch),
        };
        let (output, new_state) = self.lstm.seq_init(&encoded, &nn::LSTMState((h0, c0)));
        let hidden = output.reshape([batch * steps, self.hidden_size]);

        let actor_out = self.actor.forward(&hidden);
        let value = self.critic.forward(&hidden).squeeze_dim(-1);

        (
            Distribution::from_head(actor_out, self.is_continuous),
            value,
            Some(new_state.0),
        )
    }

    fn recurrent_shape(&self) -> Option<(i64, i64)> {
        Some((self.num_layers, self.hidden_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lstm_step() {
        let policy = LstmPolicy::new(4, 2, false, 16, 1, Device::Cpu);
        let obs = Tensor::randn([8, 4], (Kind::Float, Device::Cpu));
        let (dist, value, state) = policy.forward(&obs, None);

        match dist {
            Distribution::Categorical { logits } => assert_eq!(logits.size(), [8, 2]),
            _ => panic!("Expected categorical distribution"),
        }
        assert_eq!(value.size(), [8]);
        let (h, c) = state.unwrap();
        assert_eq!(h.size(), [1, 8, 16]);
        assert_eq!(c.size(), [1, 8, 16]);
    }

    #[test]
    fn test_lstm_sequence_flattens_rows() {
        let policy = LstmPolicy::new(3, 5, false, 8, 2, Device::Cpu);
        assert_eq!(policy.recurrent_shape(), Some((2, 8)));
        let obs = Tensor::randn([4, 6, 3], (Kind::Float, Device::Cpu));
        let state = policy.initial_state(4);
        let out = policy.evaluate(&obs, Some(&state), None);
        assert_eq!(out.action.size(), [24]);
        assert_eq!(out.value.size(), [24]);
        assert_eq!(out.state.unwrap().0.size(), [2, 4, 8]);
    }

    #[test]
    fn test_sequence_matches_stepwise() {
        let policy = LstmPolicy::new(3, 2, false, 8, 1, Device::Cpu);
        let obs = Tensor::randn([2, 3, 3], (Kind::Float, Device::Cpu));
        let (_, seq_values, _) = policy.forward(&obs, None);

        let mut state = None;
        let mut last = Tensor::zeros([2], (Kind::Float, Device::Cpu));
        for t in 0..3 {
            let (_, v, s) = policy.forward(&obs.select(1, t), state.as_ref());
            state = s;
            last = v;
        }
        let seq_last = seq_values.reshape([2, 3]).select(1, 2);
        assert!(seq_last.allclose(&last, 1e-5, 1e-5, false));
    }
}
