//! Agent-indexed recurrent state arena.

use crate::policy::RecurrentState;
use tch::{Device, Kind, Tensor};

/// LSTM `(h, c)` for every agent id, `[num_layers, total_agents, hidden]`.
///
/// Allocated once; the collector reads the rows of the agents in a receive
/// batch and writes the updated rows back in place.
pub struct RecurrentArena {
    pub h: Tensor,
    pub c: Tensor,
}

impl RecurrentArena {
    pub fn new(num_layers: i64, total_agents: i64, hidden_size: i64, device: Device) -> Self {
        let shape = [num_layers, total_agents, hidden_size];
        Self {
            h: Tensor::zeros(shape, (Kind::Float, device)),
            c: Tensor::zeros(shape, (Kind::Float, device)),
        }
    }

    pub fn total_agents(&self) -> i64 {
        self.h.size()[1]
    }

    /// Copy out the state of `agent_ids` (an Int64 index tensor)
    pub fn read(&self, agent_ids: &Tensor) -> RecurrentState {
        let ids = agent_ids.to_device(self.h.device());
        (self.h.index_select(1, &ids), self.c.index_select(1, &ids))
    }

    /// Overwrite the state of `agent_ids` with `state`
    pub fn write(&mut self, agent_ids: &Tensor, state: &RecurrentState) {
        let ids = agent_ids.to_device(self.h.device());
        let _ = self.h.index_copy_(1, &ids, &state.0.detach());
        let _ = self.c.index_copy_(1, &ids, &state.1.detach());
    }

    /// Zero every agent's state
    pub fn reset(&mut self) {
        let _ = self.h.zero_();
        let _ = self.c.zero_();
    }
}
