//! Multi-agent environment contract.
//!
//! Environments expose a fixed number of agent slots. On each step only the
//! agents that are currently active report a transition; the vectorized
//! backends in `crate::vector` turn those sparse reports into fixed-size,
//! masked batches.

mod info;

pub use info::{unroll, Frame, Info, InfoValue};

use crate::spaces::DynSpace;
use ndarray::ArrayD;
use std::collections::HashMap;

/// One agent's transition as reported by an environment
#[derive(Clone, Debug)]
pub struct AgentTransition {
    /// Stable agent slot inside the environment, `0..num_agents()`
    pub agent_id: u32,
    pub observation: ArrayD<f32>,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Info,
}

impl AgentTransition {
    /// Check if the agent's episode is over (terminated or truncated)
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Result of a reset or step: transitions for the active agents only,
/// in whatever order the environment produced them.
#[derive(Clone, Debug, Default)]
pub struct MultiAgentStep {
    pub agents: Vec<AgentTransition>,
}

impl MultiAgentStep {
    pub fn new(agents: Vec<AgentTransition>) -> Self {
        Self { agents }
    }

    /// True once every reporting agent is done. A report with no active
    /// agent is still waiting for activity, not finished.
    pub fn finished(&self) -> bool {
        !self.agents.is_empty() && self.agents.iter().all(AgentTransition::done)
    }
}

/// Core trait for multi-agent environments driven by the trainer.
///
/// # Example
///
/// ```rust,ignore
/// impl MultiAgentEnv for MyWorld {
///     fn observation_space(&self) -> DynSpace { DynSpace::Box(Box::uniform(&[4], -1.0, 1.0)) }
///     fn action_space(&self) -> DynSpace { DynSpace::Discrete(Discrete::new(3)) }
///     fn num_agents(&self) -> usize { 8 }
///     fn reset(&mut self, seed: Option<u64>) -> MultiAgentStep { /* ... */ }
///     fn step(&mut self, actions: &HashMap<u32, ArrayD<f32>>) -> MultiAgentStep { /* ... */ }
/// }
/// ```
pub trait MultiAgentEnv: Send {
    /// Observation space of a single agent
    fn observation_space(&self) -> DynSpace;

    /// Action space of a single agent
    fn action_space(&self) -> DynSpace;

    /// Number of agent slots (max population)
    fn num_agents(&self) -> usize;

    /// Number of agents controlled by the learning policy
    fn controlled_num_agents(&self) -> usize {
        self.num_agents()
    }

    /// Reset the environment and report the initially active agents
    fn reset(&mut self, seed: Option<u64>) -> MultiAgentStep;

    /// Step with one action per active agent, keyed by agent slot
    fn step(&mut self, actions: &HashMap<u32, ArrayD<f32>>) -> MultiAgentStep;

    /// Optional: Render an RGB frame (height, width, 3)
    fn render(&self) -> Option<Frame> {
        None
    }

    /// Optional: Close the environment and free resources
    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn agent(agent_id: u32, terminated: bool) -> AgentTransition {
        AgentTransition {
            agent_id,
            observation: ArrayD::zeros(IxDyn(&[1])),
            reward: 0.0,
            terminated,
            truncated: false,
            info: Info::new(),
        }
    }

    #[test]
    fn test_finished_requires_reporting_agents() {
        assert!(!MultiAgentStep::default().finished());
        assert!(!MultiAgentStep::new(vec![agent(0, true), agent(1, false)]).finished());
        assert!(MultiAgentStep::new(vec![agent(0, true), agent(1, true)]).finished());
    }
}
