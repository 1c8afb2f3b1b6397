//! Rendezvous: agents on a 1D line walking toward private targets.
//!
//! Each agent observes `[position, target, elapsed]` and moves one step per
//! tick it is active. Agents skip ticks at random and report in shuffled
//! order, so vectorized batches are sparse and out of order. Every episode
//! lasts exactly `episode_len` ticks and ends with all agents terminated.

use ndarray::{arr1, Array3, ArrayD};
use puffer_ppo::env::{AgentTransition, Frame, Info, InfoValue, MultiAgentEnv, MultiAgentStep};
use puffer_ppo::spaces::{Box as BoxSpace, Discrete, DynSpace};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

const STEP: f32 = 0.25;
const GOAL_RADIUS: f32 = 0.125;
const ACTIVE_PROB: f64 = 0.7;
const CELLS: usize = 17;
const CELL_PX: usize = 8;

#[derive(Clone)]
pub struct Rendezvous {
    num_agents: usize,
    episode_len: u32,
    continuous: bool,
    positions: Vec<f32>,
    targets: Vec<f32>,
    reached: Vec<bool>,
    returns: Vec<f32>,
    tick: u32,
    rng: StdRng,
}

impl Rendezvous {
    /// Discrete actions: 0 = left, 1 = stay, 2 = right
    pub fn new(num_agents: usize, episode_len: u32) -> Self {
        Self {
            num_agents: num_agents.max(1),
            episode_len: episode_len.max(1),
            continuous: false,
            positions: vec![0.0; num_agents.max(1)],
            targets: vec![0.0; num_agents.max(1)],
            reached: vec![false; num_agents.max(1)],
            returns: vec![0.0; num_agents.max(1)],
            tick: 0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// One continuous action in `[-1, 1]` scaling the step
    pub fn continuous(num_agents: usize, episode_len: u32) -> Self {
        Self {
            continuous: true,
            ..Self::new(num_agents, episode_len)
        }
    }

    pub fn episode_len(&self) -> u32 {
        self.episode_len
    }

    pub fn targets(&self) -> &[f32] {
        &self.targets
    }

    fn observe(&self, agent: usize) -> ArrayD<f32> {
        let elapsed = self.tick as f32 / self.episode_len as f32;
        arr1(&[self.positions[agent], self.targets[agent], elapsed]).into_dyn()
    }

    fn displacement(&self, action: Option<&ArrayD<f32>>) -> f32 {
        let Some(value) = action.and_then(|a| a.iter().next().copied()) else {
            return 0.0;
        };
        if self.continuous {
            value.clamp(-1.0, 1.0) * STEP
        } else {
            match value.round() as i64 {
                0 => -STEP,
                2 => STEP,
                _ => 0.0,
            }
        }
    }

    fn shuffled(&mut self, mut agents: Vec<AgentTransition>) -> MultiAgentStep {
        agents.shuffle(&mut self.rng);
        MultiAgentStep::new(agents)
    }
}

impl MultiAgentEnv for Rendezvous {
    fn observation_space(&self) -> DynSpace {
        DynSpace::Box(BoxSpace::uniform(&[3], -1.0, 1.0))
    }

    fn action_space(&self) -> DynSpace {
        if self.continuous {
            DynSpace::Box(BoxSpace::uniform(&[1], -1.0, 1.0))
        } else {
            DynSpace::Discrete(Discrete::new(3))
        }
    }

    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn reset(&mut self, seed: Option<u64>) -> MultiAgentStep {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.tick = 0;
        for agent in 0..self.num_agents {
            self.positions[agent] = 0.0;
            self.targets[agent] = self.rng.gen_range(-1.0f32..=1.0);
            self.reached[agent] = false;
            self.returns[agent] = 0.0;
        }

        let agents = (0..self.num_agents)
            .map(|agent| AgentTransition {
                agent_id: agent as u32,
                observation: self.observe(agent),
                reward: 0.0,
                terminated: false,
                truncated: false,
                info: Info::new(),
            })
            .collect();
        self.shuffled(agents)
    }

    fn step(&mut self, actions: &HashMap<u32, ArrayD<f32>>) -> MultiAgentStep {
        if self.tick >= self.episode_len {
            return self.reset(None);
        }
        self.tick += 1;
        let last = self.tick >= self.episode_len;
        // At least one agent reports each tick
        let anchor = self.tick as usize % self.num_agents;

        let mut agents = Vec::new();
        for agent in 0..self.num_agents {
            if !(last || agent == anchor || self.rng.gen_bool(ACTIVE_PROB)) {
                continue;
            }

            let before = (self.targets[agent] - self.positions[agent]).abs();
            let moved = self.displacement(actions.get(&(agent as u32)));
            self.positions[agent] = (self.positions[agent] + moved).clamp(-1.0, 1.0);
            let after = (self.targets[agent] - self.positions[agent]).abs();

            let mut reward = before - after;
            if !self.reached[agent] && after <= GOAL_RADIUS {
                self.reached[agent] = true;
                reward += 1.0;
            }
            self.returns[agent] += reward;

            let mut info = Info::new();
            if last {
                let goal = if self.reached[agent] { 1.0 } else { 0.0 };
                info.insert("goal".into(), InfoValue::Scalar(goal));
                info.insert("episode_return".into(), InfoValue::from(self.returns[agent]));
                info.insert("episode_length".into(), InfoValue::Scalar(self.tick as f64));
            }

            agents.push(AgentTransition {
                agent_id: agent as u32,
                observation: self.observe(agent),
                reward,
                terminated: last,
                truncated: false,
                info,
            });
        }
        self.shuffled(agents)
    }

    fn render(&self) -> Option<Frame> {
        let column = |x: f32| (((x + 1.0) / 2.0) * (CELLS - 1) as f32).round() as usize;
        let frame = Array3::from_shape_fn(
            (self.num_agents * CELL_PX, CELLS * CELL_PX, 3),
            |(y, x, c)| {
                let agent = y / CELL_PX;
                let cell = x / CELL_PX;
                let color: [u8; 3] = if cell == column(self.positions[agent]) {
                    if self.reached[agent] {
                        [0, 255, 255]
                    } else {
                        [255, 255, 255]
                    }
                } else if cell == column(self.targets[agent]) {
                    [0, 200, 0]
                } else {
                    [24, 24, 32]
                };
                color[c]
            },
        );
        Some(frame)
    }
}
