//! Serial (sequential) vectorization backend.
//!
//! Runs every sub-environment on the calling thread. Each batch has one row
//! per agent slot across all sub-environments; rows of agents that reported
//! a transition come first and are masked in, the remaining slots are zero
//! padded and masked out.

use super::vecenv::{ObservationBatch, RecvBatch, VecEnv};
use crate::env::{AgentTransition, Frame, Info, MultiAgentEnv, MultiAgentStep};
use crate::spaces::DynSpace;
use crate::{PufferError, Result};
use ndarray::{Array2, ArrayD, IxDyn};
use std::collections::HashMap;
use tch::{Device, Kind, Tensor};

/// Serial vectorization backend
pub struct Serial<E: MultiAgentEnv> {
    envs: Vec<E>,
    agents_per_env: usize,
    obs_size: usize,
    obs_space: DynSpace,
    action_space: DynSpace,
    /// Reports collected by the last reset/step, one per sub-environment
    pending: Option<Vec<MultiAgentStep>>,
    /// (env index, agent slot) of each active row of the last received batch
    active_rows: Vec<(usize, u32)>,
    /// Sub-environments whose episode ended in the last received batch
    finished: Vec<bool>,
}

impl<E: MultiAgentEnv> Serial<E> {
    /// Create a new serial backend
    pub fn new<F>(env_creator: F, num_envs: usize) -> Self
    where
        F: Fn() -> E,
    {
        let envs: Vec<E> = (0..num_envs.max(1)).map(|_| env_creator()).collect();
        let obs_space = envs[0].observation_space();
        let action_space = envs[0].action_space();
        let agents_per_env = envs[0].num_agents();
        let obs_size = obs_space.flat_size() as usize;
        let finished = vec![false; envs.len()];

        Self {
            envs,
            agents_per_env,
            obs_size,
            obs_space,
            action_space,
            pending: None,
            active_rows: Vec::new(),
            finished,
        }
    }

    pub fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn global_id(&self, env_idx: usize, agent_id: u32) -> i64 {
        (env_idx * self.agents_per_env) as i64 + agent_id as i64
    }

    fn assemble(&mut self, reports: Vec<MultiAgentStep>) -> Result<RecvBatch> {
        let rows = self.num_agents();
        let mut observations = Array2::<f32>::zeros((rows, self.obs_size));
        let mut rewards = vec![0.0; rows];
        let mut dones = vec![false; rows];
        let mut truncated = vec![false; rows];
        let mut infos = vec![Info::new(); rows];
        let mut env_ids = Vec::with_capacity(rows);
        let mut mask = vec![false; rows];
        let mut seen = vec![false; rows];

        self.active_rows.clear();
        for (env_idx, report) in reports.iter().enumerate() {
            self.finished[env_idx] = report.finished();
            for agent in &report.agents {
                let row = env_ids.len();
                let id = self.global_id(env_idx, agent.agent_id);
                if agent.agent_id as usize >= self.agents_per_env || seen[id as usize] {
                    return Err(PufferError::Env(format!(
                        "environment {} reported invalid or duplicate agent {}",
                        env_idx, agent.agent_id
                    )));
                }
                seen[id as usize] = true;
                write_transition(&mut observations, row, agent, self.obs_size)?;
                rewards[row] = agent.reward;
                dones[row] = agent.done();
                truncated[row] = agent.truncated;
                infos[row] = agent.info.clone();
                mask[row] = true;
                env_ids.push(id);
                self.active_rows.push((env_idx, agent.agent_id));
            }
        }

        // Inactive slots fill the tail so every global id appears once
        env_ids.extend(
            seen.iter()
                .enumerate()
                .filter(|(_, &s)| !s)
                .map(|(id, _)| id as i64),
        );

        Ok(RecvBatch {
            observations: ObservationBatch::Cpu(observations),
            rewards,
            dones,
            truncated,
            infos,
            env_ids,
            mask,
        })
    }
}

fn write_transition(
    observations: &mut Array2<f32>,
    row: usize,
    agent: &AgentTransition,
    obs_size: usize,
) -> Result<()> {
    if agent.observation.len() != obs_size {
        return Err(PufferError::ShapeMismatch {
            expected: vec![obs_size as i64],
            actual: vec![agent.observation.len() as i64],
        });
    }
    for (dst, &src) in observations.row_mut(row).iter_mut().zip(agent.observation.iter()) {
        *dst = src;
    }
    Ok(())
}

impl<E: MultiAgentEnv> VecEnv for Serial<E> {
    fn single_observation_space(&self) -> DynSpace {
        self.obs_space.clone()
    }

    fn action_space(&self) -> DynSpace {
        self.action_space.clone()
    }

    fn num_agents(&self) -> usize {
        self.envs.len() * self.agents_per_env
    }

    fn controlled_num_agents(&self) -> usize {
        self.envs.iter().map(|e| e.controlled_num_agents()).sum()
    }

    fn async_reset(&mut self, seed: Option<u64>) -> Result<()> {
        let reports = self
            .envs
            .iter_mut()
            .enumerate()
            .map(|(i, env)| env.reset(seed.map(|s| s + i as u64)))
            .collect();
        self.pending = Some(reports);
        Ok(())
    }

    fn recv(&mut self) -> Result<RecvBatch> {
        let reports = self
            .pending
            .take()
            .ok_or_else(|| PufferError::Env("recv called with no reset or step in flight".into()))?;
        self.assemble(reports)
    }

    fn step(&mut self, actions: &Tensor) -> Result<()> {
        let action_shape = self.action_space.shape();
        let per_row: usize = action_shape.iter().product();
        let flat = Vec::<f32>::try_from(
            actions
                .to_device(Device::Cpu)
                .to_kind(Kind::Float)
                .f_reshape([-1])?,
        )?;
        if flat.len() < self.active_rows.len() * per_row {
            return Err(PufferError::ShapeMismatch {
                expected: vec![(self.active_rows.len() * per_row) as i64],
                actual: vec![flat.len() as i64],
            });
        }

        let mut per_env: Vec<HashMap<u32, ArrayD<f32>>> = vec![HashMap::new(); self.envs.len()];
        for (row, &(env_idx, agent_id)) in self.active_rows.iter().enumerate() {
            let slice = flat[row * per_row..(row + 1) * per_row].to_vec();
            let action = ArrayD::from_shape_vec(IxDyn(&action_shape), slice)
                .map_err(|e| PufferError::Env(e.to_string()))?;
            per_env[env_idx].insert(agent_id, action);
        }

        let mut reports = Vec::with_capacity(self.envs.len());
        for (i, (env, actions)) in self.envs.iter_mut().zip(per_env).enumerate() {
            if self.finished[i] {
                reports.push(env.reset(None));
            } else {
                reports.push(env.step(&actions));
            }
        }
        self.pending = Some(reports);
        Ok(())
    }

    fn render(&mut self) -> Result<Option<Frame>> {
        Ok(self.envs[0].render())
    }

    fn close(&mut self) {
        for env in &mut self.envs {
            env.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::AgentTransition;
    use crate::spaces::{Box as BoxSpace, Discrete};

    /// Three slots; on even steps only agent 2 acts, otherwise 1 then 0.
    struct Alternating {
        t: u32,
    }

    impl Alternating {
        fn report(&self) -> MultiAgentStep {
            let ids: Vec<u32> = if self.t % 2 == 0 { vec![2] } else { vec![1, 0] };
            MultiAgentStep::new(
                ids.into_iter()
                    .map(|agent_id| AgentTransition {
                        agent_id,
                        observation: ArrayD::from_elem(IxDyn(&[2]), agent_id as f32),
                        reward: self.t as f32,
                        terminated: self.t >= 3,
                        truncated: false,
                        info: Info::new(),
                    })
                    .collect(),
            )
        }
    }

    impl MultiAgentEnv for Alternating {
        fn observation_space(&self) -> DynSpace {
            DynSpace::Box(BoxSpace::uniform(&[2], 0.0, 10.0))
        }
        fn action_space(&self) -> DynSpace {
            DynSpace::Discrete(Discrete::new(2))
        }
        fn num_agents(&self) -> usize {
            3
        }
        fn reset(&mut self, _seed: Option<u64>) -> MultiAgentStep {
            self.t = 0;
            self.report()
        }
        fn step(&mut self, actions: &HashMap<u32, ArrayD<f32>>) -> MultiAgentStep {
            assert!(!actions.is_empty());
            self.t += 1;
            self.report()
        }
    }

    #[test]
    fn test_recv_without_request_fails() {
        let mut env = Serial::new(|| Alternating { t: 0 }, 2);
        assert!(env.recv().is_err());
    }

    #[test]
    fn test_rows_are_padded_and_ids_unique() {
        let mut env = Serial::new(|| Alternating { t: 0 }, 2);
        assert_eq!(env.num_agents(), 6);
        env.async_reset(Some(1)).unwrap();
        let batch = env.recv().unwrap();
        batch.validate().unwrap();
        assert_eq!(batch.num_rows(), 6);
        assert_eq!(batch.num_active(), 2);
        assert_eq!(&batch.mask[..3], &[true, true, false]);
        assert_eq!(&batch.env_ids[..2], &[2, 5]);

        let mut ids = batch.env_ids.clone();
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);

        env.step(&Tensor::zeros([6], (Kind::Int64, Device::Cpu))).unwrap();
        let batch = env.recv().unwrap();
        assert_eq!(batch.num_active(), 4);
        assert_eq!(&batch.env_ids[..4], &[1, 0, 4, 3]);
        assert_eq!(batch.rewards[0], 1.0);
    }

    #[test]
    fn test_finished_env_is_reset_on_step() {
        let mut env = Serial::new(|| Alternating { t: 0 }, 1);
        env.async_reset(None).unwrap();
        let actions = Tensor::zeros([3], (Kind::Int64, Device::Cpu));
        for _ in 0..3 {
            env.recv().unwrap();
            env.step(&actions).unwrap();
        }
        let batch = env.recv().unwrap();
        assert!(batch.is_idle());
        env.step(&actions).unwrap();
        let batch = env.recv().unwrap();
        assert_eq!(batch.rewards[0], 0.0);
        assert!(!batch.is_idle());
    }

    /// One slot that goes quiet for a single tick after reset
    struct Quiet {
        t: u32,
    }

    impl MultiAgentEnv for Quiet {
        fn observation_space(&self) -> DynSpace {
            DynSpace::Box(BoxSpace::uniform(&[2], 0.0, 10.0))
        }
        fn action_space(&self) -> DynSpace {
            DynSpace::Discrete(Discrete::new(2))
        }
        fn num_agents(&self) -> usize {
            1
        }
        fn reset(&mut self, _seed: Option<u64>) -> MultiAgentStep {
            self.t = 0;
            self.step(&HashMap::new())
        }
        fn step(&mut self, _actions: &HashMap<u32, ArrayD<f32>>) -> MultiAgentStep {
            let report = if self.t == 1 {
                Vec::new()
            } else {
                vec![AgentTransition {
                    agent_id: 0,
                    observation: ArrayD::zeros(IxDyn(&[2])),
                    reward: self.t as f32,
                    terminated: false,
                    truncated: false,
                    info: Info::new(),
                }]
            };
            self.t += 1;
            MultiAgentStep::new(report)
        }
    }

    #[test]
    fn test_quiet_env_is_stepped_not_reset() {
        let mut env = Serial::new(|| Quiet { t: 0 }, 1);
        env.async_reset(None).unwrap();
        env.recv().unwrap();
        env.step(&Tensor::zeros([1], (Kind::Int64, Device::Cpu))).unwrap();

        let batch = env.recv().unwrap();
        assert_eq!(batch.num_active(), 0);
        env.step(&Tensor::zeros([0], (Kind::Float, Device::Cpu))).unwrap();

        let batch = env.recv().unwrap();
        assert_eq!(batch.num_active(), 1);
        assert_eq!(batch.rewards[0], 2.0);
    }
}
