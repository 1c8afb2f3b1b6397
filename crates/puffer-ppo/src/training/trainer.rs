//! Main PPO trainer.

use super::config::TrainerConfig;
use super::losses::Losses;
use super::optimizer::Adam;
use super::ppo::{
    clip_fraction, compute_gae, compute_segmented_gae, explained_variance, kl_estimates,
    normalize_advantages, ppo_policy_loss, ppo_value_loss,
};
use super::stats::StatsAggregator;
use crate::buffer::{ExperienceBuffer, RecurrentArena};
use crate::checkpoint::{CheckpointManager, Checkpointable, TrainerState};
use crate::env::{Frame, InfoValue};
use crate::log::{MetricLogger, MetricsSnapshot};
use crate::monitor::{Profile, Section, Utilization};
use crate::policy::{HasVarStore, Policy, PolicyOutput, RecurrentState};
use crate::utils::{abbreviate, set_seed, synchronize};
use crate::vector::{RecvBatch, VecEnv};
use crate::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tch::{Device, Kind, Tensor};

/// Info key an environment sets when an agent reached its goal
pub const GOAL_KEY: &str = "goal";

/// Main trainer for the PPO algorithm.
///
/// One epoch is [`Trainer::evaluate`] (fill the buffer from the vectorized
/// environment) followed by [`Trainer::train`] (sort, GAE, clipped update).
pub struct Trainer<P: Policy + HasVarStore, V: VecEnv> {
    config: TrainerConfig,
    vecenv: V,
    policy: P,
    optimizer: Adam,
    buffer: ExperienceBuffer,
    checkpoints: CheckpointManager,
    logger: Box<dyn MetricLogger>,
    profile: Profile,
    utilization: Utilization,
    aggregator: StatsAggregator,
    /// Reduced environment statistics of the last rollout
    stats: BTreeMap<String, f64>,
    losses: Losses,
    global_step: u64,
    epoch: u64,
    /// A reset or step has been issued and not yet received
    request_pending: bool,
    obs_dims: Vec<i64>,
    is_discrete: bool,
    message: String,
    progress: Option<ProgressBar>,
}

impl<P: Policy + HasVarStore, V: VecEnv> Trainer<P, V> {
    /// Create a new trainer and issue the first environment reset
    pub fn new(
        config: TrainerConfig,
        mut vecenv: V,
        policy: P,
        logger: Box<dyn MetricLogger>,
    ) -> Result<Self> {
        config.validate()?;
        set_seed(config.seed, config.torch_deterministic);

        let obs_space = vecenv.single_observation_space();
        let action_space = vecenv.action_space();
        let mut buffer = ExperienceBuffer::new(
            config.batch_size,
            config.minibatch_size,
            config.bptt_horizon,
            &obs_space,
            &action_space,
            config.device,
            config.cpu_offload,
        )?;
        if let Some((num_layers, hidden_size)) = policy.recurrent_shape() {
            buffer = buffer.with_recurrent(num_layers, vecenv.num_agents(), hidden_size);
        }

        let optimizer = Adam::new(policy.var_store(), config.learning_rate);
        let utilization = Utilization::start(Duration::from_secs(1), 20)?;
        let checkpoints = CheckpointManager::new(&config.data_dir, &config.exp_id);

        let num_parameters = policy.num_parameters();
        tracing::info!(
            env = %config.env_name,
            parameters = num_parameters,
            agents = vecenv.num_agents(),
            device = ?config.device,
            "Created trainer"
        );

        vecenv.async_reset(Some(config.seed))?;

        Ok(Self {
            obs_dims: obs_space.dims(),
            is_discrete: action_space.is_discrete(),
            message: format!("Model Size: {} parameters", abbreviate(num_parameters as f64)),
            config,
            vecenv,
            policy,
            optimizer,
            buffer,
            checkpoints,
            logger,
            profile: Profile::new(),
            utilization,
            aggregator: StatsAggregator::new(),
            stats: BTreeMap::new(),
            losses: Losses::default(),
            global_step: 0,
            epoch: 0,
            request_pending: true,
            progress: None,
        })
    }

    /// Show a progress bar over `total_timesteps`
    pub fn with_progress(mut self) -> Self {
        let pb = ProgressBar::new(self.config.total_timesteps);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        self.progress = Some(pb);
        self
    }

    /// Train until `total_timesteps` agent steps have been collected
    pub fn run(&mut self) -> Result<()> {
        self.report(true);
        while !self.done_training() {
            self.evaluate()?;
            self.train()?;
        }
        Ok(())
    }

    pub fn done_training(&self) -> bool {
        self.global_step >= self.config.total_timesteps
    }

    /// Collect transitions until the buffer is full.
    ///
    /// Batches with no active agent, or whose active agents are all done,
    /// are answered with a full reset instead of a step.
    pub fn evaluate(&mut self) -> Result<&BTreeMap<String, f64>> {
        let eval_start = Instant::now();
        let device = self.config.device;

        if !self.request_pending {
            // Seeded once in `new`; later resets continue each env's stream
            self.vecenv.async_reset(None)?;
            self.request_pending = true;
        }

        while !self.buffer.full() {
            let t = Instant::now();
            let batch = self.vecenv.recv()?;
            self.request_pending = false;
            self.profile.add(Section::Env, t.elapsed());

            let t = Instant::now();
            batch.validate()?;
            let n = batch.active_prefix()?;
            if n == 0 {
                self.vecenv.async_reset(None)?;
                self.request_pending = true;
                self.profile.add(Section::EvalMisc, t.elapsed());
                continue;
            }
            self.global_step += n as u64;
            let obs = batch
                .observations
                .to_tensor(&self.obs_dims, device)?
                .narrow(0, 0, n as i64);
            let ids = Tensor::from_slice(&batch.env_ids[..n]).to_device(device);
            self.profile.add(Section::EvalMisc, t.elapsed());

            let t = Instant::now();
            let out = self.infer(&obs, &ids, &batch, n);
            synchronize(device);
            self.profile.add(Section::EvalForward, t.elapsed());

            let t = Instant::now();
            let value = out.value.reshape([-1]);
            self.buffer.store(
                &obs,
                &value,
                &out.action,
                &out.log_prob,
                &batch.rewards[..n],
                &batch.dones[..n],
                &batch.truncated[..n],
                &batch.env_ids[..n],
                &batch.mask[..n],
            )?;
            for (info, _) in batch.infos.iter().zip(&batch.mask).filter(|(_, &m)| m) {
                self.aggregator.record(info);
            }
            self.profile.add(Section::EvalMisc, t.elapsed());

            let t = Instant::now();
            if batch.is_idle() {
                self.vecenv.async_reset(None)?;
            } else {
                self.vecenv.step(&out.action)?;
            }
            self.request_pending = true;
            self.profile.add(Section::Env, t.elapsed());
        }

        let t = Instant::now();
        let reduced = self.aggregator.reduce();
        self.stats = reduced.scalars;
        self.stats
            .insert("done".to_string(), self.buffer.done_count() as f64);
        for (key, frame) in reduced.media {
            self.logger
                .log_media(&format!("Media/{}", key), &[frame], self.global_step);
        }
        if self.config.eval_interval > 0 && self.epoch % self.config.eval_interval == 0 {
            self.eval_rollout()?;
        }
        self.profile.add(Section::EvalMisc, t.elapsed());
        self.profile.add(Section::Eval, eval_start.elapsed());

        Ok(&self.stats)
    }

    /// Sample actions for the active rows, reading and writing back the
    /// recurrent state of exactly those agents
    fn infer(&mut self, obs: &Tensor, ids: &Tensor, batch: &RecvBatch, n: usize) -> PolicyOutput {
        let policy = &self.policy;
        match self.buffer.recurrent_mut() {
            Some(arena) => {
                let out = tch::no_grad(|| {
                    let state = arena.read(ids);
                    policy.evaluate(obs, Some(&state), None)
                });
                if let Some(state) = out.state.as_ref() {
                    arena.write(ids, &reset_done(state, &batch.dones[..n]));
                }
                out
            }
            None => tch::no_grad(|| policy.evaluate(obs, None, None)),
        }
    }

    /// Run one update over the full buffer
    pub fn train(&mut self) -> Result<Losses> {
        let train_start = Instant::now();
        let device = self.config.device;

        let t = Instant::now();
        let order = self.buffer.sort_training_data()?;
        let (dones, values, rewards) = self.buffer.gae_inputs(&order);
        let (gamma, gae_lambda) = (self.config.gamma as f32, self.config.gae_lambda as f32);
        let advantages = if self.config.gae_agent_reset {
            compute_segmented_gae(
                dones.view(),
                values.view(),
                rewards.view(),
                &order.segments(),
                gamma,
                gae_lambda,
            )
        } else {
            compute_gae(dones.view(), values.view(), rewards.view(), gamma, gae_lambda)
        };
        let batch = self.buffer.flatten_batch(&order, &advantages)?;
        self.profile.add(Section::TrainMisc, t.elapsed());

        let recurrent = self.policy.recurrent_shape().is_some();
        let rows = self.buffer.minibatch_rows() as i64;
        let bptt = self.buffer.bptt_horizon() as i64;
        let mut flat_obs_shape = vec![-1i64];
        flat_obs_shape.extend_from_slice(&self.obs_dims);
        let vf_clip = self.config.clip_vloss.then_some(self.config.vf_clip_coef);

        let mut totals = Losses::default();
        let mut executed = 0usize;
        'update: for update_epoch in 0..self.config.update_epochs {
            let mut lstm_state: Option<RecurrentState> = None;
            for mb in 0..batch.num_minibatches() {
                let t = Instant::now();
                let minibatch = batch.minibatch(mb);
                let obs = minibatch.obs.to_device(device);
                let obs = if recurrent {
                    obs.reshape([rows, bptt, -1])
                } else {
                    obs.reshape(&flat_obs_shape)
                };
                let actions = if self.is_discrete {
                    minibatch.actions.reshape([-1])
                } else {
                    minibatch.actions.reshape([rows * bptt, -1])
                };
                let old_logprobs = minibatch.logprobs.reshape([-1]);
                let old_values = minibatch.values.reshape([-1]);
                let returns = minibatch.returns.reshape([-1]);
                let adv = minibatch.advantages.reshape([-1]);
                self.profile.add(Section::TrainMisc, t.elapsed());

                let t = Instant::now();
                let out = self
                    .policy
                    .evaluate(&obs, lstm_state.as_ref(), Some(&actions));
                lstm_state = out.state.as_ref().map(|(h, c)| (h.detach(), c.detach()));
                synchronize(device);
                self.profile.add(Section::TrainForward, t.elapsed());

                let t = Instant::now();
                let logratio = &out.log_prob - &old_logprobs;
                let ratio = logratio.exp();
                let (old_approx_kl, approx_kl) = kl_estimates(&logratio.detach(), &ratio.detach());
                let clipfrac = clip_fraction(&ratio.detach(), self.config.clip_coef);

                let adv = if self.config.norm_adv {
                    normalize_advantages(&adv)
                } else {
                    adv
                };
                let pg_loss = ppo_policy_loss(&adv, &ratio, self.config.clip_coef);
                let v_loss = ppo_value_loss(&out.value.reshape([-1]), &old_values, &returns, vf_clip);
                let entropy_loss = out.entropy.mean(Kind::Float);
                let loss = &pg_loss - &entropy_loss * self.config.ent_coef + &v_loss * self.config.vf_coef;
                self.profile.add(Section::TrainMisc, t.elapsed());

                let t = Instant::now();
                self.optimizer.zero_grad();
                loss.backward();
                self.optimizer.clip_grad_norm(self.config.max_grad_norm);
                self.optimizer.step();
                synchronize(device);
                self.profile.add(Section::Learn, t.elapsed());

                let t = Instant::now();
                let approx_kl = approx_kl.double_value(&[]);
                totals += Losses {
                    policy_loss: pg_loss.double_value(&[]),
                    value_loss: v_loss.double_value(&[]),
                    entropy: entropy_loss.double_value(&[]),
                    old_approx_kl: old_approx_kl.double_value(&[]),
                    approx_kl,
                    clipfrac: clipfrac.double_value(&[]),
                    explained_variance: 0.0,
                };
                executed += 1;
                self.profile.add(Section::TrainMisc, t.elapsed());

                if let Some(target_kl) = self.config.target_kl {
                    if approx_kl > target_kl {
                        tracing::info!(
                            update_epoch,
                            minibatch = mb,
                            kl = approx_kl,
                            target = target_kl,
                            "Early stopping due to high KL divergence"
                        );
                        break 'update;
                    }
                }
            }
        }

        let mut losses = if executed > 0 {
            totals / executed as f64
        } else {
            Losses::default()
        };
        losses.explained_variance = explained_variance(&batch.host_values, &batch.host_returns);
        if !losses.policy_loss.is_finite() || !losses.value_loss.is_finite() {
            tracing::warn!(epoch = self.epoch, ?losses, "Non-finite loss");
        }
        self.losses = losses;

        if self.config.anneal_lr {
            let total = self.config.total_timesteps.max(1) as f64;
            let frac = (1.0 - self.global_step as f64 / total).clamp(0.0, 1.0);
            self.optimizer.set_lr(frac * self.config.learning_rate);
        }

        self.epoch += 1;
        self.profile.add(Section::Train, train_start.elapsed());

        let done_training = self.done_training();
        if self.epoch % self.config.checkpoint_interval == 0 || done_training {
            self.save_checkpoint()?;
        }
        self.report(done_training);

        Ok(losses)
    }

    /// Play one episode from a fresh reset and measure how many of the
    /// initially active agents report reaching their goal.
    ///
    /// Rendered frames go to the logger's media channel. Leaves the
    /// environment without a pending request, so the next rollout starts
    /// from a reset.
    pub fn eval_rollout(&mut self) -> Result<f64> {
        let device = self.config.device;
        let mut arena = self.policy.recurrent_shape().map(|(layers, hidden)| {
            RecurrentArena::new(layers, self.vecenv.num_agents() as i64, hidden, device)
        });

        if self.request_pending {
            // Drain the outstanding request before resetting
            self.vecenv.recv()?;
        }
        self.vecenv.async_reset(None)?;
        self.request_pending = false;
        let mut batch = self.vecenv.recv()?;

        let initial: Vec<i64> = batch.env_ids[..batch.active_prefix()?].to_vec();
        let mut reached: HashMap<i64, bool> = initial.iter().map(|&id| (id, false)).collect();
        let mut frames: Vec<Frame> = Vec::new();

        for _ in 0..self.config.eval_max_steps {
            let n = batch.active_prefix()?;
            for (row, info) in batch.infos.iter().enumerate().take(n) {
                if let Some(flag) = reached.get_mut(&batch.env_ids[row]) {
                    *flag = matches!(info.get(GOAL_KEY), Some(InfoValue::Scalar(v)) if *v > 0.0);
                }
            }
            if n > 0 && batch.is_idle() {
                break;
            }
            if n == 0 {
                // Nobody to act for; keep stepping until agents report again
                self.vecenv.step(&Tensor::zeros([0], (Kind::Float, Device::Cpu)))?;
                batch = self.vecenv.recv()?;
                continue;
            }

            let obs = batch
                .observations
                .to_tensor(&self.obs_dims, device)?
                .narrow(0, 0, n as i64);
            let ids = Tensor::from_slice(&batch.env_ids[..n]).to_device(device);
            let policy = &self.policy;
            let out = tch::no_grad(|| match arena.as_ref() {
                Some(arena) => policy.evaluate(&obs, Some(&arena.read(&ids)), None),
                None => policy.evaluate(&obs, None, None),
            });
            if let (Some(arena), Some(state)) = (arena.as_mut(), out.state.as_ref()) {
                arena.write(&ids, &reset_done(state, &batch.dones[..n]));
            }

            self.vecenv.step(&out.action)?;
            if let Some(frame) = self.vecenv.render()? {
                frames.push(frame);
            }
            batch = self.vecenv.recv()?;
        }

        let goal_reach = if initial.is_empty() {
            0.0
        } else {
            reached.values().filter(|&&r| r).count() as f64 / initial.len() as f64
        };
        self.stats.insert("eval_goal_reach".to_string(), goal_reach);
        if !frames.is_empty() {
            self.logger
                .log_media(&format!("eval/{}", self.epoch), &frames, self.global_step);
        }
        tracing::info!(epoch = self.epoch, goal_reach, frames = frames.len(), "Evaluation rollout");

        Ok(goal_reach)
    }

    /// Save weights for the current epoch and the shared trainer state.
    ///
    /// Returns `None` when this epoch was already saved.
    pub fn save_checkpoint(&mut self) -> Result<Option<PathBuf>> {
        let Some(path) = self
            .checkpoints
            .save_model(self.policy.var_store(), self.epoch)?
        else {
            return Ok(None);
        };
        let state = TrainerState::new(
            self.global_step,
            self.epoch,
            CheckpointManager::model_name(self.epoch),
            self.config.exp_id.clone(),
        )
        .with_optimizer_state(self.optimizer.save_state()?);
        self.checkpoints.save_state(&state)?;
        Ok(Some(path))
    }

    /// Resume from the experiment directory if it holds a checkpoint.
    ///
    /// Returns false, leaving the trainer untouched, when there is nothing
    /// to resume.
    pub fn try_load_checkpoint(&mut self) -> Result<bool> {
        let Some(state) = self.checkpoints.try_load(self.policy.var_store_mut())? else {
            return Ok(false);
        };
        self.optimizer.load_state(&state.optimizer_state)?;
        self.global_step = state.global_step;
        self.epoch = state.epoch;
        self.message = format!("Resumed from {}", state.model_name);
        Ok(true)
    }

    /// Publish a snapshot if a reporting tick is due, or unconditionally
    /// with `force`
    fn report(&mut self, force: bool) {
        let due = self.profile.update(
            self.global_step,
            self.config.total_timesteps,
            self.config.dashboard_interval_s,
        );
        if !(due || force) {
            return;
        }
        let snapshot = self.snapshot();
        self.logger.log_snapshot(&snapshot);

        if let Some(ref pb) = self.progress {
            pb.set_position(self.global_step.min(self.config.total_timesteps));
            pb.set_message(format!(
                "Loss: {:.4} SPS: {}",
                self.losses.policy_loss,
                abbreviate(self.profile.sps())
            ));
        }
    }

    /// Current metrics as an immutable value
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            env_name: self.config.env_name.clone(),
            num_agents: self.vecenv.num_agents(),
            global_step: self.global_step,
            epoch: self.epoch,
            learning_rate: self.optimizer.lr(),
            sps: self.profile.sps(),
            uptime: self.profile.uptime(),
            remaining: self.profile.remaining(),
            times: self.profile.times(),
            utilization: self.utilization.snapshot(),
            losses: self.losses,
            stats: self.stats.clone(),
            message: self.message.clone(),
        }
    }

    /// Shut down the environment, the utilization sampler and the sinks
    pub fn close(mut self) {
        self.vecenv.close();
        self.utilization.stop();
        self.logger.close();
        if let Some(pb) = self.progress.take() {
            pb.finish_with_message("Training complete");
        }
        tracing::info!(epoch = self.epoch, step = self.global_step, "Closed trainer");
    }

    /// Get current global step
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Get current epoch
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Loss statistics of the last update
    pub fn losses(&self) -> &Losses {
        &self.losses
    }

    /// Environment statistics of the last rollout
    pub fn stats(&self) -> &BTreeMap<String, f64> {
        &self.stats
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    pub fn buffer(&self) -> &ExperienceBuffer {
        &self.buffer
    }

    pub fn device(&self) -> Device {
        self.config.device
    }
}

/// Zero the recurrent state of agents whose episode just ended
fn reset_done((h, c): &RecurrentState, dones: &[bool]) -> RecurrentState {
    let keep: Vec<f32> = dones.iter().map(|&d| if d { 0.0 } else { 1.0 }).collect();
    let keep = Tensor::from_slice(&keep)
        .reshape([1, dones.len() as i64, 1])
        .to_device(h.device());
    (h * &keep, c * &keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PufferError;
    use crate::env::{AgentTransition, Info, MultiAgentEnv, MultiAgentStep};
    use crate::log::NoOpLogger;
    use crate::policy::{LstmPolicy, MlpConfig, MlpPolicy};
    use crate::spaces::{Box as BoxSpace, Discrete, DynSpace};
    use crate::vector::Serial;
    use ndarray::{ArrayD, IxDyn};
    use tempfile::tempdir;

    /// Two agents, two-step episodes; agent 1 reports before agent 0 and
    /// earns the reward.
    struct Pairs {
        t: u32,
    }

    impl Pairs {
        fn report(&self) -> MultiAgentStep {
            let done = self.t >= 2;
            let agents = [1u32, 0]
                .iter()
                .map(|&id| {
                    let mut info = Info::new();
                    if done {
                        info.insert(GOAL_KEY.to_string(), InfoValue::Scalar(id as f64));
                    }
                    AgentTransition {
                        agent_id: id,
                        observation: ArrayD::from_shape_vec(IxDyn(&[2]), vec![id as f32, self.t as f32])
                            .unwrap(),
                        reward: if done && id == 1 { 1.0 } else { 0.0 },
                        terminated: done,
                        truncated: false,
                        info,
                    }
                })
                .collect();
            MultiAgentStep::new(agents)
        }
    }

    impl MultiAgentEnv for Pairs {
        fn observation_space(&self) -> DynSpace {
            DynSpace::Box(BoxSpace::uniform(&[2], 0.0, 2.0))
        }

        fn action_space(&self) -> DynSpace {
            DynSpace::Discrete(Discrete::new(2))
        }

        fn num_agents(&self) -> usize {
            2
        }

        fn reset(&mut self, _seed: Option<u64>) -> MultiAgentStep {
            self.t = 0;
            self.report()
        }

        fn step(&mut self, _actions: &HashMap<u32, ArrayD<f32>>) -> MultiAgentStep {
            self.t += 1;
            self.report()
        }
    }

    fn config(dir: &std::path::Path) -> TrainerConfig {
        let mut config = TrainerConfig::default()
            .with_batch(16, 8, 2)
            .with_timesteps(32)
            .with_checkpoint_dir(dir, "test");
        config.update_epochs = 2;
        config
    }

    /// Pairs-shaped episodes whose observations carry an episode counter:
    /// a seeded reset sets it, an unseeded one advances it.
    struct Counting {
        t: u32,
        episode: f32,
    }

    impl MultiAgentEnv for Counting {
        fn observation_space(&self) -> DynSpace {
            DynSpace::Box(BoxSpace::uniform(&[2], 0.0, 100.0))
        }

        fn action_space(&self) -> DynSpace {
            DynSpace::Discrete(Discrete::new(2))
        }

        fn num_agents(&self) -> usize {
            2
        }

        fn reset(&mut self, seed: Option<u64>) -> MultiAgentStep {
            self.t = 0;
            self.episode = match seed {
                Some(seed) => seed as f32,
                None => self.episode + 1.0,
            };
            self.report()
        }

        fn step(&mut self, _actions: &HashMap<u32, ArrayD<f32>>) -> MultiAgentStep {
            self.t += 1;
            self.report()
        }
    }

    impl Counting {
        fn report(&self) -> MultiAgentStep {
            let done = self.t >= 2;
            let agents = (0..2u32)
                .map(|id| AgentTransition {
                    agent_id: id,
                    observation: ArrayD::from_shape_vec(IxDyn(&[2]), vec![id as f32, self.episode])
                        .unwrap(),
                    reward: 0.0,
                    terminated: done,
                    truncated: false,
                    info: Info::new(),
                })
                .collect();
            MultiAgentStep::new(agents)
        }
    }

    /// Both agents act at t = 0, 2 and 3; nobody reports at t = 1.
    /// Episodes end at t = 3 with only agent 0 at its goal.
    struct Gappy {
        t: u32,
    }

    impl MultiAgentEnv for Gappy {
        fn observation_space(&self) -> DynSpace {
            DynSpace::Box(BoxSpace::uniform(&[2], 0.0, 3.0))
        }

        fn action_space(&self) -> DynSpace {
            DynSpace::Discrete(Discrete::new(2))
        }

        fn num_agents(&self) -> usize {
            2
        }

        fn reset(&mut self, _seed: Option<u64>) -> MultiAgentStep {
            self.t = 0;
            self.report()
        }

        fn step(&mut self, _actions: &HashMap<u32, ArrayD<f32>>) -> MultiAgentStep {
            self.t += 1;
            self.report()
        }
    }

    impl Gappy {
        fn report(&self) -> MultiAgentStep {
            if self.t == 1 {
                return MultiAgentStep::default();
            }
            let done = self.t >= 3;
            let agents = (0..2u32)
                .map(|id| {
                    let mut info = Info::new();
                    if done {
                        let goal = if id == 0 { 1.0 } else { 0.0 };
                        info.insert(GOAL_KEY.to_string(), InfoValue::Scalar(goal));
                    }
                    AgentTransition {
                        agent_id: id,
                        observation: ArrayD::from_shape_vec(IxDyn(&[2]), vec![id as f32, self.t as f32])
                            .unwrap(),
                        reward: 0.0,
                        terminated: done,
                        truncated: false,
                        info,
                    }
                })
                .collect();
            MultiAgentStep::new(agents)
        }
    }

    fn trainer_on<E, F>(config: TrainerConfig, make: F) -> Trainer<MlpPolicy, Serial<E>>
    where
        E: MultiAgentEnv,
        F: Fn() -> E,
    {
        let vecenv = Serial::new(make, 2);
        let mlp = MlpConfig {
            hidden_size: 16,
            ..Default::default()
        };
        let policy = MlpPolicy::new(2, 2, false, mlp, Device::Cpu);
        Trainer::new(config, vecenv, policy, Box::new(NoOpLogger)).unwrap()
    }

    fn mlp_trainer(config: TrainerConfig) -> Trainer<MlpPolicy, Serial<Pairs>> {
        trainer_on(config, || Pairs { t: 0 })
    }

    #[test]
    fn test_rejects_bad_sizes() {
        let dir = tempdir().unwrap();
        let config = config(dir.path()).with_batch(16, 6, 2);
        let vecenv = Serial::new(|| Pairs { t: 0 }, 2);
        let policy = MlpPolicy::new(2, 2, false, MlpConfig::default(), Device::Cpu);
        let result = Trainer::new(config, vecenv, policy, Box::new(NoOpLogger));
        assert!(matches!(result, Err(PufferError::Config(_))));
    }

    #[test]
    fn test_evaluate_fills_buffer() {
        let dir = tempdir().unwrap();
        let mut trainer = mlp_trainer(config(dir.path()));
        let stats = trainer.evaluate().unwrap().clone();

        assert!(trainer.buffer().full());
        // 4 active agents per receive, 4 receives
        assert_eq!(trainer.global_step(), 16);
        // Episodes end on every third receive; one of them fits in the rollout
        assert_eq!(stats["done"], 4.0);
        assert!(stats.contains_key(GOAL_KEY));
    }

    #[test]
    fn test_train_updates_and_anneals() {
        let dir = tempdir().unwrap();
        let mut trainer = mlp_trainer(config(dir.path()));
        trainer.evaluate().unwrap();
        let losses = trainer.train().unwrap();

        assert_eq!(trainer.epoch(), 1);
        assert!(losses.policy_loss.is_finite());
        assert!(losses.value_loss.is_finite());
        assert!((0.0..=1.0).contains(&losses.clipfrac));
        // 2 update epochs of 2 minibatches
        assert_eq!(trainer.optimizer().steps(), 4);
        let expected_lr = 0.5 * trainer.config().learning_rate;
        assert!((trainer.optimizer().lr() - expected_lr).abs() < 1e-12);
    }

    #[test]
    fn test_kl_early_stop_halts_update() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        // The KL estimate is never negative, so the first minibatch stops
        config.target_kl = Some(-1.0);
        let mut trainer = mlp_trainer(config);
        trainer.evaluate().unwrap();
        trainer.train().unwrap();
        assert_eq!(trainer.optimizer().steps(), 1);
    }

    #[test]
    fn test_run_checkpoints_and_resumes() {
        let dir = tempdir().unwrap();
        let mut trainer = mlp_trainer(config(dir.path()));
        trainer.run().unwrap();
        assert!(trainer.done_training());
        assert_eq!(trainer.epoch(), 2);
        let saved_opt = trainer.optimizer().state().unwrap();
        let step = trainer.global_step();
        trainer.close();

        let manager = CheckpointManager::new(dir.path(), "test");
        assert!(manager.model_path(2).exists());

        let mut resumed = mlp_trainer(config(dir.path()));
        assert!(resumed.try_load_checkpoint().unwrap());
        assert_eq!(resumed.epoch(), 2);
        assert_eq!(resumed.global_step(), step);
        assert_eq!(resumed.optimizer().state().unwrap(), saved_opt);
    }

    #[test]
    fn test_fresh_run_has_nothing_to_resume() {
        let dir = tempdir().unwrap();
        let mut trainer = mlp_trainer(config(dir.path()));
        assert!(!trainer.try_load_checkpoint().unwrap());
        assert_eq!(trainer.epoch(), 0);
    }

    #[test]
    fn test_eval_rollout_goal_reach() {
        let dir = tempdir().unwrap();
        let mut trainer = mlp_trainer(config(dir.path()));
        // Agent 1 of each env reaches its goal, agent 0 never does
        let reach = trainer.eval_rollout().unwrap();
        assert!((reach - 0.5).abs() < 1e-12);
        assert_eq!(trainer.stats()["eval_goal_reach"], reach);
        // Collection resumes from a reset afterwards
        trainer.evaluate().unwrap();
        assert!(trainer.buffer().full());
    }

    #[test]
    fn test_recurrent_policy_cycle() {
        let dir = tempdir().unwrap();
        let vecenv = Serial::new(|| Pairs { t: 0 }, 2);
        let policy = LstmPolicy::new(2, 2, false, 8, 1, Device::Cpu);
        let mut trainer = Trainer::new(config(dir.path()), vecenv, policy, Box::new(NoOpLogger)).unwrap();
        assert_eq!(trainer.buffer().recurrent().map(|a| a.total_agents()), Some(4));

        trainer.evaluate().unwrap();
        let losses = trainer.train().unwrap();
        assert!(losses.policy_loss.is_finite());
    }

    #[test]
    fn test_snapshot_reflects_progress() {
        let dir = tempdir().unwrap();
        let mut trainer = mlp_trainer(config(dir.path()));
        trainer.evaluate().unwrap();
        trainer.train().unwrap();
        let snapshot = trainer.snapshot();
        assert_eq!(snapshot.epoch, 1);
        assert_eq!(snapshot.global_step, 16);
        assert_eq!(snapshot.num_agents, 4);
        assert!(snapshot.message.starts_with("Model Size"));
    }

    #[test]
    fn test_rollouts_after_evaluation_are_not_replayed() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.eval_interval = 1;
        let mut trainer = trainer_on(config, || Counting { t: 0, episode: 0.0 });

        trainer.evaluate().unwrap();
        let first = trainer.buffer().obs.copy();
        trainer.train().unwrap();
        trainer.evaluate().unwrap();
        let second = trainer.buffer().obs.copy();

        assert!(!first.equal(&second));
    }

    #[test]
    fn test_empty_batches_are_reset_not_stored() {
        let dir = tempdir().unwrap();
        let mut trainer = trainer_on(config(dir.path()), || Gappy { t: 0 });
        trainer.evaluate().unwrap();

        // Only the reset receives carry agents: 4 transitions each
        assert!(trainer.buffer().full());
        assert_eq!(trainer.global_step(), trainer.buffer().len() as u64);
        let steps: std::collections::BTreeSet<u64> =
            trainer.buffer().sort_keys().iter().map(|&(_, step)| step).collect();
        assert_eq!(steps.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(trainer.stats()["done"], 0.0);
    }

    #[test]
    fn test_eval_rollout_steps_through_empty_batches() {
        let dir = tempdir().unwrap();
        let mut trainer = trainer_on(config(dir.path()), || Gappy { t: 0 });
        let reach = trainer.eval_rollout().unwrap();
        assert!((reach - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_recurrent_eval_rollout_steps_through_empty_batches() {
        let dir = tempdir().unwrap();
        let vecenv = Serial::new(|| Gappy { t: 0 }, 2);
        let policy = LstmPolicy::new(2, 2, false, 8, 1, Device::Cpu);
        let mut trainer = Trainer::new(config(dir.path()), vecenv, policy, Box::new(NoOpLogger)).unwrap();
        let reach = trainer.eval_rollout().unwrap();
        assert!((reach - 0.5).abs() < 1e-12);
    }
}
