//! puffer-ppo CLI
//!
//! Command-line driver for training PPO agents on the synthetic
//! multi-agent environments.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ndarray::{ArrayD, IxDyn};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use puffer_ppo::checkpoint::CheckpointManager;
use puffer_ppo::env::{InfoValue, MultiAgentEnv, MultiAgentStep};
use puffer_ppo::log::{CompositeLogger, ConsoleLogger};
use puffer_ppo::policy::{HasVarStore, LstmPolicy, MlpConfig, MlpPolicy, Policy};
use puffer_ppo::training::{Trainer, TrainerConfig};
use puffer_ppo::vector::{AsyncVecEnv, Serial, VecEnv};
use puffer_ppo_envs::{make, Rendezvous, ENV_NAMES};

#[derive(Parser)]
#[command(name = "puffer-ppo")]
#[command(version, about = "PPO training for asynchronous multi-agent simulators", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train an agent
    Train(TrainArgs),

    /// Run an environment with a scripted policy
    Demo {
        /// Environment name
        #[arg(default_value = "rendezvous")]
        env: String,

        /// Number of steps
        #[arg(long, default_value = "32")]
        steps: usize,

        /// Agents per environment
        #[arg(long, default_value = "4")]
        agents: usize,

        /// Ticks per episode
        #[arg(long, default_value = "16")]
        episode_len: u32,
    },

    /// List available environments
    List,

    /// List saved checkpoints of an experiment
    Checkpoints {
        #[arg(long, default_value = "experiments")]
        data_dir: PathBuf,

        #[arg(long, default_value = "ppo")]
        exp_id: String,
    },
}

#[derive(clap::Args)]
struct TrainArgs {
    /// Environment name
    #[arg(default_value = "rendezvous")]
    env: String,

    /// JSON file with trainer settings; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Total agent steps
    #[arg(long)]
    timesteps: Option<u64>,

    /// Learning rate
    #[arg(long)]
    lr: Option<f64>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    minibatch_size: Option<usize>,

    #[arg(long)]
    bptt: Option<usize>,

    #[arg(long)]
    update_epochs: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Number of environments
    #[arg(long, default_value = "4")]
    num_envs: usize,

    /// Agents per environment
    #[arg(long, default_value = "4")]
    agents: usize,

    /// Ticks per episode
    #[arg(long, default_value = "16")]
    episode_len: u32,

    /// Policy type (mlp, lstm)
    #[arg(long, default_value = "mlp")]
    policy: String,

    #[arg(long, default_value = "128")]
    hidden_size: i64,

    /// Step environments on a background thread
    #[arg(long = "async")]
    async_env: bool,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    exp_id: Option<String>,

    /// Resume from the experiment's last checkpoint
    #[arg(long)]
    resume: bool,

    /// Redraw a full-screen dashboard instead of log lines
    #[arg(long)]
    dashboard: bool,

    /// Also write TensorBoard event files to this directory
    #[cfg(feature = "tensorboard")]
    #[arg(long)]
    tensorboard: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => train(args)?,
        Commands::Demo {
            env,
            steps,
            agents,
            episode_len,
        } => demo(&env, steps, agents, episode_len)?,
        Commands::List => list_envs(),
        Commands::Checkpoints { data_dir, exp_id } => list_checkpoints(data_dir, &exp_id)?,
    }

    Ok(())
}

fn load_config(args: &TrainArgs) -> Result<TrainerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<TrainerConfig>(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => TrainerConfig::default(),
    };

    config.env_name = args.env.clone();
    if let Some(v) = args.timesteps {
        config.total_timesteps = v;
    }
    if let Some(v) = args.lr {
        config.learning_rate = v;
    }
    if let Some(v) = args.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = args.minibatch_size {
        config.minibatch_size = v;
    }
    if let Some(v) = args.bptt {
        config.bptt_horizon = v;
    }
    if let Some(v) = args.update_epochs {
        config.update_epochs = v;
    }
    if let Some(v) = args.seed {
        config.seed = v;
    }
    if let Some(v) = &args.data_dir {
        config.data_dir = v.clone();
    }
    if let Some(v) = &args.exp_id {
        config.exp_id = v.clone();
    }
    if tch::Cuda::is_available() {
        tracing::info!("Using CUDA");
        config = config.cuda();
    } else {
        tracing::info!("Using CPU");
    }
    Ok(config)
}

fn train(args: TrainArgs) -> Result<()> {
    let template = make(&args.env, args.agents, args.episode_len)
        .with_context(|| format!("unknown environment: {}", args.env))?;
    let config = load_config(&args)?;

    tracing::info!(
        env = %args.env,
        timesteps = config.total_timesteps,
        lr = config.learning_rate,
        num_envs = args.num_envs,
        policy = %args.policy,
        "Starting training"
    );

    let backend = Serial::new(move || template.clone(), args.num_envs);
    if args.async_env {
        with_policy(AsyncVecEnv::new(backend), config, &args)
    } else {
        with_policy(backend, config, &args)
    }
}

fn with_policy<V: VecEnv>(vecenv: V, config: TrainerConfig, args: &TrainArgs) -> Result<()> {
    let obs_size = vecenv.single_observation_space().flat_size();
    let action_space = vecenv.action_space();
    let num_actions = action_space.head_size();
    let is_continuous = !action_space.is_discrete();
    let device = config.device;

    match args.policy.as_str() {
        "mlp" => {
            let mlp = MlpConfig {
                hidden_size: args.hidden_size,
                ..Default::default()
            };
            let policy = MlpPolicy::new(obs_size, num_actions, is_continuous, mlp, device);
            tracing::info!(params = policy.num_parameters(), "Created MLP policy");
            run_training(vecenv, policy, config, args)
        }
        "lstm" => {
            let policy = LstmPolicy::new(obs_size, num_actions, is_continuous, args.hidden_size, 1, device);
            tracing::info!(params = policy.num_parameters(), "Created LSTM policy");
            run_training(vecenv, policy, config, args)
        }
        other => bail!("unknown policy type: {}", other),
    }
}

fn run_training<P, V>(vecenv: V, policy: P, config: TrainerConfig, args: &TrainArgs) -> Result<()>
where
    P: Policy + HasVarStore,
    V: VecEnv,
{
    let mut logger = CompositeLogger::new(Vec::new());
    if args.dashboard {
        logger.add(Box::new(ConsoleLogger::dashboard()));
    } else {
        logger.add(Box::new(ConsoleLogger::new()));
    }
    #[cfg(feature = "tensorboard")]
    if let Some(dir) = &args.tensorboard {
        logger.add(Box::new(puffer_ppo::log::TensorBoardLogger::new(dir)));
    }

    let mut trainer = Trainer::new(config, vecenv, policy, Box::new(logger))?;
    if !args.dashboard {
        trainer = trainer.with_progress();
    }
    if args.resume && !trainer.try_load_checkpoint()? {
        tracing::warn!("Nothing to resume, starting fresh");
    }

    trainer.run()?;

    tracing::info!(
        epoch = trainer.epoch(),
        step = trainer.global_step(),
        policy_loss = trainer.losses().policy_loss,
        "Training complete"
    );
    trainer.close();
    Ok(())
}

/// Step toward the target seen in the observation
fn scripted_actions(step: &MultiAgentStep, continuous: bool) -> HashMap<u32, ArrayD<f32>> {
    step.agents
        .iter()
        .map(|agent| {
            let gap = agent.observation[1] - agent.observation[0];
            let action = if continuous {
                (gap * 4.0).clamp(-1.0, 1.0)
            } else if gap > 0.125 {
                2.0
            } else if gap < -0.125 {
                0.0
            } else {
                1.0
            };
            (agent.agent_id, ArrayD::from_elem(IxDyn(&[1]), action))
        })
        .collect()
}

fn demo(env_name: &str, steps: usize, agents: usize, episode_len: u32) -> Result<()> {
    let Some(mut env) = make(env_name, agents, episode_len) else {
        bail!("unknown environment: {}", env_name);
    };
    tracing::info!(env = env_name, steps, "Running demo");

    let continuous = !env.action_space().is_discrete();
    let mut report = env.reset(Some(42));
    let mut episode = 0;
    for step in 0..steps {
        let actions = scripted_actions(&report, continuous);
        report = env.step(&actions);
        let reward: f32 = report.agents.iter().map(|a| a.reward).sum();
        println!(
            "Step {}: active={} reward={:.3}",
            step,
            report.agents.len(),
            reward
        );

        if report.finished() {
            let reached = report
                .agents
                .iter()
                .filter(|a| a.info.get("goal") == Some(&InfoValue::Scalar(1.0)))
                .count();
            println!("Episode {}: {}/{} agents reached their goal", episode, reached, agents);
            episode += 1;
            report = env.reset(None);
        }
    }

    if let Some(frame) = env.render() {
        let shape = frame.shape();
        tracing::info!(height = shape[0], width = shape[1], "Rendered final frame");
    }
    Ok(())
}

fn list_envs() {
    println!("Available environments:");
    println!();
    for name in ENV_NAMES {
        let env = make(name, 1, 1).unwrap_or_else(|| Rendezvous::new(1, 1));
        let kind = if env.action_space().is_discrete() {
            "discrete actions"
        } else {
            "continuous actions"
        };
        println!("  {:<24} agents walk to private targets ({})", name, kind);
    }
}

fn list_checkpoints(data_dir: PathBuf, exp_id: &str) -> Result<()> {
    let manager = CheckpointManager::new(data_dir, exp_id);
    let models = manager.list_models()?;
    if models.is_empty() {
        println!("No checkpoints in {}", manager.dir().display());
        return Ok(());
    }

    println!("Checkpoints in {}:", manager.dir().display());
    for model in &models {
        println!("  {}", model.display());
    }
    if let Some(state) = manager.load_state()? {
        println!(
            "Latest: {} (epoch {}, global step {})",
            state.model_name, state.epoch, state.global_step
        );
    }
    Ok(())
}
