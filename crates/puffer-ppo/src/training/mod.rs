//! Training loop and PPO algorithm.

mod config;
mod losses;
mod optimizer;
mod ppo;
mod stats;
mod trainer;

pub use config::TrainerConfig;
pub use losses::Losses;
pub use optimizer::{Adam, AdamState, MomentState};
pub use ppo::{
    clip_fraction, compute_gae, compute_segmented_gae, explained_variance, kl_estimates,
    normalize_advantages, ppo_policy_loss, ppo_value_loss,
};
pub use stats::{RolloutStats, StatsAggregator};
pub use trainer::{Trainer, GOAL_KEY};
