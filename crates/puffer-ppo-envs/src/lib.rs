//! # puffer-ppo-envs
//!
//! Synthetic multi-agent environments for exercising the trainer.
//!
//! ## Available Environments
//!
//! - `Rendezvous` - agents on a line walking toward private targets, with
//!   shuffled report order and agents that skip ticks

pub mod rendezvous;

pub use rendezvous::Rendezvous;

/// Names accepted by [`make`]
pub const ENV_NAMES: &[&str] = &["rendezvous", "rendezvous-continuous"];

/// Build a named environment
pub fn make(name: &str, num_agents: usize, episode_len: u32) -> Option<Rendezvous> {
    match name {
        "rendezvous" => Some(Rendezvous::new(num_agents, episode_len)),
        "rendezvous-continuous" => Some(Rendezvous::continuous(num_agents, episode_len)),
        _ => None,
    }
}
