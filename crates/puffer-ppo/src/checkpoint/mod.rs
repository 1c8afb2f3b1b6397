//! Checkpoint and resume.
//!
//! An experiment directory holds one weight file per saved epoch
//! (`model_{epoch:06}.pt`) and a single `trainer_state.bin` record naming the
//! latest one.

mod manager;
mod state;

pub use manager::{CheckpointManager, STATE_FILE};
pub use state::{Checkpointable, TrainerState};
