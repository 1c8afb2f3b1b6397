//! Vectorized environment backends.
//!
//! Provides the asynchronous stepping contract the rollout collector drives:
//! - `Serial` - runs every sub-environment on the calling thread
//! - `AsyncVecEnv` - moves any backend onto a worker thread so that
//!   environment stepping overlaps with policy inference

mod async_vec;
mod serial;
mod vecenv;

pub use async_vec::AsyncVecEnv;
pub use serial::Serial;
pub use vecenv::{ObservationBatch, RecvBatch, VecEnv};
