//! Observation and action space types.
//!
//! Only the two space kinds the trainer needs to size its buffers are
//! modelled: `Discrete` actions and `Box` observations/actions.

mod r#box;
mod discrete;

pub use discrete::Discrete;
pub use r#box::Box;

use ndarray::ArrayD;
use rand::Rng;
use tch::Kind;

/// Trait for observation and action spaces
pub trait Space: Clone + Send + Sync {
    /// The type of samples from this space
    type Sample;

    /// Sample a random element from this space
    fn sample<R: Rng>(&self, rng: &mut R) -> Self::Sample;

    /// Check if a value is contained in this space
    fn contains(&self, value: &Self::Sample) -> bool;

    /// Get the shape of samples from this space
    fn shape(&self) -> &[usize];

    /// Get the total number of elements in a sample
    fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }
}

/// Enum for dynamic space types
#[derive(Clone, Debug)]
pub enum DynSpace {
    Discrete(Discrete),
    Box(Box),
}

impl DynSpace {
    /// Shape of a single sample
    pub fn shape(&self) -> Vec<usize> {
        match self {
            DynSpace::Discrete(s) => s.shape().to_vec(),
            DynSpace::Box(s) => s.shape().to_vec(),
        }
    }

    /// Shape as tensor dimensions
    pub fn dims(&self) -> Vec<i64> {
        self.shape().iter().map(|&d| d as i64).collect()
    }

    /// Flattened size of a single sample
    pub fn flat_size(&self) -> i64 {
        self.shape().iter().product::<usize>() as i64
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, DynSpace::Discrete(_))
    }

    /// Element kind used to store actions drawn from this space.
    /// Discrete actions are integer indices, everything else is float.
    pub fn storage_kind(&self) -> Kind {
        match self {
            DynSpace::Discrete(_) => Kind::Int64,
            DynSpace::Box(_) => Kind::Float,
        }
    }

    /// Per-row dimensions of stored actions: discrete actions are scalars
    pub fn storage_dims(&self) -> Vec<i64> {
        match self {
            DynSpace::Discrete(_) => Vec::new(),
            DynSpace::Box(_) => self.dims(),
        }
    }

    /// Width of the policy head that parameterizes this space
    pub fn head_size(&self) -> i64 {
        match self {
            DynSpace::Discrete(s) => s.n as i64,
            DynSpace::Box(s) => s.num_elements() as i64,
        }
    }

    /// Sample from this space
    pub fn sample<R: Rng>(&self, rng: &mut R) -> ArrayD<f32> {
        match self {
            DynSpace::Discrete(s) => ArrayD::from_elem(ndarray::IxDyn(&[1]), s.sample(rng) as f32),
            DynSpace::Box(s) => s.sample(rng),
        }
    }
}
