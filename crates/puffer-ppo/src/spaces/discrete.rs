//! Discrete action space

use super::Space;
use rand::Rng;

/// Discrete space with n possible values: {0, 1, ..., n-1}
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discrete {
    /// Number of possible values
    pub n: usize,
    shape: Vec<usize>,
}

impl Discrete {
    /// Create a new discrete space with n values
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "Discrete space must have at least 1 element");
        Self { n, shape: vec![1] }
    }
}

impl Space for Discrete {
    type Sample = usize;

    fn sample<R: Rng>(&self, rng: &mut R) -> Self::Sample {
        rng.gen_range(0..self.n)
    }

    fn contains(&self, value: &Self::Sample) -> bool {
        *value < self.n
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn num_elements(&self) -> usize {
        1
    }
}
