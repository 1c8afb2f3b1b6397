//! Box (continuous) space

use super::Space;
use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal, Uniform};

/// Box space for continuous values with per-element bounds
#[derive(Clone, Debug)]
pub struct Box {
    pub low: ArrayD<f32>,
    pub high: ArrayD<f32>,
    shape: Vec<usize>,
}

impl Box {
    /// Create a new box space with given bounds
    pub fn new(low: ArrayD<f32>, high: ArrayD<f32>) -> Self {
        assert_eq!(low.shape(), high.shape(), "Low and high must have same shape");
        let shape = low.shape().to_vec();
        Self { low, high, shape }
    }

    /// Create a box space with uniform bounds
    pub fn uniform(shape: &[usize], low: f32, high: f32) -> Self {
        Self::new(
            ArrayD::from_elem(IxDyn(shape), low),
            ArrayD::from_elem(IxDyn(shape), high),
        )
    }
}

impl Space for Box {
    type Sample = ArrayD<f32>;

    fn sample<R: Rng>(&self, rng: &mut R) -> Self::Sample {
        let mut result = ArrayD::zeros(IxDyn(&self.shape));
        for ((&l, &h), r) in self.low.iter().zip(self.high.iter()).zip(result.iter_mut()) {
            *r = if l.is_finite() && h.is_finite() && l < h {
                Uniform::new(l, h).sample(rng)
            } else {
                let z: f32 = StandardNormal.sample(rng);
                z.clamp(l, h)
            };
        }
        result
    }

    fn contains(&self, value: &Self::Sample) -> bool {
        value.shape() == self.low.shape()
            && value
                .iter()
                .zip(self.low.iter())
                .zip(self.high.iter())
                .all(|((&v, &l), &h)| v >= l && v <= h)
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }
}
