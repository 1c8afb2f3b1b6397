//! Per-update loss statistics.

use serde::{Deserialize, Serialize};
use std::ops::{AddAssign, Div};

/// Mean loss components over the minibatches of one update
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Losses {
    pub policy_loss: f64,
    pub value_loss: f64,
    pub entropy: f64,
    pub old_approx_kl: f64,
    pub approx_kl: f64,
    pub clipfrac: f64,
    pub explained_variance: f64,
}

impl Losses {
    /// Named components in display order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> {
        [
            ("policy_loss", self.policy_loss),
            ("value_loss", self.value_loss),
            ("entropy", self.entropy),
            ("old_approx_kl", self.old_approx_kl),
            ("approx_kl", self.approx_kl),
            ("clipfrac", self.clipfrac),
            ("explained_variance", self.explained_variance),
        ]
        .into_iter()
    }
}

impl AddAssign for Losses {
    fn add_assign(&mut self, rhs: Self) {
        self.policy_loss += rhs.policy_loss;
        self.value_loss += rhs.value_loss;
        self.entropy += rhs.entropy;
        self.old_approx_kl += rhs.old_approx_kl;
        self.approx_kl += rhs.approx_kl;
        self.clipfrac += rhs.clipfrac;
        self.explained_variance += rhs.explained_variance;
    }
}

impl Div<f64> for Losses {
    type Output = Losses;

    fn div(self, rhs: f64) -> Losses {
        Losses {
            policy_loss: self.policy_loss / rhs,
            value_loss: self.value_loss / rhs,
            entropy: self.entropy / rhs,
            old_approx_kl: self.old_approx_kl / rhs,
            approx_kl: self.approx_kl / rhs,
            clipfrac: self.clipfrac / rhs,
            explained_variance: self.explained_variance / rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_over_executed_minibatches() {
        let mut sum = Losses::default();
        sum += Losses {
            policy_loss: 1.0,
            approx_kl: 0.02,
            ..Default::default()
        };
        sum += Losses {
            policy_loss: 3.0,
            approx_kl: 0.04,
            ..Default::default()
        };
        let mean = sum / 2.0;
        assert_eq!(mean.policy_loss, 2.0);
        assert!((mean.approx_kl - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_iter_names() {
        let names: Vec<_> = Losses::default().iter().map(|(k, _)| k).collect();
        assert_eq!(names.len(), 7);
        assert_eq!(names[0], "policy_loss");
        assert_eq!(names[6], "explained_variance");
    }
}
