//! PPO algorithm utilities.

use ndarray::{s, Array1, ArrayView1};
use std::ops::Range;
use tch::{Kind, Tensor};

/// Compute Generalized Advantage Estimation (GAE) over a flat sequence.
///
/// Inputs are in agent-then-time order. Position `t` bootstraps from
/// position `t + 1` unless `dones[t + 1]` is set; the last position keeps a
/// zero advantage. Accumulation is in `f32`.
pub fn compute_gae(
    dones: ArrayView1<f32>,
    values: ArrayView1<f32>,
    rewards: ArrayView1<f32>,
    gamma: f32,
    gae_lambda: f32,
) -> Array1<f32> {
    let n = rewards.len();
    let mut advantages = Array1::<f32>::zeros(n);
    let mut lastgaelam = 0.0f32;

    for t in 0..n.saturating_sub(1) {
        let t_cur = n - 2 - t;
        let t_next = n - 1 - t;
        let nextnonterminal = 1.0 - dones[t_next];
        let delta = rewards[t_next] + gamma * values[t_next] * nextnonterminal - values[t_cur];
        lastgaelam = delta + gamma * gae_lambda * nextnonterminal * lastgaelam;
        advantages[t_cur] = lastgaelam;
    }

    advantages
}

/// GAE run independently over each segment, so no bootstrap crosses a
/// segment boundary
pub fn compute_segmented_gae(
    dones: ArrayView1<f32>,
    values: ArrayView1<f32>,
    rewards: ArrayView1<f32>,
    segments: &[Range<usize>],
    gamma: f32,
    gae_lambda: f32,
) -> Array1<f32> {
    let mut advantages = Array1::<f32>::zeros(rewards.len());
    for seg in segments {
        let part = compute_gae(
            dones.slice(s![seg.clone()]),
            values.slice(s![seg.clone()]),
            rewards.slice(s![seg.clone()]),
            gamma,
            gae_lambda,
        );
        advantages.slice_mut(s![seg.clone()]).assign(&part);
    }
    advantages
}

/// Clipped surrogate objective:
/// `mean(max(-adv * ratio, -adv * clip(ratio, 1 - eps, 1 + eps)))`
pub fn ppo_policy_loss(advantages: &Tensor, ratio: &Tensor, clip_coef: f64) -> Tensor {
    let pg_loss1 = -advantages * ratio;
    let pg_loss2 = -advantages * ratio.clamp(1.0 - clip_coef, 1.0 + clip_coef);
    pg_loss1.max_other(&pg_loss2).mean(Kind::Float)
}

/// Squared-error value loss scaled by 0.5, optionally clipped around the
/// old estimate
pub fn ppo_value_loss(
    values: &Tensor,
    old_values: &Tensor,
    returns: &Tensor,
    clip: Option<f64>,
) -> Tensor {
    let v_loss_unclipped = (values - returns).pow_tensor_scalar(2);
    match clip {
        Some(vf_clip_coef) => {
            let v_clipped = old_values + (values - old_values).clamp(-vf_clip_coef, vf_clip_coef);
            let v_loss_clipped = (&v_clipped - returns).pow_tensor_scalar(2);
            v_loss_unclipped.max_other(&v_loss_clipped).mean(Kind::Float) * 0.5
        }
        None => v_loss_unclipped.mean(Kind::Float) * 0.5,
    }
}

/// `(old_approx_kl, approx_kl)`: `mean(-logratio)` and
/// `mean((ratio - 1) - logratio)`
pub fn kl_estimates(logratio: &Tensor, ratio: &Tensor) -> (Tensor, Tensor) {
    let old_approx_kl = (-logratio).mean(Kind::Float);
    let approx_kl = ((ratio - 1.0) - logratio).mean(Kind::Float);
    (old_approx_kl, approx_kl)
}

/// Fraction of samples whose ratio left the clip range
pub fn clip_fraction(ratio: &Tensor, clip_coef: f64) -> Tensor {
    (ratio - 1.0)
        .abs()
        .gt(clip_coef)
        .to_kind(Kind::Float)
        .mean(Kind::Float)
}

/// Zero-mean, unit-std advantages
pub fn normalize_advantages(advantages: &Tensor) -> Tensor {
    (advantages - advantages.mean(Kind::Float)) / (advantages.std(true) + 1e-8)
}

/// `1 - var(y_true - y_pred) / var(y_true)`, NaN when `y_true` is constant
pub fn explained_variance(y_pred: &Array1<f32>, y_true: &Array1<f32>) -> f64 {
    let var_y = y_true.mapv(f64::from).var(0.0);
    if var_y == 0.0 || y_true.is_empty() {
        return f64::NAN;
    }
    let residual = (y_true - y_pred).mapv(f64::from);
    1.0 - residual.var(0.0) / var_y
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_gae_zero_discount_is_one_step_td() {
        let dones = array![0.0f32, 0.0, 0.0, 0.0];
        let values = array![0.5f32, 1.0, -1.0, 2.0];
        let rewards = array![9.0f32, 1.0, 2.0, 3.0];
        let adv = compute_gae(dones.view(), values.view(), rewards.view(), 0.0, 0.95);

        assert_relative_eq!(adv[0], 1.0 - 0.5);
        assert_relative_eq!(adv[1], 2.0 - 1.0);
        assert_relative_eq!(adv[2], 3.0 + 1.0);
        assert_eq!(adv[3], 0.0);
    }

    #[test]
    fn test_gae_all_done_does_not_bootstrap() {
        let dones = array![1.0f32, 1.0, 1.0];
        let values = array![0.25f32, 0.5, 4.0];
        let rewards = array![0.0f32, 1.0, 2.0];
        let adv = compute_gae(dones.view(), values.view(), rewards.view(), 0.99, 0.95);

        assert_relative_eq!(adv[0], 1.0 - 0.25);
        assert_relative_eq!(adv[1], 2.0 - 0.5);
        assert_eq!(adv[2], 0.0);
    }

    #[test]
    fn test_gae_recursion() {
        let dones = array![0.0f32, 0.0, 0.0];
        let values = array![0.0f32, 0.0, 0.0];
        let rewards = array![0.0f32, 1.0, 1.0];
        let adv = compute_gae(dones.view(), values.view(), rewards.view(), 0.9, 0.5);

        // adv[1] = r2 ; adv[0] = r1 + 0.9 * 0.5 * adv[1]
        assert_relative_eq!(adv[1], 1.0);
        assert_relative_eq!(adv[0], 1.0 + 0.45, epsilon = 1e-6);
    }

    #[test]
    fn test_gae_degenerate_lengths() {
        let empty = Array1::<f32>::zeros(0);
        assert_eq!(compute_gae(empty.view(), empty.view(), empty.view(), 0.99, 0.95).len(), 0);
        let one = array![3.0f32];
        assert_eq!(compute_gae(one.view(), one.view(), one.view(), 0.99, 0.95)[0], 0.0);
    }

    #[test]
    fn test_segmented_gae_does_not_cross_agents() {
        let dones = array![0.0f32, 0.0, 0.0, 0.0];
        let values = array![0.0f32, 0.0, 10.0, 0.0];
        let rewards = array![0.0f32, 1.0, 5.0, 1.0];
        let segments = vec![0..2, 2..4];

        let flat = compute_gae(dones.view(), values.view(), rewards.view(), 0.9, 1.0);
        let seg = compute_segmented_gae(dones.view(), values.view(), rewards.view(), &segments, 0.9, 1.0);

        // The flat recursion bleeds agent 2's first step into agent 1's last
        assert!(flat[1] != 0.0);
        assert_eq!(seg[1], 0.0);
        assert_eq!(seg[3], 0.0);
        assert_relative_eq!(seg[0], 1.0);
        assert_relative_eq!(seg[2], 1.0 - 10.0);
    }

    #[test]
    fn test_policy_loss_clips() {
        let adv = Tensor::from_slice(&[1.0f32, -1.0]);
        let ratio = Tensor::from_slice(&[2.0f32, 0.5]);
        // max(-2, -1.2) = -1.2 ; max(0.5, 0.8) = 0.8
        let loss = ppo_policy_loss(&adv, &ratio, 0.2).double_value(&[]);
        assert!((loss - (-1.2 + 0.8) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_value_loss_clipping() {
        let new = Tensor::from_slice(&[2.0f32]);
        let old = Tensor::from_slice(&[0.0f32]);
        let ret = Tensor::from_slice(&[2.0f32]);
        let plain = ppo_value_loss(&new, &old, &ret, None).double_value(&[]);
        assert!(plain.abs() < 1e-6);
        // the clipped prediction 0.2 dominates: 0.5 * 1.8^2
        let clipped = ppo_value_loss(&new, &old, &ret, Some(0.2)).double_value(&[]);
        assert!((clipped - 1.62).abs() < 1e-5);
    }

    #[test]
    fn test_kl_and_clipfrac_bounds() {
        let logratio = Tensor::from_slice(&[0.1f32, -0.3, 0.0, 0.5]);
        let ratio = logratio.exp();
        let (old_kl, kl) = kl_estimates(&logratio, &ratio);
        assert!(old_kl.double_value(&[]).is_finite());
        assert!(kl.double_value(&[]) >= 0.0);

        let frac = clip_fraction(&ratio, 0.2).double_value(&[]);
        assert!((0.0..=1.0).contains(&frac));
        assert!((frac - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_explained_variance() {
        let y = array![1.0f32, 2.0, 3.0];
        assert_relative_eq!(explained_variance(&y, &y), 1.0);
        assert!(explained_variance(&y, &array![2.0f32, 2.0, 2.0]).is_nan());
        let zeros = Array1::<f32>::zeros(3);
        assert_relative_eq!(explained_variance(&zeros, &y), 0.0);
        let close = array![1.0f32, 2.0, 2.0];
        assert_relative_eq!(explained_variance(&close, &y), 1.0 - (2.0 / 9.0) / (2.0 / 3.0), epsilon = 1e-9);
    }
}
