//! Adam optimizer with serializable state.
//!
//! Moments are kept per named parameter so the complete optimizer state can
//! be written into the trainer checkpoint and restored bit for bit.

use crate::checkpoint::Checkpointable;
use crate::{PufferError, Result};
use serde::{Deserialize, Serialize};
use tch::{nn, Device, Kind, Tensor};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPS: f64 = 1e-5;

/// First and second moment of one parameter
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MomentState {
    pub name: String,
    pub shape: Vec<i64>,
    pub exp_avg: Vec<f32>,
    pub exp_avg_sq: Vec<f32>,
}

/// Serializable optimizer state
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AdamState {
    pub step: u64,
    pub lr: f64,
    pub moments: Vec<MomentState>,
}

/// Adam over the trainable variables of a `VarStore`
pub struct Adam {
    names: Vec<String>,
    params: Vec<Tensor>,
    exp_avg: Vec<Tensor>,
    exp_avg_sq: Vec<Tensor>,
    lr: f64,
    step: u64,
}

impl Adam {
    pub fn new(vs: &nn::VarStore, lr: f64) -> Self {
        let mut named: Vec<(String, Tensor)> = vs
            .variables()
            .into_iter()
            .filter(|(_, v)| v.requires_grad())
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));

        let (names, params): (Vec<_>, Vec<_>) = named.into_iter().unzip();
        let exp_avg = params.iter().map(Tensor::zeros_like).collect();
        let exp_avg_sq = params.iter().map(Tensor::zeros_like).collect();

        Self {
            names,
            params,
            exp_avg,
            exp_avg_sq,
            lr,
            step: 0,
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    /// Number of optimizer steps taken
    pub fn steps(&self) -> u64 {
        self.step
    }

    pub fn zero_grad(&mut self) {
        for p in self.params.iter_mut() {
            p.zero_grad();
        }
    }

    /// Scale gradients so their global L2 norm is at most `max_norm`.
    /// Returns the norm before clipping.
    pub fn clip_grad_norm(&mut self, max_norm: f64) -> f64 {
        let mut global_norm = 0.0f64;
        for var in &self.params {
            let grad = var.grad();
            if grad.defined() {
                global_norm += grad
                    .pow_tensor_scalar(2.0)
                    .sum(Kind::Float)
                    .double_value(&[]);
            }
        }
        global_norm = global_norm.sqrt();

        if global_norm > max_norm {
            let clip_coef = max_norm / (global_norm + 1e-6);
            for var in &self.params {
                let mut grad = var.grad();
                if grad.defined() {
                    let _ = grad.f_mul_scalar_(clip_coef);
                }
            }
        }
        global_norm
    }

    /// Apply one bias-corrected Adam update
    pub fn step(&mut self) {
        self.step += 1;
        let bias_correction1 = 1.0 - BETA1.powi(self.step as i32);
        let bias_correction2 = 1.0 - BETA2.powi(self.step as i32);
        let lr = self.lr;

        tch::no_grad(|| {
            let moments = self.exp_avg.iter_mut().zip(self.exp_avg_sq.iter_mut());
            for (p, (m, v)) in self.params.iter_mut().zip(moments) {
                let grad = p.grad();
                if !grad.defined() {
                    continue;
                }
                m.copy_(&(&*m * BETA1 + &grad * (1.0 - BETA1)));
                v.copy_(&(&*v * BETA2 + (&grad * &grad) * (1.0 - BETA2)));

                let denom = (&*v / bias_correction2).sqrt() + EPS;
                let update = (&*m / bias_correction1) / denom * lr;
                let _ = p.g_sub_(&update);
            }
        });
    }

    /// Snapshot of the moments, step count and learning rate
    pub fn state(&self) -> Result<AdamState> {
        let mut moments = Vec::with_capacity(self.names.len());
        for ((name, m), v) in self.names.iter().zip(&self.exp_avg).zip(&self.exp_avg_sq) {
            moments.push(MomentState {
                name: name.clone(),
                shape: m.size(),
                exp_avg: host_values(m)?,
                exp_avg_sq: host_values(v)?,
            });
        }
        Ok(AdamState {
            step: self.step,
            lr: self.lr,
            moments,
        })
    }

    /// Restore a snapshot taken from an optimizer over the same parameters
    pub fn restore(&mut self, state: &AdamState) -> Result<()> {
        if state.moments.len() != self.names.len() {
            return Err(PufferError::Checkpoint(format!(
                "optimizer state has {} parameters, model has {}",
                state.moments.len(),
                self.names.len()
            )));
        }
        for (i, saved) in state.moments.iter().enumerate() {
            if saved.name != self.names[i] || saved.shape != self.exp_avg[i].size() {
                return Err(PufferError::Checkpoint(format!(
                    "optimizer state for '{}' {:?} does not match parameter '{}' {:?}",
                    saved.name,
                    saved.shape,
                    self.names[i],
                    self.exp_avg[i].size()
                )));
            }
            let device = self.exp_avg[i].device();
            tch::no_grad(|| {
                self.exp_avg[i].copy_(&device_tensor(&saved.exp_avg, &saved.shape, device));
                self.exp_avg_sq[i].copy_(&device_tensor(&saved.exp_avg_sq, &saved.shape, device));
            });
        }
        self.step = state.step;
        self.lr = state.lr;
        Ok(())
    }
}

impl Checkpointable for Adam {
    fn save_state(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.state()?)?)
    }

    fn load_state(&mut self, data: &[u8]) -> Result<()> {
        let state: AdamState = bincode::deserialize(data)?;
        self.restore(&state)
    }
}

fn host_values(t: &Tensor) -> Result<Vec<f32>> {
    let flat = t.detach().to_device(Device::Cpu).to_kind(Kind::Float).reshape([-1]);
    Ok(Vec::<f32>::try_from(&flat)?)
}

fn device_tensor(data: &[f32], shape: &[i64], device: Device) -> Tensor {
    Tensor::from_slice(data).reshape(shape).to_device(device)
}
