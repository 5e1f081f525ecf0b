//! Optimizers that update parameter values in place.
//!
//! Optimizers work on concrete host values (`Value`), not on the graph.
//! They receive the current parameters and their gradients, both keyed by
//! parameter name, and apply one update rule.

use crate::asg::Value;
use ndarray::{ArrayD, Zip};
use std::collections::HashMap;
use tracing::warn;

/// Common interface of all optimizers.
pub trait Optimizer {
    /// Performs one optimization step.
    ///
    /// * `parameters` - current values, keyed by name (e.g. `dae.encoder1.weights`).
    /// * `gradients` - gradients of the loss for those parameters.
    ///
    /// Gradients without a matching parameter of the same shape are skipped.
    fn step(&mut self, parameters: &mut HashMap<String, Value>, gradients: &HashMap<String, Value>);
}

/// Yields `(name, parameter, gradient)` for every updatable pair.
fn matched<'a>(
    parameters: &'a mut HashMap<String, Value>,
    gradients: &'a HashMap<String, Value>,
) -> impl Iterator<Item = (&'a String, &'a mut ArrayD<f32>, &'a ArrayD<f32>)> {
    parameters.iter_mut().filter_map(move |(name, param)| {
        let (Value::Tensor(param), Some(Value::Tensor(grad))) = (param, gradients.get(name)) else {
            return None;
        };
        if param.shape() != grad.shape() {
            warn!(
                parameter = %name,
                param_shape = ?param.shape(),
                grad_shape = ?grad.shape(),
                "skipping gradient with mismatched shape"
            );
            return None;
        }
        Some((name, param, grad))
    })
}

/// Stochastic gradient descent, optionally with classical momentum.
pub struct Sgd {
    lr: f32,
    momentum: f32,
    velocity: HashMap<String, ArrayD<f32>>,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self::with_momentum(lr, 0.0)
    }

    /// `v = momentum * v + g; p -= lr * v`.
    pub fn with_momentum(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            velocity: HashMap::new(),
        }
    }

    pub fn lr(&self) -> f32 {
        self.lr
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, parameters: &mut HashMap<String, Value>, gradients: &HashMap<String, Value>) {
        let lr = self.lr;
        for (name, param, grad) in matched(parameters, gradients) {
            if self.momentum == 0.0 {
                ndarray::azip!((p in param, &g in grad) *p -= lr * g);
                continue;
            }
            let momentum = self.momentum;
            let v = self
                .velocity
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            Zip::from(param).and(v).and(grad).for_each(|p, v, &g| {
                *v = momentum * *v + g;
                *p -= lr * *v;
            });
        }
    }
}

/// Adam with bias-corrected moment estimates.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: i32,
    m: HashMap<String, ArrayD<f32>>,
    v: HashMap<String, ArrayD<f32>>,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self::with_betas(lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    /// Number of steps taken so far.
    pub fn steps(&self) -> i32 {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self, parameters: &mut HashMap<String, Value>, gradients: &HashMap<String, Value>) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t);
        let bc2 = 1.0 - self.beta2.powi(self.t);
        let (lr, beta1, beta2, eps) = (self.lr, self.beta1, self.beta2, self.eps);

        for (name, param, grad) in matched(parameters, gradients) {
            let m = self.m.entry(name.clone()).or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            let v = self.v.entry(name.clone()).or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            Zip::from(param).and(m).and(v).and(grad).for_each(|p, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bc1;
                let v_hat = *v / bc2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
        }
    }
}
