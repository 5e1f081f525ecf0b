//! Loss functions in the graph paradigm.
//!
//! Loss functions here are regular Rust functions that take symbolic
//! `Tensor` handles and append the nodes computing the error value.

use crate::model::BRANCHES;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

// ============================================================================
// MSE
// ============================================================================

/// `mean((y_pred - y_true)^2)` over every element.
pub fn mse_loss_mean(y_pred: &Tensor, y_true: &Tensor) -> Tensor {
    let error = y_pred - y_true;
    let squared_error = &error * &error;
    squared_error.mean_all()
}

/// `factor * mean((output - target)^2)`.
pub fn weighted_mse(output: &Tensor, target: &Tensor, factor: f32) -> Tensor {
    let factor = Tensor::scalar(&output.context, factor);
    &factor * &mse_loss_mean(output, target)
}

// ============================================================================
// Decoupled autoencoder loss
// ============================================================================

/// Weights of the six terms of [`dae_loss`].
///
/// `lambda1..=lambda3` scale the reconstruction errors of branches 1, 2
/// and 3; `lambda4`, `lambda5` and `lambda6` scale the latent alignment
/// terms `(z1, z2)`, `(z2, z3)` and `(z3, z1)`. All default to 1.0.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct LossWeights {
    pub lambda1: f32,
    pub lambda2: f32,
    pub lambda3: f32,
    pub lambda4: f32,
    pub lambda5: f32,
    pub lambda6: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

impl LossWeights {
    pub fn uniform(value: f32) -> Self {
        Self::from_array([value; 6])
    }

    pub fn from_array(l: [f32; 6]) -> Self {
        Self {
            lambda1: l[0],
            lambda2: l[1],
            lambda3: l[2],
            lambda4: l[3],
            lambda5: l[4],
            lambda6: l[5],
        }
    }

    pub fn as_array(&self) -> [f32; 6] {
        [self.lambda1, self.lambda2, self.lambda3, self.lambda4, self.lambda5, self.lambda6]
    }

    pub fn reconstruction(&self) -> [f32; BRANCHES] {
        [self.lambda1, self.lambda2, self.lambda3]
    }

    pub fn alignment(&self) -> [f32; BRANCHES] {
        [self.lambda4, self.lambda5, self.lambda6]
    }
}

/// Composite loss of the decoupled autoencoder:
///
/// ```text
/// λ1·MSE(r1, x1) + λ2·MSE(r2, x2) + λ3·MSE(r3, x3)
///   + λ4·MSE(z1, z2) + λ5·MSE(z2, z3) + λ6·MSE(z3, z1)
/// ```
///
/// The latent codes are recovered by cutting `bottleneck` into three
/// consecutive blocks of `latent_dim` columns. A term with weight zero is
/// still built but contributes neither value nor gradient.
pub fn dae_loss(
    reconstructions: &[Tensor; BRANCHES],
    bottleneck: &Tensor,
    targets: &[Tensor; BRANCHES],
    latent_dim: usize,
    weights: &LossWeights,
) -> Tensor {
    let latents: Vec<Tensor> = (0..BRANCHES)
        .map(|i| bottleneck.slice(1, i * latent_dim, (i + 1) * latent_dim))
        .collect();

    let recon = weights.reconstruction();
    let align = weights.alignment();

    let mut total = weighted_mse(&reconstructions[0], &targets[0], recon[0]);
    for i in 1..BRANCHES {
        total = &total + &weighted_mse(&reconstructions[i], &targets[i], recon[i]);
    }
    for i in 0..BRANCHES {
        let next = (i + 1) % BRANCHES;
        total = &total + &weighted_mse(&latents[i], &latents[next], align[i]);
    }
    total
}
