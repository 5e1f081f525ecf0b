//! Construction parameters of a decoupled autoencoder, loadable from JSON.

use crate::losses::LossWeights;
use crate::nn::ActivationKind;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("{field} must be positive")]
    ZeroDimension { field: &'static str },

    #[error("init_std must be finite and positive, got {0}")]
    InvalidInitStd(f32),

    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidLossWeight { name: &'static str, value: f32 },
}

/// Everything needed to build a `DaeSession`.
///
/// Missing JSON fields fall back to the defaults below: 300-wide inputs
/// and latents, leaky ReLU, unit loss weights and `Normal(0, 0.01)` weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaeConfig {
    pub input_dim: usize,
    pub latent_dim: usize,
    pub activation: ActivationKind,
    pub loss_weights: LossWeights,
    /// Standard deviation of the initial weight draws.
    pub init_std: f32,
    /// Fixes the initial weights; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for DaeConfig {
    fn default() -> Self {
        Self {
            input_dim: 300,
            latent_dim: 300,
            activation: ActivationKind::default(),
            loss_weights: LossWeights::default(),
            init_std: 0.01,
            seed: None,
        }
    }
}

impl DaeConfig {
    pub fn new(input_dim: usize, latent_dim: usize, activation: ActivationKind) -> Self {
        Self {
            input_dim,
            latent_dim,
            activation,
            ..Self::default()
        }
    }

    pub fn with_loss_weights(mut self, loss_weights: LossWeights) -> Self {
        self.loss_weights = loss_weights;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_init_std(mut self, init_std: f32) -> Self {
        self.init_std = init_std;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_dim == 0 {
            return Err(ConfigError::ZeroDimension { field: "input_dim" });
        }
        if self.latent_dim == 0 {
            return Err(ConfigError::ZeroDimension { field: "latent_dim" });
        }
        if !(self.init_std.is_finite() && self.init_std > 0.0) {
            return Err(ConfigError::InvalidInitStd(self.init_std));
        }
        const NAMES: [&str; 6] = ["lambda1", "lambda2", "lambda3", "lambda4", "lambda5", "lambda6"];
        for (name, value) in NAMES.into_iter().zip(self.loss_weights.as_array()) {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidLossWeight { name, value });
            }
        }
        Ok(())
    }

    /// Width of the concatenated latent codes.
    pub fn bottleneck_dim(&self) -> usize {
        3 * self.latent_dim
    }
}
