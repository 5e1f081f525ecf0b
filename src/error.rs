//! Crate-level error type.

use crate::analysis::shape_inference::ShapeInferenceError;
use crate::asg::AsgError;
use crate::autograd::AutogradError;
use crate::config::ConfigError;
use crate::nn::{ActivationError, InitError};
use crate::runtime::RuntimeError;
use thiserror::Error;

/// Every failure a `DaeSession` can report.
#[derive(Error, Debug)]
pub enum DaeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error("graph error: {0}")]
    Asg(#[from] AsgError),

    #[error("shape error: {0}")]
    Shape(#[from] ShapeInferenceError),

    #[error("autograd error: {0}")]
    Autograd(#[from] AutogradError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
}

pub type DaeResult<T> = std::result::Result<T, DaeError>;
