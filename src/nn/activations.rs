//! Activation layers and the `ActivationKind` selector used by model configs.

use crate::nn::init::{ParameterInit, ParameterSpec};
use crate::nn::module::Module;
use crate::tensor::{GraphContext, Tensor};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use thiserror::Error;

/// Default slope of `LeakyReLU` for negative inputs.
pub const DEFAULT_NEGATIVE_SLOPE: f32 = 0.01;
/// Initial value of a `PReLU` slope.
pub const PRELU_INIT: f32 = 0.25;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActivationError {
    #[error(
        "unknown activation '{0}', expected one of: identity, leaky_relu, parameterized_leaky_relu, relu, tanh, sigmoid"
    )]
    Unknown(String),
}

// --- Identity ---

/// Passes its input through unchanged.
#[derive(Default)]
pub struct Identity;

impl Module for Identity {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.clone()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

// --- ReLU ---

/// `max(0, x)`.
#[derive(Default)]
pub struct ReLU;

impl Module for ReLU {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.relu()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

// --- LeakyReLU ---

/// `x` for positive inputs, `negative_slope * x` otherwise.
pub struct LeakyReLU {
    pub negative_slope: f32,
}

impl LeakyReLU {
    pub fn new(negative_slope: f32) -> Self {
        Self { negative_slope }
    }
}

impl Default for LeakyReLU {
    fn default() -> Self {
        Self::new(DEFAULT_NEGATIVE_SLOPE)
    }
}

impl Module for LeakyReLU {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.leaky_relu(self.negative_slope)
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

// --- PReLU ---

/// Leaky ReLU whose negative slope is a learnable scalar.
///
/// The slope is a `[1, 1]` parameter named `{name}.slope`, broadcast over
/// the whole input. The graph computes `relu(x) + slope * (x - relu(x))`.
pub struct PReLU {
    pub slope: Tensor,
    name: String,
}

impl PReLU {
    pub fn new(context: &Rc<RefCell<GraphContext>>, name: &str) -> Self {
        let slope = Tensor::new_parameter(context, &format!("{}.slope", name));
        Self { slope, name: name.to_string() }
    }
}

impl Module for PReLU {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        let positive = inputs.relu();
        let negative = inputs - &positive;
        &positive + &(&self.slope * &negative)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.slope.clone()]
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::new(
            format!("{}.slope", self.name),
            vec![1, 1],
            ParameterInit::Constant(PRELU_INIT),
        )]
    }
}

// --- Sigmoid / Tanh ---

#[derive(Default)]
pub struct Sigmoid;

impl Module for Sigmoid {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.sigmoid()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

#[derive(Default)]
pub struct Tanh;

impl Module for Tanh {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        inputs.tanh()
    }

    fn parameters(&self) -> Vec<Tensor> {
        Vec::new()
    }
}

// --- Selection by name ---

/// Activation applied after every encoder and decoder layer.
///
/// Parses from and serialises to snake_case names. `paramaterized_leaky_relu`
/// and `prelu` are accepted as aliases of `parameterized_leaky_relu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    Identity,
    #[default]
    LeakyRelu,
    #[serde(alias = "paramaterized_leaky_relu", alias = "prelu")]
    ParameterizedLeakyRelu,
    Relu,
    Tanh,
    Sigmoid,
}

impl ActivationKind {
    pub const ALL: [ActivationKind; 6] = [
        ActivationKind::Identity,
        ActivationKind::LeakyRelu,
        ActivationKind::ParameterizedLeakyRelu,
        ActivationKind::Relu,
        ActivationKind::Tanh,
        ActivationKind::Sigmoid,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActivationKind::Identity => "identity",
            ActivationKind::LeakyRelu => "leaky_relu",
            ActivationKind::ParameterizedLeakyRelu => "parameterized_leaky_relu",
            ActivationKind::Relu => "relu",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Sigmoid => "sigmoid",
        }
    }

    /// Whether the activation owns a trainable parameter.
    pub fn is_parametric(&self) -> bool {
        matches!(self, ActivationKind::ParameterizedLeakyRelu)
    }

    /// Creates a fresh activation instance. `name` prefixes its parameters,
    /// so every call site gets independent state.
    pub fn build(&self, context: &Rc<RefCell<GraphContext>>, name: &str) -> Box<dyn Module> {
        match self {
            ActivationKind::Identity => Box::new(Identity),
            ActivationKind::LeakyRelu => Box::new(LeakyReLU::default()),
            ActivationKind::ParameterizedLeakyRelu => Box::new(PReLU::new(context, name)),
            ActivationKind::Relu => Box::new(ReLU),
            ActivationKind::Tanh => Box::new(Tanh),
            ActivationKind::Sigmoid => Box::new(Sigmoid),
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActivationKind {
    type Err = ActivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" => Ok(ActivationKind::Identity),
            "leaky_relu" => Ok(ActivationKind::LeakyRelu),
            "parameterized_leaky_relu" | "paramaterized_leaky_relu" | "prelu" => {
                Ok(ActivationKind::ParameterizedLeakyRelu)
            }
            "relu" => Ok(ActivationKind::Relu),
            "tanh" => Ok(ActivationKind::Tanh),
            "sigmoid" => Ok(ActivationKind::Sigmoid),
            _ => Err(ActivationError::Unknown(s.to_string())),
        }
    }
}
