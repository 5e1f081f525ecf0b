//! # Neural Network Layers Module
//!
//! Building blocks for the autoencoder. Each "layer" is a constructor that
//! adds a fixed pattern of nodes (operations and parameters) to the graph.
//!
//! - [`Linear`]: fully connected layer
//! - [`Identity`], [`ReLU`], [`LeakyReLU`], [`PReLU`], [`Sigmoid`], [`Tanh`]:
//!   activations, selected by name through [`ActivationKind`]
//! - [`init`]: parameter specs and their initial values
//!
//! ## Example
//!
//! ```ignore
//! use rustydae::nn::{ActivationKind, Linear, Module};
//! use rustydae::tensor::{GraphContext, Tensor};
//!
//! let ctx = GraphContext::shared();
//! let linear = Linear::new(&ctx, 300, 64, "enc");
//! let act = ActivationKind::LeakyRelu.build(&ctx, "enc.activation");
//!
//! let x = Tensor::new_input(&ctx, "x");
//! let z = act.forward(&linear.forward(&x));
//! ```

pub mod activations;
pub mod init;
pub mod linear;
pub mod module;

pub use activations::{ActivationError, ActivationKind, Identity, LeakyReLU, PReLU, ReLU, Sigmoid, Tanh};
pub use init::{InitError, Initializer, ParameterInit, ParameterSpec};
pub use linear::Linear;
pub use module::Module;
