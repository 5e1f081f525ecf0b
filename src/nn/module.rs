//! The `Module` trait shared by every layer.

use crate::nn::init::ParameterSpec;
use crate::tensor::Tensor;

/// Common interface of layers and activations.
///
/// In the graph architecture a module is anything that can append a fixed
/// pattern of operations and parameters to the graph.
pub trait Module {
    /// Symbolic forward pass: builds this module's part of the graph.
    fn forward(&self, inputs: &Tensor) -> Tensor;

    /// Trainable parameters as symbolic handles.
    fn parameters(&self) -> Vec<Tensor>;

    /// Name, shape and initialiser of each parameter, in `parameters()` order.
    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        Vec::new()
    }
}
