//! Fully connected layer.

use crate::nn::init::{ParameterInit, ParameterSpec};
use crate::nn::module::Module;
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

/// Fully connected layer computing `y = xW + b`.
///
/// Holds no data: `weights` (`[in_features, out_features]`) and `bias`
/// (`[1, out_features]`) are `Parameter` nodes whose values are bound when
/// the graph runs.
pub struct Linear {
    pub weights: Tensor,
    pub bias: Tensor,
    name: String,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Registers `{name}.weights` and `{name}.bias` in the graph.
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        in_features: usize,
        out_features: usize,
        name: &str,
    ) -> Self {
        let weights = Tensor::new_parameter(context, &format!("{}.weights", name));
        let bias = Tensor::new_parameter(context, &format!("{}.bias", name));
        Self {
            weights,
            bias,
            name: name.to_string(),
            in_features,
            out_features,
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Module for Linear {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        let dot_product = inputs.dot(&self.weights);
        &dot_product + &self.bias
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weights.clone(), self.bias.clone()]
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new(
                format!("{}.weights", self.name),
                vec![self.in_features, self.out_features],
                ParameterInit::Normal,
            ),
            ParameterSpec::new(format!("{}.bias", self.name), vec![1, self.out_features], ParameterInit::Zeros),
        ]
    }
}
