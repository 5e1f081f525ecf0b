//! Decoupled autoencoder: three parallel encoder/decoder branches whose
//! latent codes are concatenated into one shared bottleneck.

use crate::asg::Shape;
use crate::nn::{ActivationKind, Linear, Module, ParameterSpec};
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Number of views, and so of encoder/decoder branches.
pub const BRANCHES: usize = 3;

/// `Linear` followed by its own activation instance.
pub struct DenseBlock {
    pub linear: Linear,
    pub activation: Box<dyn Module>,
}

impl DenseBlock {
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        in_features: usize,
        out_features: usize,
        activation: ActivationKind,
        name: &str,
    ) -> Self {
        Self {
            linear: Linear::new(context, in_features, out_features, name),
            activation: activation.build(context, &format!("{}.activation", name)),
        }
    }
}

impl Module for DenseBlock {
    fn forward(&self, inputs: &Tensor) -> Tensor {
        self.activation.forward(&self.linear.forward(inputs))
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = self.linear.parameters();
        params.extend(self.activation.parameters());
        params
    }

    fn parameter_specs(&self) -> Vec<ParameterSpec> {
        let mut specs = self.linear.parameter_specs();
        specs.extend(self.activation.parameter_specs());
        specs
    }
}

/// Symbolic results of one forward pass.
#[derive(Debug, Clone)]
pub struct DaeOutput {
    /// `r_i`, each `[batch, input_dim]`.
    pub reconstructions: [Tensor; BRANCHES],
    /// `z_i`, each `[batch, latent_dim]`.
    pub latents: [Tensor; BRANCHES],
    /// `[z1 | z2 | z3]`, `[batch, 3 * latent_dim]`.
    pub bottleneck: Tensor,
}

/// Three independent branches `x_i -> z_i -> r_i` with no weight sharing.
///
/// Layers are named `dae.encoder{i}` / `dae.decoder{i}` for `i` in `1..=3`,
/// so parameters are `dae.encoder1.weights`, `dae.decoder3.bias`, and, with
/// a parametric activation, `dae.encoder2.activation.slope`.
pub struct DecoupledAutoencoder {
    encoders: [DenseBlock; BRANCHES],
    decoders: [DenseBlock; BRANCHES],
    input_dim: usize,
    latent_dim: usize,
    activation: ActivationKind,
}

impl DecoupledAutoencoder {
    pub fn new(
        context: &Rc<RefCell<GraphContext>>,
        input_dim: usize,
        latent_dim: usize,
        activation: ActivationKind,
    ) -> Self {
        let encoders = [1, 2, 3].map(|i| {
            DenseBlock::new(context, input_dim, latent_dim, activation, &format!("dae.encoder{}", i))
        });
        let decoders = [1, 2, 3].map(|i| {
            DenseBlock::new(context, latent_dim, input_dim, activation, &format!("dae.decoder{}", i))
        });
        Self {
            encoders,
            decoders,
            input_dim,
            latent_dim,
            activation,
        }
    }

    /// Encodes each view, concatenates the codes and decodes each code
    /// back into its own view.
    pub fn forward(&self, x1: &Tensor, x2: &Tensor, x3: &Tensor) -> DaeOutput {
        let latents = [
            self.encoders[0].forward(x1),
            self.encoders[1].forward(x2),
            self.encoders[2].forward(x3),
        ];
        let bottleneck = Tensor::concat(&[&latents[0], &latents[1], &latents[2]], 1);
        let reconstructions = [
            self.decoders[0].forward(&latents[0]),
            self.decoders[1].forward(&latents[1]),
            self.decoders[2].forward(&latents[2]),
        ];
        DaeOutput {
            reconstructions,
            latents,
            bottleneck,
        }
    }

    pub fn encoders(&self) -> &[DenseBlock; BRANCHES] {
        &self.encoders
    }

    pub fn decoders(&self) -> &[DenseBlock; BRANCHES] {
        &self.decoders
    }

    /// Encoder parameters of every branch, then decoder parameters.
    pub fn parameters(&self) -> Vec<Tensor> {
        self.encoders
            .iter()
            .chain(self.decoders.iter())
            .flat_map(|block| block.parameters())
            .collect()
    }

    /// Specs in `parameters()` order.
    pub fn parameter_specs(&self) -> Vec<ParameterSpec> {
        self.encoders
            .iter()
            .chain(self.decoders.iter())
            .flat_map(|block| block.parameter_specs())
            .collect()
    }

    pub fn parameter_shapes(&self) -> HashMap<String, Shape> {
        self.parameter_specs()
            .into_iter()
            .map(|spec| (spec.name, spec.shape))
            .collect()
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    pub fn bottleneck_dim(&self) -> usize {
        BRANCHES * self.latent_dim
    }

    pub fn activation(&self) -> ActivationKind {
        self.activation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::shape_inference::ShapeInference;
    use crate::asg::NodeType;

    fn build(activation: ActivationKind) -> (Rc<RefCell<GraphContext>>, DecoupledAutoencoder, DaeOutput) {
        let ctx = GraphContext::shared();
        let model = DecoupledAutoencoder::new(&ctx, 6, 2, activation);
        let xs = ["x1", "x2", "x3"].map(|n| Tensor::new_input(&ctx, n));
        let out = model.forward(&xs[0], &xs[1], &xs[2]);
        (ctx, model, out)
    }

    #[test]
    fn parameter_names_and_shapes() {
        let (_ctx, model, _) = build(ActivationKind::LeakyRelu);
        let shapes = model.parameter_shapes();
        assert_eq!(shapes.len(), 12);
        assert_eq!(shapes["dae.encoder1.weights"], vec![6, 2]);
        assert_eq!(shapes["dae.encoder3.bias"], vec![1, 2]);
        assert_eq!(shapes["dae.decoder2.weights"], vec![2, 6]);
        assert_eq!(shapes["dae.decoder2.bias"], vec![1, 6]);
        assert_eq!(model.parameters().len(), model.parameter_specs().len());
    }

    #[test]
    fn prelu_adds_one_slope_per_layer() {
        let (_ctx, model, _) = build(ActivationKind::ParameterizedLeakyRelu);
        let shapes = model.parameter_shapes();
        assert_eq!(shapes.len(), 18);
        assert_eq!(shapes["dae.decoder1.activation.slope"], vec![1, 1]);
    }

    #[test]
    fn forward_shapes() {
        let (ctx, model, out) = build(ActivationKind::Tanh);
        let mut graph = ctx.borrow().main_graph().clone();
        let mut outputs: Vec<_> = out.reconstructions.iter().map(|t| t.node_id).collect();
        outputs.extend(out.latents.iter().map(|t| t.node_id));
        outputs.push(out.bottleneck.node_id);
        graph.set_outputs(outputs);

        let mut shapes = model.parameter_shapes();
        for name in ["x1", "x2", "x3"] {
            shapes.insert(name.to_string(), vec![5, 6]);
        }
        ShapeInference::run(&mut graph, &shapes).unwrap();

        for r in &out.reconstructions {
            assert_eq!(graph.shape_of(r.node_id).unwrap(), &vec![5, 6]);
        }
        for z in &out.latents {
            assert_eq!(graph.shape_of(z.node_id).unwrap(), &vec![5, 2]);
        }
        assert_eq!(graph.shape_of(out.bottleneck.node_id).unwrap(), &vec![5, model.bottleneck_dim()]);
    }

    #[test]
    fn bottleneck_concatenates_latents_in_branch_order() {
        let (ctx, _model, out) = build(ActivationKind::Identity);
        let graph = ctx.borrow();
        match &graph.main_graph().get_node(out.bottleneck.node_id).unwrap().node_type {
            NodeType::Concat { inputs, axis } => {
                assert_eq!(*axis, 1);
                let expected: Vec<_> = out.latents.iter().map(|z| z.node_id).collect();
                assert_eq!(inputs, &expected);
            }
            other => panic!("expected concat, got {:?}", other),
        }
    }
}
