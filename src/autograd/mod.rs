//! Reverse-mode autodiff: builds a graph of d(loss)/d(node).
//!
//! The source graph is walked in reverse topological order. For every node
//! that already has an incoming gradient, the contributions to its operands
//! are emitted into a separate gradient `Asg` and accumulated by addition.
//! Forward values the rules need are referenced through `External` nodes,
//! so the gradient graph runs against the memo of a forward run.
//!
//! The source graph must be shape-inferred: broadcasting reductions and
//! mean scaling are resolved from the forward shapes.

use crate::analysis::shape_inference::{ShapeInference, ShapeInferenceError};
use crate::asg::{Asg, AsgError, NodeId, NodeType, Shape, Value};
use ndarray::{ArrayD, IxDyn};
use std::collections::HashMap;
use thiserror::Error;

/// Id of the gradient graph; forward graphs use `MAIN_ASG_ID`.
pub const GRAD_ASG_ID: usize = 1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutogradError {
    #[error("graph: {0}")]
    Asg(#[from] AsgError),
    #[error("shape: {0}")]
    Shape(#[from] ShapeInferenceError),
    #[error("loss node {node_id} must be a scalar, got shape {shape:?}")]
    NonScalarLoss { node_id: NodeId, shape: Shape },
}

pub type AutogradResult<T> = Result<T, AutogradError>;

/// Entry point for gradient graph construction.
///
/// ```ignore
/// let grad_graph = Gradients::new(forward_graph.clone())
///     .build(loss.node_id, &[w.node_id, b.node_id])?;
/// ```
pub struct Gradients {
    src: Asg,
}

impl Gradients {
    pub fn new(src: Asg) -> Self {
        Self { src }
    }

    /// Builds the gradient graph; its outputs are the gradients of `wrt`, in order.
    pub fn build(&self, loss_id: NodeId, wrt: &[NodeId]) -> AutogradResult<Asg> {
        let mut builder = Autograd::new(&self.src);
        builder.backpropagate(loss_id)?;
        builder.finish(wrt)
    }

    /// Same as `build`, then shape-checks the gradient graph.
    pub fn build_and_infer(&self, loss_id: NodeId, wrt: &[NodeId]) -> AutogradResult<Asg> {
        let mut grad = self.build(loss_id, wrt)?;
        ShapeInference::run(&mut grad, &HashMap::new())?;
        Ok(grad)
    }
}

struct Autograd<'a> {
    src: &'a Asg,
    grad: Asg,
    /// source node -> its accumulated gradient node in `grad`
    gmap: HashMap<NodeId, NodeId>,
    /// source node -> its `External` image in `grad`
    images: HashMap<NodeId, NodeId>,
}

impl<'a> Autograd<'a> {
    fn new(src: &'a Asg) -> Self {
        Self {
            src,
            grad: Asg::new(GRAD_ASG_ID),
            gmap: HashMap::new(),
            images: HashMap::new(),
        }
    }

    fn backpropagate(&mut self, loss_id: NodeId) -> AutogradResult<()> {
        let loss_shape = self.src.shape_of(loss_id)?.clone();
        if loss_shape.iter().product::<usize>() != 1 {
            return Err(AutogradError::NonScalarLoss { node_id: loss_id, shape: loss_shape });
        }

        let mut scoped = self.src.clone();
        scoped.set_output(loss_id);
        let order = ShapeInference::topological_sort(&scoped)?;

        let seed = self.lit_scalar(1.0);
        self.gmap.insert(loss_id, seed);

        for &id in order.iter().rev() {
            let g_out = match self.gmap.get(&id).copied() {
                Some(g) => g,
                None => continue,
            };
            let node_type = self.src.get_node(id)?.node_type.clone();

            match node_type {
                NodeType::Input { .. }
                | NodeType::Parameter { .. }
                | NodeType::Literal(_)
                | NodeType::External { .. } => {}

                // -------- binary --------
                NodeType::Add(a, b) => {
                    let ra = self.reduce_to(g_out, a)?;
                    self.acc(a, ra);
                    let rb = self.reduce_to(g_out, b)?;
                    self.acc(b, rb);
                }
                NodeType::Subtract(a, b) => {
                    let ra = self.reduce_to(g_out, a)?;
                    self.acc(a, ra);
                    let neg = self.add_node(NodeType::Negate(g_out));
                    let rb = self.reduce_to(neg, b)?;
                    self.acc(b, rb);
                }
                NodeType::Multiply(a, b) => {
                    let a_im = self.reuse(a)?;
                    let b_im = self.reuse(b)?;
                    let g_a = self.add_node(NodeType::Multiply(g_out, b_im));
                    let g_b = self.add_node(NodeType::Multiply(g_out, a_im));
                    let ra = self.reduce_to(g_a, a)?;
                    self.acc(a, ra);
                    let rb = self.reduce_to(g_b, b)?;
                    self.acc(b, rb);
                }
                NodeType::MatrixMultiply(a, b) => {
                    // g_a = g_out @ b^T, g_b = a^T @ g_out
                    let b_im = self.reuse(b)?;
                    let bt = self.add_node(NodeType::Transpose(b_im, 0, 1));
                    let g_a = self.add_node(NodeType::MatrixMultiply(g_out, bt));
                    let a_im = self.reuse(a)?;
                    let at = self.add_node(NodeType::Transpose(a_im, 0, 1));
                    let g_b = self.add_node(NodeType::MatrixMultiply(at, g_out));
                    self.acc(a, g_a);
                    self.acc(b, g_b);
                }
                // piecewise constant
                NodeType::GreaterThan(_, _) => {}

                // -------- unary --------
                NodeType::Negate(x) => {
                    let g_x = self.add_node(NodeType::Negate(g_out));
                    self.acc(x, g_x);
                }
                NodeType::ReLU(x) => {
                    let zero = self.lit_scalar(0.0);
                    let x_im = self.reuse(x)?;
                    let mask = self.add_node(NodeType::GreaterThan(x_im, zero));
                    let g_x = self.add_node(NodeType::Multiply(g_out, mask));
                    self.acc(x, g_x);
                }
                NodeType::LeakyReLU(x, slope) => {
                    // d/dx = 1 where x > 0, slope elsewhere: mask * (1 - slope) + slope
                    let zero = self.lit_scalar(0.0);
                    let x_im = self.reuse(x)?;
                    let mask = self.add_node(NodeType::GreaterThan(x_im, zero));
                    let rise = self.lit_scalar(1.0 - slope);
                    let scaled = self.add_node(NodeType::Multiply(mask, rise));
                    let floor = self.lit_scalar(slope);
                    let local = self.add_node(NodeType::Add(scaled, floor));
                    let g_x = self.add_node(NodeType::Multiply(g_out, local));
                    self.acc(x, g_x);
                }
                NodeType::Sigmoid(x) => {
                    // reuse the forward output: s * (1 - s)
                    let sig = self.reuse(id)?;
                    let one = self.lit_scalar(1.0);
                    let one_minus_sig = self.add_node(NodeType::Subtract(one, sig));
                    let local = self.add_node(NodeType::Multiply(sig, one_minus_sig));
                    let g_x = self.add_node(NodeType::Multiply(g_out, local));
                    self.acc(x, g_x);
                }
                NodeType::Tanh(x) => {
                    // 1 - tanh(x)^2
                    let t = self.reuse(id)?;
                    let t2 = self.add_node(NodeType::Multiply(t, t));
                    let one = self.lit_scalar(1.0);
                    let local = self.add_node(NodeType::Subtract(one, t2));
                    let g_x = self.add_node(NodeType::Multiply(g_out, local));
                    self.acc(x, g_x);
                }

                // -------- reductions --------
                NodeType::Sum(x) => {
                    let x_im = self.reuse(x)?;
                    let g_x = self.add_node(NodeType::Broadcast(g_out, x_im));
                    self.acc(x, g_x);
                }
                NodeType::MeanAll(x) => {
                    let n = self.src.shape_of(x)?.iter().product::<usize>().max(1);
                    let inv_n = self.lit_scalar(1.0 / n as f32);
                    let scaled = self.add_node(NodeType::Multiply(g_out, inv_n));
                    let x_im = self.reuse(x)?;
                    let g_x = self.add_node(NodeType::Broadcast(scaled, x_im));
                    self.acc(x, g_x);
                }

                // -------- shape --------
                NodeType::Transpose(x, a1, a2) => {
                    let g_x = self.add_node(NodeType::Transpose(g_out, a2, a1));
                    self.acc(x, g_x);
                }
                NodeType::Broadcast(x, _target) => {
                    let g_x = self.reduce_to(g_out, x)?;
                    self.acc(x, g_x);
                }
                NodeType::ReduceSumTo(x, _target) => {
                    let x_im = self.reuse(x)?;
                    let g_x = self.add_node(NodeType::Broadcast(g_out, x_im));
                    self.acc(x, g_x);
                }
                NodeType::Concat { inputs, axis } => {
                    let mut offset = 0;
                    for part in inputs {
                        let width = self.src.shape_of(part)?[axis];
                        let g_part = self.add_node(NodeType::Slice {
                            input: g_out,
                            axis,
                            start: offset,
                            end: offset + width,
                        });
                        self.acc(part, g_part);
                        offset += width;
                    }
                }
                NodeType::Slice { input, axis, start, .. } => {
                    let source = self.reuse(input)?;
                    let g_x = self.add_node(NodeType::SliceGrad { grad_output: g_out, source, axis, start });
                    self.acc(input, g_x);
                }
                // only produced inside gradient graphs
                NodeType::SliceGrad { .. } => {}
            }
        }
        Ok(())
    }

    /// Sets the requested gradients as outputs and names them after their sources.
    fn finish(mut self, wrt: &[NodeId]) -> AutogradResult<Asg> {
        let mut outputs = Vec::with_capacity(wrt.len());
        for &src_id in wrt {
            let src_node = self.src.get_node(src_id)?;
            let name = match &src_node.node_type {
                NodeType::Input { name } | NodeType::Parameter { name } => Some(name.clone()),
                _ => src_node.name.clone(),
            };
            let g_id = match self.gmap.get(&src_id).copied() {
                Some(g) => g,
                // unreachable from the loss
                None => {
                    let shape = self.src.shape_of(src_id)?.clone();
                    self.grad.add_node(None, NodeType::Literal(Value::Tensor(ArrayD::zeros(IxDyn(&shape)))))
                }
            };
            if let Some(name) = name {
                self.grad.get_node_mut(g_id)?.name = Some(name);
            }
            outputs.push(g_id);
        }
        self.grad.set_outputs(outputs);
        Ok(self.grad)
    }

    fn add_node(&mut self, node_type: NodeType) -> NodeId {
        self.grad.add_node(None, node_type)
    }

    fn lit_scalar(&mut self, v: f32) -> NodeId {
        self.grad.add_node(None, NodeType::Literal(Value::ScalarF32(v)))
    }

    /// `External` image of a forward node inside the gradient graph.
    fn reuse(&mut self, src_id: NodeId) -> AutogradResult<NodeId> {
        if let Some(&existing) = self.images.get(&src_id) {
            return Ok(existing);
        }
        let shape = self.src.shape_of(src_id)?.clone();
        let name = format!("external_{}_{}", self.src.id, src_id);
        let id = self.grad.add_node(
            Some(name.clone()),
            NodeType::External { name, source_asg_id: self.src.id, source_node_id: src_id },
        );
        self.grad.get_node_mut(id)?.shape = Some(shape);
        self.images.insert(src_id, id);
        Ok(id)
    }

    /// dL/d(target) += contrib
    fn acc(&mut self, target_src_id: NodeId, contrib: NodeId) {
        let sum = match self.gmap.get(&target_src_id).copied() {
            Some(prev) => self.add_node(NodeType::Add(prev, contrib)),
            None => contrib,
        };
        self.gmap.insert(target_src_id, sum);
    }

    /// Sums `g` over the axes along which `src_id` was broadcast.
    fn reduce_to(&mut self, g: NodeId, src_id: NodeId) -> AutogradResult<NodeId> {
        let src_im = self.reuse(src_id)?;
        Ok(self.add_node(NodeType::ReduceSumTo(g, src_im)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{GraphContext, Tensor};

    #[test]
    fn non_scalar_loss_is_rejected() {
        let ctx = GraphContext::shared();
        let x = Tensor::new_input(&ctx, "x");
        let y = x.relu();
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_output(y.node_id);
        let shapes = HashMap::from([("x".to_string(), vec![2, 3])]);
        ShapeInference::run(&mut graph, &shapes).unwrap();

        let err = Gradients::new(graph).build(y.node_id, &[x.node_id]).unwrap_err();
        assert!(matches!(err, AutogradError::NonScalarLoss { .. }));
    }

    #[test]
    fn unreachable_parameter_gets_zero_gradient() {
        let ctx = GraphContext::shared();
        let x = Tensor::new_input(&ctx, "x");
        let unused = Tensor::new_parameter(&ctx, "unused");
        let loss = x.sum();
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_outputs(vec![loss.node_id, unused.node_id]);
        let shapes = HashMap::from([("x".to_string(), vec![1, 3]), ("unused".to_string(), vec![2, 2])]);
        ShapeInference::run(&mut graph, &shapes).unwrap();

        let grad = Gradients::new(graph).build_and_infer(loss.node_id, &[unused.node_id]).unwrap();
        let out = grad.get_node(grad.outputs[0]).unwrap();
        assert_eq!(out.name.as_deref(), Some("unused"));
        match &out.node_type {
            NodeType::Literal(Value::Tensor(arr)) => {
                assert_eq!(arr.shape(), &[2, 2]);
                assert!(arr.iter().all(|&v| v == 0.0));
            }
            other => panic!("expected zero literal, got {:?}", other),
        }
    }

    #[test]
    fn forward_values_are_shared_externals() {
        let ctx = GraphContext::shared();
        let x = Tensor::new_input(&ctx, "x");
        let w = Tensor::new_parameter(&ctx, "w");
        let h = x.dot(&w);
        let loss = (&h * &h).sum();
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_output(loss.node_id);
        let shapes = HashMap::from([("x".to_string(), vec![2, 3]), ("w".to_string(), vec![3, 1])]);
        ShapeInference::run(&mut graph, &shapes).unwrap();

        let grad = Gradients::new(graph).build_and_infer(loss.node_id, &[w.node_id]).unwrap();
        let h_images = grad
            .nodes
            .values()
            .filter(|n| matches!(n.node_type, NodeType::External { source_node_id, .. } if source_node_id == h.node_id))
            .count();
        assert_eq!(h_images, 1);
        assert_eq!(grad.shape_of(grad.outputs[0]).unwrap(), &vec![3, 1]);
    }
}
