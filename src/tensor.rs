//! `Tensor` handles and the `GraphContext` that owns the graph they point into.
//!
//! A `Tensor` holds no data. It is a symbolic handle to a node in the
//! abstract semantic graph; every operation on it appends a node instead
//! of computing anything. Values only appear when a backend runs the graph.

use crate::asg::{Asg, NodeId, NodeType, Value};
use ndarray::ArrayD;
use std::cell::RefCell;
use std::ops::{Add, Mul, Sub};
use std::rc::Rc;

/// Id of the graph every context builds into.
pub const MAIN_ASG_ID: usize = 0;

/// Owns one graph under construction.
///
/// Shared between tensor handles through `Rc<RefCell<_>>`. A context is
/// created explicitly and dropped with the last handle; there is no
/// process-wide default graph.
#[derive(Debug, Clone)]
pub struct GraphContext {
    main_graph: Asg,
}

impl GraphContext {
    pub fn new() -> Self {
        Self { main_graph: Asg::new(MAIN_ASG_ID) }
    }

    /// Convenience for the shared form every `Tensor` constructor expects.
    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn main_graph_mut(&mut self) -> &mut Asg {
        &mut self.main_graph
    }

    pub fn main_graph(&self) -> &Asg {
        &self.main_graph
    }
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Symbolic handle for a node of the graph owned by `context`.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub node_id: NodeId,
    pub context: Rc<RefCell<GraphContext>>,
}

impl Tensor {
    /// Adds an `Input` node; real data is bound to it by name at run time.
    pub fn new_input(context: &Rc<RefCell<GraphContext>>, name: &str) -> Self {
        let mut ctx = context.borrow_mut();
        let graph = ctx.main_graph_mut();
        let node_id = graph.add_node(Some(name.to_string()), NodeType::Input { name: name.to_string() });
        graph.inputs.push(node_id);
        Self { node_id, context: Rc::clone(context) }
    }

    /// Adds a trainable `Parameter` node.
    pub fn new_parameter(context: &Rc<RefCell<GraphContext>>, name: &str) -> Self {
        let node_id = context
            .borrow_mut()
            .main_graph_mut()
            .add_node(Some(name.to_string()), NodeType::Parameter { name: name.to_string() });
        Self { node_id, context: Rc::clone(context) }
    }

    /// Embeds constant data directly in the graph.
    pub fn new_literal(context: &Rc<RefCell<GraphContext>>, data: ArrayD<f32>, name: &str) -> Self {
        let node_id = context
            .borrow_mut()
            .main_graph_mut()
            .add_node(Some(name.to_string()), NodeType::Literal(Value::Tensor(data)));
        Self { node_id, context: Rc::clone(context) }
    }

    /// Scalar constant that broadcasts against any tensor.
    pub fn scalar(context: &Rc<RefCell<GraphContext>>, value: f32) -> Self {
        let node_id = context
            .borrow_mut()
            .main_graph_mut()
            .add_node(None, NodeType::Literal(Value::ScalarF32(value)));
        Self { node_id, context: Rc::clone(context) }
    }

    fn derive(&self, node_type: NodeType) -> Self {
        let node_id = self.context.borrow_mut().main_graph_mut().add_node(None, node_type);
        Self { node_id, context: Rc::clone(&self.context) }
    }

    // --- Math ---

    /// Matrix product `self @ other` of two 2-D tensors.
    pub fn dot(&self, other: &Tensor) -> Self {
        self.derive(NodeType::MatrixMultiply(self.node_id, other.node_id))
    }

    pub fn neg(&self) -> Self {
        self.derive(NodeType::Negate(self.node_id))
    }

    // --- Activations ---

    pub fn relu(&self) -> Self {
        self.derive(NodeType::ReLU(self.node_id))
    }

    pub fn leaky_relu(&self, negative_slope: f32) -> Self {
        self.derive(NodeType::LeakyReLU(self.node_id, negative_slope))
    }

    pub fn sigmoid(&self) -> Self {
        self.derive(NodeType::Sigmoid(self.node_id))
    }

    pub fn tanh(&self) -> Self {
        self.derive(NodeType::Tanh(self.node_id))
    }

    // --- Reductions ---

    pub fn sum(&self) -> Self {
        self.derive(NodeType::Sum(self.node_id))
    }

    /// Mean over every element, producing a scalar.
    pub fn mean_all(&self) -> Self {
        self.derive(NodeType::MeanAll(self.node_id))
    }

    // --- Shape ---

    pub fn transpose(&self, axis1: usize, axis2: usize) -> Self {
        self.derive(NodeType::Transpose(self.node_id, axis1, axis2))
    }

    /// Joins `parts` along `axis`, preserving their order.
    ///
    /// # Panics
    /// Panics if `parts` is empty.
    pub fn concat(parts: &[&Tensor], axis: usize) -> Self {
        let first = parts.first().expect("concat needs at least one tensor");
        first.derive(NodeType::Concat { inputs: parts.iter().map(|t| t.node_id).collect(), axis })
    }

    /// Elements `start..end` along `axis`.
    pub fn slice(&self, axis: usize, start: usize, end: usize) -> Self {
        self.derive(NodeType::Slice { input: self.node_id, axis, start, end })
    }
}

impl Add<&Tensor> for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Self::Output {
        self.derive(NodeType::Add(self.node_id, rhs.node_id))
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = Tensor;
    fn sub(self, rhs: &Tensor) -> Self::Output {
        self.derive(NodeType::Subtract(self.node_id, rhs.node_id))
    }
}

impl Mul<&Tensor> for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: &Tensor) -> Self::Output {
        self.derive(NodeType::Multiply(self.node_id, rhs.node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_append_nodes() {
        let ctx = GraphContext::shared();
        let x = Tensor::new_input(&ctx, "x");
        let w = Tensor::new_parameter(&ctx, "w");
        let y = x.dot(&w).tanh();

        let graph = ctx.borrow().main_graph().clone();
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.inputs, vec![x.node_id]);
        assert!(matches!(graph.get_node(y.node_id).unwrap().node_type, NodeType::Tanh(_)));
    }

    #[test]
    fn concat_keeps_operand_order() {
        let ctx = GraphContext::shared();
        let a = Tensor::new_input(&ctx, "a");
        let b = Tensor::new_input(&ctx, "b");
        let c = Tensor::new_input(&ctx, "c");
        let joined = Tensor::concat(&[&c, &a, &b], 1);

        let graph = ctx.borrow().main_graph().clone();
        match &graph.get_node(joined.node_id).unwrap().node_type {
            NodeType::Concat { inputs, axis } => {
                assert_eq!(inputs, &vec![c.node_id, a.node_id, b.node_id]);
                assert_eq!(*axis, 1);
            }
            other => panic!("expected Concat, got {:?}", other),
        }
    }

    #[test]
    fn separate_contexts_do_not_share_nodes() {
        let first = GraphContext::shared();
        let second = GraphContext::shared();
        Tensor::new_input(&first, "x");
        Tensor::new_input(&first, "y");
        Tensor::new_input(&second, "x");

        assert_eq!(first.borrow().main_graph().nodes.len(), 2);
        assert_eq!(second.borrow().main_graph().nodes.len(), 1);
    }
}
