//! ASG: the abstract semantic graph the engine builds, differentiates and runs.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Node identifier.
pub type NodeId = usize;
/// Graph identifier.
pub type AsgId = usize;
/// Tensor shape.
pub type Shape = Vec<usize>;

pub type AsgResult<T> = std::result::Result<T, AsgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsgError {
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    #[error("node {0} has no shape; run shape inference first")]
    InvalidShape(NodeId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Duplicates the key in `Asg::nodes` for convenience.
    pub id: NodeId,
    pub name: Option<String>,
    pub node_type: NodeType,
    pub shape: Option<Shape>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeType {
    // Data
    Input { name: String },
    Parameter { name: String },
    Literal(Value),
    /// Value of a node that lives in another graph (forward values seen
    /// from the gradient graph).
    External { name: String, source_asg_id: AsgId, source_node_id: NodeId },

    // Binary, NumPy broadcasting
    Add(NodeId, NodeId),
    Subtract(NodeId, NodeId),
    Multiply(NodeId, NodeId),
    MatrixMultiply(NodeId, NodeId),
    GreaterThan(NodeId, NodeId),

    // Unary
    Negate(NodeId),
    ReLU(NodeId),
    LeakyReLU(NodeId, f32),
    Sigmoid(NodeId),
    Tanh(NodeId),

    // Reductions over every element, scalar result
    Sum(NodeId),
    MeanAll(NodeId),

    // Shape
    Transpose(NodeId, usize, usize),
    Broadcast(NodeId, NodeId),
    ReduceSumTo(NodeId, NodeId),
    Concat { inputs: Vec<NodeId>, axis: usize },
    Slice { input: NodeId, axis: usize, start: usize, end: usize },
    /// Zeros shaped like `source` with `grad_output` written at `start` along `axis`.
    SliceGrad { grad_output: NodeId, source: NodeId, axis: usize, start: usize },
}

impl NodeType {
    /// Operand node ids, in evaluation order.
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            NodeType::Input { .. }
            | NodeType::Parameter { .. }
            | NodeType::Literal(_)
            | NodeType::External { .. } => vec![],

            NodeType::Add(a, b)
            | NodeType::Subtract(a, b)
            | NodeType::Multiply(a, b)
            | NodeType::MatrixMultiply(a, b)
            | NodeType::GreaterThan(a, b)
            | NodeType::Broadcast(a, b)
            | NodeType::ReduceSumTo(a, b) => vec![*a, *b],

            NodeType::Negate(a)
            | NodeType::ReLU(a)
            | NodeType::LeakyReLU(a, _)
            | NodeType::Sigmoid(a)
            | NodeType::Tanh(a)
            | NodeType::Sum(a)
            | NodeType::MeanAll(a)
            | NodeType::Transpose(a, _, _) => vec![*a],

            NodeType::Concat { inputs, .. } => inputs.clone(),
            NodeType::Slice { input, .. } => vec![*input],
            NodeType::SliceGrad { grad_output, source, .. } => vec![*grad_output, *source],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Tensor(ArrayD<f32>),
    ScalarF32(f32),
}

impl Value {
    /// Views the value as an n-d array; scalars become 0-d arrays.
    pub fn to_tensor(&self) -> ArrayD<f32> {
        match self {
            Value::Tensor(arr) => arr.clone(),
            Value::ScalarF32(v) => ndarray::arr0(*v).into_dyn(),
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Value::Tensor(arr) => arr.shape().to_vec(),
            Value::ScalarF32(_) => vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asg {
    pub id: AsgId,
    pub nodes: HashMap<NodeId, Node>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

impl Asg {
    pub fn new(id: AsgId) -> Self {
        Self { id, nodes: HashMap::new(), inputs: vec![], outputs: vec![] }
    }

    pub fn add_node(&mut self, name: Option<String>, node_type: NodeType) -> NodeId {
        let new_id = self.nodes.len();
        // Literals know their shape up front.
        let shape = match &node_type {
            NodeType::Literal(value) => Some(value.shape()),
            _ => None,
        };
        self.nodes.insert(new_id, Node { id: new_id, name, node_type, shape });
        new_id
    }

    pub fn set_outputs(&mut self, outputs: Vec<NodeId>) {
        self.outputs = outputs;
    }

    pub fn set_output(&mut self, output: NodeId) {
        self.set_outputs(vec![output]);
    }

    pub fn get_node(&self, id: NodeId) -> AsgResult<&Node> {
        self.nodes.get(&id).ok_or(AsgError::NodeNotFound(id))
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> AsgResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(AsgError::NodeNotFound(id))
    }

    /// Finds the `Input` or `Parameter` node registered under `name`.
    pub fn leaf_id(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|node| {
                matches!(
                    &node.node_type,
                    NodeType::Input { name: n } | NodeType::Parameter { name: n } if n == name
                )
            })
            .map(|node| node.id)
    }

    pub fn shape_of(&self, id: NodeId) -> AsgResult<&Shape> {
        self.get_node(id)?.shape.as_ref().ok_or(AsgError::InvalidShape(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_nodes_carry_their_shape() {
        let mut asg = Asg::new(0);
        let id = asg.add_node(
            None,
            NodeType::Literal(Value::Tensor(ArrayD::zeros(ndarray::IxDyn(&[2, 3])))),
        );
        assert_eq!(asg.shape_of(id).unwrap(), &vec![2, 3]);

        let scalar = asg.add_node(None, NodeType::Literal(Value::ScalarF32(1.0)));
        assert_eq!(asg.shape_of(scalar).unwrap(), &Vec::<usize>::new());
    }

    #[test]
    fn leaf_lookup_by_name() {
        let mut asg = Asg::new(0);
        let x = asg.add_node(Some("x".into()), NodeType::Input { name: "x".into() });
        let w = asg.add_node(Some("w".into()), NodeType::Parameter { name: "w".into() });
        asg.add_node(None, NodeType::MatrixMultiply(x, w));

        assert_eq!(asg.leaf_id("x"), Some(x));
        assert_eq!(asg.leaf_id("w"), Some(w));
        assert_eq!(asg.leaf_id("missing"), None);
    }

    #[test]
    fn missing_shape_is_an_error() {
        let mut asg = Asg::new(0);
        let x = asg.add_node(None, NodeType::Input { name: "x".into() });
        assert_eq!(asg.shape_of(x), Err(AsgError::InvalidShape(x)));
        assert_eq!(asg.get_node(42).err(), Some(AsgError::NodeNotFound(42)));
    }
}
