//! Shape inference.
//!
//! Walks the graph in topological order and fills in the output shape of
//! every node reachable from the outputs, so shape mismatches are caught
//! before anything is executed.

use crate::asg::{Asg, AsgError, Node, NodeId, NodeType, Shape};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeInferenceError {
    #[error("graph error: {0}")]
    AsgError(#[from] AsgError),

    #[error("incompatible shapes for '{op}': left operand {shape1:?}, right operand {shape2:?}")]
    IncompatibleShapes { op: String, shape1: Shape, shape2: Shape },

    #[error("shape information missing for node {0}")]
    MissingShapeInfo(NodeId),

    #[error("initial shape not specified for '{0}'")]
    MissingInitialShape(String),

    #[error("invalid rank for node {node_id}: expected {expected}D, got {actual}D")]
    InvalidRank { node_id: NodeId, expected: usize, actual: usize },

    #[error("slice {start}..{end} out of bounds for axis {axis} of length {len} (node {node_id})")]
    SliceOutOfBounds { node_id: NodeId, axis: usize, start: usize, end: usize, len: usize },

    #[error("graph contains a cycle through node {0}")]
    Cycle(NodeId),
}

type Result<T> = std::result::Result<T, ShapeInferenceError>;

pub struct ShapeInference;

impl ShapeInference {
    /// Fills `shape` for every node reachable from the outputs.
    ///
    /// `initial_shapes` provides shapes of `Input` and `Parameter` nodes by
    /// name. `External` nodes must already carry their shape.
    pub fn run(asg: &mut Asg, initial_shapes: &HashMap<String, Shape>) -> Result<()> {
        for node_id in Self::topological_sort(asg)? {
            let node = asg.get_node(node_id)?;
            let shape = Self::infer_node_shape(asg, node, initial_shapes)?;
            asg.get_node_mut(node_id)?.shape = Some(shape);
        }
        Ok(())
    }

    fn infer_node_shape(
        asg: &Asg,
        node: &Node,
        initial_shapes: &HashMap<String, Shape>,
    ) -> Result<Shape> {
        match &node.node_type {
            NodeType::Input { name } | NodeType::Parameter { name } => initial_shapes
                .get(name)
                .cloned()
                .ok_or_else(|| ShapeInferenceError::MissingInitialShape(name.clone())),

            NodeType::Literal(value) => Ok(value.shape()),

            NodeType::External { .. } => {
                node.shape.clone().ok_or(ShapeInferenceError::MissingShapeInfo(node.id))
            }

            NodeType::Add(l, r)
            | NodeType::Subtract(l, r)
            | NodeType::Multiply(l, r)
            | NodeType::GreaterThan(l, r) => {
                let ls = Self::get_shape(asg, *l)?;
                let rs = Self::get_shape(asg, *r)?;
                broadcast_shapes(&ls, &rs).ok_or_else(|| ShapeInferenceError::IncompatibleShapes {
                    op: op_name(&node.node_type).to_string(),
                    shape1: ls,
                    shape2: rs,
                })
            }

            NodeType::MatrixMultiply(l, r) => {
                let ls = Self::get_shape(asg, *l)?;
                let rs = Self::get_shape(asg, *r)?;
                for s in [&ls, &rs] {
                    if s.len() != 2 {
                        return Err(ShapeInferenceError::InvalidRank {
                            node_id: node.id,
                            expected: 2,
                            actual: s.len(),
                        });
                    }
                }
                if ls[1] != rs[0] {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "MatrixMultiply".to_string(),
                        shape1: ls,
                        shape2: rs,
                    });
                }
                Ok(vec![ls[0], rs[1]])
            }

            NodeType::Negate(id)
            | NodeType::ReLU(id)
            | NodeType::LeakyReLU(id, _)
            | NodeType::Sigmoid(id)
            | NodeType::Tanh(id) => Self::get_shape(asg, *id),

            NodeType::Sum(id) | NodeType::MeanAll(id) => {
                Self::get_shape(asg, *id)?;
                Ok(vec![])
            }

            NodeType::Transpose(id, axis1, axis2) => {
                let mut shape = Self::get_shape(asg, *id)?;
                if *axis1 >= shape.len() || *axis2 >= shape.len() {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: axis1.max(axis2) + 1,
                        actual: shape.len(),
                    });
                }
                shape.swap(*axis1, *axis2);
                Ok(shape)
            }

            NodeType::Broadcast(source, target) => {
                let ss = Self::get_shape(asg, *source)?;
                let ts = Self::get_shape(asg, *target)?;
                match broadcast_shapes(&ss, &ts) {
                    Some(out) if out == ts => Ok(ts),
                    _ => Err(ShapeInferenceError::IncompatibleShapes {
                        op: "Broadcast".to_string(),
                        shape1: ss,
                        shape2: ts,
                    }),
                }
            }

            NodeType::ReduceSumTo(source, target) => {
                let ss = Self::get_shape(asg, *source)?;
                let ts = Self::get_shape(asg, *target)?;
                match broadcast_shapes(&ss, &ts) {
                    Some(out) if out == ss => Ok(ts),
                    _ => Err(ShapeInferenceError::IncompatibleShapes {
                        op: "ReduceSumTo".to_string(),
                        shape1: ss,
                        shape2: ts,
                    }),
                }
            }

            NodeType::Concat { inputs, axis } => {
                let mut out: Option<Shape> = None;
                for id in inputs {
                    let shape = Self::get_shape(asg, *id)?;
                    if *axis >= shape.len() {
                        return Err(ShapeInferenceError::InvalidRank {
                            node_id: node.id,
                            expected: axis + 1,
                            actual: shape.len(),
                        });
                    }
                    out = Some(match out {
                        None => shape,
                        Some(mut acc) => {
                            let same_rest = acc.len() == shape.len()
                                && acc.iter().zip(&shape).enumerate().all(|(i, (a, b))| i == *axis || a == b);
                            if !same_rest {
                                return Err(ShapeInferenceError::IncompatibleShapes {
                                    op: "Concat".to_string(),
                                    shape1: acc,
                                    shape2: shape,
                                });
                            }
                            acc[*axis] += shape[*axis];
                            acc
                        }
                    });
                }
                out.ok_or(ShapeInferenceError::MissingShapeInfo(node.id))
            }

            NodeType::Slice { input, axis, start, end } => {
                let mut shape = Self::get_shape(asg, *input)?;
                if *axis >= shape.len() {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: axis + 1,
                        actual: shape.len(),
                    });
                }
                if start > end || *end > shape[*axis] {
                    return Err(ShapeInferenceError::SliceOutOfBounds {
                        node_id: node.id,
                        axis: *axis,
                        start: *start,
                        end: *end,
                        len: shape[*axis],
                    });
                }
                shape[*axis] = end - start;
                Ok(shape)
            }

            NodeType::SliceGrad { grad_output, source, axis, start } => {
                let gs = Self::get_shape(asg, *grad_output)?;
                let ss = Self::get_shape(asg, *source)?;
                let fits = gs.len() == ss.len()
                    && *axis < ss.len()
                    && start + gs[*axis] <= ss[*axis]
                    && gs.iter().zip(&ss).enumerate().all(|(i, (g, s))| i == *axis || g == s);
                if !fits {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "SliceGrad".to_string(),
                        shape1: gs,
                        shape2: ss,
                    });
                }
                Ok(ss)
            }
        }
    }

    fn get_shape(asg: &Asg, node_id: NodeId) -> Result<Shape> {
        asg.get_node(node_id)?
            .shape
            .clone()
            .ok_or(ShapeInferenceError::MissingShapeInfo(node_id))
    }

    /// Orders the nodes reachable from the outputs so that every node comes
    /// after its operands.
    pub fn topological_sort(asg: &Asg) -> Result<Vec<NodeId>> {
        let mut sorted = Vec::new();
        let mut visited = HashSet::new();
        let mut in_progress = HashSet::new();
        for output_id in &asg.outputs {
            Self::build_sorted_graph(*output_id, asg, &mut visited, &mut in_progress, &mut sorted)?;
        }
        Ok(sorted)
    }

    fn build_sorted_graph(
        node_id: NodeId,
        asg: &Asg,
        visited: &mut HashSet<NodeId>,
        in_progress: &mut HashSet<NodeId>,
        sorted: &mut Vec<NodeId>,
    ) -> Result<()> {
        if visited.contains(&node_id) {
            return Ok(());
        }
        if !in_progress.insert(node_id) {
            return Err(ShapeInferenceError::Cycle(node_id));
        }

        for input_id in asg.get_node(node_id)?.node_type.operands() {
            Self::build_sorted_graph(input_id, asg, visited, in_progress, sorted)?;
        }

        in_progress.remove(&node_id);
        visited.insert(node_id);
        sorted.push(node_id);
        Ok(())
    }
}

/// NumPy-style broadcast of two shapes, `None` if they are incompatible.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Shape> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

fn op_name(node_type: &NodeType) -> &'static str {
    match node_type {
        NodeType::Add(..) => "Add",
        NodeType::Subtract(..) => "Subtract",
        NodeType::Multiply(..) => "Multiply",
        NodeType::GreaterThan(..) => "GreaterThan",
        _ => "Elementwise",
    }
}
