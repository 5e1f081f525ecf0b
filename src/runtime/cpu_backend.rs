//! CPU backend.
//!
//! Walks the ASG in topological order and evaluates every node with
//! `ndarray`. Shape problems come back as `RuntimeError::ShapeError`
//! instead of panicking inside `ndarray`.

use super::backend::{Backend, Memo, RuntimeError};
use crate::analysis::shape_inference::{broadcast_shapes, ShapeInference};
use crate::asg::{Asg, NodeId, NodeType, Value};
use ndarray::{ArrayD, ArrayViewD, Axis, Ix2, IxDyn, Slice, Zip};
use std::collections::HashMap;
use tracing::trace;

/// Evaluation state for one graph run.
struct ExecutionContext<'a> {
    asg: &'a Asg,
    /// Shared with other graphs: `External` nodes read their source here.
    memo: Memo<Value>,
}

impl<'a> ExecutionContext<'a> {
    fn new(asg: &'a Asg, memo: Memo<Value>) -> Self {
        Self { asg, memo }
    }

    fn evaluate_node(&mut self, node_id: NodeId) -> Result<Value, RuntimeError> {
        let key = (self.asg.id, node_id);
        if let Some(value) = self.memo.get(&key) {
            return Ok(value.clone());
        }

        let asg: &'a Asg = self.asg;
        let node = asg.nodes.get(&node_id).ok_or(RuntimeError::NodeNotFound(node_id, asg.id))?;

        let result = match &node.node_type {
            NodeType::Input { name } => {
                return Err(RuntimeError::MissingInput(name.clone(), node.id));
            }
            NodeType::Parameter { name } => {
                return Err(RuntimeError::MissingParameter(name.clone(), node.id));
            }
            NodeType::Literal(value) => value.clone(),
            NodeType::External { name, source_asg_id, source_node_id } => self
                .memo
                .get(&(*source_asg_id, *source_node_id))
                .cloned()
                .ok_or_else(|| RuntimeError::MissingExternal(name.clone()))?,

            NodeType::Add(l, r) => {
                let (a, b) = (self.operand(*l)?, self.operand(*r)?);
                Value::Tensor(zip_broadcast(&a, &b, "Add", |x, y| x + y)?)
            }
            NodeType::Subtract(l, r) => {
                let (a, b) = (self.operand(*l)?, self.operand(*r)?);
                Value::Tensor(zip_broadcast(&a, &b, "Subtract", |x, y| x - y)?)
            }
            NodeType::Multiply(l, r) => {
                let (a, b) = (self.operand(*l)?, self.operand(*r)?);
                Value::Tensor(zip_broadcast(&a, &b, "Multiply", |x, y| x * y)?)
            }
            NodeType::GreaterThan(l, r) => {
                let (a, b) = (self.operand(*l)?, self.operand(*r)?);
                Value::Tensor(zip_broadcast(&a, &b, "GreaterThan", |x, y| if x > y { 1.0 } else { 0.0 })?)
            }
            NodeType::MatrixMultiply(l, r) => {
                let (a, b) = (self.operand(*l)?, self.operand(*r)?);
                Value::Tensor(op_matmul(a, b)?)
            }

            NodeType::Negate(op) => Value::Tensor(self.operand(*op)?.mapv(|x| -x)),
            NodeType::ReLU(op) => Value::Tensor(self.operand(*op)?.mapv(|x| x.max(0.0))),
            NodeType::LeakyReLU(op, slope) => {
                let slope = *slope;
                Value::Tensor(self.operand(*op)?.mapv(|x| if x > 0.0 { x } else { slope * x }))
            }
            NodeType::Sigmoid(op) => Value::Tensor(self.operand(*op)?.mapv(|x| 1.0 / (1.0 + (-x).exp()))),
            NodeType::Tanh(op) => Value::Tensor(self.operand(*op)?.mapv(f32::tanh)),

            NodeType::Sum(op) => Value::Tensor(ndarray::arr0(self.operand(*op)?.sum()).into_dyn()),
            NodeType::MeanAll(op) => {
                let a = self.operand(*op)?;
                Value::Tensor(ndarray::arr0(a.mean().unwrap_or(0.0)).into_dyn())
            }

            NodeType::Transpose(op, axis1, axis2) => Value::Tensor(op_transpose(self.operand(*op)?, *axis1, *axis2)?),
            NodeType::Broadcast(source, target) => {
                let s = self.operand(*source)?;
                let t = self.operand(*target)?;
                let view = s.broadcast(IxDyn(t.shape())).ok_or_else(|| {
                    RuntimeError::ShapeError(format!("cannot broadcast {:?} to {:?}", s.shape(), t.shape()))
                })?;
                Value::Tensor(view.to_owned())
            }
            NodeType::ReduceSumTo(source, target) => {
                let s = self.operand(*source)?;
                let t = self.operand(*target)?;
                Value::Tensor(op_reduce_sum_to(s, t.shape())?)
            }
            NodeType::Concat { inputs, axis } => {
                let parts = inputs
                    .iter()
                    .map(|id| self.operand(*id))
                    .collect::<Result<Vec<_>, _>>()?;
                let views: Vec<ArrayViewD<'_, f32>> = parts.iter().map(|p| p.view()).collect();
                let joined = ndarray::concatenate(Axis(*axis), &views)
                    .map_err(|e| RuntimeError::ShapeError(format!("Concat: {}", e)))?;
                Value::Tensor(joined)
            }
            NodeType::Slice { input, axis, start, end } => {
                Value::Tensor(op_slice(self.operand(*input)?, *axis, *start, *end)?)
            }
            NodeType::SliceGrad { grad_output, source, axis, start } => {
                let g = self.operand(*grad_output)?;
                let s = self.operand(*source)?;
                Value::Tensor(op_slice_grad(g, s.shape(), *axis, *start)?)
            }
        };

        self.memo.insert(key, result.clone());
        Ok(result)
    }

    fn operand(&mut self, node_id: NodeId) -> Result<ArrayD<f32>, RuntimeError> {
        Ok(self.evaluate_node(node_id)?.to_tensor())
    }
}

pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    type DeviceData = Value;

    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError> {
        Ok(data.clone())
    }

    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError> {
        let sorted_nodes = ShapeInference::topological_sort(main_asg)
            .map_err(|e| RuntimeError::ShapeError(format!("topological sort failed: {}", e)))?;
        trace!(asg = main_asg.id, nodes = sorted_nodes.len(), "evaluating graph on cpu");

        let mut context = ExecutionContext::new(main_asg, initial_memo);
        for node_id in sorted_nodes {
            context.evaluate_node(node_id)?;
        }

        let mut results = Vec::with_capacity(main_asg.outputs.len());
        for output_node_id in &main_asg.outputs {
            let result = context
                .memo
                .get(&(main_asg.id, *output_node_id))
                .ok_or(RuntimeError::NodeNotFound(*output_node_id, main_asg.id))?
                .clone();
            results.push(result);
        }
        Ok((results, context.memo))
    }

    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError> {
        Ok(device_data.to_vec())
    }
}

fn zip_broadcast(
    a: &ArrayD<f32>,
    b: &ArrayD<f32>,
    op: &str,
    f: impl Fn(f32, f32) -> f32,
) -> Result<ArrayD<f32>, RuntimeError> {
    let mismatch = || RuntimeError::ShapeError(format!("{}: cannot broadcast {:?} with {:?}", op, a.shape(), b.shape()));
    let shape = broadcast_shapes(a.shape(), b.shape()).ok_or_else(mismatch)?;
    let av = a.broadcast(IxDyn(&shape)).ok_or_else(mismatch)?;
    let bv = b.broadcast(IxDyn(&shape)).ok_or_else(mismatch)?;
    Ok(Zip::from(&av).and(&bv).map_collect(|&x, &y| f(x, y)))
}

fn op_matmul(a: ArrayD<f32>, b: ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
    let a_shape = a.shape().to_vec();
    let b_shape = b.shape().to_vec();
    let a_mat = a
        .into_dimensionality::<Ix2>()
        .map_err(|_| RuntimeError::ShapeError(format!("MatrixMultiply: lhs must be 2-D, got {:?}", a_shape)))?;
    let b_mat = b
        .into_dimensionality::<Ix2>()
        .map_err(|_| RuntimeError::ShapeError(format!("MatrixMultiply: rhs must be 2-D, got {:?}", b_shape)))?;
    if a_mat.ncols() != b_mat.nrows() {
        return Err(RuntimeError::ShapeError(format!(
            "incompatible matmul shapes: {:?} and {:?}",
            a_shape, b_shape
        )));
    }
    Ok(a_mat.dot(&b_mat).into_dyn())
}

fn op_transpose(a: ArrayD<f32>, axis1: usize, axis2: usize) -> Result<ArrayD<f32>, RuntimeError> {
    if axis1 >= a.ndim() || axis2 >= a.ndim() {
        return Err(RuntimeError::ShapeError(format!(
            "cannot swap axes {} and {} of a {}-D tensor",
            axis1,
            axis2,
            a.ndim()
        )));
    }
    let mut axes: Vec<usize> = (0..a.ndim()).collect();
    axes.swap(axis1, axis2);
    Ok(a.permuted_axes(axes))
}

/// Sums `source` down to `target` shape along the broadcast axes.
fn op_reduce_sum_to(mut source: ArrayD<f32>, target: &[usize]) -> Result<ArrayD<f32>, RuntimeError> {
    while source.ndim() > target.len() {
        source = source.sum_axis(Axis(0));
    }
    if source.ndim() == target.len() {
        for (axis, &dim) in target.iter().enumerate() {
            if dim == 1 && source.shape()[axis] != 1 {
                source = source.sum_axis(Axis(axis)).insert_axis(Axis(axis));
            }
        }
    }
    if source.shape() == target {
        return Ok(source);
    }
    // e.g. a scalar reduced onto a [1, 1] operand
    if source.len() == target.iter().product::<usize>() {
        return ArrayD::from_shape_vec(IxDyn(target), source.iter().cloned().collect())
            .map_err(|e| RuntimeError::ShapeError(e.to_string()));
    }
    Err(RuntimeError::ShapeError(format!(
        "cannot reduce {:?} to {:?}",
        source.shape(),
        target
    )))
}

fn op_slice(a: ArrayD<f32>, axis: usize, start: usize, end: usize) -> Result<ArrayD<f32>, RuntimeError> {
    if axis >= a.ndim() || start > end || end > a.shape()[axis] {
        return Err(RuntimeError::ShapeError(format!(
            "slice {}..{} along axis {} out of bounds for {:?}",
            start,
            end,
            axis,
            a.shape()
        )));
    }
    Ok(a.slice_axis(Axis(axis), Slice::from(start..end)).to_owned())
}

fn op_slice_grad(
    grad: ArrayD<f32>,
    source_shape: &[usize],
    axis: usize,
    start: usize,
) -> Result<ArrayD<f32>, RuntimeError> {
    let fits = grad.ndim() == source_shape.len()
        && axis < source_shape.len()
        && start + grad.shape()[axis] <= source_shape[axis]
        && grad
            .shape()
            .iter()
            .zip(source_shape)
            .enumerate()
            .all(|(i, (g, s))| i == axis || g == s);
    if !fits {
        return Err(RuntimeError::ShapeError(format!(
            "slice gradient {:?} does not fit {:?} at {} along axis {}",
            grad.shape(),
            source_shape,
            start,
            axis
        )));
    }
    let end = start + grad.shape()[axis];
    let mut out = ArrayD::<f32>::zeros(IxDyn(source_shape));
    out.slice_axis_mut(Axis(axis), Slice::from(start..end)).assign(&grad);
    Ok(out)
}
