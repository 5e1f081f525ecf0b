//! The `Backend` trait every executor implements.

use crate::asg::{Asg, AsgId, NodeId, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while executing a graph, shared by all backends.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("node {0} not found in graph {1}")]
    NodeNotFound(NodeId, AsgId),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    #[error("tensor shape error: {0}")]
    ShapeError(String),

    #[error("no value bound for input '{0}' (node {1})")]
    MissingInput(String, NodeId),

    #[error("no value bound for parameter '{0}' (node {1})")]
    MissingParameter(String, NodeId),

    #[error("external value '{0}' not present in the memo")]
    MissingExternal(String),
}

/// Cache of computed node values keyed by `(AsgId, NodeId)`.
pub type Memo<T> = HashMap<(AsgId, NodeId), T>;

/// An execution environment able to run an ASG.
pub trait Backend {
    /// Device-side representation of a value.
    type DeviceData: std::fmt::Debug;

    /// Moves host values onto the device.
    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError>;

    /// Runs `main_asg`, starting from (and extending) `initial_memo`.
    ///
    /// Returns the values of the graph outputs, in order, and the final memo
    /// holding every intermediate result. A gradient graph is run with the
    /// memo of its forward pass so its `External` nodes resolve.
    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError>;

    /// Copies results back to the host.
    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError>;
}
