//! Executors for ASGs.

pub mod backend;
pub mod cpu_backend;

pub use backend::{Backend, Memo, RuntimeError};
pub use cpu_backend::CpuBackend;

use crate::asg::Asg;
use std::collections::HashMap;

/// Seeds a memo with the values of `asg`'s named leaves.
///
/// Names with no matching `Input` or `Parameter` node are skipped.
pub fn bind_leaves<T: Clone>(asg: &Asg, data: &HashMap<String, T>) -> Memo<T> {
    let mut memo = Memo::new();
    for (name, value) in data {
        if let Some(id) = asg.leaf_id(name) {
            memo.insert((asg.id, id), value.clone());
        }
    }
    memo
}

