//! # Graph Analysis Module
//!
//! Passes that process the ASG before execution.
//!
//! - [`ShapeInference`](shape_inference::ShapeInference): propagates tensor
//!   shapes through the graph and rejects mismatches before runtime.
//!
//! ```text
//! ASG (untyped) -> Shape Inference -> ASG (with shapes)
//! ```

pub mod shape_inference;
