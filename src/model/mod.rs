//! Models assembled from `nn` layers.

pub mod dae;

pub use dae::{DaeOutput, DecoupledAutoencoder, DenseBlock, BRANCHES};
