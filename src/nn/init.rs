//! Parameter initialisation.
//!
//! Layers describe their parameters with `ParameterSpec`s; an `Initializer`
//! turns those into concrete values once, when a model is created.

use crate::asg::{Shape, Value};
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InitError {
    #[error("weight standard deviation must be finite and positive, got {0}")]
    InvalidStd(f32),
}

/// How a parameter's initial value is drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterInit {
    /// Zero-mean normal with the initializer's standard deviation.
    Normal,
    Zeros,
    Constant(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub shape: Shape,
    pub init: ParameterInit,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, shape: Shape, init: ParameterInit) -> Self {
        Self { name: name.into(), shape, init }
    }
}

pub struct Initializer {
    rng: StdRng,
    normal: Normal<f32>,
}

impl Initializer {
    /// `seed = None` draws from OS entropy.
    pub fn new(std: f32, seed: Option<u64>) -> Result<Self, InitError> {
        if !(std.is_finite() && std > 0.0) {
            return Err(InitError::InvalidStd(std));
        }
        let normal = Normal::new(0.0, std).map_err(|_| InitError::InvalidStd(std))?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self { rng, normal })
    }

    pub fn materialize(&mut self, spec: &ParameterSpec) -> ArrayD<f32> {
        let shape = IxDyn(&spec.shape);
        match spec.init {
            ParameterInit::Normal => ArrayD::random_using(shape, self.normal, &mut self.rng),
            ParameterInit::Zeros => ArrayD::zeros(shape),
            ParameterInit::Constant(value) => ArrayD::from_elem(shape, value),
        }
    }

    /// Values for every spec, keyed by parameter name.
    pub fn materialize_all(&mut self, specs: &[ParameterSpec]) -> HashMap<String, Value> {
        specs
            .iter()
            .map(|spec| (spec.name.clone(), Value::Tensor(self.materialize(spec))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_std() {
        assert_eq!(Initializer::new(0.0, None).err(), Some(InitError::InvalidStd(0.0)));
        assert!(Initializer::new(f32::NAN, None).is_err());
    }

    #[test]
    fn seeded_draws_are_reproducible() {
        let spec = ParameterSpec::new("w", vec![8, 4], ParameterInit::Normal);
        let a = Initializer::new(0.01, Some(7)).unwrap().materialize(&spec);
        let b = Initializer::new(0.01, Some(7)).unwrap().materialize(&spec);
        assert_eq!(a, b);
        assert_eq!(a.shape(), &[8, 4]);
    }

    #[test]
    fn normal_draws_are_small_and_biases_zero() {
        let mut init = Initializer::new(0.01, Some(1)).unwrap();
        let w = init.materialize(&ParameterSpec::new("w", vec![64, 64], ParameterInit::Normal));
        let b = init.materialize(&ParameterSpec::new("b", vec![1, 64], ParameterInit::Zeros));

        let mean = w.mean().unwrap();
        let var = w.mapv(|x| (x - mean) * (x - mean)).mean().unwrap();
        assert!(mean.abs() < 2e-3, "mean {}", mean);
        assert!((var.sqrt() - 0.01).abs() < 2e-3, "std {}", var.sqrt());
        assert!(b.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn constant_init() {
        let mut init = Initializer::new(0.01, Some(1)).unwrap();
        let slope = init.materialize(&ParameterSpec::new("a", vec![1, 1], ParameterInit::Constant(0.25)));
        assert_eq!(slope[[0, 0]], 0.25);
    }
}
