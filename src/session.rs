//! Explicit computation context for a decoupled autoencoder.
//!
//! A `DaeSession` owns everything the model needs between calls: the graph
//! context, the symbolic model and loss, the current parameter values and
//! the graphs compiled for each batch size seen so far. Nothing is shared
//! between sessions.

use crate::analysis::shape_inference::ShapeInference;
use crate::asg::{Asg, NodeId, Shape, Value};
use crate::autograd::Gradients;
use crate::config::DaeConfig;
use crate::error::{DaeError, DaeResult};
use crate::losses::dae_loss;
use crate::model::{DaeOutput, DecoupledAutoencoder, BRANCHES};
use crate::nn::{Initializer, ParameterSpec};
use crate::optimizers::Optimizer;
use crate::runtime::{bind_leaves, Backend, CpuBackend, Memo, RuntimeError};
use crate::tensor::{GraphContext, Tensor};
use ndarray::{Array2, ArrayD, Ix2};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, warn};

/// Three row-aligned batches, one per view.
pub type Views<'a> = [&'a Array2<f32>; BRANCHES];

const VIEW_NAMES: [&str; BRANCHES] = ["x1", "x2", "x3"];
const TARGET_NAMES: [&str; BRANCHES] = ["target1", "target2", "target3"];

/// Numeric results of a forward pass.
#[derive(Debug, Clone)]
pub struct Forward {
    pub reconstructions: [Array2<f32>; BRANCHES],
    pub latents: [Array2<f32>; BRANCHES],
    /// `[batch, 3 * latent_dim]`
    pub bottleneck: Array2<f32>,
}

/// Graphs specialised to one batch size.
struct CompiledGraphs {
    /// Outputs: reconstructions, latents, bottleneck.
    inference: Asg,
    /// Output: the scalar loss.
    training: Asg,
    /// Outputs: loss gradients in `DaeSession::parameter_nodes` order.
    gradients: Asg,
}

pub struct DaeSession {
    config: DaeConfig,
    context: Rc<RefCell<GraphContext>>,
    model: DecoupledAutoencoder,
    output: DaeOutput,
    loss: Tensor,
    specs: Vec<ParameterSpec>,
    /// `(name, node)` of every trainable parameter.
    parameter_nodes: Vec<(String, NodeId)>,
    parameters: HashMap<String, Value>,
    compiled: HashMap<usize, CompiledGraphs>,
    backend: CpuBackend,
    steps: u64,
}

impl DaeSession {
    /// Validates `config`, builds the symbolic model and loss, and draws
    /// the initial parameter values.
    pub fn new(config: DaeConfig) -> DaeResult<Self> {
        config.validate()?;

        let context = GraphContext::shared();
        let model = DecoupledAutoencoder::new(&context, config.input_dim, config.latent_dim, config.activation);

        let views = VIEW_NAMES.map(|name| Tensor::new_input(&context, name));
        let targets = TARGET_NAMES.map(|name| Tensor::new_input(&context, name));
        let output = model.forward(&views[0], &views[1], &views[2]);
        let loss = dae_loss(
            &output.reconstructions,
            &output.bottleneck,
            &targets,
            config.latent_dim,
            &config.loss_weights,
        );

        let specs = model.parameter_specs();
        let parameter_nodes = specs
            .iter()
            .zip(model.parameters())
            .map(|(spec, tensor)| (spec.name.clone(), tensor.node_id))
            .collect();
        let parameters = Initializer::new(config.init_std, config.seed)?.materialize_all(&specs);

        debug!(
            input_dim = config.input_dim,
            latent_dim = config.latent_dim,
            activation = %config.activation,
            parameters = specs.len(),
            "created dae session"
        );

        Ok(Self {
            config,
            context,
            model,
            output,
            loss,
            specs,
            parameter_nodes,
            parameters,
            compiled: HashMap::new(),
            backend: CpuBackend::new(),
            steps: 0,
        })
    }

    pub fn config(&self) -> &DaeConfig {
        &self.config
    }

    pub fn model(&self) -> &DecoupledAutoencoder {
        &self.model
    }

    /// Number of `train_step` calls so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Runs all three branches.
    pub fn forward(&mut self, views: Views<'_>) -> DaeResult<Forward> {
        let batch = self.check_batch(&views, "view")?;
        self.ensure_compiled(batch)?;

        let data = self.bindings(&views, None);
        let graph = &self.compiled[&batch].inference;
        let (outputs, _) = self.backend.run(graph, bind_leaves(graph, &data))?;

        let mut matrices = outputs.iter().map(as_matrix).collect::<DaeResult<Vec<_>>>()?.into_iter();
        let mut next = || {
            matrices
                .next()
                .ok_or_else(|| DaeError::Runtime(RuntimeError::ShapeError("missing forward output".into())))
        };
        let reconstructions = [next()?, next()?, next()?];
        let latents = [next()?, next()?, next()?];
        let bottleneck = next()?;
        Ok(Forward {
            reconstructions,
            latents,
            bottleneck,
        })
    }

    /// The bottleneck representation alone.
    pub fn embed(&mut self, views: Views<'_>) -> DaeResult<Array2<f32>> {
        Ok(self.forward(views)?.bottleneck)
    }

    /// Value of the composite loss. For plain autoencoding pass the views
    /// as their own targets.
    pub fn loss(&mut self, views: Views<'_>, targets: Views<'_>) -> DaeResult<f32> {
        let (loss, _) = self.run_training(&views, &targets)?;
        Ok(loss)
    }

    /// Loss value and its gradient for every parameter, keyed by name.
    pub fn gradients(
        &mut self,
        views: Views<'_>,
        targets: Views<'_>,
    ) -> DaeResult<(f32, HashMap<String, ArrayD<f32>>)> {
        let (loss, memo) = self.run_training(&views, &targets)?;
        let batch = views[0].nrows();
        let graph = &self.compiled[&batch].gradients;
        let (outputs, _) = self.backend.run(graph, memo)?;

        let grads = self
            .parameter_nodes
            .iter()
            .zip(outputs)
            .map(|((name, _), value)| (name.clone(), value.to_tensor()))
            .collect();
        Ok((loss, grads))
    }

    /// One forward/backward pass followed by an optimizer update.
    /// Returns the loss before the update.
    pub fn train_step(
        &mut self,
        optimizer: &mut dyn Optimizer,
        views: Views<'_>,
        targets: Views<'_>,
    ) -> DaeResult<f32> {
        let (loss, grads) = self.gradients(views, targets)?;
        if !loss.is_finite() {
            warn!(step = self.steps, loss, "non-finite loss");
        }
        let grads: HashMap<String, Value> =
            grads.into_iter().map(|(name, grad)| (name, Value::Tensor(grad))).collect();
        optimizer.step(&mut self.parameters, &grads);
        self.steps += 1;
        debug!(step = self.steps, loss, "train step");
        Ok(loss)
    }

    /// Current value of a parameter.
    pub fn parameter(&self, name: &str) -> Option<&ArrayD<f32>> {
        match self.parameters.get(name) {
            Some(Value::Tensor(value)) => Some(value),
            _ => None,
        }
    }

    /// Replaces a parameter value; the shape must match the layer's.
    pub fn set_parameter(&mut self, name: &str, value: ArrayD<f32>) -> DaeResult<()> {
        let spec = self
            .specs
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| DaeError::UnknownParameter(name.to_string()))?;
        if value.shape() != spec.shape.as_slice() {
            return Err(DaeError::InvalidInput(format!(
                "parameter '{}' has shape {:?}, got {:?}",
                name,
                spec.shape,
                value.shape()
            )));
        }
        self.parameters.insert(name.to_string(), Value::Tensor(value));
        Ok(())
    }

    pub fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    /// Parameter names in model order: encoders, then decoders.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameter_nodes.iter().map(|(name, _)| name.as_str())
    }

    /// Ends the session, handing back the learnt values.
    pub fn into_parameters(self) -> HashMap<String, Value> {
        self.parameters
    }

    fn run_training(&mut self, views: &Views<'_>, targets: &Views<'_>) -> DaeResult<(f32, Memo<Value>)> {
        let batch = self.check_batch(views, "view")?;
        let target_batch = self.check_batch(targets, "target")?;
        if target_batch != batch {
            return Err(DaeError::InvalidInput(format!(
                "views have {} rows but targets have {}",
                batch, target_batch
            )));
        }
        self.ensure_compiled(batch)?;

        let data = self.bindings(views, Some(targets));
        let graph = &self.compiled[&batch].training;
        let (outputs, memo) = self.backend.run(graph, bind_leaves(graph, &data))?;
        let loss = outputs
            .first()
            .map(|value| value.to_tensor().sum())
            .ok_or_else(|| DaeError::Runtime(RuntimeError::ShapeError("missing loss output".into())))?;
        Ok((loss, memo))
    }

    /// Checks that all batches are `[batch, input_dim]` with one shared,
    /// non-zero `batch`, and returns it.
    fn check_batch(&self, batches: &Views<'_>, what: &str) -> DaeResult<usize> {
        let batch = batches[0].nrows();
        if batch == 0 {
            return Err(DaeError::InvalidInput(format!("{} 1 is an empty batch", what)));
        }
        for (i, b) in batches.iter().enumerate() {
            if b.ncols() != self.config.input_dim {
                return Err(DaeError::InvalidInput(format!(
                    "{} {} has {} columns, expected input_dim {}",
                    what,
                    i + 1,
                    b.ncols(),
                    self.config.input_dim
                )));
            }
            if b.nrows() != batch {
                return Err(DaeError::InvalidInput(format!(
                    "{} {} has {} rows, expected {} like {} 1",
                    what,
                    i + 1,
                    b.nrows(),
                    batch,
                    what
                )));
            }
        }
        Ok(batch)
    }

    fn bindings(&self, views: &Views<'_>, targets: Option<&Views<'_>>) -> HashMap<String, Value> {
        let mut data = self.parameters.clone();
        for (name, view) in VIEW_NAMES.iter().zip(views.iter().copied()) {
            data.insert(name.to_string(), Value::Tensor(view.to_owned().into_dyn()));
        }
        if let Some(targets) = targets {
            for (name, target) in TARGET_NAMES.iter().zip(targets.iter().copied()) {
                data.insert(name.to_string(), Value::Tensor(target.to_owned().into_dyn()));
            }
        }
        data
    }

    fn ensure_compiled(&mut self, batch: usize) -> DaeResult<()> {
        if !self.compiled.contains_key(&batch) {
            let graphs = self.compile(batch)?;
            self.compiled.insert(batch, graphs);
        }
        Ok(())
    }

    fn compile(&self, batch: usize) -> DaeResult<CompiledGraphs> {
        let mut shapes: HashMap<String, Shape> =
            self.specs.iter().map(|spec| (spec.name.clone(), spec.shape.clone())).collect();
        for name in VIEW_NAMES.iter().chain(TARGET_NAMES.iter()) {
            shapes.insert(name.to_string(), vec![batch, self.config.input_dim]);
        }

        let base = self.context.borrow().main_graph().clone();

        let mut inference = base.clone();
        let mut outputs: Vec<NodeId> = self.output.reconstructions.iter().map(|t| t.node_id).collect();
        outputs.extend(self.output.latents.iter().map(|t| t.node_id));
        outputs.push(self.output.bottleneck.node_id);
        inference.set_outputs(outputs);
        ShapeInference::run(&mut inference, &shapes)?;

        let mut training = base;
        training.set_output(self.loss.node_id);
        ShapeInference::run(&mut training, &shapes)?;

        let wrt: Vec<NodeId> = self.parameter_nodes.iter().map(|(_, id)| *id).collect();
        let gradients = Gradients::new(training.clone()).build_and_infer(self.loss.node_id, &wrt)?;

        debug!(
            batch,
            forward_nodes = training.nodes.len(),
            gradient_nodes = gradients.nodes.len(),
            "compiled dae graphs"
        );
        Ok(CompiledGraphs {
            inference,
            training,
            gradients,
        })
    }
}

impl std::fmt::Debug for DaeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaeSession")
            .field("config", &self.config)
            .field("parameters", &self.parameter_nodes.len())
            .field("compiled_batches", &self.compiled.keys().collect::<Vec<_>>())
            .field("steps", &self.steps)
            .finish()
    }
}

fn as_matrix(value: &Value) -> DaeResult<Array2<f32>> {
    let tensor = value.to_tensor();
    let shape = tensor.shape().to_vec();
    tensor
        .into_dimensionality::<Ix2>()
        .map_err(|_| DaeError::Runtime(RuntimeError::ShapeError(format!("expected a matrix, got {:?}", shape))))
}
