//! # RustyDAE: Decoupled Autoencoder on a graph-based autodiff engine
//!
//! A decoupled autoencoder has three parallel encoder/decoder branches, one
//! per view of the data. Each branch encodes its view into a latent code and
//! decodes that code back; the three codes are concatenated into a shared
//! bottleneck. Training minimises three reconstruction errors plus three
//! pairwise alignment errors between the codes, each with its own weight.
//!
//! The model is built as an **Abstract Semantic Graph (ASG)**: layers append
//! symbolic nodes, `autograd` derives a gradient graph from the loss, and a
//! backend executes both.
//!
//! ## Usage Example
//!
//! ```no_run
//! use ndarray::Array2;
//! use rustydae::config::DaeConfig;
//! use rustydae::nn::ActivationKind;
//! use rustydae::optimizers::Adam;
//! use rustydae::session::DaeSession;
//!
//! let config = DaeConfig::new(16, 4, ActivationKind::Tanh).with_seed(42);
//! let mut session = DaeSession::new(config)?;
//! let mut optimizer = Adam::new(1e-2);
//!
//! let (x1, x2, x3) = (Array2::zeros((8, 16)), Array2::zeros((8, 16)), Array2::zeros((8, 16)));
//! let views = [&x1, &x2, &x3];
//! let loss = session.train_step(&mut optimizer, views, views)?;
//! let codes = session.embed(views)?; // [8, 12]
//! # Ok::<(), rustydae::error::DaeError>(())
//! ```

// Declare public modules that constitute the core library API.
pub mod analysis;
pub mod asg;
pub mod autograd;
pub mod config;
pub mod error;
pub mod losses;
pub mod model;
pub mod nn;
pub mod optimizers;
pub mod runtime;
pub mod session;
pub mod tensor;

pub use config::DaeConfig;
pub use error::{DaeError, DaeResult};
pub use losses::LossWeights;
pub use model::DecoupledAutoencoder;
pub use nn::ActivationKind;
pub use session::{DaeSession, Forward};
