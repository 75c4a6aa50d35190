//! # tapir-nn
//!
//! Neural network models for Tapir.
//!
//! Provides assemblies built on the tapir-core forward operators:
//!
//! 1. **Model trait** — every model owns a tape and exposes `forward()`
//! 2. **MultiLayerPerceptron** — dense stack with a pluggable activation
//! 3. **ConvolutionalNetwork** — im2col convolutional stack feeding a
//!    dense stack
//! 4. **Text persistence** — line-oriented save/load of model parameters
//!
//! Models register their parameters as trainable inputs on their tape;
//! the optimizers in `tapir-optim` mutate them in place between batches.

pub mod cnn;
pub mod mlp;
pub mod model;
pub mod serialize;

pub use cnn::ConvolutionalNetwork;
pub use mlp::MultiLayerPerceptron;
pub use model::{Activation, Model};
