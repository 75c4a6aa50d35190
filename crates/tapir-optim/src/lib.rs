//! # tapir-optim
//!
//! Mini-batch optimizers for Tapir models.
//!
//! Provides:
//! - [`TrainingData`] — one `(input, expected)` pair; batches are plain
//!   nested vectors of these
//! - [`GradAccumulator`] — per-parameter gradient sums across a batch
//! - [`GradientDescent`] — plain mini-batch gradient descent
//! - [`Adam`] — first/second-moment adaptive steps with bias correction
//!
//! Both optimizers run the same outer loop: per sample, register the
//! input and target as fresh tape inputs, run the model forward, take
//! the norm of the residual, backpropagate, and accumulate; per batch,
//! step the parameters and reset the accumulator. The tape is reset
//! after every sample, which is what keeps its memory bounded across a
//! training run.

pub mod accumulator;
pub mod adam;
pub mod optimizer;
pub mod sgd;

pub use accumulator::GradAccumulator;
pub use adam::Adam;
pub use optimizer::{NormFn, Optimizer, TrainingData};
pub use sgd::GradientDescent;
