//! # tapir-core
//!
//! Core array primitive and reverse-mode autodiff engine for Tapir.
//!
//! This crate provides:
//! - [`Array2`] — dense row-major 2D array of a floating-point scalar
//! - [`Scalar`] — trait connecting `f32` / `f64` to the engine
//! - [`Tape`] — append-only Wengert list of operation nodes
//! - [`Tensor`] — handle binding a value array to a tape position
//! - [`Gradient`] — per-node derivatives returned by [`Tensor::grad`]
//! - Forward operators: element-wise arithmetic, activations, matrix
//!   product, squared norm, and the convolution family (im2col / col2im,
//!   max-pooling, channel split, vertical concatenation, flattening)

pub mod array;
pub mod conv;
pub mod error;
pub mod grad;
pub mod node;
pub mod ops;
pub mod scalar;
pub mod tape;
pub mod tensor;

pub use array::Array2;
pub use conv::{col2im, im2col, split, vert_cat};
pub use error::{Error, Result};
pub use grad::Gradient;
pub use node::{ChannelSplit, Node, NodeKind};
pub use scalar::Scalar;
pub use tape::Tape;
pub use tensor::Tensor;
