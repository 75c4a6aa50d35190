//! # Tapir
//!
//! A small reverse-mode automatic differentiation engine over dense 2D
//! arrays, with composable neural network building blocks on top.
//!
//! Operations on [`Tensor`]s are recorded into a [`Tape`] (a Wengert
//! list); [`Tensor::grad`] replays the tape backward and returns the
//! derivative of the seed with respect to every recorded node. Models
//! register their parameters as trainable tape inputs, and the
//! optimizers iterate batched training data, accumulating per-parameter
//! gradients and stepping the values between batches.
//!
//! ```no_run
//! use tapir::prelude::*;
//!
//! # fn main() -> tapir::Result<()> {
//! // d(a·x·x + b·x - c)/dx at x = 3
//! let tape = Tape::<f64>::new();
//! let x = Tensor::input(Array2::filled(1, 1, 3.0), &tape);
//! let a = Tensor::input(Array2::filled(1, 1, 2.0), &tape);
//! let b = Tensor::input(Array2::filled(1, 1, 1.0), &tape);
//! let c = Tensor::input(Array2::filled(1, 1, 5.0), &tape);
//!
//! let y = a.mul(&x)?.mul(&x)?.add(&b.mul(&x)?)?.sub(&c)?;
//! let grad = y.grad()?;
//! assert_eq!(grad.get(&x).unwrap()[(0, 0)], 13.0);
//! # Ok(())
//! # }
//! ```

pub use tapir_core::{
    col2im, conv::conv_valid, im2col, split, vert_cat, Array2, ChannelSplit, Error, Gradient,
    Result, Scalar, Tape, Tensor,
};

pub use tapir_nn as nn;
pub use tapir_optim as optim;

/// Everything a typical user needs in scope.
pub mod prelude {
    pub use tapir_core::{
        col2im, im2col, split, vert_cat, Array2, ChannelSplit, Gradient, Tape, Tensor,
    };
    pub use tapir_nn::{ConvolutionalNetwork, Model, MultiLayerPerceptron};
    pub use tapir_optim::{Adam, GradAccumulator, GradientDescent, Optimizer, TrainingData};
}
