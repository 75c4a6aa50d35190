use std::cell::Cell;
use std::rc::Rc;

use crate::array::Array2;
use crate::error::{Error, Result};
use crate::grad::Gradient;
use crate::scalar::Scalar;
use crate::tape::Tape;

// Tensor — Handle binding a value array to a tape position
//
// A tensor owns its value; the tape node behind it records only the
// shape, the parents, and the local-derivative payloads. Tensors sharing
// a tape combine through the forward operators; mixing tensors from
// different tapes is a typed error.
//
// The index is held in an Rc<Cell<usize>> shared with the Input node for
// leaf tensors, which is how `Tape::reset` re-points surviving parameter
// tensors at their compacted positions. Handles to non-parameter nodes go
// stale at reset and must be re-created.

/// A 2D value bound to a node of a [`Tape`].
pub struct Tensor<T: Scalar> {
    value: Array2<T>,
    tape: Tape<T>,
    index: Rc<Cell<usize>>,
}

impl<T: Scalar> Clone for Tensor<T> {
    fn clone(&self) -> Self {
        Tensor {
            value: self.value.clone(),
            tape: self.tape.clone(),
            index: Rc::clone(&self.index),
        }
    }
}

impl<T: Scalar> std::fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(index={}, shape={}x{})",
            self.index.get(),
            self.value.rows(),
            self.value.cols()
        )
    }
}

impl<T: Scalar> Tensor<T> {
    /// Register `value` as a fresh non-trainable input on `tape`.
    pub fn input(value: Array2<T>, tape: &Tape<T>) -> Self {
        let index = tape.push_input(value.rows(), value.cols(), false);
        Tensor {
            value,
            tape: tape.clone(),
            index,
        }
    }

    /// Register `value` as a trainable parameter on `tape`. The node
    /// survives `Tape::reset` and gets a parameter-registry slot.
    pub fn parameter(value: Array2<T>, tape: &Tape<T>) -> Self {
        let index = tape.push_input(value.rows(), value.cols(), true);
        Tensor {
            value,
            tape: tape.clone(),
            index,
        }
    }

    /// Bind a freshly computed value to the derived node at `index`.
    pub(crate) fn from_op(value: Array2<T>, tape: &Tape<T>, index: usize) -> Self {
        Tensor {
            value,
            tape: tape.clone(),
            index: Rc::new(Cell::new(index)),
        }
    }

    /// The value array.
    pub fn value(&self) -> &Array2<T> {
        &self.value
    }

    /// Shape of the value array.
    pub fn shape(&self) -> (usize, usize) {
        self.value.shape()
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.value.rows()
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.value.cols()
    }

    /// Current tape position of this tensor.
    pub fn index(&self) -> usize {
        self.index.get()
    }

    /// The tape this tensor is recorded on.
    pub fn tape(&self) -> &Tape<T> {
        &self.tape
    }

    /// Overwrite the value in place. The optimizer uses this to step the
    /// parameters; the new value must keep the recorded shape.
    pub fn set_value(&mut self, value: Array2<T>) -> Result<()> {
        if value.shape() != self.value.shape() {
            return Err(Error::ShapeMismatch {
                op: "set_value",
                lhs: self.value.shape(),
                rhs: value.shape(),
            });
        }
        self.value = value;
        Ok(())
    }

    /// Compute the derivative of this tensor with respect to every node
    /// on the tape. See the module docs of [`crate::grad`] for the gate
    /// on non-element-wise graphs.
    pub fn grad(&self) -> Result<Gradient<T>> {
        crate::grad::backward(self)
    }
}
