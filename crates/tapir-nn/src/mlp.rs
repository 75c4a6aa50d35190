use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

use tapir_core::{Array2, Error, Result, Scalar, Tape, Tensor};

use crate::model::{Activation, Model};
use crate::serialize;

// MultiLayerPerceptron — Dense stack
//
// Every element of `layers` adds a dense layer of that width; values are
// randomly initialized in [-1, 1]. The forward pass folds the input
// column vector through `a = act(W·a + b)` per layer, appending the
// whole graph to the model's tape.

/// A dense feed-forward network over column-vector inputs.
pub struct MultiLayerPerceptron<T: Scalar> {
    tape: Tape<T>,
    input_size: usize,
    /// Layer weights, `(layers[i], layers[i-1])` each.
    pub weights: Vec<Tensor<T>>,
    /// Layer biases, `(layers[i], 1)` each.
    pub biases: Vec<Tensor<T>>,
    /// Activation applied after every layer. Defaults to sigmoid.
    pub activation: Activation<T>,
}

impl<T: Scalar> MultiLayerPerceptron<T> {
    /// Build a randomly initialized network mapping `input_size` inputs
    /// through the given layer widths.
    pub fn new(input_size: usize, layers: &[usize]) -> Result<Self> {
        if input_size == 0 {
            return Err(Error::BadArgumentStructure(
                "input size of 0".to_string(),
            ));
        }
        if layers.is_empty() {
            return Err(Error::BadArgumentStructure("no layers given".to_string()));
        }
        if let Some(pos) = layers.iter().position(|&w| w == 0) {
            return Err(Error::BadArgumentStructure(format!(
                "layer {pos} has width 0"
            )));
        }

        let tape = Tape::new();
        let mut weights = Vec::with_capacity(layers.len());
        let mut biases = Vec::with_capacity(layers.len());
        let mut previous = input_size;
        for &width in layers {
            weights.push(Tensor::parameter(Array2::random(width, previous), &tape));
            biases.push(Tensor::parameter(Array2::random(width, 1), &tape));
            previous = width;
        }

        Ok(MultiLayerPerceptron {
            tape,
            input_size,
            weights,
            biases,
            activation: Tensor::sigmoid,
        })
    }

    /// Expected height of the input column vector.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Write the parameters to `path` (weights vector, then biases
    /// vector).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        serialize::write_tensor_vec(&mut out, &self.weights)?;
        serialize::write_tensor_vec(&mut out, &self.biases)?;
        Ok(())
    }

    /// Replace the parameters with the contents of `path`. The tape is
    /// cleared first; every other tensor bound to it goes stale.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let weights = serialize::read_array_vec(&mut lines)?;
        let biases = serialize::read_array_vec(&mut lines)?;
        if weights.len() != biases.len() || weights.is_empty() {
            return Err(Error::Parse(format!(
                "{} weight tensors against {} bias tensors",
                weights.len(),
                biases.len()
            )));
        }

        // Re-register on a cleared tape in the constructor's interleaved
        // order (w0, b0, w1, b1, ...), so the parameter registry stays
        // aligned with `parameters()` and the accumulator slots.
        self.tape.clear();
        self.weights.clear();
        self.biases.clear();
        for (w, b) in weights.into_iter().zip(biases) {
            self.weights.push(Tensor::parameter(w, &self.tape));
            self.biases.push(Tensor::parameter(b, &self.tape));
        }

        self.input_size = self.weights[0].cols();
        Ok(())
    }
}

impl<T: Scalar> Model<T> for MultiLayerPerceptron<T> {
    fn tape(&self) -> &Tape<T> {
        &self.tape
    }

    fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
        if input.shape() != (self.input_size, 1) {
            return Err(Error::ShapeMismatch {
                op: "mlp forward",
                lhs: input.shape(),
                rhs: (self.input_size, 1),
            });
        }

        let mut activations = input.clone();
        for (w, b) in self.weights.iter().zip(self.biases.iter()) {
            let z = w.matmul(&activations)?.add(b)?;
            activations = (self.activation)(&z)?;
        }
        Ok(activations)
    }

    fn parameters(&self) -> Vec<&Tensor<T>> {
        self.weights
            .iter()
            .zip(self.biases.iter())
            .flat_map(|(w, b)| [w, b])
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor<T>> {
        self.weights
            .iter_mut()
            .zip(self.biases.iter_mut())
            .flat_map(|(w, b)| [w, b])
            .collect()
    }
}
