use tapir_core::{Result, Scalar, Tensor};
use tapir_nn::Model;

use crate::accumulator::GradAccumulator;
use crate::optimizer::{NormFn, Optimizer, TrainingData};

// GradientDescent — Plain mini-batch gradient descent
//
// Per batch, every parameter steps by
//
//   value -= learning_rate * grad_sum / batch_size

/// Mini-batch gradient descent with a fixed learning rate.
pub struct GradientDescent<T: Scalar> {
    pub learning_rate: T,
    /// Number of passes over the full batch list.
    pub epochs: usize,
    /// Residual norm; must produce a 1x1 tensor.
    pub norm_fn: NormFn<T>,
}

impl<T: Scalar> GradientDescent<T> {
    pub fn new(learning_rate: T) -> Self {
        GradientDescent {
            learning_rate,
            epochs: 1,
            norm_fn: Tensor::squared_norm,
        }
    }
}

impl<T: Scalar> Optimizer<T> for GradientDescent<T> {
    fn run<M: Model<T>>(
        &mut self,
        model: &mut M,
        batches: &[Vec<TrainingData<T>>],
    ) -> Result<Vec<Vec<Vec<T>>>> {
        // Resets the tape, compacting the parameters to the front.
        let mut accumulator = GradAccumulator::from_model(model);

        let mut losses = Vec::with_capacity(self.epochs);
        for _ in 0..self.epochs {
            let mut epoch_losses = Vec::with_capacity(batches.len());
            for batch in batches {
                let mut batch_losses = Vec::with_capacity(batch.len());
                for sample in batch {
                    let input = Tensor::input(sample.input.clone(), model.tape());
                    let expected = Tensor::input(sample.expected.clone(), model.tape());

                    let output = model.forward(&input)?;
                    let norm = (self.norm_fn)(&output.sub(&expected)?)?;

                    let gradient = norm.grad()?;
                    accumulator.add(&gradient);

                    batch_losses.push(norm.value()[(0, 0)]);
                    model.tape().reset();
                }

                if !batch.is_empty() {
                    let scale = self.learning_rate / T::from_f64(batch.len() as f64);
                    accumulator.apply(model, |sum| sum.scale(scale))?;
                }
                accumulator.reset();
                epoch_losses.push(batch_losses);
            }
            losses.push(epoch_losses);
        }
        Ok(losses)
    }
}
