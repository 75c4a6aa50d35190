use tapir_core::{Array2, Error, Gradient, Result, Scalar};
use tapir_nn::Model;

// GradAccumulator — Per-parameter gradient sums across a batch
//
// Built once per training run. Construction resets the model's tape, so
// the parameters sit compacted at the front and their indices stay
// stable for the whole run: the slot order below is the parameter
// registry order, which is also the order of `Model::parameters_mut`.

struct GradSlot<T: Scalar> {
    tape_index: usize,
    sum: Array2<T>,
}

/// Accumulated gradients for every trainable parameter of a model.
pub struct GradAccumulator<T: Scalar> {
    slots: Vec<GradSlot<T>>,
}

impl<T: Scalar> GradAccumulator<T> {
    /// Set up one zeroed slot per trainable parameter. Resets the
    /// model's tape first.
    pub fn from_model<M: Model<T>>(model: &M) -> Self {
        let tape = model.tape();
        tape.reset();
        let slots = tape
            .trainable_slots()
            .into_iter()
            .map(|(tape_index, (rows, cols))| GradSlot {
                tape_index,
                sum: Array2::zeros(rows, cols),
            })
            .collect();
        GradAccumulator { slots }
    }

    /// Number of tracked parameters.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no parameter is tracked.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Tape indices of the tracked parameters, in slot order.
    pub fn tape_indices(&self) -> Vec<usize> {
        self.slots.iter().map(|s| s.tape_index).collect()
    }

    /// Add one sample's gradient into the sums.
    pub fn add(&mut self, gradient: &Gradient<T>) {
        for slot in &mut self.slots {
            slot.sum += gradient.at(slot.tape_index);
        }
    }

    /// Zero all sums, keeping the slots.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.sum.set_zero();
        }
    }

    /// Step every parameter: `value -= delta(sum)`, slot by slot against
    /// the model's parameter vector.
    pub fn apply<M, F>(&self, model: &mut M, delta: F) -> Result<()>
    where
        M: Model<T>,
        F: Fn(&Array2<T>) -> Array2<T>,
    {
        let params = model.parameters_mut();
        if params.len() != self.slots.len() {
            return Err(Error::msg(format!(
                "accumulator tracks {} parameters, model exposes {}",
                self.slots.len(),
                params.len()
            )));
        }
        for (slot, param) in self.slots.iter().zip(params) {
            let new_value = param.value() - &delta(&slot.sum);
            param.set_value(new_value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapir_core::Tensor;
    use tapir_nn::MultiLayerPerceptron;

    #[test]
    fn test_from_model_resets_and_tracks_parameters() {
        let mlp = MultiLayerPerceptron::<f64>::new(2, &[3]).unwrap();
        // Leave a stale forward graph on the tape.
        let x = Tensor::input(Array2::random(2, 1), mlp.tape());
        let _ = mlp.forward(&x).unwrap();
        assert!(mlp.tape().len() > 2);

        let acc = GradAccumulator::from_model(&mlp);
        assert_eq!(mlp.tape().len(), 2);
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.tape_indices(), vec![0, 1]);
    }

    #[test]
    fn test_add_and_apply_step_parameters() {
        let mut mlp = MultiLayerPerceptron::<f64>::new(1, &[1]).unwrap();
        mlp.activation = Tensor::relu;
        mlp.weights[0].set_value(Array2::filled(1, 1, 1.0)).unwrap();
        mlp.biases[0].set_value(Array2::filled(1, 1, 0.0)).unwrap();

        let mut acc = GradAccumulator::from_model(&mlp);

        // out = relu(1·3 + 0) = 3, |out|² = 9, so dw = 2·3·3 = 18, db = 6.
        let x = Tensor::input(Array2::filled(1, 1, 3.0), mlp.tape());
        let loss = mlp.forward(&x).unwrap().squared_norm().unwrap();
        let gradient = loss.grad().unwrap();
        acc.add(&gradient);
        mlp.tape().reset();

        acc.apply(&mut mlp, |sum| sum.scale(0.1)).unwrap();
        assert!((mlp.weights[0].value()[(0, 0)] - (1.0 - 1.8)).abs() < 1e-12);
        assert!((mlp.biases[0].value()[(0, 0)] - (-0.6)).abs() < 1e-12);

        acc.reset();
        acc.apply(&mut mlp, |sum| sum.scale(0.1)).unwrap();
        // A reset accumulator applies a zero step.
        assert!((mlp.weights[0].value()[(0, 0)] - (1.0 - 1.8)).abs() < 1e-12);
    }
}
