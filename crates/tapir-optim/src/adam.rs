use tapir_core::{Array2, Result, Scalar, Tensor};
use tapir_nn::Model;

use crate::accumulator::GradAccumulator;
use crate::optimizer::{NormFn, Optimizer, TrainingData};

// Adam — Adaptive moment estimation (Kingma & Ba, 2015)
//
// Keeps exponential moving averages of the gradient (m) and of its
// square (v). Per sample, before the gradient enters the accumulator,
// the entry at each parameter index is rewritten with the
// bias-corrected step:
//
//   m ← β1·m + (1-β1)·g         v ← β2·v + (1-β2)·g²
//   m̂ ← m / (1-β1ᵗ)             v̂ ← v / (1-β2ᵗ)
//   g' ← m̂ / (√v̂ + ε)
//
// The decayed powers β1ᵗ / β2ᵗ advance once per batch. The batch update
// itself is then `alpha · sum / batch_size`, like plain descent over the
// rewritten gradients.

/// The Adam optimizer. Default hyper-parameters follow the paper.
pub struct Adam<T: Scalar> {
    pub alpha: T,
    pub beta1: T,
    pub beta2: T,
    pub epsilon: T,
    /// Number of passes over the full batch list.
    pub epochs: usize,
    /// Residual norm; must produce a 1x1 tensor.
    pub norm_fn: NormFn<T>,
}

impl<T: Scalar> Adam<T> {
    pub fn new(alpha: T, beta1: T, beta2: T, epsilon: T) -> Self {
        Adam {
            alpha,
            beta1,
            beta2,
            epsilon,
            epochs: 1,
            norm_fn: Tensor::squared_norm,
        }
    }
}

impl<T: Scalar> Default for Adam<T> {
    fn default() -> Self {
        Adam::new(
            T::from_f64(0.001),
            T::from_f64(0.9),
            T::from_f64(0.999),
            T::from_f64(1e-8),
        )
    }
}

impl<T: Scalar> Optimizer<T> for Adam<T> {
    fn run<M: Model<T>>(
        &mut self,
        model: &mut M,
        batches: &[Vec<TrainingData<T>>],
    ) -> Result<Vec<Vec<Vec<T>>>> {
        // Resets the tape, compacting the parameters to the front.
        let mut accumulator = GradAccumulator::from_model(model);
        let param_indices = accumulator.tape_indices();

        // Moment estimates shaped like the (freshly reset) tape; only
        // the parameter entries are ever touched.
        let mut m: Vec<Array2<T>> = model
            .tape()
            .node_shapes()
            .into_iter()
            .map(|(r, c)| Array2::zeros(r, c))
            .collect();
        let mut v = m.clone();

        let one = T::one();
        let mut decayed_beta1 = self.beta1;
        let mut decayed_beta2 = self.beta2;

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

                    let mut gradient = norm.grad()?;
                    for &idx in &param_indices {
                        let g = gradient.at(idx);

                        let decayed_m = m[idx].scale(self.beta1);
                        let fresh_m = g.scale(one - self.beta1);
                        m[idx] = &decayed_m + &fresh_m;

                        let decayed_v = v[idx].scale(self.beta2);
                        let fresh_v = (g * g).scale(one - self.beta2);
                        v[idx] = &decayed_v + &fresh_v;

                        let m_hat = m[idx].scale(one / (one - decayed_beta1));
                        let v_hat = v[idx].scale(one / (one - decayed_beta2));
                        *gradient.at_mut(idx) =
                            m_hat.zip_map(&v_hat, |mh, vh| mh / (vh.sqrt() + self.epsilon));
                    }
                    accumulator.add(&gradient);

                    batch_losses.push(norm.value()[(0, 0)]);
                    model.tape().reset();
                }

                if !batch.is_empty() {
                    let scale = self.alpha / T::from_f64(batch.len() as f64);
                    accumulator.apply(model, |sum| sum.scale(scale))?;
                }
                accumulator.reset();
                decayed_beta1 = decayed_beta1 * self.beta1;
                decayed_beta2 = decayed_beta2 * self.beta2;
                epoch_losses.push(batch_losses);
            }
            losses.push(epoch_losses);
        }
        Ok(losses)
    }
}
