use tapir_core::{Array2, Result, Scalar, Tensor};
use tapir_nn::Model;

// Optimizer — Common surface of the training loops
//
// An optimizer owns the hyper-parameters and drives the per-epoch /
// per-batch / per-sample loop over the model's tape. The loss recorded
// for every sample is the scalar value of `norm_fn(output - expected)`.

/// One training sample: the input matrix and its expected output.
#[derive(Debug, Clone)]
pub struct TrainingData<T: Scalar> {
    pub input: Array2<T>,
    pub expected: Array2<T>,
}

impl<T: Scalar> TrainingData<T> {
    pub fn new(input: Array2<T>, expected: Array2<T>) -> Self {
        TrainingData { input, expected }
    }
}

/// Norm applied to the residual `output - expected`. Must produce a 1x1
/// tensor so the loss can be both differentiated and recorded.
pub type NormFn<T> = fn(&Tensor<T>) -> Result<Tensor<T>>;

/// Trait implemented by the training loops.
///
/// `run` iterates the model over the batches and returns the recorded
/// losses arranged as `[epoch][batch][sample]`.
pub trait Optimizer<T: Scalar> {
    fn run<M: Model<T>>(
        &mut self,
        model: &mut M,
        batches: &[Vec<TrainingData<T>>],
    ) -> Result<Vec<Vec<Vec<T>>>>;
}
