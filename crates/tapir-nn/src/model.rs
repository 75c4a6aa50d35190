use tapir_core::{Result, Scalar, Tape, Tensor};

// Model trait — The interface every trainable assembly implements
//
// A model owns its tape: constructing the model registers every
// parameter as a trainable input, and those nodes survive `Tape::reset`
// across training iterations. Per-sample inputs are registered on the
// same tape by the optimizer loop and are swept away by the reset that
// ends each iteration.
//
// The parameter enumeration order is the creation order, which is also
// the tape's trainable-input order — the gradient accumulator in
// tapir-optim relies on the two matching.

/// Activation applied between layers, as a plain function pointer so a
/// model can swap it without generics (`Tensor::sigmoid`,
/// `Tensor::relu`, `Tensor::leaky_relu`).
pub type Activation<T> = fn(&Tensor<T>) -> Result<Tensor<T>>;

/// The fundamental trait for trainable models.
pub trait Model<T: Scalar> {
    /// The tape this model records on.
    fn tape(&self) -> &Tape<T>;

    /// Compute the model output for one input tensor, appending the
    /// forward graph to the tape.
    fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>>;

    /// All parameters, in creation order.
    fn parameters(&self) -> Vec<&Tensor<T>>;

    /// Mutable access to all parameters, in creation order. The
    /// optimizer steps the values through this.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor<T>>;

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters()
            .iter()
            .map(|p| p.value().elem_count())
            .sum()
    }

    /// Flip the trainable flag of every parameter at once.
    fn toggle_global_trainable(&self, on: bool) {
        for param in self.parameters() {
            self.tape().set_trainable(param, on);
        }
    }
}
