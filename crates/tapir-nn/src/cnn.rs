use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tapir_core::{
    col2im, im2col, split, vert_cat, Array2, ChannelSplit, Error, Result, Scalar, Tape, Tensor,
};

use crate::model::{Activation, Model};
use crate::serialize;

// ConvolutionalNetwork — im2col convolutional stack over a dense stack
//
// The input is a single matrix with the channels stacked according to
// the split direction. Each convolution layer runs as one matrix
// product:
//
//   channels --im2col--> column matrix --kernel matprod + bias-->
//   --col2im--> channels --max-pool--> --activation--> next layer
//
// after which the channels are concatenated, flattened, and folded
// through the dense layers exactly like a MultiLayerPerceptron.
//
// One kernel matrix per layer holds all kernels of that layer: row r is
// the flattened stack of the kernels producing output channel r, so the
// product against the im2col matrix computes every output channel of the
// layer at once. The conv bias of a layer has the full product shape
// `(out_channels, out_rows * out_cols)`.

/// A convolutional network: conv/pool/activation layers feeding a dense
/// stack.
pub struct ConvolutionalNetwork<T: Scalar> {
    tape: Tape<T>,
    split_direction: ChannelSplit,
    n_input_channels: usize,
    expected_input: (usize, usize),
    /// Per layer `(kr, kc, out_channels)`.
    kernel_dims: Vec<(usize, usize, usize)>,
    /// Per layer pool size; `(0, 0)` skips pooling for that layer.
    pooling: Vec<(usize, usize)>,
    /// Per layer channel shape after convolution, before pooling.
    conv_output_dims: Vec<(usize, usize)>,
    /// One kernel matrix per layer, `(out_channels, in_channels·kr·kc)`.
    pub conv_kernels: Vec<Tensor<T>>,
    /// One bias per layer, shaped like the kernel product.
    pub conv_biases: Vec<Tensor<T>>,
    /// Dense layer weights.
    pub weights: Vec<Tensor<T>>,
    /// Dense layer biases.
    pub biases: Vec<Tensor<T>>,
    /// Activation applied after every conv and dense layer. Defaults to
    /// sigmoid.
    pub activation: Activation<T>,
}

impl<T: Scalar> ConvolutionalNetwork<T> {
    /// Build a randomly initialized network.
    ///
    /// * `input_size` — shape of the full stacked input matrix
    /// * `split_direction`, `n_input_channels` — how that matrix divides
    ///   into channels
    /// * `conv_layers` — `(kr, kc, out_channels)` per convolution layer
    /// * `pooling` — pool size per convolution layer, `(0, 0)` to skip
    /// * `dense_layers` — widths of the dense layers after flattening
    pub fn new(
        input_size: (usize, usize),
        split_direction: ChannelSplit,
        n_input_channels: usize,
        conv_layers: &[(usize, usize, usize)],
        pooling: &[(usize, usize)],
        dense_layers: &[usize],
    ) -> Result<Self> {
        if input_size.0 == 0 || input_size.1 == 0 {
            return Err(Error::BadArgumentStructure("input of size 0".to_string()));
        }
        if conv_layers.len() != pooling.len() {
            return Err(Error::BadArgumentStructure(format!(
                "{} convolution layers against {} pooling layers",
                conv_layers.len(),
                pooling.len()
            )));
        }
        if conv_layers.is_empty() {
            return Err(Error::BadArgumentStructure(
                "no convolution layers given".to_string(),
            ));
        }
        if n_input_channels == 0 {
            return Err(Error::BadArgumentStructure(
                "0 input channels".to_string(),
            ));
        }
        if split_direction == ChannelSplit::NoSplit && n_input_channels != 1 {
            return Err(Error::BadArgumentStructure(format!(
                "NoSplit input declared with {n_input_channels} channels"
            )));
        }

        // Per-channel input shape.
        let mut channel = match split_direction {
            ChannelSplit::NoSplit => input_size,
            ChannelSplit::Horizontal => {
                if input_size.0 % n_input_channels != 0 {
                    return Err(Error::BadArgumentStructure(format!(
                        "{n_input_channels} channels do not divide {} rows",
                        input_size.0
                    )));
                }
                (input_size.0 / n_input_channels, input_size.1)
            }
            ChannelSplit::Vertical => {
                if input_size.1 % n_input_channels != 0 {
                    return Err(Error::BadArgumentStructure(format!(
                        "{n_input_channels} channels do not divide {} columns",
                        input_size.1
                    )));
                }
                (input_size.0, input_size.1 / n_input_channels)
            }
        };

        // Walk the conv stack once to validate feasibility and collect
        // the per-layer output shapes.
        let mut conv_output_dims = Vec::with_capacity(conv_layers.len());
        for (i, (&(kr, kc, out_ch), &(pr, pc))) in
            conv_layers.iter().zip(pooling.iter()).enumerate()
        {
            if kr == 0 || kc == 0 || out_ch == 0 {
                return Err(Error::BadArgumentStructure(format!(
                    "convolution layer {i} has a zero dimension"
                )));
            }
            if channel.0 < kr || channel.1 < kc {
                return Err(Error::BadArgumentStructure(format!(
                    "convolution layer {i} kernel {kr}x{kc} does not fit a {}x{} channel",
                    channel.0, channel.1
                )));
            }
            channel = (channel.0 - kr + 1, channel.1 - kc + 1);
            conv_output_dims.push(channel);

            match (pr, pc) {
                (0, 0) => {}
                (0, _) | (_, 0) => {
                    return Err(Error::BadArgumentStructure(format!(
                        "pooling layer {i} mixes zero and non-zero sizes"
                    )));
                }
                _ => {
                    if channel.0 % pr != 0 || channel.1 % pc != 0 {
                        return Err(Error::BadArgumentStructure(format!(
                            "pooling layer {i} of {pr}x{pc} does not divide a {}x{} channel",
                            channel.0, channel.1
                        )));
                    }
                    channel = (channel.0 / pr, channel.1 / pc);
                }
            }
        }

        if let Some(pos) = dense_layers.iter().position(|&w| w == 0) {
            return Err(Error::BadArgumentStructure(format!(
                "dense layer {pos} has width 0"
            )));
        }

        // Random init: conv kernels and biases first, then the dense
        // stack — the parameter registry keeps this order.
        let tape = Tape::new();
        let mut conv_kernels = Vec::with_capacity(conv_layers.len());
        let mut conv_biases = Vec::with_capacity(conv_layers.len());
        let mut in_ch = n_input_channels;
        for (&(kr, kc, out_ch), &(out_r, out_c)) in
            conv_layers.iter().zip(conv_output_dims.iter())
        {
            conv_kernels.push(Tensor::parameter(
                Array2::random(out_ch, in_ch * kr * kc),
                &tape,
            ));
            conv_biases.push(Tensor::parameter(
                Array2::random(out_ch, out_r * out_c),
                &tape,
            ));
            in_ch = out_ch;
        }

        let flat = channel.0 * channel.1 * in_ch;
        let mut weights = Vec::with_capacity(dense_layers.len());
        let mut biases = Vec::with_capacity(dense_layers.len());
        let mut previous = flat;
        for &width in dense_layers {
            weights.push(Tensor::parameter(Array2::random(width, previous), &tape));
            biases.push(Tensor::parameter(Array2::random(width, 1), &tape));
            previous = width;
        }

        Ok(ConvolutionalNetwork {
            tape,
            split_direction,
            n_input_channels,
            expected_input: input_size,
            kernel_dims: conv_layers.to_vec(),
            pooling: pooling.to_vec(),
            conv_output_dims,
            conv_kernels,
            conv_biases,
            weights,
            biases,
            activation: Tensor::sigmoid,
        })
    }

    /// Shape the forward pass expects for the stacked input matrix.
    pub fn expected_input(&self) -> (usize, usize) {
        self.expected_input
    }

    /// Write the full configuration and parameters to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);

        writeln!(out, "{}", split_to_int(self.split_direction))?;
        writeln!(out, "{}", self.n_input_channels)?;

        let pooling: Vec<Vec<usize>> = self.pooling.iter().map(|&(a, b)| vec![a, b]).collect();
        let kernels: Vec<Vec<usize>> = self
            .kernel_dims
            .iter()
            .map(|&(a, b, c)| vec![a, b, c])
            .collect();
        let outputs: Vec<Vec<usize>> = self
            .conv_output_dims
            .iter()
            .map(|&(a, b)| vec![a, b])
            .collect();
        serialize::write_u2d(&mut out, &pooling)?;
        serialize::write_u2d(&mut out, &kernels)?;
        serialize::write_u2d(&mut out, &outputs)?;

        serialize::write_tensor_vec(&mut out, &self.conv_kernels)?;
        serialize::write_tensor_vec(&mut out, &self.conv_biases)?;
        serialize::write_tensor_vec(&mut out, &self.weights)?;
        serialize::write_tensor_vec(&mut out, &self.biases)?;
        Ok(())
    }

    /// Replace configuration and parameters with the contents of `path`.
    /// The tape is cleared first; every other tensor bound to it goes
    /// stale.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let split_direction = split_from_int(serialize::read_count(&mut lines)?)?;
        let n_input_channels = serialize::read_count(&mut lines)?;

        let pooling = pairs_of(serialize::read_u2d(&mut lines)?, "pooling")?;
        let kernel_dims = triples_of(serialize::read_u2d(&mut lines)?, "kernel dims")?;
        let conv_output_dims = pairs_of(serialize::read_u2d(&mut lines)?, "output dims")?;
        if kernel_dims.len() != pooling.len()
            || kernel_dims.len() != conv_output_dims.len()
            || kernel_dims.is_empty()
        {
            return Err(Error::Parse(
                "convolution layer descriptions disagree on the layer count".to_string(),
            ));
        }

        let conv_kernels = serialize::read_array_vec(&mut lines)?;
        let conv_biases = serialize::read_array_vec(&mut lines)?;
        let weights = serialize::read_array_vec(&mut lines)?;
        let biases = serialize::read_array_vec(&mut lines)?;
        if conv_kernels.len() != kernel_dims.len() || conv_biases.len() != kernel_dims.len() {
            return Err(Error::Parse(format!(
                "{} kernel matrices for {} described layers",
                conv_kernels.len(),
                kernel_dims.len()
            )));
        }
        if weights.len() != biases.len() {
            return Err(Error::Parse(format!(
                "{} dense weight tensors against {} bias tensors",
                weights.len(),
                biases.len()
            )));
        }

        // Re-register every parameter on a cleared tape in the
        // constructor's interleaved order — (kernel, bias) per conv
        // layer, then (weight, bias) per dense layer — so the parameter
        // registry stays aligned with `parameters()` and the accumulator
        // slots. The file stores the vectors grouped.
        self.tape.clear();
        self.conv_kernels.clear();
        self.conv_biases.clear();
        self.weights.clear();
        self.biases.clear();
        for (k, b) in conv_kernels.into_iter().zip(conv_biases) {
            self.conv_kernels.push(Tensor::parameter(k, &self.tape));
            self.conv_biases.push(Tensor::parameter(b, &self.tape));
        }
        for (w, b) in weights.into_iter().zip(biases) {
            self.weights.push(Tensor::parameter(w, &self.tape));
            self.biases.push(Tensor::parameter(b, &self.tape));
        }

        // The stacked input shape follows from the first layer: channel
        // size is output size plus kernel size minus one.
        let (kr0, kc0, _) = kernel_dims[0];
        let channel = (
            conv_output_dims[0].0 + kr0 - 1,
            conv_output_dims[0].1 + kc0 - 1,
        );
        self.expected_input = match split_direction {
            ChannelSplit::NoSplit => channel,
            ChannelSplit::Horizontal => (channel.0 * n_input_channels, channel.1),
            ChannelSplit::Vertical => (channel.0, channel.1 * n_input_channels),
        };

        self.split_direction = split_direction;
        self.n_input_channels = n_input_channels;
        self.pooling = pooling;
        self.kernel_dims = kernel_dims;
        self.conv_output_dims = conv_output_dims;
        Ok(())
    }
}

impl<T: Scalar> Model<T> for ConvolutionalNetwork<T> {
    fn tape(&self) -> &Tape<T> {
        &self.tape
    }

    fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
        if input.shape() != self.expected_input {
            return Err(Error::ShapeMismatch {
                op: "cnn forward",
                lhs: input.shape(),
                rhs: self.expected_input,
            });
        }

        let mut channels = split(input, self.split_direction, self.n_input_channels)?;

        for (i, &(kr, kc, _)) in self.kernel_dims.iter().enumerate() {
            let columns = im2col(&channels, (kr, kc))?;
            let z = self.conv_kernels[i]
                .matmul(&columns)?
                .add(&self.conv_biases[i])?;
            channels = col2im(&z, self.conv_output_dims[i])?;

            let pool = self.pooling[i];
            if pool != (0, 0) {
                channels = channels
                    .iter()
                    .map(|c| c.max_pooling(pool))
                    .collect::<Result<Vec<_>>>()?;
            }
            channels = channels
                .iter()
                .map(|c| (self.activation)(c))
                .collect::<Result<Vec<_>>>()?;
        }

        let mut activations = vert_cat(&channels)?.flatten()?;
        for (w, b) in self.weights.iter().zip(self.biases.iter()) {
            let z = w.matmul(&activations)?.add(b)?;
            activations = (self.activation)(&z)?;
        }
        Ok(activations)
    }

    fn parameters(&self) -> Vec<&Tensor<T>> {
        self.conv_kernels
            .iter()
            .zip(self.conv_biases.iter())
            .flat_map(|(k, b)| [k, b])
            .chain(
                self.weights
                    .iter()
                    .zip(self.biases.iter())
                    .flat_map(|(w, b)| [w, b]),
            )
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor<T>> {
        self.conv_kernels
            .iter_mut()
            .zip(self.conv_biases.iter_mut())
            .flat_map(|(k, b)| [k, b])
            .chain(
                self.weights
                    .iter_mut()
                    .zip(self.biases.iter_mut())
                    .flat_map(|(w, b)| [w, b]),
            )
            .collect()
    }
}

fn split_to_int(direction: ChannelSplit) -> usize {
    match direction {
        ChannelSplit::NoSplit => 0,
        ChannelSplit::Horizontal => 1,
        ChannelSplit::Vertical => 2,
    }
}

fn split_from_int(value: usize) -> Result<ChannelSplit> {
    match value {
        0 => Ok(ChannelSplit::NoSplit),
        1 => Ok(ChannelSplit::Horizontal),
        2 => Ok(ChannelSplit::Vertical),
        other => Err(Error::Parse(format!("unknown split direction {other}"))),
    }
}

fn pairs_of(values: Vec<Vec<usize>>, what: &str) -> Result<Vec<(usize, usize)>> {
    values
        .into_iter()
        .map(|v| match v.as_slice() {
            [a, b] => Ok((*a, *b)),
            other => Err(Error::Parse(format!(
                "{what}: expected 2 integers, got {}",
                other.len()
            ))),
        })
        .collect()
}

fn triples_of(values: Vec<Vec<usize>>, what: &str) -> Result<Vec<(usize, usize, usize)>> {
    values
        .into_iter()
        .map(|v| match v.as_slice() {
            [a, b, c] => Ok((*a, *b, *c)),
            other => Err(Error::Parse(format!(
                "{what}: expected 3 integers, got {}",
                other.len()
            ))),
        })
        .collect()
}
