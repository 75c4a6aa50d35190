use crate::array::Array2;
use crate::bail;
use crate::error::{Error, Result};
use crate::node::{ChannelSplit, Node, NodeKind};
use crate::scalar::Scalar;
use crate::tensor::Tensor;

// Reverse pass — Replaying the tape backward
//
// `backward()` walks the tape from the seed down to index 0, applying
// each node's pullback and accumulating the increments into the parents.
// Because parents always sit at smaller indices, a single descending loop
// visits every node after all of its consumers; no topological sort is
// needed at backward time.
//
// SEED GATE:
//
// On a tape that only holds inputs and element-wise nodes, every node
// shares the seed's shape and a gradient of any shape is well defined.
// As soon as one shape-changing operation is recorded, only seeds with at
// least one dimension equal to 1 are accepted; anything else is rejected
// as NonScalarSeed before any work happens.
//
// The pass is single-threaded and deterministic; `derivatives` is the
// only mutable state.

/// Per-node derivatives of one seed tensor, indexed by tape position.
///
/// Entry `i` has the shape of node `i` and holds the derivative of the
/// seed with respect to that node.
#[derive(Debug, Clone)]
pub struct Gradient<T: Scalar> {
    derivatives: Vec<Array2<T>>,
}

impl<T: Scalar> Gradient<T> {
    /// Number of entries (the tape length at the time of the call).
    pub fn len(&self) -> usize {
        self.derivatives.len()
    }

    /// Whether the gradient holds no entries.
    pub fn is_empty(&self) -> bool {
        self.derivatives.is_empty()
    }

    /// Derivative of the seed with respect to `tensor`, if its index is
    /// still in range.
    pub fn get(&self, tensor: &Tensor<T>) -> Option<&Array2<T>> {
        self.derivatives.get(tensor.index())
    }

    /// Derivative entry by tape position.
    pub fn at(&self, index: usize) -> &Array2<T> {
        &self.derivatives[index]
    }

    /// Mutable derivative entry by tape position. The Adam optimizer
    /// rewrites parameter entries in place through this.
    pub fn at_mut(&mut self, index: usize) -> &mut Array2<T> {
        &mut self.derivatives[index]
    }
}

/// Compute the derivatives of `seed` with respect to every tape node.
pub(crate) fn backward<T: Scalar>(seed: &Tensor<T>) -> Result<Gradient<T>> {
    let tape = seed.tape();

    if !tape.element_wise_only() && seed.rows() > 1 && seed.cols() > 1 {
        return Err(Error::NonScalarSeed {
            rows: seed.rows(),
            cols: seed.cols(),
        });
    }

    tape.with_nodes(|nodes| {
        let seed_index = seed.index();
        if seed_index >= nodes.len() {
            bail!(
                "stale tensor handle: index {} on a tape of length {}",
                seed_index,
                nodes.len()
            );
        }

        let mut derivatives: Vec<Array2<T>> = nodes
            .iter()
            .map(|n| Array2::zeros(n.rows, n.cols))
            .collect();
        derivatives[seed_index] = Array2::ones(seed.rows(), seed.cols());

        for i in (0..nodes.len()).rev() {
            let node = &nodes[i];
            if node.parents.is_empty() {
                continue;
            }
            let g = derivatives[i].clone();
            for (slot, &parent) in node.parents.iter().enumerate() {
                let increment = pullback(node, &g, slot);
                derivatives[parent] += &increment;
            }
        }

        Ok(Gradient { derivatives })
    })
}

/// Map the output-side gradient `g` of `node` to the increment for the
/// parent in `slot`. The returned array always has the parent's shape.
fn pullback<T: Scalar>(node: &Node<T>, g: &Array2<T>, slot: usize) -> Array2<T> {
    match &node.kind {
        // Inputs have no parents; the loop above never dispatches here.
        NodeKind::Input { .. } => Array2::empty(),

        NodeKind::ElementWise => &node.local[slot] * g,

        NodeKind::MatProd { x_shape, y_shape } => {
            // local[0] = Yᵀ, local[1] = Xᵀ
            let increment = if slot == 0 {
                g.matmul(&node.local[0])
            } else {
                node.local[1].matmul(g)
            };
            debug_assert_eq!(
                increment.shape(),
                if slot == 0 { *x_shape } else { *y_shape }
            );
            increment
        }

        NodeKind::Scalar => node.local[slot].scale(g[(0, 0)]),

        NodeKind::Convolution => compute_convolution_grad(&node.local[slot], g),

        NodeKind::Pooling { pool } => compute_pooling_grad(&node.local[slot], g, *pool),

        NodeKind::Split {
            original,
            direction,
            channel,
        } => {
            let mut out = Array2::zeros(original.0, original.1);
            match direction {
                ChannelSplit::Horizontal => out.set_block(channel * node.rows, 0, g),
                ChannelSplit::Vertical => out.set_block(0, channel * node.cols, g),
                ChannelSplit::NoSplit => {}
            }
            out
        }

        NodeKind::VertCat { offsets } => {
            g.block(offsets[slot], 0, offsets[slot + 1] - offsets[slot], g.cols())
        }

        NodeKind::Flatten { original } => g.reshape(original.0, original.1),

        NodeKind::Im2Col {
            kernel,
            input_shape,
            ..
        } => compute_im2col_grad(g, *kernel, *input_shape, slot),

        NodeKind::Col2Im { row, block_rows } => {
            let mut out = Array2::zeros(*block_rows, g.elem_count());
            out.set_block(*row, 0, &g.reshape(1, g.elem_count()));
            out
        }
    }
}

/// Pullback of the legacy convolution: another valid cross-correlation,
/// with the operands ordered so the kernel is the smaller array.
fn compute_convolution_grad<T: Scalar>(local: &Array2<T>, g: &Array2<T>) -> Array2<T> {
    if g.rows() > local.rows() && g.cols() > local.cols() {
        crate::conv::conv_valid(g, local)
    } else {
        crate::conv::conv_valid(local, g)
    }
}

/// Pullback of max-pooling: replicate each gradient coefficient over its
/// pool window, then keep only the argmax positions via the 0/1 mask.
fn compute_pooling_grad<T: Scalar>(
    mask: &Array2<T>,
    g: &Array2<T>,
    (pr, pc): (usize, usize),
) -> Array2<T> {
    let mut upsampled = Array2::zeros(mask.rows(), mask.cols());
    for i in 0..g.rows() {
        for j in 0..g.cols() {
            let v = g[(i, j)];
            for dr in 0..pr {
                for dc in 0..pc {
                    upsampled[(i * pr + dr, j * pc + dc)] = v;
                }
            }
        }
    }
    &upsampled * mask
}

/// Pullback of im2col for one input channel: scatter the channel's row
/// block back onto the input windows, summing where windows overlap.
fn compute_im2col_grad<T: Scalar>(
    g: &Array2<T>,
    (kr, kc): (usize, usize),
    (rows, cols): (usize, usize),
    slot: usize,
) -> Array2<T> {
    let n_wc = cols - kc + 1;
    let mut out = Array2::zeros(rows, cols);
    for col in 0..g.cols() {
        let (wr, wc) = (col / n_wc, col % n_wc);
        for j in 0..kr * kc {
            let (dr, dc) = (j / kc, j % kc);
            let inc = g[(slot * kr * kc + j, col)];
            out[(wr + dr, wc + dc)] = out[(wr + dr, wc + dc)] + inc;
        }
    }
    out
}
