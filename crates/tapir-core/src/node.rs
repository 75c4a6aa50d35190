use std::cell::Cell;
use std::rc::Rc;

use crate::array::Array2;
use crate::scalar::Scalar;

// Node — One entry of the tape
//
// Every tensor operation appends exactly one node (split / col2im append
// one node per output channel). A node records:
//
//   - its kind, with the payload that kind needs at backward time
//   - the shape of the value it produced
//   - the tape indices of its parents (always strictly smaller than the
//     node's own index, which is what makes the reverse pass a plain
//     descending loop)
//   - per-parent local-derivative arrays, interpreted according to kind
//
// The node does not know whether it sits in a scalar or an element-wise
// graph; the tape-level `element_wise_only` flag is the only gate for
// non-scalar gradient seeds.

/// How a stacked multi-channel input is partitioned into channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSplit {
    /// The input already is a single channel.
    NoSplit,
    /// Channels are stacked top-to-bottom: split along the rows.
    Horizontal,
    /// Channels are stacked side-by-side: split along the columns.
    Vertical,
}

/// The closed set of operation kinds a tape can record.
///
/// Each variant carries the fixed-arity payload its pullback needs; the
/// variable-size per-parent payloads live in [`Node::local`].
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A leaf: input data or a trainable parameter. `handle` is the index
    /// cell shared with every tensor bound to this node, so `Tape::reset`
    /// can re-index surviving parameters in place.
    Input {
        trainable: bool,
        param_slot: Option<usize>,
        handle: Rc<Cell<usize>>,
    },

    /// Element-wise unary or binary operation. The local payloads are the
    /// partial derivatives w.r.t. each parent, same shape as the output.
    ElementWise,

    /// Matrix product X * Y. Locals store Y^T (parent 0) and X^T
    /// (parent 1); the original operand shapes disambiguate the backward
    /// formulas even when X and Y are square and same-sized.
    MatProd {
        x_shape: (usize, usize),
        y_shape: (usize, usize),
    },

    /// Array-to-scalar reduction (squared norm). Local is `2x`.
    Scalar,

    /// Legacy 2D valid cross-correlation. Locals store the zero-padded,
    /// 180-degree-rotated kernel (parent 0) and the input matrix
    /// (parent 1). Kept for compatibility; the im2col path supersedes it.
    Convolution,

    /// Max-pooling with pool size `(pr, pc)`. Local is a 0/1 argmax mask
    /// the shape of the input.
    Pooling { pool: (usize, usize) },

    /// One output channel of a channel split.
    Split {
        original: (usize, usize),
        direction: ChannelSplit,
        channel: usize,
    },

    /// Vertical concatenation. `offsets` holds cumulative row offsets,
    /// starting at 0 and ending at the total row count.
    VertCat { offsets: Vec<usize> },

    /// Row-major flattening of `original` to a column vector.
    Flatten { original: (usize, usize) },

    /// Multi-channel input lowered to a column matrix for convolution by
    /// matrix product.
    Im2Col {
        kernel: (usize, usize),
        input_shape: (usize, usize),
        n_channels: usize,
    },

    /// One row of an im2col-shaped matrix lifted back to a 2D channel.
    /// `block_rows` is the row count of the parent matrix.
    Col2Im { row: usize, block_rows: usize },
}

impl NodeKind {
    /// Whether this kind keeps the tape element-wise-only.
    pub(crate) fn is_element_wise(&self) -> bool {
        matches!(self, NodeKind::Input { .. } | NodeKind::ElementWise)
    }
}

/// A single tape entry.
#[derive(Debug, Clone)]
pub struct Node<T: Scalar> {
    pub(crate) kind: NodeKind,
    pub(crate) rows: usize,
    pub(crate) cols: usize,
    pub(crate) parents: Vec<usize>,
    pub(crate) local: Vec<Array2<T>>,
}

impl<T: Scalar> Node<T> {
    pub(crate) fn input(rows: usize, cols: usize, trainable: bool, handle: Rc<Cell<usize>>) -> Self {
        Node {
            kind: NodeKind::Input {
                trainable,
                param_slot: None,
                handle,
            },
            rows,
            cols,
            parents: Vec::new(),
            local: Vec::new(),
        }
    }

    /// Shape of the value this node produced.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Tape indices of the parents.
    pub fn parents(&self) -> &[usize] {
        &self.parents
    }

    /// Whether this node is an input flagged as trainable.
    pub fn is_trainable_input(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Input {
                trainable: true,
                ..
            }
        )
    }
}
