use crate::array::Array2;
use crate::bail;
use crate::error::{Error, Result};
use crate::node::{ChannelSplit, NodeKind};
use crate::scalar::Scalar;
use crate::tensor::Tensor;

// Convolution-family operators
//
// The operators a convolutional stack is built from:
//
//   split      — partition a stacked input into channels
//   im2col     — lower a channel list to a column matrix, so an entire
//                convolution layer becomes a single matrix product
//   col2im     — lift the rows of the product back to 2D channels
//   max_pooling, flatten, vert_cat — downsample, reshape, regroup
//   convolution — legacy per-channel valid cross-correlation, kept for
//                compatibility with graphs recorded before the im2col path
//
// All of them commit the tape to scalar-seeded gradients.

/// Valid 2D cross-correlation of `mat` with `ker`.
///
/// Output shape is `(mat.rows - ker.rows + 1, mat.cols - ker.cols + 1)`;
/// the kernel must fit inside the matrix.
pub fn conv_valid<T: Scalar>(mat: &Array2<T>, ker: &Array2<T>) -> Array2<T> {
    assert!(
        mat.rows() >= ker.rows() && mat.cols() >= ker.cols(),
        "conv_valid: kernel {}x{} larger than matrix {}x{}",
        ker.rows(),
        ker.cols(),
        mat.rows(),
        mat.cols()
    );
    let out_rows = mat.rows() - ker.rows() + 1;
    let out_cols = mat.cols() - ker.cols() + 1;
    let mut out = Array2::zeros(out_rows, out_cols);
    for i in 0..out_rows {
        for j in 0..out_cols {
            let mut acc = T::zero();
            for dr in 0..ker.rows() {
                for dc in 0..ker.cols() {
                    acc = acc + mat[(i + dr, j + dc)] * ker[(dr, dc)];
                }
            }
            out[(i, j)] = acc;
        }
    }
    out
}

impl<T: Scalar> Tensor<T> {
    /// Legacy valid cross-correlation of `self` with `ker`.
    ///
    /// The backward payload stores the 180-degree-rotated kernel inside a
    /// zero frame, so both pullbacks reduce to another `conv_valid`.
    /// New graphs should go through [`im2col`] instead.
    pub fn convolution(&self, ker: &Tensor<T>) -> Result<Tensor<T>> {
        if !self.tape().is_same(ker.tape()) {
            return Err(Error::TapeMismatch { op: "convolution" });
        }
        if self.rows() < ker.rows() || self.cols() < ker.cols() {
            return Err(Error::ShapeMismatch {
                op: "convolution",
                lhs: self.shape(),
                rhs: ker.shape(),
            });
        }

        let value = conv_valid(self.value(), ker.value());
        let (out_rows, out_cols) = value.shape();

        // Frame the rotated kernel so that convolving it with the output
        // gradient yields an input-shaped increment.
        let mut framed = Array2::zeros(
            2 * out_rows + ker.rows() - 2,
            2 * out_cols + ker.cols() - 2,
        );
        framed.set_block(
            out_rows - 1,
            out_cols - 1,
            &ker.value().reverse_rows().reverse_cols(),
        );

        let index = self.tape().push_derived(
            NodeKind::Convolution,
            out_rows,
            out_cols,
            vec![self.index(), ker.index()],
            vec![framed, self.value().clone()],
        );
        Ok(Tensor::from_op(value, self.tape(), index))
    }

    /// Max-pooling over non-overlapping `(pr, pc)` windows.
    ///
    /// The pool must divide the input evenly. The backward payload is a
    /// 0/1 mask marking the argmax of each window.
    pub fn max_pooling(&self, pool: (usize, usize)) -> Result<Tensor<T>> {
        let (pr, pc) = pool;
        if pr == 0 || pc == 0 || self.rows() % pr != 0 || self.cols() % pc != 0 {
            return Err(Error::BadPoolDimensions {
                rows: self.rows(),
                cols: self.cols(),
                pool_rows: pr,
                pool_cols: pc,
            });
        }

        let out_rows = self.rows() / pr;
        let out_cols = self.cols() / pc;
        let mut value = Array2::zeros(out_rows, out_cols);
        let mut mask = Array2::zeros(self.rows(), self.cols());

        for i in 0..out_rows {
            for j in 0..out_cols {
                let mut best = self.value()[(i * pr, j * pc)];
                let (mut br, mut bc) = (i * pr, j * pc);
                for dr in 0..pr {
                    for dc in 0..pc {
                        let v = self.value()[(i * pr + dr, j * pc + dc)];
                        if v > best {
                            best = v;
                            br = i * pr + dr;
                            bc = j * pc + dc;
                        }
                    }
                }
                value[(i, j)] = best;
                mask[(br, bc)] = T::one();
            }
        }

        let index = self.tape().push_derived(
            NodeKind::Pooling { pool },
            out_rows,
            out_cols,
            vec![self.index()],
            vec![mask],
        );
        Ok(Tensor::from_op(value, self.tape(), index))
    }

    /// Row-major flattening to a `(rows * cols, 1)` column vector.
    pub fn flatten(&self) -> Result<Tensor<T>> {
        let value = self.value().reshape(self.rows() * self.cols(), 1);
        let index = self.tape().push_derived(
            NodeKind::Flatten {
                original: self.shape(),
            },
            value.rows(),
            1,
            vec![self.index()],
            Vec::new(),
        );
        Ok(Tensor::from_op(value, self.tape(), index))
    }
}

/// Partition `x` into `n_channels` equal channel slabs.
///
/// `Horizontal` splits along the rows (channels stacked top-to-bottom),
/// `Vertical` along the columns. `NoSplit` returns the input unchanged as
/// a one-element list.
pub fn split<T: Scalar>(
    x: &Tensor<T>,
    direction: ChannelSplit,
    n_channels: usize,
) -> Result<Vec<Tensor<T>>> {
    let (rows, cols) = x.shape();
    if direction != ChannelSplit::NoSplit {
        if n_channels == 0 {
            bail!("split into 0 channels");
        }
        let divisible = match direction {
            ChannelSplit::Horizontal => rows % n_channels == 0,
            ChannelSplit::Vertical => cols % n_channels == 0,
            ChannelSplit::NoSplit => true,
        };
        if !divisible {
            bail!(
                "split: {} channels do not divide a {}x{} tensor evenly",
                n_channels,
                rows,
                cols
            );
        }
    }

    x.tape().mark_shape_changing();

    if direction == ChannelSplit::NoSplit {
        return Ok(vec![x.clone()]);
    }

    let horizontal = direction == ChannelSplit::Horizontal;
    let (ch_rows, ch_cols) = if horizontal {
        (rows / n_channels, cols)
    } else {
        (rows, cols / n_channels)
    };

    let mut channels = Vec::with_capacity(n_channels);
    for i in 0..n_channels {
        let value = if horizontal {
            x.value().block(i * ch_rows, 0, ch_rows, ch_cols)
        } else {
            x.value().block(0, i * ch_cols, ch_rows, ch_cols)
        };
        let index = x.tape().push_derived(
            NodeKind::Split {
                original: (rows, cols),
                direction,
                channel: i,
            },
            ch_rows,
            ch_cols,
            vec![x.index()],
            Vec::new(),
        );
        channels.push(Tensor::from_op(value, x.tape(), index));
    }
    Ok(channels)
}

/// Stack a list of same-width matrices top-to-bottom.
pub fn vert_cat<T: Scalar>(xs: &[Tensor<T>]) -> Result<Tensor<T>> {
    let Some(first) = xs.first() else {
        bail!("vert_cat of an empty tensor list");
    };

    let cols = first.cols();
    let mut offsets = vec![0usize];
    let mut rows = 0usize;
    for x in xs {
        if !x.tape().is_same(first.tape()) {
            return Err(Error::TapeMismatch { op: "vert_cat" });
        }
        if x.cols() != cols {
            return Err(Error::ShapeMismatch {
                op: "vert_cat",
                lhs: first.shape(),
                rhs: x.shape(),
            });
        }
        rows += x.rows();
        offsets.push(rows);
    }
    let mut value = Array2::zeros(rows, cols);
    for (x, &offset) in xs.iter().zip(offsets.iter()) {
        value.set_block(offset, 0, x.value());
    }

    let parents = xs.iter().map(Tensor::index).collect();
    let index = first.tape().push_derived(
        NodeKind::VertCat { offsets },
        rows,
        cols,
        parents,
        Vec::new(),
    );
    Ok(Tensor::from_op(value, first.tape(), index))
}

/// Lower a channel list to a column matrix for convolution by matrix
/// product.
///
/// Each channel contributes a block of `kr * kc` rows; each column holds
/// one kernel-sized window, windows enumerated in row-major order over
/// the input. A kernel matrix of shape `(out_channels, in_channels·kr·kc)`
/// then computes one entire convolution layer as a single product.
pub fn im2col<T: Scalar>(xs: &[Tensor<T>], kernel: (usize, usize)) -> Result<Tensor<T>> {
    let Some(first) = xs.first() else {
        bail!("im2col of an empty channel list");
    };
    let (kr, kc) = kernel;
    if kr == 0 || kc == 0 || first.rows() < kr || first.cols() < kc {
        return Err(Error::ShapeMismatch {
            op: "im2col",
            lhs: first.shape(),
            rhs: kernel,
        });
    }
    for x in xs {
        if !x.tape().is_same(first.tape()) {
            return Err(Error::TapeMismatch { op: "im2col" });
        }
        if x.shape() != first.shape() {
            return Err(Error::ShapeMismatch {
                op: "im2col",
                lhs: first.shape(),
                rhs: x.shape(),
            });
        }
    }

    let (rows, cols) = first.shape();
    let n_wr = rows - kr + 1;
    let n_wc = cols - kc + 1;
    let mut value = Array2::zeros(kr * kc * xs.len(), n_wr * n_wc);

    for (ch, x) in xs.iter().enumerate() {
        for wr in 0..n_wr {
            for wc in 0..n_wc {
                let col = wr * n_wc + wc;
                // Window coefficients are packed column-major.
                for j in 0..kr * kc {
                    let (dr, dc) = (j % kr, j / kr);
                    value[(ch * kr * kc + j, col)] = x.value()[(wr + dr, wc + dc)];
                }
            }
        }
    }

    let parents = xs.iter().map(Tensor::index).collect();
    let (out_rows, out_cols) = value.shape();
    let index = first.tape().push_derived(
        NodeKind::Im2Col {
            kernel,
            input_shape: (rows, cols),
            n_channels: xs.len(),
        },
        out_rows,
        out_cols,
        parents,
        Vec::new(),
    );
    Ok(Tensor::from_op(value, first.tape(), index))
}

/// Lift each row of an im2col-shaped matrix back to a 2D output channel
/// of shape `output_dim`.
pub fn col2im<T: Scalar>(x: &Tensor<T>, output_dim: (usize, usize)) -> Result<Vec<Tensor<T>>> {
    let (out_rows, out_cols) = output_dim;
    if x.cols() != out_rows * out_cols {
        return Err(Error::ShapeMismatch {
            op: "col2im",
            lhs: x.shape(),
            rhs: output_dim,
        });
    }

    let mut channels = Vec::with_capacity(x.rows());
    for i in 0..x.rows() {
        let value = x.value().block(i, 0, 1, x.cols()).reshape(out_rows, out_cols);
        let index = x.tape().push_derived(
            NodeKind::Col2Im {
                row: i,
                block_rows: x.rows(),
            },
            out_rows,
            out_cols,
            vec![x.index()],
            Vec::new(),
        );
        channels.push(Tensor::from_op(value, x.tape(), index));
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::Tape;

    fn tensor(tape: &Tape<f64>, rows: usize, cols: usize, data: Vec<f64>) -> Tensor<f64> {
        Tensor::input(Array2::from_vec(rows, cols, data), tape)
    }

    #[test]
    fn test_conv_valid_reference() {
        let mat = Array2::from_vec(3, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let ker = Array2::from_vec(2, 2, vec![1.0, 0.0, 0.0, 1.0]);
        let out = conv_valid(&mat, &ker);
        // Each output = top-left + bottom-right of the window.
        assert_eq!(out.as_slice(), &[6.0, 8.0, 12.0, 14.0]);
    }

    #[test]
    fn test_convolution_shapes_and_flag() {
        let tape = Tape::new();
        let mat = tensor(&tape, 4, 5, vec![1.0; 20]);
        let ker = tensor(&tape, 2, 2, vec![1.0; 4]);
        let out = mat.convolution(&ker).unwrap();
        assert_eq!(out.shape(), (3, 4));
        assert!(!tape.element_wise_only());

        // Kernel larger than matrix is a shape error.
        let big = tensor(&tape, 6, 6, vec![1.0; 36]);
        assert!(mat.convolution(&big).is_err());
    }

    #[test]
    fn test_max_pooling_values() {
        let tape = Tape::new();
        let x = tensor(
            &tape,
            2,
            4,
            vec![1.0, 5.0, 2.0, 0.0, 3.0, 4.0, 1.0, 7.0],
        );
        let y = x.max_pooling((2, 2)).unwrap();
        assert_eq!(y.shape(), (1, 2));
        assert_eq!(y.value().as_slice(), &[5.0, 7.0]);
    }

    #[test]
    fn test_max_pooling_rejects_uneven_pool() {
        let tape = Tape::new();
        let x = tensor(&tape, 2, 4, vec![0.0; 8]);
        let before = tape.len();
        assert!(matches!(
            x.max_pooling((3, 2)),
            Err(Error::BadPoolDimensions { .. })
        ));
        assert_eq!(tape.len(), before);
    }

    #[test]
    fn test_flatten_row_major() {
        let tape = Tape::new();
        let x = tensor(&tape, 2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let f = x.flatten().unwrap();
        assert_eq!(f.shape(), (6, 1));
        assert_eq!(f.value().as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_split_horizontal_and_vertical() {
        let tape = Tape::new();
        let x = tensor(&tape, 4, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

        let h = split(&x, ChannelSplit::Horizontal, 2).unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].value().as_slice(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(h[1].value().as_slice(), &[5.0, 6.0, 7.0, 8.0]);

        let v = split(&x, ChannelSplit::Vertical, 2).unwrap();
        assert_eq!(v[0].value().as_slice(), &[1.0, 3.0, 5.0, 7.0]);
        assert_eq!(v[1].value().as_slice(), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_split_nosplit_returns_input_but_marks_tape() {
        let tape = Tape::new();
        let x = tensor(&tape, 2, 2, vec![1.0; 4]);
        let out = split(&x, ChannelSplit::NoSplit, 1).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].index(), x.index());
        assert!(!tape.element_wise_only());
        assert_eq!(tape.len(), 1); // nothing appended
    }

    #[test]
    fn test_vert_cat_stacks_and_offsets() {
        let tape = Tape::new();
        let a = tensor(&tape, 1, 2, vec![1.0, 2.0]);
        let b = tensor(&tape, 2, 2, vec![3.0, 4.0, 5.0, 6.0]);
        let c = vert_cat(&[a, b]).unwrap();
        assert_eq!(c.shape(), (3, 2));
        assert_eq!(c.value().as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_vert_cat_width_mismatch() {
        let tape = Tape::new();
        let a = tensor(&tape, 1, 2, vec![1.0, 2.0]);
        let b = tensor(&tape, 1, 3, vec![3.0, 4.0, 5.0]);
        assert!(vert_cat(&[a, b]).is_err());
    }

    #[test]
    fn test_im2col_shape_and_first_column() {
        let tape = Tape::new();
        let x = tensor(
            &tape,
            3,
            3,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        );
        let m = im2col(&[x], (2, 2)).unwrap();
        assert_eq!(m.shape(), (4, 4));
        // First column is the (0,0) window, packed column-major.
        let col0: Vec<f64> = (0..4).map(|j| m.value()[(j, 0)]).collect();
        assert_eq!(col0, vec![1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_col2im_reshapes_rows() {
        let tape = Tape::new();
        let m = tensor(&tape, 2, 4, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let channels = col2im(&m, (2, 2)).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].value().as_slice(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(channels[1].value().as_slice(), &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_col2im_requires_matching_width() {
        let tape = Tape::new();
        let m = tensor(&tape, 1, 5, vec![0.0; 5]);
        assert!(col2im(&m, (2, 2)).is_err());
    }
}
