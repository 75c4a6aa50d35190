use std::ops::{Add, AddAssign, Div, Index, IndexMut, Mul, Neg, Sub};

use rand::Rng;
use rayon::prelude::*;

use crate::scalar::Scalar;

// Array2 — Dense row-major 2D array
//
// The numeric workhorse underneath the tape: every tensor value, every
// local-derivative payload, and every gradient entry is an Array2. The
// engine only ever needs two dimensions; a 0x0 array denotes "absent".
//
// Shape errors at this level are programmer errors — the tensor-level
// operators validate shapes first and surface typed errors, so the
// asserts here are never reachable through the public operator API.
// This mirrors how ndarray-style primitives behave on misuse.
//
// Matrix products above a size threshold run row-parallel on the rayon
// pool. Nothing else in the engine is parallel: the tape is strictly
// sequential.

/// Minimum number of multiply-adds before `matmul` fans out to rayon.
const PARALLEL_MATMUL_THRESHOLD: usize = 64 * 64 * 64;

/// A dense row-major 2D array of scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct Array2<T: Scalar> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Scalar> Array2<T> {
    // Constructors

    /// Create a zero-filled array.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Array2 {
            rows,
            cols,
            data: vec![T::zero(); rows * cols],
        }
    }

    /// Create a one-filled array.
    pub fn ones(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, T::one())
    }

    /// Create an array with every coefficient set to `value`.
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Array2 {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Create an array with coefficients drawn uniformly from [-1, 1].
    pub fn random(rows: usize, cols: usize) -> Self {
        let mut rng = rand::thread_rng();
        let data = (0..rows * cols)
            .map(|_| T::from_f64(rng.gen_range(-1.0..1.0)))
            .collect();
        Array2 { rows, cols, data }
    }

    /// The 0x0 "absent" array.
    pub fn empty() -> Self {
        Array2 {
            rows: 0,
            cols: 0,
            data: Vec::new(),
        }
    }

    /// Create an array from a row-major coefficient vector.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "from_vec: {} coefficients for a {}x{} array",
            data.len(),
            rows,
            cols
        );
        Array2 { rows, cols, data }
    }

    // Queries

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)` pair.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Whether this is the 0x0 "absent" array.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total number of coefficients.
    pub fn elem_count(&self) -> usize {
        self.data.len()
    }

    /// Row-major linearization of the coefficients.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    // Element-wise helpers

    /// Apply `f` to every coefficient, producing a new array.
    pub fn map(&self, f: impl Fn(T) -> T) -> Self {
        Array2 {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Combine two same-shaped arrays coefficient-wise.
    pub fn zip_map(&self, other: &Self, f: impl Fn(T, T) -> T) -> Self {
        assert_eq!(self.shape(), other.shape(), "zip_map: shape mismatch");
        Array2 {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        }
    }

    /// Coefficient-wise exponential.
    pub fn exp(&self) -> Self {
        self.map(|v| v.exp())
    }

    /// Coefficient-wise power.
    pub fn powf(&self, e: T) -> Self {
        self.map(|v| v.powf(e))
    }

    /// Multiply every coefficient by `s`.
    pub fn scale(&self, s: T) -> Self {
        self.map(|v| v * s)
    }

    /// Largest coefficient.
    pub fn max_coeff(&self) -> T {
        assert!(!self.is_empty(), "max_coeff of an empty array");
        self.data.iter().copied().fold(T::neg_infinity(), T::max)
    }

    /// Frobenius squared norm: the sum of squared coefficients.
    pub fn squared_norm(&self) -> T {
        self.data.iter().map(|&v| v * v).sum()
    }

    // Structural operations

    /// Matrix transpose.
    pub fn transpose(&self) -> Self {
        let mut out = Array2::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                out.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        out
    }

    /// Matrix product `self * rhs`.
    ///
    /// Runs row-parallel on rayon once the work exceeds
    /// [`PARALLEL_MATMUL_THRESHOLD`] multiply-adds.
    pub fn matmul(&self, rhs: &Self) -> Self {
        assert_eq!(
            self.cols, rhs.rows,
            "matmul: {}x{} times {}x{}",
            self.rows, self.cols, rhs.rows, rhs.cols
        );
        let (m, k, n) = (self.rows, self.cols, rhs.cols);
        let mut out = vec![T::zero(); m * n];

        let kernel = |(i, row): (usize, &mut [T])| {
            for p in 0..k {
                let a = self.data[i * k + p];
                let rhs_row = &rhs.data[p * n..(p + 1) * n];
                for (o, &b) in row.iter_mut().zip(rhs_row) {
                    *o = *o + a * b;
                }
            }
        };

        if m * k * n >= PARALLEL_MATMUL_THRESHOLD {
            out.par_chunks_mut(n).enumerate().for_each(kernel);
        } else {
            out.chunks_mut(n).enumerate().for_each(kernel);
        }

        Array2 {
            rows: m,
            cols: n,
            data: out,
        }
    }

    /// Copy of the `nr x nc` sub-block whose top-left corner is `(r0, c0)`.
    pub fn block(&self, r0: usize, c0: usize, nr: usize, nc: usize) -> Self {
        assert!(
            r0 + nr <= self.rows && c0 + nc <= self.cols,
            "block: {}x{} block at ({}, {}) out of a {}x{} array",
            nr,
            nc,
            r0,
            c0,
            self.rows,
            self.cols
        );
        let mut out = Array2::zeros(nr, nc);
        for i in 0..nr {
            let src = (r0 + i) * self.cols + c0;
            out.data[i * nc..(i + 1) * nc].copy_from_slice(&self.data[src..src + nc]);
        }
        out
    }

    /// Overwrite the sub-block at `(r0, c0)` with `src`.
    pub fn set_block(&mut self, r0: usize, c0: usize, src: &Self) {
        assert!(
            r0 + src.rows <= self.rows && c0 + src.cols <= self.cols,
            "set_block: {}x{} block at ({}, {}) out of a {}x{} array",
            src.rows,
            src.cols,
            r0,
            c0,
            self.rows,
            self.cols
        );
        for i in 0..src.rows {
            let dst = (r0 + i) * self.cols + c0;
            self.data[dst..dst + src.cols].copy_from_slice(&src.data[i * src.cols..(i + 1) * src.cols]);
        }
    }

    /// Reverse the order of the rows (vertical flip).
    pub fn reverse_rows(&self) -> Self {
        let mut out = self.clone();
        for i in 0..self.rows {
            let src = (self.rows - 1 - i) * self.cols;
            out.data[i * self.cols..(i + 1) * self.cols]
                .copy_from_slice(&self.data[src..src + self.cols]);
        }
        out
    }

    /// Reverse the order of the columns (horizontal flip).
    pub fn reverse_cols(&self) -> Self {
        let mut out = self.clone();
        for i in 0..self.rows {
            for j in 0..self.cols {
                out.data[i * self.cols + j] = self.data[i * self.cols + (self.cols - 1 - j)];
            }
        }
        out
    }

    /// Reinterpret the row-major coefficients under a new shape with the
    /// same element count.
    pub fn reshape(&self, rows: usize, cols: usize) -> Self {
        assert_eq!(
            rows * cols,
            self.data.len(),
            "reshape: {}x{} from {} coefficients",
            rows,
            cols,
            self.data.len()
        );
        Array2 {
            rows,
            cols,
            data: self.data.clone(),
        }
    }

    /// Reset every coefficient to zero.
    pub fn set_zero(&mut self) {
        for v in &mut self.data {
            *v = T::zero();
        }
    }
}

impl<T: Scalar> Index<(usize, usize)> for Array2<T> {
    type Output = T;

    fn index(&self, (r, c): (usize, usize)) -> &T {
        &self.data[r * self.cols + c]
    }
}

impl<T: Scalar> IndexMut<(usize, usize)> for Array2<T> {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut T {
        &mut self.data[r * self.cols + c]
    }
}

// Coefficient-wise arithmetic on references, so callers keep ownership.

impl<T: Scalar> Add for &Array2<T> {
    type Output = Array2<T>;
    fn add(self, rhs: Self) -> Array2<T> {
        self.zip_map(rhs, |a, b| a + b)
    }
}

impl<T: Scalar> Sub for &Array2<T> {
    type Output = Array2<T>;
    fn sub(self, rhs: Self) -> Array2<T> {
        self.zip_map(rhs, |a, b| a - b)
    }
}

impl<T: Scalar> Mul for &Array2<T> {
    type Output = Array2<T>;
    fn mul(self, rhs: Self) -> Array2<T> {
        self.zip_map(rhs, |a, b| a * b)
    }
}

impl<T: Scalar> Div for &Array2<T> {
    type Output = Array2<T>;
    fn div(self, rhs: Self) -> Array2<T> {
        self.zip_map(rhs, |a, b| a / b)
    }
}

impl<T: Scalar> Neg for &Array2<T> {
    type Output = Array2<T>;
    fn neg(self) -> Array2<T> {
        self.map(|v| -v)
    }
}

impl<T: Scalar> AddAssign<&Array2<T>> for Array2<T> {
    fn add_assign(&mut self, rhs: &Array2<T>) {
        assert_eq!(self.shape(), rhs.shape(), "add_assign: shape mismatch");
        for (a, &b) in self.data.iter_mut().zip(rhs.data.iter()) {
            *a = *a + b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_and_fill() {
        let a = Array2::<f64>::zeros(2, 3);
        assert_eq!(a.shape(), (2, 3));
        assert_eq!(a.as_slice(), &[0.0; 6]);

        let b = Array2::<f64>::filled(2, 2, 7.0);
        assert_eq!(b[(1, 1)], 7.0);
    }

    #[test]
    fn test_empty() {
        let a = Array2::<f32>::empty();
        assert!(a.is_empty());
        assert_eq!(a.shape(), (0, 0));
    }

    #[test]
    fn test_indexing_row_major() {
        let a = Array2::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(a[(0, 2)], 3.0);
        assert_eq!(a[(1, 0)], 4.0);
    }

    #[test]
    fn test_elementwise_ops() {
        let a = Array2::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let b = Array2::from_vec(2, 2, vec![5.0, 6.0, 7.0, 8.0]);
        assert_eq!((&a + &b).as_slice(), &[6.0, 8.0, 10.0, 12.0]);
        assert_eq!((&b - &a).as_slice(), &[4.0, 4.0, 4.0, 4.0]);
        assert_eq!((&a * &b).as_slice(), &[5.0, 12.0, 21.0, 32.0]);
        assert_eq!((&b / &a).as_slice(), &[5.0, 3.0, 7.0 / 3.0, 2.0]);
        assert_eq!((-&a).as_slice(), &[-1.0, -2.0, -3.0, -4.0]);
    }

    #[test]
    fn test_matmul() {
        let a = Array2::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let b = Array2::from_vec(2, 2, vec![5.0, 6.0, 7.0, 8.0]);
        let c = a.matmul(&b);
        assert_eq!(c.as_slice(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_rectangular() {
        // (2x3) * (3x1) = (2x1)
        let a = Array2::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let x = Array2::from_vec(3, 1, vec![1.0, 0.0, -1.0]);
        let y = a.matmul(&x);
        assert_eq!(y.shape(), (2, 1));
        assert_eq!(y.as_slice(), &[-2.0, -2.0]);
    }

    #[test]
    fn test_transpose() {
        let a = Array2::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = a.transpose();
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t.as_slice(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_block_and_set_block() {
        let a = Array2::from_vec(3, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let b = a.block(1, 1, 2, 2);
        assert_eq!(b.as_slice(), &[5.0, 6.0, 8.0, 9.0]);

        let mut c = Array2::<f64>::zeros(3, 3);
        c.set_block(0, 1, &b);
        assert_eq!(c[(0, 1)], 5.0);
        assert_eq!(c[(1, 2)], 9.0);
        assert_eq!(c[(2, 2)], 0.0);
    }

    #[test]
    fn test_reverse() {
        let a = Array2::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(a.reverse_rows().as_slice(), &[3.0, 4.0, 1.0, 2.0]);
        assert_eq!(a.reverse_cols().as_slice(), &[2.0, 1.0, 4.0, 3.0]);
        // Both reversals together rotate by 180 degrees.
        assert_eq!(a.reverse_rows().reverse_cols().as_slice(), &[4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_reshape_row_major() {
        let a = Array2::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let r = a.reshape(6, 1);
        assert_eq!(r.as_slice(), a.as_slice());
        assert_eq!(r.shape(), (6, 1));
    }

    #[test]
    fn test_squared_norm_and_max() {
        let a = Array2::from_vec(2, 2, vec![1.0, -2.0, 3.0, -4.0]);
        assert_eq!(a.squared_norm(), 30.0);
        assert_eq!(a.max_coeff(), 3.0);
    }

    #[test]
    fn test_exp_and_powf() {
        let a = Array2::<f64>::from_vec(1, 3, vec![0.0, 1.0, 2.0]);
        let e = a.exp();
        assert!((e[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((e[(0, 1)] - std::f64::consts::E).abs() < 1e-12);

        let p = a.powf(2.0);
        assert_eq!(p.as_slice(), &[0.0, 1.0, 4.0]);
    }

    #[test]
    fn test_random_range() {
        let a = Array2::<f64>::random(8, 8);
        assert!(a.as_slice().iter().all(|&v| (-1.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_large_matmul_matches_serial() {
        // Exercise the rayon path against the serial reference.
        let n = 80;
        let a = Array2::<f64>::from_vec(n, n, (0..n * n).map(|i| (i % 7) as f64).collect());
        let b = Array2::<f64>::from_vec(n, n, (0..n * n).map(|i| (i % 5) as f64).collect());
        let c = a.matmul(&b);

        let mut expected = Array2::<f64>::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                let mut s = 0.0;
                for k in 0..n {
                    s += a[(i, k)] * b[(k, j)];
                }
                expected[(i, j)] = s;
            }
        }
        assert_eq!(c, expected);
    }
}
