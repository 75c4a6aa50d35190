use std::io::Write;

use tapir_core::{Array2, Error, Result, Scalar, Tensor};

// Text persistence — Line-oriented parameter serialization
//
// Model files are plain text, one value per concept:
//
//   Tensor (3 lines):
//     *ROWS*
//     *COLS*
//     *VAL*,*VAL*,...,*VAL*          (row-major)
//
//   Tensor vector:
//     *N*
//     *TENSOR 1 (3 lines)*
//     ...
//     *TENSOR N (3 lines)*
//
//   2D unsigned vector:
//     *N*
//     then for each inner list: *LEN* followed by one integer per line
//
// Floats are written with Rust's shortest round-trip formatting, so a
// reload reproduces the saved parameters up to formatting precision.
// The readers return plain arrays: registering them on a tape — and in
// which order — is the model's job. The parameter registry must end up
// in the same interleaved order the model constructor uses, while the
// file stores the tensors grouped by vector.

/// Pull the next line out of a line iterator, or fail with a parse error.
pub fn next_line(lines: &mut impl Iterator<Item = std::io::Result<String>>) -> Result<String> {
    match lines.next() {
        Some(line) => Ok(line?),
        None => Err(Error::Parse("unexpected end of file".to_string())),
    }
}

/// Parse one line holding a single unsigned integer.
pub fn read_count(lines: &mut impl Iterator<Item = std::io::Result<String>>) -> Result<usize> {
    let line = next_line(lines)?;
    line.trim()
        .parse::<usize>()
        .map_err(|_| Error::Parse(format!("expected an unsigned integer, got {line:?}")))
}

/// Write one tensor as three lines: rows, cols, comma-separated
/// row-major coefficients.
pub fn write_tensor<T: Scalar>(out: &mut impl Write, tensor: &Tensor<T>) -> Result<()> {
    let value = tensor.value();
    writeln!(out, "{}", value.rows())?;
    writeln!(out, "{}", value.cols())?;
    let coeffs: Vec<String> = value.as_slice().iter().map(|v| v.to_string()).collect();
    writeln!(out, "{}", coeffs.join(","))?;
    Ok(())
}

/// Parse one serialized tensor into a plain array.
pub fn read_array<T: Scalar>(
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
) -> Result<Array2<T>> {
    let rows = read_count(lines)?;
    let cols = read_count(lines)?;
    let coeff_line = next_line(lines)?;

    let mut data = Vec::with_capacity(rows * cols);
    for part in coeff_line.trim().split(',') {
        let v: f64 = part
            .trim()
            .parse()
            .map_err(|_| Error::Parse(format!("bad coefficient {part:?}")))?;
        data.push(T::from_f64(v));
    }
    if data.len() != rows * cols {
        return Err(Error::Parse(format!(
            "{}x{} tensor with {} coefficients",
            rows,
            cols,
            data.len()
        )));
    }

    Ok(Array2::from_vec(rows, cols, data))
}

/// Write a tensor vector: a count line followed by that many tensors.
pub fn write_tensor_vec<T: Scalar>(out: &mut impl Write, tensors: &[Tensor<T>]) -> Result<()> {
    writeln!(out, "{}", tensors.len())?;
    for tensor in tensors {
        write_tensor(out, tensor)?;
    }
    Ok(())
}

/// Parse a tensor vector into plain arrays.
pub fn read_array_vec<T: Scalar>(
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
) -> Result<Vec<Array2<T>>> {
    let count = read_count(lines)?;
    let mut arrays = Vec::with_capacity(count);
    for _ in 0..count {
        arrays.push(read_array(lines)?);
    }
    Ok(arrays)
}

/// Write a 2D unsigned vector: outer count, then per inner list a count
/// line and one integer per line.
pub fn write_u2d(out: &mut impl Write, values: &[Vec<usize>]) -> Result<()> {
    writeln!(out, "{}", values.len())?;
    for inner in values {
        writeln!(out, "{}", inner.len())?;
        for v in inner {
            writeln!(out, "{v}")?;
        }
    }
    Ok(())
}

/// Parse a 2D unsigned vector.
pub fn read_u2d(
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
) -> Result<Vec<Vec<usize>>> {
    let count = read_count(lines)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_count(lines)?;
        let mut inner = Vec::with_capacity(len);
        for _ in 0..len {
            inner.push(read_count(lines)?);
        }
        out.push(inner);
    }
    Ok(out)
}
