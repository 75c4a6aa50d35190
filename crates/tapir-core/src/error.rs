// Error — All failure modes of the Tapir engine
//
// Forward operators validate tape identity and operand shapes before
// appending anything; on failure they return a typed error and leave the
// tape untouched. There are no retries or partial recoveries anywhere in
// the core: an error propagates straight to the caller via `?`.

/// All errors that can occur within Tapir.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operand shapes incompatible for the operator.
    #[error("{op}: shape mismatch between {lhs:?} and {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: (usize, usize),
        rhs: (usize, usize),
    },

    /// Operands belong to different tapes.
    #[error("{op}: operands belong to different tapes")]
    TapeMismatch { op: &'static str },

    /// `grad()` was seeded with a non-scalar tensor on a tape that
    /// contains a shape-changing operation.
    #[error(
        "grad() requires a seed with at least one dimension equal to 1 \
         once the tape contains a non-element-wise operation, got {rows}x{cols}"
    )]
    NonScalarSeed { rows: usize, cols: usize },

    /// Pool size does not divide the input evenly.
    #[error("max_pooling: pool {pool_rows}x{pool_cols} does not divide input {rows}x{cols}")]
    BadPoolDimensions {
        rows: usize,
        cols: usize,
        pool_rows: usize,
        pool_cols: usize,
    },

    /// Mis-arity configuration given to a model constructor.
    #[error("bad model structure: {0}")]
    BadArgumentStructure(String),

    /// Model save/load could not read or write the chosen path.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A model file did not parse as the expected format.
    #[error("malformed model file: {0}")]
    Parse(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout Tapir.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
