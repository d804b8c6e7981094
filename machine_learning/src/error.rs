use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    /// The computation diverged.
    NonFinite { what: &'static str, value: f32 },
    EmptyBatch,
    /// `backward` was called without a preceding `forward`.
    NoForwardPass,
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
            ),
            MlErr::NonFinite { what, value } => write!(f, "The {what} is not finite: {value}"),
            MlErr::EmptyBatch => f.write_str("Can't compute over an empty batch"),
            MlErr::NoForwardPass => f.write_str("Tried to run a backward pass before a forward pass"),
        }
    }
}

impl Error for MlErr {}
