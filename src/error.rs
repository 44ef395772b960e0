use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SophieError {
    #[error("dimension mismatch for `{tensor}`: expected {expected}, got {actual:?}")]
    DimensionMismatch {
        tensor: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("non-finite value in `{quantity}`")]
    NumericInstability { quantity: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SophieError {
    pub fn dims(tensor: &'static str, expected: impl Into<String>, actual: &[usize]) -> Self {
        SophieError::DimensionMismatch {
            tensor,
            expected: expected.into(),
            actual: actual.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SophieError>;
