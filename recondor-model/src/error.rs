use thiserror::Error;

/// Validation failures raised while constructing or checking model values.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid campaign parameters: {0}")]
    InvalidParams(String),

    #[error("counter invariant violated: {0}")]
    CounterInvariant(String),

    #[error("unknown enum value: {0}")]
    UnknownValue(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
