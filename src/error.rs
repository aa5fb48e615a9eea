use std::fmt;
use thiserror::Error;

/// Which factor matrix a per-row solve was updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorSide {
    User,
    Item,
}

impl fmt::Display for FactorSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorSide::User => write!(f, "user"),
            FactorSide::Item => write!(f, "item"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CdlError {
    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("{side} system {index} is not positive definite; lambda_u/lambda_v may be too small")]
    NumericalSingularity { side: FactorSide, index: usize },

    #[error("invalid noise specification: {0}")]
    InvalidNoiseSpec(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid interaction lists: {0}")]
    InvalidInteractions(String),

    #[error("invalid content matrix: {0}")]
    InvalidContent(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ::config::ConfigError),

    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl CdlError {
    pub fn shape(what: impl Into<String>, expected: impl fmt::Debug, actual: impl fmt::Debug) -> Self {
        CdlError::ShapeMismatch {
            what: what.into(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}

pub type Result<T> = std::result::Result<T, CdlError>;
