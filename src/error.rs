use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransformError>;

/// Failure modes of the transform pipeline. Every error is raised where it is detected and
/// nothing is retried.
#[derive(Debug, Error)]
pub enum TransformError {
    /// wrong rank, missing complex axis, odd channel count, mismatched shapes
    #[error("shape error: {0}")]
    Shape(String),
    /// parameters that would produce an invalid slice or scale
    #[error("invalid configuration: {0}")]
    Config(String),
    /// a valid request that the pipeline does not handle yet
    #[error("not supported: {0}")]
    Unsupported(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {0}")]
    Parse(String),
}

impl TransformError {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

impl From<ndarray::ShapeError> for TransformError {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Shape(e.to_string())
    }
}
