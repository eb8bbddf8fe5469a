//! Error types for pipeline construction and execution

use crate::backend::BackendError;
use crate::checkpoint::StoreError;
use thiserror::Error;

/// Errors raised while constructing or driving a pipeline.
///
/// Construction-time variants (unknown operator, missing or invalid
/// parameters, malformed expressions) are fatal and reported before any
/// execution starts.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("{op}: missing required parameter '{param}'")]
    MissingParameter { op: String, param: String },

    #[error("{op}: invalid parameter '{param}': {message}")]
    InvalidParameter {
        op: String,
        param: String,
        message: String,
    },

    #[error("{op}: malformed expression, expected {expected}")]
    MalformedExpression { op: String, expected: String },

    #[error(transparent)]
    Parse(#[from] rill_parser::ParseError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("execution failed: {0}")]
    Execution(String),
}

impl StreamError {
    pub(crate) fn missing(op: &str, param: &str) -> Self {
        StreamError::MissingParameter {
            op: op.to_string(),
            param: param.to_string(),
        }
    }

    pub(crate) fn invalid(op: &str, param: &str, message: impl Into<String>) -> Self {
        StreamError::InvalidParameter {
            op: op.to_string(),
            param: param.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn malformed(op: &str, expected: impl Into<String>) -> Self {
        StreamError::MalformedExpression {
            op: op.to_string(),
            expected: expected.into(),
        }
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
