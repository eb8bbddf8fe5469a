//! Parser error types

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unexpected token at position {position}: expected {expected}, found {found}")]
    UnexpectedToken {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("Unexpected end of input")]
    UnexpectedEof,

    #[error("Invalid token at position {0}")]
    InvalidToken(usize),

    #[error("Unterminated string starting at position {0}")]
    UnterminatedString(usize),

    #[error("Trailing input after expression at position {0}")]
    TrailingInput(usize),
}

pub type ParseResult<T> = Result<T, ParseError>;
