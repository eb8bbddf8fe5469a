//! Expression parser for rill
//!
//! Turns expression text of the form `name(arg, ..., key=value, ...)`
//! into a `rill_core::ExprNode` tree. The grammar is deliberately small:
//! this is the only textual surface the engine consumes.

pub mod error;
pub mod lexer;
pub mod parser;

pub use error::ParseError;
pub use lexer::Token;
pub use parser::parse;
