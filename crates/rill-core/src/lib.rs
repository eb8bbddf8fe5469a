//! # Rill Core
//!
//! Foundational types for the rill streaming expression engine:
//!
//! - [`Value`]: runtime field values flowing through pipelines
//! - [`Tuple`]: one record in a tuple stream, or its terminal EOF marker
//! - [`Comparator`]: multi-field ordering for sort-dependent operators
//! - [`ExprNode`]: the parsed operator-call tree
//!
//! The execution engine lives in `rill-runtime`; the textual front end
//! that produces [`ExprNode`] trees lives in `rill-parser`.

pub mod comparator;
pub mod expr;
pub mod tuple;
pub mod value;

pub use comparator::{Comparator, SortDirection, SortField};
pub use expr::{ExprArg, ExprNode, ParamValue};
pub use tuple::{FxIndexMap, Tuple};
pub use value::Value;
