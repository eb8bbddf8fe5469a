//! Operator registry and pipeline construction
//!
//! Operator names resolve to plain constructor functions through an
//! explicitly-injected map; resolution happens once per pipeline
//! construction and construction-time errors are fatal before any
//! execution starts.

use crate::error::{StreamError, StreamResult};
use crate::ops;
use crate::stream::TupleStream;
use rill_core::{Comparator, ExprNode};
use std::collections::HashMap;

/// Constructor for one operator kind.
pub type Constructor = fn(&ExprNode, &StreamFactory) -> StreamResult<Box<dyn TupleStream>>;

/// Name → constructor registry shared by one pipeline construction.
/// Cloning is cheap (a map of function pointers); the daemon operator
/// keeps a clone to rebuild its inner pipeline every interval.
#[derive(Clone)]
pub struct StreamFactory {
    functions: HashMap<String, Constructor>,
}

impl StreamFactory {
    /// An empty registry; register operators with [`with_function`].
    ///
    /// [`with_function`]: StreamFactory::with_function
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    pub fn with_function(mut self, name: &str, constructor: Constructor) -> Self {
        self.functions.insert(name.to_string(), constructor);
        self
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Builds the operator tree for a parsed expression.
    pub fn construct(&self, node: &ExprNode) -> StreamResult<Box<dyn TupleStream>> {
        match self.functions.get(&node.name) {
            Some(constructor) => constructor(node, self),
            None => Err(StreamError::UnknownOperator(node.name.clone())),
        }
    }

    /// Parses expression text and builds its operator tree.
    pub fn construct_str(&self, text: &str) -> StreamResult<Box<dyn TupleStream>> {
        let node = rill_parser::parse(text)?;
        self.construct(&node)
    }
}

impl Default for StreamFactory {
    /// The full builtin operator set.
    fn default() -> Self {
        Self::empty()
            // sources
            .with_function("search", ops::source::construct_search)
            .with_function("shard", ops::source::construct_shard)
            // decorators
            .with_function("unique", ops::unique::construct)
            .with_function("sort", ops::sort::construct)
            .with_function("top", ops::rank::construct)
            .with_function("merge", ops::merge_op::construct)
            .with_function("reduce", ops::reduce::construct)
            .with_function("having", ops::having::construct)
            .with_function("select", ops::select::construct)
            .with_function("fetch", ops::fetch::construct)
            .with_function("cartesian", ops::cartesian::construct)
            .with_function("null", ops::null_sink::construct)
            .with_function("tuple", ops::literal::construct_tuple)
            .with_function("list", ops::literal::construct_list)
            // aggregation
            .with_function("rollup", ops::rollup::construct_streaming)
            .with_function("hashRollup", ops::rollup::construct_hashed)
            // joins
            .with_function("innerJoin", ops::join::construct_inner)
            .with_function("leftOuterJoin", ops::join::construct_left_outer)
            .with_function("hashJoin", ops::hash_join::construct_inner)
            .with_function("outerHashJoin", ops::hash_join::construct_outer)
            // set algebra
            .with_function("intersect", ops::set_ops::construct_intersect)
            .with_function("complement", ops::set_ops::construct_complement)
            // parallel and continuous execution
            .with_function("parallel", ops::parallel::construct)
            .with_function("daemon", ops::daemon::construct)
            .with_function("topic", ops::topic::construct)
            // mutation sinks
            .with_function("update", ops::update::construct)
            .with_function("delete", ops::delete::construct)
            .with_function("commit", ops::commit::construct)
    }
}

// ---------------------------------------------------------------------------
// Parameter helpers shared by operator constructors
// ---------------------------------------------------------------------------

pub(crate) fn required_str<'a>(node: &'a ExprNode, op: &str, key: &str) -> StreamResult<&'a str> {
    node.param(key).ok_or_else(|| StreamError::missing(op, key))
}

pub(crate) fn comparator_param(node: &ExprNode, op: &str, key: &str) -> StreamResult<Comparator> {
    let text = required_str(node, op, key)?;
    Comparator::parse(text).map_err(|message| StreamError::invalid(op, key, message))
}

pub(crate) fn optional_comparator(
    node: &ExprNode,
    op: &str,
    key: &str,
) -> StreamResult<Option<Comparator>> {
    match node.param(key) {
        Some(text) => Comparator::parse(text)
            .map(Some)
            .map_err(|message| StreamError::invalid(op, key, message)),
        None => Ok(None),
    }
}

pub(crate) fn usize_param(
    node: &ExprNode,
    op: &str,
    key: &str,
    default: usize,
) -> StreamResult<usize> {
    match node.param(key) {
        Some(text) => text
            .parse::<usize>()
            .map_err(|_| StreamError::invalid(op, key, format!("'{}' is not a count", text))),
        None => Ok(default),
    }
}

pub(crate) fn u64_param(node: &ExprNode, op: &str, key: &str, default: u64) -> StreamResult<u64> {
    match node.param(key) {
        Some(text) => text
            .parse::<u64>()
            .map_err(|_| StreamError::invalid(op, key, format!("'{}' is not a number", text))),
        None => Ok(default),
    }
}

pub(crate) fn bool_param(node: &ExprNode, op: &str, key: &str, default: bool) -> StreamResult<bool> {
    match node.param(key) {
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(StreamError::invalid(
            op,
            key,
            format!("'{}' is not a boolean", other),
        )),
        None => Ok(default),
    }
}

/// Comma-separated field list parameter; empty when absent.
pub(crate) fn fields_param(node: &ExprNode, key: &str) -> Vec<String> {
    node.param(key)
        .map(|text| {
            text.split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// First raw identifier argument, conventionally the collection name.
pub(crate) fn collection_arg(node: &ExprNode, op: &str) -> StreamResult<String> {
    node.ident_args()
        .next()
        .map(|s| s.to_string())
        .ok_or_else(|| StreamError::malformed(op, "a collection name argument"))
}

/// Nested expression arguments that resolve to registered operators, in
/// order. Everything else (metric specs, predicates, select operations)
/// is interpreted by the enclosing operator itself.
pub(crate) fn stream_children<'a>(
    node: &'a ExprNode,
    factory: &StreamFactory,
) -> Vec<&'a ExprNode> {
    node.expr_args()
        .filter(|n| factory.is_registered(&n.name))
        .collect()
}

/// The sole stream child of a unary decorator.
pub(crate) fn single_stream_child(
    node: &ExprNode,
    op: &str,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    let children = stream_children(node, factory);
    match children.as_slice() {
        [child] => factory.construct(child),
        _ => Err(StreamError::malformed(op, "exactly one nested stream")),
    }
}
