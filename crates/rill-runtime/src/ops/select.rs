//! Projection, rename, and replacement decorator
//!
//! `select(id, join1_i as join1, replace(join1, 0, withValue=12),
//! concat(fields="a,b", as="ab", delim="-"), stream)` projects and
//! renames fields, then applies tuple-local substitutions. Stateless;
//! ordering is preserved.

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{required_str, stream_children, StreamFactory};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{Comparator, ExprNode, Tuple, Value};
use std::cmp::Ordering;

/// One projected output field.
#[derive(Debug, Clone)]
struct Selection {
    source: String,
    output: String,
}

/// `replace(field, match, withValue=...)` or `replace(field, match,
/// withField=...)`: conditional substitution on an output field.
#[derive(Debug, Clone)]
struct ReplaceOperation {
    field: String,
    matches: Value,
    with: ReplaceWith,
}

#[derive(Debug, Clone)]
enum ReplaceWith {
    Value(Value),
    Field(String),
}

impl ReplaceOperation {
    fn from_node(node: &ExprNode) -> StreamResult<ReplaceOperation> {
        let idents: Vec<&str> = node.ident_args().collect();
        if idents.len() != 2 {
            return Err(StreamError::malformed(
                "replace",
                "a field and a match value",
            ));
        }
        let with = match (node.param("withValue"), node.param("withField")) {
            (Some(v), None) => ReplaceWith::Value(Value::parse(v)),
            (None, Some(f)) => ReplaceWith::Field(f.to_string()),
            _ => {
                return Err(StreamError::malformed(
                    "replace",
                    "exactly one of withValue or withField",
                ))
            }
        };
        Ok(ReplaceOperation {
            field: idents[0].to_string(),
            matches: Value::parse(idents[1]),
            with,
        })
    }

    fn apply(&self, tuple: &mut Tuple) {
        let current = match tuple.get(&self.field) {
            Some(v) => v,
            None => return,
        };
        if current.compare(&self.matches) != Ordering::Equal {
            return;
        }
        let replacement = match &self.with {
            ReplaceWith::Value(v) => Some(v.clone()),
            ReplaceWith::Field(f) => tuple.get(f).cloned(),
        };
        if let Some(v) = replacement {
            tuple.fields.insert(self.field.clone(), v);
        }
    }
}

/// `concat(fields="a,b", as="out", delim="-")`: joins the display forms
/// of output fields into a new field.
#[derive(Debug, Clone)]
struct ConcatOperation {
    fields: Vec<String>,
    output: String,
    delim: String,
}

impl ConcatOperation {
    fn from_node(node: &ExprNode) -> StreamResult<ConcatOperation> {
        let fields = required_str(node, "concat", "fields")?
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect::<Vec<_>>();
        if fields.is_empty() {
            return Err(StreamError::invalid("concat", "fields", "no fields"));
        }
        Ok(ConcatOperation {
            fields,
            output: required_str(node, "concat", "as")?.to_string(),
            delim: node.param("delim").unwrap_or(",").to_string(),
        })
    }

    fn apply(&self, tuple: &mut Tuple) {
        let joined = self
            .fields
            .iter()
            .map(|f| tuple.get(f).map(|v| v.to_string()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(&self.delim);
        tuple.fields.insert(self.output.clone(), Value::Str(joined));
    }
}

pub struct SelectStream {
    child: Box<dyn TupleStream>,
    selections: Vec<Selection>,
    replaces: Vec<ReplaceOperation>,
    concats: Vec<ConcatOperation>,
}

impl SelectStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let selections = node
            .ident_args()
            .map(|ident| {
                let (source, output) = match ident.split_once(" as ") {
                    Some((source, output)) => (source.trim(), output.trim()),
                    None => (ident, ident),
                };
                if source.is_empty() || output.is_empty() {
                    return Err(StreamError::malformed("select", "field or field-as-alias"));
                }
                Ok(Selection {
                    source: source.to_string(),
                    output: output.to_string(),
                })
            })
            .collect::<StreamResult<Vec<_>>>()?;
        if selections.is_empty() {
            return Err(StreamError::malformed("select", "at least one field"));
        }
        let replaces = node
            .expr_args_named("replace")
            .map(ReplaceOperation::from_node)
            .collect::<StreamResult<Vec<_>>>()?;
        let concats = node
            .expr_args_named("concat")
            .map(ConcatOperation::from_node)
            .collect::<StreamResult<Vec<_>>>()?;
        let children = stream_children(node, factory);
        let child = match children.as_slice() {
            [child] => factory.construct(child)?,
            _ => return Err(StreamError::malformed("select", "exactly one nested stream")),
        };
        Ok(Self {
            child,
            selections,
            replaces,
            concats,
        })
    }

    fn project(&self, tuple: &Tuple) -> Tuple {
        let mut out = Tuple::new();
        for selection in &self.selections {
            if let Some(v) = tuple.get(&selection.source) {
                out = out.with_field(selection.output.clone(), v.clone());
            }
        }
        for replace in &self.replaces {
            replace.apply(&mut out);
        }
        for concat in &self.concats {
            concat.apply(&mut out);
        }
        out
    }
}

#[async_trait]
impl TupleStream for SelectStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        self.child.open(ctx).await
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        let tuple = self.child.read().await?;
        if tuple.is_eof() {
            return Ok(tuple);
        }
        Ok(self.project(&tuple))
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.child.close().await
    }

    fn sort_order(&self) -> Option<Comparator> {
        // renames may invalidate upstream field names, so no claim
        None
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(SelectStream::from_expr(node, factory)?))
}
