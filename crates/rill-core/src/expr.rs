//! Parsed operator-call trees
//!
//! An expression is a tree of named function calls with positional and
//! keyword parameters: `name(positionalArg, ..., key=value, ...)`.
//! Trees are built once by the front end and are immutable afterwards;
//! the runtime resolves each node against an operator registry.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One node of the operator-call tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprNode {
    /// Operator name (`search`, `unique`, `parallel`, ...)
    pub name: String,
    /// Ordered positional arguments
    pub args: Vec<ExprArg>,
    /// Named parameters, in source order
    pub params: IndexMap<String, ParamValue>,
}

/// A positional argument: a nested call or a raw identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprArg {
    Expr(ExprNode),
    Ident(String),
}

/// A named parameter's value. Most parameters are strings; a few
/// (`hashed=search(...)`) carry nested expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Str(String),
    Expr(ExprNode),
}

impl ExprNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            params: IndexMap::new(),
        }
    }

    pub fn with_arg(mut self, arg: ExprArg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_ident(self, ident: impl Into<String>) -> Self {
        self.with_arg(ExprArg::Ident(ident.into()))
    }

    pub fn with_expr(self, node: ExprNode) -> Self {
        self.with_arg(ExprArg::Expr(node))
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), ParamValue::Str(value.into()));
        self
    }

    pub fn with_expr_param(mut self, key: impl Into<String>, node: ExprNode) -> Self {
        self.params.insert(key.into(), ParamValue::Expr(node));
        self
    }

    /// String value of a named parameter, if present and textual.
    pub fn param(&self, key: &str) -> Option<&str> {
        match self.params.get(key) {
            Some(ParamValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Expression value of a named parameter, if present and nested.
    pub fn expr_param(&self, key: &str) -> Option<&ExprNode> {
        match self.params.get(key) {
            Some(ParamValue::Expr(node)) => Some(node),
            _ => None,
        }
    }

    /// Positional arguments that are nested expressions, in order.
    pub fn expr_args(&self) -> impl Iterator<Item = &ExprNode> {
        self.args.iter().filter_map(|a| match a {
            ExprArg::Expr(node) => Some(node),
            ExprArg::Ident(_) => None,
        })
    }

    /// Positional arguments that are raw identifiers, in order.
    pub fn ident_args(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|a| match a {
            ExprArg::Ident(s) => Some(s.as_str()),
            ExprArg::Expr(_) => None,
        })
    }

    /// Nested expression arguments with the given operator name.
    pub fn expr_args_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ExprNode> {
        self.expr_args().filter(move |n| n.name == name)
    }
}

impl fmt::Display for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            match arg {
                ExprArg::Expr(node) => write!(f, "{}", node)?,
                ExprArg::Ident(s) => write!(f, "{}", s)?,
            }
        }
        for (k, v) in &self.params {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            match v {
                ParamValue::Str(s) => {
                    if s.chars().any(|c| c.is_whitespace() || c == ',' || c == '=') {
                        write!(f, "{}=\"{}\"", k, s)?
                    } else {
                        write!(f, "{}={}", k, s)?
                    }
                }
                ParamValue::Expr(node) => write!(f, "{}={}", k, node)?,
            }
        }
        write!(f, ")")
    }
}
