//! Boolean predicate trees for the having operator
//!
//! Predicates are compiled once from expression nodes (`and`, `or`,
//! `not`, `eq`, `gt`, `lt`, `gteq`, `lteq`) and evaluated per tuple.

use crate::error::{StreamError, StreamResult};
use rill_core::{ExprNode, Tuple, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Gt,
    Lt,
    Gteq,
    Lteq,
}

impl CmpOp {
    fn accepts(&self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Gteq => ord != Ordering::Less,
            CmpOp::Lteq => ord != Ordering::Greater,
        }
    }
}

/// Right-hand side of a comparison: another field, or a literal. A bare
/// word that names a field present in the tuple is resolved as that
/// field; otherwise it is taken literally.
#[derive(Debug, Clone)]
pub enum Operand {
    Raw { text: String, literal: Value },
}

impl Operand {
    fn new(text: &str) -> Self {
        Operand::Raw {
            text: text.to_string(),
            literal: Value::parse(text),
        }
    }

    fn resolve<'a>(&'a self, tuple: &'a Tuple) -> &'a Value {
        let Operand::Raw { text, literal } = self;
        tuple.get(text).unwrap_or(literal)
    }
}

/// A compiled boolean predicate over tuple fields.
#[derive(Debug, Clone)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Cmp {
        op: CmpOp,
        field: String,
        rhs: Operand,
    },
}

impl Predicate {
    /// Compiles a predicate node. Unknown names and wrong arities are
    /// construction-time errors.
    pub fn from_node(node: &ExprNode) -> StreamResult<Predicate> {
        match node.name.as_str() {
            "and" | "or" => {
                let children: Vec<Predicate> = node
                    .expr_args()
                    .map(Predicate::from_node)
                    .collect::<StreamResult<_>>()?;
                if children.len() < 2 {
                    return Err(StreamError::malformed(
                        &node.name,
                        "at least two nested predicates",
                    ));
                }
                if node.name == "and" {
                    Ok(Predicate::And(children))
                } else {
                    Ok(Predicate::Or(children))
                }
            }
            "not" => {
                let mut children = node.expr_args();
                let inner = children
                    .next()
                    .ok_or_else(|| StreamError::malformed("not", "one nested predicate"))?;
                if children.next().is_some() {
                    return Err(StreamError::malformed("not", "exactly one nested predicate"));
                }
                Ok(Predicate::Not(Box::new(Predicate::from_node(inner)?)))
            }
            "eq" | "gt" | "lt" | "gteq" | "lteq" => {
                let op = match node.name.as_str() {
                    "eq" => CmpOp::Eq,
                    "gt" => CmpOp::Gt,
                    "lt" => CmpOp::Lt,
                    "gteq" => CmpOp::Gteq,
                    _ => CmpOp::Lteq,
                };
                let idents: Vec<&str> = node.ident_args().collect();
                if idents.len() != 2 || node.args.len() != 2 {
                    return Err(StreamError::malformed(
                        &node.name,
                        "two arguments: field and field-or-literal",
                    ));
                }
                Ok(Predicate::Cmp {
                    op,
                    field: idents[0].to_string(),
                    rhs: Operand::new(idents[1]),
                })
            }
            other => Err(StreamError::UnknownOperator(other.to_string())),
        }
    }

    pub fn matches(&self, tuple: &Tuple) -> bool {
        match self {
            Predicate::And(children) => children.iter().all(|p| p.matches(tuple)),
            Predicate::Or(children) => children.iter().any(|p| p.matches(tuple)),
            Predicate::Not(inner) => !inner.matches(tuple),
            Predicate::Cmp { op, field, rhs } => match tuple.get(field) {
                Some(left) => op.accepts(left.compare(rhs.resolve(tuple))),
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_parser::parse;

    fn predicate(text: &str) -> Predicate {
        Predicate::from_node(&parse(text).unwrap()).unwrap()
    }

    fn t(a_i: i64, a_f: f64) -> Tuple {
        Tuple::new().with_field("a_i", a_i).with_field("a_f", a_f)
    }

    #[test]
    fn test_simple_comparisons() {
        assert!(predicate("eq(a_i, 4)").matches(&t(4, 0.0)));
        assert!(!predicate("eq(a_i, 4)").matches(&t(5, 0.0)));
        assert!(predicate("gt(a_f, 2)").matches(&t(0, 2.5)));
        assert!(predicate("lteq(a_i, 4)").matches(&t(4, 0.0)));
        assert!(predicate("gteq(a_i, 4)").matches(&t(9, 0.0)));
        assert!(predicate("lt(a_i, 0)").matches(&t(-1, 0.0)));
    }

    #[test]
    fn test_field_vs_field() {
        assert!(predicate("eq(a_i, a_f)").matches(&t(2, 2.0)));
        assert!(!predicate("eq(a_i, a_f)").matches(&t(2, 3.0)));
    }

    #[test]
    fn test_boolean_combinators() {
        let p = predicate("and(gt(a_i, 0), or(eq(a_f, 1), eq(a_f, 2)))");
        assert!(p.matches(&t(1, 1.0)));
        assert!(p.matches(&t(1, 2.0)));
        assert!(!p.matches(&t(0, 1.0)));
        assert!(!p.matches(&t(1, 3.0)));

        let n = predicate("not(eq(a_i, 4))");
        assert!(n.matches(&t(5, 0.0)));
        assert!(!n.matches(&t(4, 0.0)));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let p = predicate("eq(missing, 1)");
        assert!(!p.matches(&t(1, 1.0)));
        let n = predicate("not(eq(missing, 1))");
        assert!(n.matches(&t(1, 1.0)));
    }

    #[test]
    fn test_construction_errors() {
        assert!(Predicate::from_node(&parse("and(eq(a, 1))").unwrap()).is_err());
        assert!(Predicate::from_node(&parse("frob(a, 1)").unwrap()).is_err());
        assert!(Predicate::from_node(&parse("eq(a)").unwrap()).is_err());
    }

    #[test]
    fn test_string_literal_comparison() {
        let p = predicate("eq(a_s, hello0)");
        let tuple = Tuple::new().with_field("a_s", "hello0");
        assert!(p.matches(&tuple));
    }
}
