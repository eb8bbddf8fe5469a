//! Aggregates for the rollup operators
//!
//! An [`AggregateSpec`] is parsed once from a metric expression
//! (`sum(a_i)`, `count(*)`, ...); each group gets a fresh
//! [`Accumulator`] that updates incrementally, so the streaming rollup
//! stays single-pass with O(1) memory per declared aggregate.

use crate::error::{StreamError, StreamResult};
use rill_core::{ExprNode, Tuple, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Sum,
    Min,
    Max,
    Mean,
    Count,
}

impl AggregateKind {
    fn name(&self) -> &'static str {
        match self {
            AggregateKind::Sum => "sum",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Mean => "avg",
            AggregateKind::Count => "count",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub kind: AggregateKind,
    pub field: String,
}

impl AggregateSpec {
    /// Parses a metric expression node: `sum(a_i)`, `avg(a_f)`,
    /// `count(*)`.
    pub fn from_node(node: &ExprNode) -> StreamResult<AggregateSpec> {
        let kind = match node.name.as_str() {
            "sum" => AggregateKind::Sum,
            "min" => AggregateKind::Min,
            "max" => AggregateKind::Max,
            "avg" => AggregateKind::Mean,
            "count" => AggregateKind::Count,
            other => return Err(StreamError::UnknownOperator(other.to_string())),
        };
        let mut idents = node.ident_args();
        let field = idents
            .next()
            .ok_or_else(|| StreamError::malformed(&node.name, "one field argument"))?
            .to_string();
        if idents.next().is_some() {
            return Err(StreamError::malformed(&node.name, "exactly one field argument"));
        }
        Ok(AggregateSpec { kind, field })
    }

    /// The output field carrying this aggregate's value, e.g. `sum(a_i)`.
    pub fn title(&self) -> String {
        format!("{}({})", self.kind.name(), self.field)
    }

    pub fn accumulator(&self) -> Accumulator {
        Accumulator {
            spec: self.clone(),
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            ints_only: true,
        }
    }
}

/// Incremental state for one aggregate within one group.
#[derive(Debug, Clone)]
pub struct Accumulator {
    spec: AggregateSpec,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    ints_only: bool,
}

impl Accumulator {
    pub fn update(&mut self, tuple: &Tuple) {
        if self.spec.kind == AggregateKind::Count {
            self.count += 1;
            return;
        }
        let value = match tuple.get(&self.spec.field) {
            Some(v) => v,
            None => return,
        };
        let n = match value.as_float() {
            Some(n) => n,
            None => return,
        };
        if !matches!(value, Value::Int(_)) {
            self.ints_only = false;
        }
        self.count += 1;
        self.sum += n;
        if n < self.min {
            self.min = n;
        }
        if n > self.max {
            self.max = n;
        }
    }

    /// The group's finished value. Numeric aggregates over exclusively
    /// integer inputs stay integers (mean always reports a float).
    pub fn value(&self) -> Value {
        match self.spec.kind {
            AggregateKind::Count => Value::Int(self.count as i64),
            AggregateKind::Sum => {
                if self.count == 0 {
                    Value::Null
                } else if self.ints_only {
                    Value::Int(self.sum as i64)
                } else {
                    Value::Float(self.sum)
                }
            }
            AggregateKind::Min => {
                if self.count == 0 {
                    Value::Null
                } else if self.ints_only {
                    Value::Int(self.min as i64)
                } else {
                    Value::Float(self.min)
                }
            }
            AggregateKind::Max => {
                if self.count == 0 {
                    Value::Null
                } else if self.ints_only {
                    Value::Int(self.max as i64)
                } else {
                    Value::Float(self.max)
                }
            }
            AggregateKind::Mean => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::Float(self.sum / self.count as f64)
                }
            }
        }
    }

    pub fn title(&self) -> String {
        self.spec.title()
    }
}
