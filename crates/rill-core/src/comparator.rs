//! Multi-field tuple ordering
//!
//! Every sort-dependent operator (merge, sort-merge join, streaming
//! rollup, rank) declares the comparator it requires on its input.
//! Violated ordering is a caller contract violation, not a recoverable
//! runtime condition.

use crate::tuple::Tuple;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    fn parse(text: &str) -> Option<SortDirection> {
        match text.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(SortDirection::Ascending),
            "desc" | "descending" => Some(SortDirection::Descending),
            _ => None,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Ascending => write!(f, "asc"),
            SortDirection::Descending => write!(f, "desc"),
        }
    }
}

/// One (field, direction) entry of a comparator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// An ordered list of (field, direction) pairs defining a total pre-order
/// over tuples. Comparison is lexicographic across the list; tuples equal
/// under every entry are tied and their relative order is unspecified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparator {
    pub fields: Vec<SortField>,
}

impl Comparator {
    pub fn new(fields: Vec<SortField>) -> Self {
        Self { fields }
    }

    /// Parses comparator text of the form `"a_f asc, a_i desc"`. A bare
    /// field name defaults to ascending.
    pub fn parse(text: &str) -> Result<Comparator, String> {
        let mut fields = Vec::new();
        for part in text.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let mut words = part.split_whitespace();
            let field = match words.next() {
                Some(f) => f.to_string(),
                None => continue,
            };
            let direction = match words.next() {
                Some(d) => SortDirection::parse(d)
                    .ok_or_else(|| format!("invalid sort direction '{}' in '{}'", d, text))?,
                None => SortDirection::Ascending,
            };
            if words.next().is_some() {
                return Err(format!("malformed sort entry '{}'", part));
            }
            fields.push(SortField { field, direction });
        }
        if fields.is_empty() {
            return Err(format!("empty sort specification '{}'", text));
        }
        Ok(Comparator { fields })
    }

    /// Compares two tuples under this ordering. A field absent from a
    /// tuple compares as null.
    pub fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        for sf in &self.fields {
            let va = a.get(&sf.field).unwrap_or(&Value::Null);
            let vb = b.get(&sf.field).unwrap_or(&Value::Null);
            let ord = match sf.direction {
                SortDirection::Ascending => va.compare(vb),
                SortDirection::Descending => vb.compare(va),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// True when two tuples carry equal values for every comparator
    /// field, ignoring direction. Used by key-equality operators
    /// (unique, rollup group keys, set algebra).
    pub fn same_key(&self, a: &Tuple, b: &Tuple) -> bool {
        self.fields.iter().all(|sf| {
            let va = a.get(&sf.field).unwrap_or(&Value::Null);
            let vb = b.get(&sf.field).unwrap_or(&Value::Null);
            va.compare(vb) == Ordering::Equal
        })
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|sf| sf.field.clone()).collect()
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, sf) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", sf.field, sf.direction)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(f: f64, i: i64) -> Tuple {
        Tuple::new().with_field("a_f", f).with_field("a_i", i)
    }

    #[test]
    fn test_parse_multi_field() {
        let c = Comparator::parse("a_f asc, a_i desc").unwrap();
        assert_eq!(c.fields.len(), 2);
        assert_eq!(c.fields[0].field, "a_f");
        assert_eq!(c.fields[0].direction, SortDirection::Ascending);
        assert_eq!(c.fields[1].direction, SortDirection::Descending);
    }

    #[test]
    fn test_parse_defaults_ascending() {
        let c = Comparator::parse("a_f").unwrap();
        assert_eq!(c.fields[0].direction, SortDirection::Ascending);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Comparator::parse("a_f sideways").is_err());
        assert!(Comparator::parse("").is_err());
        assert!(Comparator::parse("a_f asc extra").is_err());
    }

    #[test]
    fn test_compare_lexicographic() {
        let c = Comparator::parse("a_f asc, a_i asc").unwrap();
        assert_eq!(c.compare(&t(1.0, 5), &t(2.0, 0)), Ordering::Less);
        assert_eq!(c.compare(&t(1.0, 5), &t(1.0, 4)), Ordering::Greater);
        assert_eq!(c.compare(&t(1.0, 5), &t(1.0, 5)), Ordering::Equal);
    }

    #[test]
    fn test_compare_descending() {
        let c = Comparator::parse("a_f desc").unwrap();
        assert_eq!(c.compare(&t(4.0, 0), &t(1.0, 0)), Ordering::Less);
    }

    #[test]
    fn test_missing_field_sorts_as_null() {
        let c = Comparator::parse("a_f asc").unwrap();
        let missing = Tuple::new().with_field("a_i", 1i64);
        assert_eq!(c.compare(&missing, &t(0.0, 0)), Ordering::Less);
    }

    #[test]
    fn test_same_key_ignores_direction() {
        let c = Comparator::parse("a_f desc").unwrap();
        assert!(c.same_key(&t(2.0, 1), &t(2.0, 9)));
        assert!(!c.same_key(&t(2.0, 1), &t(3.0, 1)));
    }

    #[test]
    fn test_display_round_trip() {
        let c = Comparator::parse("a_f asc, a_i desc").unwrap();
        assert_eq!(c.to_string(), "a_f asc, a_i desc");
        assert_eq!(Comparator::parse(&c.to_string()).unwrap(), c);
    }
}
