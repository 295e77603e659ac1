#[cfg(test)]
mod tests;

use common::RowMap;
use std::cmp::Ordering;
use std::collections::HashMap;
use types::Value;

/// Comparison operators usable in a filter condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn matches(self, ord: Ordering) -> bool {
        use CompareOp::*;
        match self {
            Eq => ord == Ordering::Equal,
            Ne => ord != Ordering::Equal,
            Lt => ord == Ordering::Less,
            Le => ord != Ordering::Greater,
            Gt => ord == Ordering::Greater,
            Ge => ord != Ordering::Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        use CompareOp::*;
        match self {
            Eq => "=",
            Ne => "!=",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
        }
    }
}

/// A single column condition: bare equality, or one or more operator bounds
/// that must all hold.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Condition {
    Equals(Value),
    Compare(Vec<(CompareOp, Value)>),
}

impl Condition {
    pub fn eq(value: Value) -> Self {
        Condition::Equals(value)
    }

    pub fn ne(value: Value) -> Self {
        Condition::Compare(vec![(CompareOp::Ne, value)])
    }

    pub fn lt(value: Value) -> Self {
        Condition::Compare(vec![(CompareOp::Lt, value)])
    }

    pub fn le(value: Value) -> Self {
        Condition::Compare(vec![(CompareOp::Le, value)])
    }

    pub fn gt(value: Value) -> Self {
        Condition::Compare(vec![(CompareOp::Gt, value)])
    }

    pub fn ge(value: Value) -> Self {
        Condition::Compare(vec![(CompareOp::Ge, value)])
    }

    /// Inclusive range shorthand: `lo <= x <= hi`.
    pub fn between(lo: Value, hi: Value) -> Self {
        Condition::Compare(vec![(CompareOp::Ge, lo), (CompareOp::Le, hi)])
    }

    /// Tests the condition against an actual value. Bounds over incomparable
    /// types never match.
    pub fn matches(&self, actual: &Value) -> bool {
        match self {
            Condition::Equals(expected) => scalar_eq(actual, expected),
            Condition::Compare(bounds) => bounds.iter().all(|(op, bound)| {
                actual
                    .cmp_same_type(bound)
                    .is_some_and(|ord| op.matches(ord))
            }),
        }
    }

    /// The operator a single-bound condition applies, for index selection.
    pub fn leading_op(&self) -> CompareOp {
        match self {
            Condition::Equals(_) => CompareOp::Eq,
            Condition::Compare(bounds) => bounds.first().map(|(op, _)| *op).unwrap_or(CompareOp::Eq),
        }
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    // Null compares equal only to Null; needed so an exact-match filter built
    // from a record with explicit nulls still matches it.
    matches!((a, b), (Value::Null, Value::Null))
        || a.cmp_same_type(b) == Some(Ordering::Equal)
}

/// A conjunctive filter: every column condition must match.
pub type Filter = HashMap<String, Condition>;

/// Returns true when the record satisfies every condition in the filter.
/// A column absent from the record never matches.
pub fn matches_record(filter: &Filter, record: &RowMap) -> bool {
    filter
        .iter()
        .all(|(column, cond)| record.get(column).is_some_and(|v| cond.matches(v)))
}

/// Builds a filter that matches records equal to the given one on every
/// column, used for exact-match deletes in the undo path.
pub fn exact_match(record: &RowMap) -> Filter {
    record
        .iter()
        .map(|(column, value)| (column.clone(), Condition::Equals(value.clone())))
        .collect()
}
