//! In-process predicate evaluation
//!
//! Used for client-side filtering and as the reference every native rendering is
//! checked against. A missing or null field only satisfies `IS_NULL`.

use std::cmp::Ordering;

use crate::filter::predicate::{Comparison, Operator, Predicate};
use crate::types::{Record, Value};

/// Whether the record satisfies the predicate
pub fn evaluate(predicate: &Predicate, record: &Record) -> bool {
    match predicate {
        Predicate::Comparison(c) => matches(c, record),
        Predicate::And(l, r) => evaluate(l, record) && evaluate(r, record),
        Predicate::Or(l, r) => evaluate(l, record) || evaluate(r, record),
    }
}

/// Whether the record satisfies every comparison of one AND branch
pub fn matches_all(branch: &[Comparison], record: &Record) -> bool {
    branch.iter().all(|c| matches(c, record))
}

pub fn matches(comparison: &Comparison, record: &Record) -> bool {
    let actual = record.get(comparison.field()).filter(|v| !v.is_null());
    let Some(actual) = actual else {
        return comparison.op() == Operator::IsNull;
    };
    let at_least = |bound: &Value| {
        matches!(
            actual.compare(bound),
            Some(Ordering::Greater | Ordering::Equal)
        )
    };
    let at_most = |bound: &Value| {
        matches!(
            actual.compare(bound),
            Some(Ordering::Less | Ordering::Equal)
        )
    };
    let single = comparison.value();
    match comparison.op() {
        Operator::IsNull => false,
        Operator::IsNotNull => true,
        Operator::In => comparison.values().iter().any(|v| actual.loosely_equals(v)),
        Operator::Between => comparison
            .bounds()
            .is_some_and(|(low, high)| at_least(low) && at_most(high)),
        Operator::Eq => single.is_some_and(|v| actual.loosely_equals(v)),
        Operator::Ne => single.is_some_and(|v| !actual.loosely_equals(v)),
        Operator::Gt => single.is_some_and(|v| actual.compare(v) == Some(Ordering::Greater)),
        Operator::Ge => single.is_some_and(at_least),
        Operator::Lt => single.is_some_and(|v| actual.compare(v) == Some(Ordering::Less)),
        Operator::Le => single.is_some_and(at_most),
        Operator::BeginsWith => match (actual, single) {
            (Value::String(s), Some(prefix)) => s.starts_with(&prefix.to_text()),
            _ => false,
        },
        Operator::Contains => single.is_some_and(|v| contains(actual, v)),
        Operator::NotContains => single.is_some_and(|v| !contains(actual, v)),
    }
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::String(s) => s.contains(&needle.to_text()),
        Value::List(items) => items.iter().any(|item| item.loosely_equals(needle)),
        Value::Map(map) => map.contains_key(&needle.to_text()),
        _ => false,
    }
}
