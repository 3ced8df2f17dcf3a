//! Predicate tree produced by the filter parser

use std::fmt;

use crate::error::{RecordStoreError, Result};
use crate::types::Value;

/// Comparison operators understood by every projector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Between,
    BeginsWith,
    Contains,
    NotContains,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "EQ",
            Operator::Ne => "NE",
            Operator::Gt => "GT",
            Operator::Ge => "GE",
            Operator::Lt => "LT",
            Operator::Le => "LE",
            Operator::In => "IN",
            Operator::Between => "BETWEEN",
            Operator::BeginsWith => "BEGINS_WITH",
            Operator::Contains => "CONTAINS",
            Operator::NotContains => "NOT_CONTAINS",
            Operator::IsNull => "IS_NULL",
            Operator::IsNotNull => "IS_NOT_NULL",
        }
    }

    /// Whether the operator takes no operand
    pub fn is_null_check(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    fn check_arity(&self, count: usize) -> std::result::Result<(), String> {
        match self {
            Operator::IsNull | Operator::IsNotNull if count == 0 => Ok(()),
            Operator::In if count >= 1 => Ok(()),
            Operator::Between if count == 2 => Ok(()),
            Operator::IsNull | Operator::IsNotNull => {
                Err(format!("{} takes no value", self.as_str()))
            }
            Operator::In => Err("IN requires at least one value".to_string()),
            Operator::Between => Err("BETWEEN requires exactly two values".to_string()),
            _ if count == 1 => Ok(()),
            _ => Err(format!("{} requires exactly one value", self.as_str())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `field OP values` test
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    field: String,
    op: Operator,
    values: Vec<Value>,
}

impl Comparison {
    /// Build a comparison, checking the operand count for the operator
    pub fn new(field: impl Into<String>, op: Operator, values: Vec<Value>) -> Result<Self> {
        let field = field.into();
        if field.trim().is_empty() {
            return Err(RecordStoreError::bad_request("Filter field name is empty"));
        }
        op.check_arity(values.len())
            .map_err(|e| RecordStoreError::bad_request(format!("{} on '{}'", e, field)))?;
        if !op.is_null_check() && values.iter().any(Value::is_null) {
            return Err(RecordStoreError::bad_request(format!(
                "{} on '{}' cannot compare against null",
                op, field
            )));
        }
        Ok(Self { field, op, values })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The single operand of a one-value operator
    pub fn value(&self) -> Option<&Value> {
        match self.values.as_slice() {
            [v] => Some(v),
            _ => None,
        }
    }

    /// Lower and upper operand of `BETWEEN`
    pub fn bounds(&self) -> Option<(&Value, &Value)> {
        match self.values.as_slice() {
            [low, high] => Some((low, high)),
            _ => None,
        }
    }

    pub(crate) fn arity_error(&self) -> RecordStoreError {
        RecordStoreError::bad_request(format!(
            "{} on '{}' has {} operand(s)",
            self.op,
            self.field,
            self.values.len()
        ))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.values.as_slice() {
            [] => write!(f, "{} {}", self.field, self.op),
            [v] => write!(f, "{} {} {}", self.field, self.op, v.to_text()),
            values => write!(
                f,
                "{} {} ({})",
                self.field,
                self.op,
                values.iter().map(Value::to_text).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison(Comparison),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: impl Into<String>, op: Operator, values: Vec<Value>) -> Result<Self> {
        Comparison::new(field, op, values).map(Predicate::Comparison)
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Self::compare(field, Operator::Eq, vec![value.into()])
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Self::compare(field, Operator::Ne, vec![value.into()])
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Self::compare(field, Operator::Gt, vec![value.into()])
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Self::compare(field, Operator::Ge, vec![value.into()])
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Self::compare(field, Operator::Lt, vec![value.into()])
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Self::compare(field, Operator::Le, vec![value.into()])
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Result<Self> {
        Self::compare(field, Operator::In, values)
    }

    pub fn is_null(field: impl Into<String>) -> Result<Self> {
        Self::compare(field, Operator::IsNull, Vec::new())
    }

    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// Left-associative AND chain; `None` for an empty list
    pub fn all(predicates: Vec<Predicate>) -> Option<Predicate> {
        predicates.into_iter().reduce(Predicate::and)
    }

    /// Left-associative OR chain; `None` for an empty list
    pub fn any(predicates: Vec<Predicate>) -> Option<Predicate> {
        predicates.into_iter().reduce(Predicate::or)
    }

    /// Every comparison leaf, left to right
    pub fn comparisons(&self) -> Vec<&Comparison> {
        let mut out = Vec::new();
        self.collect_comparisons(&mut out);
        out
    }

    fn collect_comparisons<'a>(&'a self, out: &mut Vec<&'a Comparison>) {
        match self {
            Predicate::Comparison(c) => out.push(c),
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.collect_comparisons(out);
                r.collect_comparisons(out);
            }
        }
    }

    /// Whether any leaf tests the given field
    pub fn references(&self, field: &str) -> bool {
        self.comparisons().iter().any(|c| c.field == field)
    }

    /// Rewrite into disjunctive normal form: each inner list is one AND branch.
    ///
    /// Fails with `UnsupportedFilter` when distribution would produce more than
    /// `max_branches` branches.
    pub fn disjunctive_branches(&self, max_branches: usize) -> Result<Vec<Vec<Comparison>>> {
        let branches = match self {
            Predicate::Comparison(c) => vec![vec![c.clone()]],
            Predicate::Or(l, r) => {
                let mut left = l.disjunctive_branches(max_branches)?;
                left.extend(r.disjunctive_branches(max_branches)?);
                left
            }
            Predicate::And(l, r) => {
                let left = l.disjunctive_branches(max_branches)?;
                let right = r.disjunctive_branches(max_branches)?;
                if left.len().saturating_mul(right.len()) > max_branches {
                    return Err(too_many_branches(max_branches));
                }
                let mut product = Vec::with_capacity(left.len() * right.len());
                for lb in &left {
                    for rb in &right {
                        let mut branch = lb.clone();
                        branch.extend(rb.iter().cloned());
                        product.push(branch);
                    }
                }
                product
            }
        };
        if branches.len() > max_branches {
            return Err(too_many_branches(max_branches));
        }
        Ok(branches)
    }
}

fn too_many_branches(max: usize) -> RecordStoreError {
    RecordStoreError::unsupported_filter(format!(
        "filter expands to more than {} OR branches",
        max
    ))
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Comparison(c) => write!(f, "{}", c),
            Predicate::And(l, r) => write!(f, "({} AND {})", l, r),
            Predicate::Or(l, r) => write!(f, "({} OR {})", l, r),
        }
    }
}
