//! Projection onto OData-style filter strings of partitioned table stores
//!
//! Only comparisons and `and`/`or` exist natively. `IN` and `BETWEEN` are expanded;
//! substring, prefix and null tests have no rendering and are rejected.

use crate::error::{RecordStoreError, Result};
use crate::filter::{Comparison, Operator, Predicate};
use crate::key::KeyDescriptor;
use crate::projector::sanitize::quote_literal;
use crate::types::Value;

/// Render a predicate as an OData filter. Literals compared against key fields
/// take the key's declared type.
pub fn render_predicate(predicate: &Predicate, desc: &KeyDescriptor) -> Result<String> {
    match predicate {
        Predicate::Comparison(c) => render_comparison(c, desc),
        Predicate::And(l, r) => Ok(format!(
            "({} and {})",
            render_predicate(l, desc)?,
            render_predicate(r, desc)?
        )),
        Predicate::Or(l, r) => Ok(format!(
            "({} or {})",
            render_predicate(l, desc)?,
            render_predicate(r, desc)?
        )),
    }
}

/// Restrict a filter to one partition
pub fn scope_to_partition(partition_field: &str, partition: &str, filter: Option<String>) -> String {
    let scope = format!("{} eq {}", partition_field, quote_literal(partition));
    match filter {
        Some(filter) => format!("{} and {}", scope, filter),
        None => scope,
    }
}

fn render_comparison(comparison: &Comparison, desc: &KeyDescriptor) -> Result<String> {
    let field = comparison.field();
    let binary = |op: &str, value: &Value| -> Result<String> {
        Ok(format!("{} {} {}", field, op, literal(field, value, desc)?))
    };
    let single = |op: &str| match comparison.value() {
        Some(value) => binary(op, value),
        None => Err(comparison.arity_error()),
    };
    match comparison.op() {
        Operator::Eq => single("eq"),
        Operator::Ne => single("ne"),
        Operator::Gt => single("gt"),
        Operator::Ge => single("ge"),
        Operator::Lt => single("lt"),
        Operator::Le => single("le"),
        Operator::In => {
            let parts = comparison
                .values()
                .iter()
                .map(|v| binary("eq", v))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("({})", parts.join(" or ")))
        }
        Operator::Between => {
            let (low, high) = comparison.bounds().ok_or_else(|| comparison.arity_error())?;
            Ok(format!("({} and {})", binary("ge", low)?, binary("le", high)?))
        }
        Operator::BeginsWith
        | Operator::Contains
        | Operator::NotContains
        | Operator::IsNull
        | Operator::IsNotNull => Err(RecordStoreError::unsupported_filter(format!(
            "{} on '{}' cannot be expressed as a table query filter",
            comparison.op(),
            field
        ))),
    }
}

fn literal(field: &str, value: &Value, desc: &KeyDescriptor) -> Result<String> {
    let typed = match desc.field(field) {
        Some(key) => key
            .primitive_type
            .coerce(value)
            .map_err(|e| RecordStoreError::bad_request(format!("Field '{}': {}", field, e)))?,
        None => value.clone(),
    };
    match typed {
        Value::String(s) => Ok(quote_literal(&s)),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(RecordStoreError::unsupported_filter(format!(
            "Cannot compare '{}' against a {} literal",
            field,
            other.type_name()
        ))),
    }
}
