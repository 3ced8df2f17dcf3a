//! Projection onto the select-statement dialect of SimpleDB-like stores
//!
//! Attribute and domain names are backtick-quoted, every literal is a single-quoted
//! string (the store compares strings lexicographically) and the item-name identity
//! field is addressed as `itemName()`.
//!
//! Numbers are stored and compared in a sortable text form: the value is offset by
//! 10^20 and the integer part zero-padded to 21 digits, so `'…03' < '…10'` holds
//! the same way `3 < 10` does. Values outside (-10^20, 9·10^20) keep their plain
//! text form.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::extras::{Direction, OrderSpec};
use crate::filter::{Comparison, Operator, Predicate};
use crate::key::{KeyDescriptor, KeyRole};
use crate::projector::sanitize::{escape_like, quote_literal, quote_name};
use crate::types::Value;

pub const ITEM_NAME: &str = "itemName()";

const SORTABLE_DIGITS: usize = 21;

static SORTABLE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{21}(\.[0-9]*[1-9])?$").expect("valid sortable number pattern")
});

fn number_offset() -> Decimal {
    Decimal::from_i128_with_scale(10_i128.pow(20), 0)
}

/// Output list of a select
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutput {
    All,
    ItemName,
    Count,
    Attributes(Vec<String>),
}

/// A renderable select statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectStatement {
    pub output: SelectOutput,
    pub domain: String,
    pub where_clause: Option<String>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl SelectStatement {
    pub fn new(domain: impl Into<String>, output: SelectOutput) -> Self {
        Self {
            output,
            domain: domain.into(),
            where_clause: None,
            order_by: None,
            limit: None,
        }
    }

    pub fn with_where(mut self, clause: Option<String>) -> Self {
        self.where_clause = clause;
        self
    }

    /// `name` must already be rendered (see `attribute`)
    pub fn with_order(mut self, name: String, direction: Direction) -> Self {
        self.order_by = Some((name, direction));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let output = match &self.output {
            SelectOutput::All => "*".to_string(),
            SelectOutput::ItemName => ITEM_NAME.to_string(),
            SelectOutput::Count => "count(*)".to_string(),
            SelectOutput::Attributes(names) => names
                .iter()
                .map(|n| quote_name(n))
                .collect::<Vec<_>>()
                .join(", "),
        };
        write!(f, "select {} from {}", output, quote_name(&self.domain))?;
        if let Some(clause) = &self.where_clause {
            write!(f, " where {}", clause)?;
        }
        if let Some((name, direction)) = &self.order_by {
            let dir = match direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            write!(f, " order by {} {}", name, dir)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " limit {}", limit)?;
        }
        Ok(())
    }
}

/// Name of the identity field stored as the item name, if the key has one
pub fn item_name_field(desc: &KeyDescriptor) -> Option<&str> {
    desc.single()
        .filter(|k| matches!(k.role, KeyRole::Synthetic | KeyRole::Hash))
        .map(|k| k.name.as_str())
}

/// Render a field reference
pub fn attribute(field: &str, desc: &KeyDescriptor) -> String {
    if item_name_field(desc) == Some(field) {
        ITEM_NAME.to_string()
    } else {
        quote_name(field)
    }
}

/// Render a predicate as a where clause
pub fn render_predicate(predicate: &Predicate, desc: &KeyDescriptor) -> Result<String> {
    Ok(match predicate {
        Predicate::Comparison(c) => render_comparison(c, desc)?,
        Predicate::And(l, r) => format!(
            "({} and {})",
            render_predicate(l, desc)?,
            render_predicate(r, desc)?
        ),
        Predicate::Or(l, r) => format!(
            "({} or {})",
            render_predicate(l, desc)?,
            render_predicate(r, desc)?
        ),
    })
}

fn render_comparison(comparison: &Comparison, desc: &KeyDescriptor) -> Result<String> {
    let name = attribute(comparison.field(), desc);
    let is_item_name = item_name_field(desc) == Some(comparison.field());
    let literal = |value: &Value| {
        if is_item_name {
            quote_literal(&value.to_text())
        } else {
            quote_literal(&wire_text(value))
        }
    };
    let single = |op: &str| match comparison.value() {
        Some(value) => Ok(format!("{} {} {}", name, op, literal(value))),
        None => Err(comparison.arity_error()),
    };
    let pattern = |op: &str, prefix: &str, suffix: &str| match comparison.value() {
        Some(value) => Ok(format!(
            "{} {} {}",
            name,
            op,
            quote_literal(&format!("{}{}{}", prefix, escape_like(&value.to_text()), suffix))
        )),
        None => Err(comparison.arity_error()),
    };
    match comparison.op() {
        Operator::Eq => single("="),
        Operator::Ne => single("!="),
        Operator::Gt => single(">"),
        Operator::Ge => single(">="),
        Operator::Lt => single("<"),
        Operator::Le => single("<="),
        Operator::In => Ok(format!(
            "{} in ({})",
            name,
            comparison
                .values()
                .iter()
                .map(&literal)
                .collect::<Vec<_>>()
                .join(", ")
        )),
        Operator::Between => {
            let (low, high) = comparison.bounds().ok_or_else(|| comparison.arity_error())?;
            Ok(format!("{} between {} and {}", name, literal(low), literal(high)))
        }
        Operator::BeginsWith => pattern("like", "", "%"),
        Operator::Contains => pattern("like", "%", "%"),
        Operator::NotContains => pattern("not like", "%", "%"),
        Operator::IsNull => Ok(format!("{} is null", name)),
        Operator::IsNotNull => Ok(format!("{} is not null", name)),
    }
}

/// Sortable text form of a number, if it fits the fixed width
pub fn encode_number(n: &serde_json::Number) -> Option<String> {
    let value = if let Some(i) = n.as_i64() {
        Decimal::from(i)
    } else if let Some(u) = n.as_u64() {
        Decimal::from(u)
    } else {
        let text = n.to_string();
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .ok()?
    };
    let shifted = value.checked_add(number_offset())?.normalize();
    if shifted.is_sign_negative() {
        return None;
    }
    let text = shifted.to_string();
    let (int, frac) = match text.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (text.as_str(), None),
    };
    if int.len() > SORTABLE_DIGITS {
        return None;
    }
    let mut out = format!("{:0>width$}", int, width = SORTABLE_DIGITS);
    if let Some(frac) = frac {
        out.push('.');
        out.push_str(frac);
    }
    Some(out)
}

/// Number stored in sortable form, or `None` for any other text
pub fn decode_number(text: &str) -> Option<Value> {
    if !SORTABLE_NUMBER.is_match(text) {
        return None;
    }
    let shifted = Decimal::from_str(text).ok()?;
    let value = shifted.checked_sub(number_offset())?.normalize();
    Value::parse_number(&value.to_string())
}

/// Text written to the store for a non-identity value
pub fn wire_text(value: &Value) -> String {
    match value {
        Value::Number(n) => encode_number(n).unwrap_or_else(|| n.to_string()),
        Value::Bool(b) => wire_text(&Value::from(i64::from(*b))),
        other => other.to_text(),
    }
}

/// `itemName() in (...)` for a batch of item names
pub fn item_names_in(names: &[String]) -> String {
    format!(
        "{} in ({})",
        ITEM_NAME,
        names
            .iter()
            .map(|n| quote_literal(n))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// Whether the store can order natively: one term, on an attribute the where
/// clause constrains
pub fn native_order<'a>(
    order: &'a [OrderSpec],
    predicate: Option<&Predicate>,
) -> Option<&'a OrderSpec> {
    match (order, predicate) {
        ([spec], Some(p)) if p.references(&spec.field) => Some(spec),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ParseOptions, parse_with};
    use crate::key::FieldKey;

    fn desc() -> KeyDescriptor {
        KeyDescriptor::new(vec![FieldKey::synthetic("Name")]).unwrap()
    }

    fn render(filter: &str) -> String {
        let options = ParseOptions {
            booleans_as_numbers: true,
        };
        render_predicate(&parse_with(filter, options).unwrap(), &desc()).unwrap()
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(render("age >= 30"), "`age` >= '100000000000000000030'");
        assert_eq!(render("name != 'Jo'"), "`name` != 'Jo'");
        assert_eq!(render("age = '30'"), "`age` = '30'");
        assert_eq!(render("active = true"), "`active` = '100000000000000000001'");
        assert_eq!(render("Name = 'item-1'"), "itemName() = 'item-1'");
        assert_eq!(render("Name = 5"), "itemName() = '5'");
    }

    #[test]
    fn test_list_and_range_operators() {
        assert_eq!(
            render("id in (1,2)"),
            "`id` in ('100000000000000000001', '100000000000000000002')"
        );
        assert_eq!(
            render("qty between 3 and 10"),
            "`qty` between '100000000000000000003' and '100000000000000000010'"
        );
        assert_eq!(render("code between 'a' and 'c'"), "`code` between 'a' and 'c'");
    }

    // ==================== Sortable numbers ====================

    #[test]
    fn test_sortable_numbers_order_like_the_numbers() {
        let numbers = [
            Value::from(-1_000_000),
            Value::from(-2.5),
            Value::from(-2),
            Value::from(0),
            Value::from(0.25),
            Value::from(3),
            Value::from(10),
            Value::from(10.5),
            Value::from(250),
            Value::from(i64::MAX),
            Value::Number(u64::MAX.into()),
        ];
        let encoded: Vec<String> = numbers.iter().map(wire_text).collect();
        assert!(encoded.iter().all(|e| e.len() >= SORTABLE_DIGITS));
        for pair in encoded.windows(2) {
            assert!(pair[0] < pair[1], "{} < {}", pair[0], pair[1]);
        }
        assert_eq!(wire_text(&Value::from(3)), "100000000000000000003");
        assert_eq!(wire_text(&Value::from(-2.5)), "099999999999999999997.5");
    }

    #[test]
    fn test_sortable_numbers_decode() {
        for n in [Value::from(0), Value::from(42), Value::from(-7), Value::from(10.5), Value::from(-2.5)] {
            assert_eq!(decode_number(&wire_text(&n)), Some(n));
        }
        assert_eq!(decode_number("42"), None);
        assert_eq!(decode_number("red"), None);
        assert_eq!(decode_number("100000000000000000003.50"), None);
        assert_eq!(decode_number("10000000000000000000x3"), None);
    }

    #[test]
    fn test_out_of_range_numbers_stay_plain() {
        assert_eq!(wire_text(&Value::from(1e300)), Value::from(1e300).to_text());
        assert_eq!(wire_text(&Value::from("10")), "10");
    }

    #[test]
    fn test_like_forms() {
        assert_eq!(render("name begins_with 'Jo'"), "`name` like 'Jo%'");
        assert_eq!(render("name contains 'o''h'"), "`name` like '%o''h%'");
        assert_eq!(render("name not_contains '5%'"), "`name` not like '%5\\%%'");
    }

    #[test]
    fn test_null_checks() {
        assert_eq!(render("status = null"), "`status` is null");
        assert_eq!(render("status != null"), "`status` is not null");
    }

    #[test]
    fn test_logical_nesting() {
        assert_eq!(
            render("a = 'x' and (b = 'y' or c = 'z')"),
            "(`a` = 'x' and (`b` = 'y' or `c` = 'z'))"
        );
    }

    #[test]
    fn test_statement_rendering() {
        let statement = SelectStatement::new("widgets", SelectOutput::All)
            .with_where(Some(render("qty >= 3")))
            .with_order(attribute("qty", &desc()), Direction::Desc)
            .with_limit(100);
        assert_eq!(
            statement.to_string(),
            "select * from `widgets` where `qty` >= '100000000000000000003' order by `qty` desc limit 100"
        );

        let count = SelectStatement::new("widgets", SelectOutput::Count);
        assert_eq!(count.to_string(), "select count(*) from `widgets`");
    }

    #[test]
    fn test_item_names_in() {
        assert_eq!(
            item_names_in(&["a".to_string(), "b'c".to_string()]),
            "itemName() in ('a', 'b''c')"
        );
    }

    #[test]
    fn test_native_order_requires_constrained_attribute() {
        let order = [OrderSpec::asc("qty")];
        let p = parse_with("qty > 1", ParseOptions::default()).unwrap();
        assert!(native_order(&order, Some(&p)).is_some());

        let p = parse_with("color = 'red'", ParseOptions::default()).unwrap();
        assert!(native_order(&order, Some(&p)).is_none());
        assert!(native_order(&order, None).is_none());
    }
}
