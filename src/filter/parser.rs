//! Textual filter parser
//!
//! Grammar, lowest precedence first:
//!
//! 1. split on `OR` / `||` into an OR chain,
//! 2. split each side on `AND` / `&&` into an AND chain,
//! 3. parse each leaf as `field OP value`.
//!
//! Splitting never looks inside quotes or parentheses; a leaf wrapped entirely in
//! parentheses is parsed as a nested expression. `NOR` and a leading `NOT` are
//! rejected, as are `like` patterns that only anchor at the end.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{RecordStoreError, Result};
use crate::filter::predicate::{Comparison, Operator, Predicate};
use crate::types::Value;

const MAX_NESTING: usize = 16;

/// Literal typing options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Render `true`/`false` as `1`/`0` for backends without native booleans
    pub booleans_as_numbers: bool,
}

/// Leaf operator tokens as written in filter text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafOperator {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    In,
    Between,
    BeginsWith,
    Contains,
    NotContains,
    Like,
}

/// Operator patterns in matching priority order. Tokens must be surrounded by
/// whitespace so they never match inside identifiers.
static LEAF_OPERATORS: LazyLock<Vec<(Regex, LeafOperator)>> = LazyLock::new(|| {
    [
        (r"(?i)\s(?:=|eq)\s", LeafOperator::Eq),
        (r"(?i)\s(?:!=|<>|ne)\s", LeafOperator::Ne),
        (r"(?i)\s(?:>=|gte|ge)\s", LeafOperator::Ge),
        (r"(?i)\s(?:<=|lte|le)\s", LeafOperator::Le),
        (r"(?i)\s(?:>|gt)\s", LeafOperator::Gt),
        (r"(?i)\s(?:<|lt)\s", LeafOperator::Lt),
        (r"(?i)\sin\s", LeafOperator::In),
        (r"(?i)\sbetween\s", LeafOperator::Between),
        (r"(?i)\sbegins_with\s", LeafOperator::BeginsWith),
        (r"(?i)\scontains\s", LeafOperator::Contains),
        (r"(?i)\snot_contains\s", LeafOperator::NotContains),
        (r"(?i)\slike\s", LeafOperator::Like),
    ]
    .into_iter()
    .map(|(pattern, op)| (Regex::new(pattern).expect("valid operator pattern"), op))
    .collect()
});

static NOR_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\snor\s").expect("valid nor pattern"));

static LEADING_NOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^not(?:\s|\()").expect("valid not pattern"));

static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("valid field pattern"));

/// Parse a filter with default options
pub fn parse(text: &str) -> Result<Predicate> {
    parse_with(text, ParseOptions::default())
}

/// Parse a filter with explicit literal typing options
pub fn parse_with(text: &str, options: ParseOptions) -> Result<Predicate> {
    parse_expression(text, options, 0)
}

fn parse_expression(text: &str, options: ParseOptions, depth: usize) -> Result<Predicate> {
    let text = text.trim();
    if text.is_empty() {
        return Err(RecordStoreError::bad_request("Filter expression is empty"));
    }
    if depth > MAX_NESTING {
        return Err(RecordStoreError::bad_request("Filter nesting is too deep"));
    }
    reject_unsupported_logic(text)?;

    let mut disjuncts = Vec::new();
    for part in split_top_level(text, "or", "||")? {
        disjuncts.push(parse_conjunction(part, options, depth)?);
    }
    Predicate::any(disjuncts)
        .ok_or_else(|| RecordStoreError::bad_request("Filter expression is empty"))
}

fn parse_conjunction(text: &str, options: ParseOptions, depth: usize) -> Result<Predicate> {
    let parts = merge_between_bounds(split_top_level(text, "and", "&&")?);
    let mut conjuncts = Vec::with_capacity(parts.len());
    for part in parts {
        conjuncts.push(parse_leaf(&part, options, depth)?);
    }
    Predicate::all(conjuncts).ok_or_else(|| {
        RecordStoreError::bad_request(format!("Malformed filter condition '{}'", text.trim()))
    })
}

fn parse_leaf(text: &str, options: ParseOptions, depth: usize) -> Result<Predicate> {
    let text = text.trim();
    if text.is_empty() {
        return Err(RecordStoreError::bad_request(
            "Malformed filter: empty condition between logical operators",
        ));
    }
    if let Some(inner) = strip_wrapping_parens(text) {
        return parse_expression(inner, options, depth + 1);
    }
    reject_unsupported_logic(text)?;

    let (field, op, value_text) = split_leaf(text)?;
    if !FIELD_NAME.is_match(field) {
        return Err(RecordStoreError::bad_request(format!(
            "Invalid field name '{}' in filter",
            field
        )));
    }
    if value_text.is_empty() {
        return Err(RecordStoreError::bad_request(format!(
            "Missing value in filter condition '{}'",
            text
        )));
    }

    let comparison = match op {
        LeafOperator::Eq | LeafOperator::Ne if is_null_literal(value_text) => {
            let null_op = if op == LeafOperator::Eq {
                Operator::IsNull
            } else {
                Operator::IsNotNull
            };
            Comparison::new(field, null_op, Vec::new())?
        }
        LeafOperator::In => {
            let values = parse_value_list(value_text, options)?;
            Comparison::new(field, Operator::In, values)?
        }
        LeafOperator::Between => {
            let values = parse_between_bounds(value_text, options)?;
            Comparison::new(field, Operator::Between, values)?
        }
        LeafOperator::Like => like_to_comparison(field, value_text)?,
        single => {
            let operator = match single {
                LeafOperator::Eq => Operator::Eq,
                LeafOperator::Ne => Operator::Ne,
                LeafOperator::Ge => Operator::Ge,
                LeafOperator::Le => Operator::Le,
                LeafOperator::Gt => Operator::Gt,
                LeafOperator::Lt => Operator::Lt,
                LeafOperator::BeginsWith => Operator::BeginsWith,
                LeafOperator::Contains => Operator::Contains,
                _ => Operator::NotContains,
            };
            let value = parse_literal(value_text, options);
            Comparison::new(field, operator, vec![value])?
        }
    };
    Ok(Predicate::Comparison(comparison))
}

fn reject_unsupported_logic(text: &str) -> Result<()> {
    if LEADING_NOT.is_match(text) {
        return Err(RecordStoreError::unsupported_filter(format!(
            "NOT is not supported: '{}'",
            text
        )));
    }
    let mask = quote_mask(text);
    if NOR_TOKEN
        .find_iter(text)
        .any(|m| !mask.get(m.start()).copied().unwrap_or(false))
    {
        return Err(RecordStoreError::unsupported_filter(format!(
            "NOR is not supported: '{}'",
            text
        )));
    }
    Ok(())
}

/// Find the highest-priority operator outside quotes and split the leaf around it
fn split_leaf(text: &str) -> Result<(&str, LeafOperator, &str)> {
    let mask = quote_mask(text);
    for (pattern, op) in LEAF_OPERATORS.iter() {
        let found = pattern
            .find_iter(text)
            .find(|m| !mask.get(m.start()).copied().unwrap_or(false));
        if let Some(m) = found {
            return Ok((text[..m.start()].trim(), *op, text[m.end()..].trim()));
        }
    }
    Err(RecordStoreError::unsupported_filter(format!(
        "No recognised operator in filter condition '{}'",
        text
    )))
}

/// For every byte, whether it sits inside a quoted literal
fn quote_mask(text: &str) -> Vec<bool> {
    let mut mask = Vec::with_capacity(text.len());
    let mut quote: Option<u8> = None;
    for &b in text.as_bytes() {
        match quote {
            Some(q) => {
                mask.push(true);
                if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'\'' || b == b'"' {
                    quote = Some(b);
                    mask.push(true);
                } else {
                    mask.push(false);
                }
            }
        }
    }
    mask
}

/// Split on a case-insensitive whitespace-delimited `word` or on `symbol`, at
/// parenthesis depth zero and outside quotes.
fn split_top_level<'a>(text: &'a str, word: &str, symbol: &str) -> Result<Vec<&'a str>> {
    let bytes = text.as_bytes();
    let word = word.as_bytes();
    let symbol = symbol.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth: i32 = 0;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(RecordStoreError::bad_request(format!(
                        "Unbalanced parentheses in filter '{}'",
                        text
                    )));
                }
            }
            _ if depth == 0 => {
                if bytes[i..].starts_with(symbol) {
                    parts.push(&text[start..i]);
                    i += symbol.len();
                    start = i;
                    continue;
                }
                if b.is_ascii_whitespace() {
                    let mut j = i;
                    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                        j += 1;
                    }
                    let end = j + word.len();
                    if end <= bytes.len()
                        && bytes[j..end].eq_ignore_ascii_case(word)
                        && (end == bytes.len() || bytes[end].is_ascii_whitespace())
                    {
                        parts.push(&text[start..i]);
                        i = end;
                        start = i;
                        continue;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    if quote.is_some() {
        return Err(RecordStoreError::bad_request(format!(
            "Unterminated quote in filter '{}'",
            text
        )));
    }
    if depth != 0 {
        return Err(RecordStoreError::bad_request(format!(
            "Unbalanced parentheses in filter '{}'",
            text
        )));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

/// `x between 1 and 5` is split by the AND pass; stitch the upper bound back on.
fn merge_between_bounds(parts: Vec<&str>) -> Vec<String> {
    let mut merged = Vec::with_capacity(parts.len());
    let mut iter = parts.into_iter().peekable();
    while let Some(part) = iter.next() {
        if awaits_between_upper_bound(part) {
            if let Some(next) = iter.next() {
                merged.push(format!("{} and {}", part, next));
                continue;
            }
        }
        merged.push(part.to_string());
    }
    merged
}

fn awaits_between_upper_bound(part: &str) -> bool {
    let part = part.trim();
    if strip_wrapping_parens(part).is_some() {
        return false;
    }
    match split_leaf(part) {
        Ok((_, LeafOperator::Between, value)) => {
            let inner = strip_wrapping_parens(value).unwrap_or(value);
            split_commas(inner).map(|v| v.len() < 2).unwrap_or(false)
        }
        _ => false,
    }
}

fn parse_between_bounds(text: &str, options: ParseOptions) -> Result<Vec<Value>> {
    let inner = strip_wrapping_parens(text).unwrap_or(text);
    let mut bounds = split_top_level(inner, "and", "&&")?;
    if bounds.len() != 2 {
        bounds = split_commas(inner)?;
    }
    if bounds.len() != 2 || bounds.iter().any(|b| b.trim().is_empty()) {
        return Err(RecordStoreError::bad_request(format!(
            "BETWEEN requires exactly two bounds, got '{}'",
            text
        )));
    }
    Ok(bounds
        .into_iter()
        .map(|b| parse_literal(b, options))
        .collect())
}

fn parse_value_list(text: &str, options: ParseOptions) -> Result<Vec<Value>> {
    let inner = strip_wrapping_parens(text).unwrap_or(text);
    let items = split_commas(inner)?;
    if items.iter().any(|i| i.trim().is_empty()) {
        return Err(RecordStoreError::bad_request(format!(
            "Empty element in value list '{}'",
            text
        )));
    }
    Ok(items
        .into_iter()
        .map(|item| parse_literal(item, options))
        .collect())
}

fn split_commas(text: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut quote: Option<u8> = None;
    let mut start = 0;
    for (i, &b) in text.as_bytes().iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b',' => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            None => {}
        }
    }
    if quote.is_some() {
        return Err(RecordStoreError::bad_request(format!(
            "Unterminated quote in value list '{}'",
            text
        )));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

/// Inner text when the parentheses at both ends match each other
fn strip_wrapping_parens(text: &str) -> Option<&str> {
    let text = text.trim();
    if !(text.starts_with('(') && text.ends_with(')')) {
        return None;
    }
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    for (i, &b) in text.as_bytes().iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 && i != text.len() - 1 {
                        return None;
                    }
                }
                _ => {}
            },
        }
    }
    Some(&text[1..text.len() - 1])
}

fn is_null_literal(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("null")
}

fn unquote(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        if (first == b'\'' || first == b'"') && bytes[bytes.len() - 1] == first {
            let quote = first as char;
            let inner = &text[1..text.len() - 1];
            let doubled = format!("{}{}", quote, quote);
            return Some(inner.replace(&doubled, &quote.to_string()));
        }
    }
    None
}

/// Type a literal: quoted text is a string, unquoted numbers are numbers,
/// `true`/`false` are booleans (or `1`/`0`), `null` is null, anything else a string.
pub fn parse_literal(text: &str, options: ParseOptions) -> Value {
    let text = text.trim();
    if let Some(s) = unquote(text) {
        return Value::String(s);
    }
    if let Some(n) = Value::parse_number(text) {
        return n;
    }
    if text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false") {
        let b = text.eq_ignore_ascii_case("true");
        return if options.booleans_as_numbers {
            Value::from(i64::from(b))
        } else {
            Value::Bool(b)
        };
    }
    if is_null_literal(text) {
        return Value::Null;
    }
    Value::String(text.to_string())
}

fn like_to_comparison(field: &str, value_text: &str) -> Result<Comparison> {
    let pattern = unquote(value_text).unwrap_or_else(|| value_text.to_string());
    let leading = pattern.starts_with('%');
    let trailing = pattern.len() > 1 && pattern.ends_with('%');
    let core = pattern
        .trim_start_matches('%')
        .trim_end_matches('%')
        .to_string();

    if core.contains('%') {
        return Err(RecordStoreError::unsupported_filter(format!(
            "LIKE pattern '{}' with an inner wildcard is not supported",
            pattern
        )));
    }
    if core.is_empty() && (leading || trailing) {
        return Err(RecordStoreError::bad_request(format!(
            "LIKE pattern '{}' has no literal text",
            pattern
        )));
    }
    match (leading, trailing) {
        (true, true) => Comparison::new(field, Operator::Contains, vec![Value::String(core)]),
        (false, true) => Comparison::new(field, Operator::BeginsWith, vec![Value::String(core)]),
        (true, false) => Err(RecordStoreError::unsupported_filter(format!(
            "LIKE pattern '{}' (ends-with) is not supported",
            pattern
        ))),
        (false, false) => Comparison::new(field, Operator::Eq, vec![Value::String(core)]),
    }
}
