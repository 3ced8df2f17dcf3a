//! In-memory SimpleDB-style client
//!
//! Executes the select dialect itself: backtick names, quoted literals,
//! `itemName()`, `count(*)`, comparisons, `in`, `between`, `[not] like`,
//! `is [not] null`, `and`/`or`/`not`, `order by`, `limit` and next tokens. Every
//! comparison is lexicographic and succeeds when any value of a multi-valued
//! attribute satisfies it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use regex::Regex;

use crate::backend::simpledb::client::{
    Attribute, DeletableItem, DeleteAttribute, DomainMetadata, ReplaceableAttribute,
    ReplaceableItem, SdbItem, SelectResult, SimpleDbClient, UpdateCondition,
};
use crate::backend::{ClientError, ClientResult};

const MAX_BATCH_ITEMS: usize = 25;
const MAX_ATTRIBUTES_PER_CALL: usize = 256;
const DEFAULT_SELECT_LIMIT: usize = 100;
const MAX_SELECT_LIMIT: usize = 2500;

type Attributes = BTreeMap<String, Vec<String>>;
type Domain = BTreeMap<String, Attributes>;

/// Thread-safe in-memory implementation of [`SimpleDbClient`]
#[derive(Debug, Default)]
pub struct MemorySimpleDbClient {
    domains: RwLock<BTreeMap<String, Domain>>,
    expressions: Mutex<Vec<String>>,
}

impl MemorySimpleDbClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select expressions received so far
    pub fn expressions(&self) -> Vec<String> {
        self.expressions.lock().clone()
    }
}

fn no_such_domain(domain: &str) -> ClientError {
    ClientError::ResourceNotFound(format!("The specified domain does not exist: {}", domain))
}

fn check_condition(current: Option<&Attributes>, expected: Option<&UpdateCondition>) -> ClientResult<()> {
    let Some(condition) = expected else {
        return Ok(());
    };
    let values = current.and_then(|attrs| attrs.get(&condition.name));
    match (condition.exists, &condition.value) {
        (false, _) if values.is_some() => Err(ClientError::ConditionFailed(format!(
            "Conditional check failed. Attribute ({}) value exists",
            condition.name
        ))),
        (false, _) => Ok(()),
        (true, None) => Err(ClientError::Validation(
            "an expected value is required when Exists is true".into(),
        )),
        (true, Some(expected)) => match values {
            Some(values) if values.len() == 1 && &values[0] == expected => Ok(()),
            Some(_) => Err(ClientError::ConditionFailed(format!(
                "Conditional check failed. Attribute ({}) value is not {}",
                condition.name, expected
            ))),
            None => Err(ClientError::ConditionFailed(format!(
                "Conditional check failed. Attribute ({}) does not exist",
                condition.name
            ))),
        },
    }
}

fn apply_put(domain: &mut Domain, item_name: &str, attributes: Vec<ReplaceableAttribute>) {
    let item = domain.entry(item_name.to_string()).or_default();
    for attr in attributes.iter().filter(|a| a.replace) {
        item.remove(&attr.name);
    }
    for attr in attributes {
        let values = item.entry(attr.name).or_default();
        if !values.contains(&attr.value) {
            values.push(attr.value);
        }
    }
}

fn apply_delete(domain: &mut Domain, item_name: &str, attributes: Vec<DeleteAttribute>) {
    if attributes.is_empty() {
        domain.remove(item_name);
        return;
    }
    if let Some(item) = domain.get_mut(item_name) {
        for attr in attributes {
            match attr.value {
                Some(value) => {
                    if let Some(values) = item.get_mut(&attr.name) {
                        values.retain(|v| *v != value);
                        if values.is_empty() {
                            item.remove(&attr.name);
                        }
                    }
                }
                None => {
                    item.remove(&attr.name);
                }
            }
        }
        if item.is_empty() {
            domain.remove(item_name);
        }
    }
}

fn check_batch<'a>(names: impl Iterator<Item = &'a String>, len: usize) -> ClientResult<()> {
    if len == 0 || len > MAX_BATCH_ITEMS {
        return Err(ClientError::Validation(format!(
            "batch takes 1 to {} items, got {}",
            MAX_BATCH_ITEMS, len
        )));
    }
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ClientError::Validation(format!(
                "Item name '{}' appears more than once in the batch",
                name
            )));
        }
    }
    Ok(())
}

fn to_attributes(attrs: &Attributes, output: &Output) -> Vec<Attribute> {
    attrs
        .iter()
        .filter(|(name, _)| match output {
            Output::All => true,
            Output::Attributes(names) => names.contains(*name),
            Output::ItemName | Output::Count => false,
        })
        .flat_map(|(name, values)| values.iter().map(move |v| Attribute::new(name.clone(), v.clone())))
        .collect()
}

#[async_trait]
impl SimpleDbClient for MemorySimpleDbClient {
    async fn create_domain(&self, domain: &str) -> ClientResult<()> {
        self.domains.write().entry(domain.to_string()).or_default();
        Ok(())
    }

    async fn delete_domain(&self, domain: &str) -> ClientResult<()> {
        self.domains.write().remove(domain);
        Ok(())
    }

    async fn list_domains(&self) -> ClientResult<Vec<String>> {
        Ok(self.domains.read().keys().cloned().collect())
    }

    async fn domain_metadata(&self, domain: &str) -> ClientResult<DomainMetadata> {
        let domains = self.domains.read();
        let d = domains.get(domain).ok_or_else(|| no_such_domain(domain))?;
        let names: BTreeSet<&String> = d.values().flat_map(|attrs| attrs.keys()).collect();
        let values: u64 = d
            .values()
            .flat_map(|attrs| attrs.values())
            .map(|v| v.len() as u64)
            .sum();
        Ok(DomainMetadata {
            item_count: d.len() as u64,
            attribute_name_count: names.len() as u64,
            attribute_value_count: values,
            timestamp: Utc::now(),
        })
    }

    async fn get_attributes(
        &self,
        domain: &str,
        item_name: &str,
        _consistent: bool,
    ) -> ClientResult<Vec<Attribute>> {
        let domains = self.domains.read();
        let d = domains.get(domain).ok_or_else(|| no_such_domain(domain))?;
        Ok(d
            .get(item_name)
            .map(|attrs| to_attributes(attrs, &Output::All))
            .unwrap_or_default())
    }

    async fn put_attributes(
        &self,
        domain: &str,
        item_name: &str,
        attributes: Vec<ReplaceableAttribute>,
        expected: Option<UpdateCondition>,
    ) -> ClientResult<()> {
        if attributes.is_empty() || attributes.len() > MAX_ATTRIBUTES_PER_CALL {
            return Err(ClientError::Validation(format!(
                "a put takes 1 to {} attributes",
                MAX_ATTRIBUTES_PER_CALL
            )));
        }
        let mut domains = self.domains.write();
        let d = domains.get_mut(domain).ok_or_else(|| no_such_domain(domain))?;
        check_condition(d.get(item_name), expected.as_ref())?;
        apply_put(d, item_name, attributes);
        Ok(())
    }

    async fn batch_put_attributes(&self, domain: &str, items: Vec<ReplaceableItem>) -> ClientResult<()> {
        check_batch(items.iter().map(|i| &i.name), items.len())?;
        let mut domains = self.domains.write();
        let d = domains.get_mut(domain).ok_or_else(|| no_such_domain(domain))?;
        for item in items {
            apply_put(d, &item.name, item.attributes);
        }
        Ok(())
    }

    async fn delete_attributes(
        &self,
        domain: &str,
        item_name: &str,
        attributes: Vec<DeleteAttribute>,
        expected: Option<UpdateCondition>,
    ) -> ClientResult<()> {
        let mut domains = self.domains.write();
        let d = domains.get_mut(domain).ok_or_else(|| no_such_domain(domain))?;
        check_condition(d.get(item_name), expected.as_ref())?;
        apply_delete(d, item_name, attributes);
        Ok(())
    }

    async fn batch_delete_attributes(&self, domain: &str, items: Vec<DeletableItem>) -> ClientResult<()> {
        check_batch(items.iter().map(|i| &i.name), items.len())?;
        let mut domains = self.domains.write();
        let d = domains.get_mut(domain).ok_or_else(|| no_such_domain(domain))?;
        for item in items {
            apply_delete(d, &item.name, item.attributes);
        }
        Ok(())
    }

    async fn select(
        &self,
        expression: &str,
        next_token: Option<String>,
        _consistent: bool,
    ) -> ClientResult<SelectResult> {
        self.expressions.lock().push(expression.to_string());
        let query = Parser::new(tokenize(expression)?).query()?;

        let domains = self.domains.read();
        let domain = domains
            .get(&query.domain)
            .ok_or_else(|| no_such_domain(&query.domain))?;
        let mut matched: Vec<(&String, &Attributes)> = domain
            .iter()
            .filter(|(name, attrs)| query.filter.as_ref().is_none_or(|f| f.eval(name, attrs)))
            .collect();

        if query.output == Output::Count {
            return Ok(SelectResult {
                items: vec![SdbItem {
                    name: "Domain".to_string(),
                    attributes: vec![Attribute::new("Count", matched.len().to_string())],
                }],
                next_token: None,
            });
        }

        if let Some((target, descending)) = &query.order {
            if !query.filter.as_ref().is_some_and(|f| f.mentions(target)) {
                return Err(ClientError::Validation(
                    "Invalid sort expression: the sort attribute must be constrained by a predicate"
                        .into(),
                ));
            }
            matched.sort_by(|(a_name, a), (b_name, b)| {
                let a = target.values(a_name, a).first().copied();
                let b = target.values(b_name, b).first().copied();
                let ordering = a.cmp(&b);
                if *descending { ordering.reverse() } else { ordering }
            });
        }

        let offset = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ClientError::Validation(format!("invalid next token '{}'", token)))?,
            None => 0,
        };
        let limit = query.limit.unwrap_or(DEFAULT_SELECT_LIMIT);
        let items = matched
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(name, attrs)| SdbItem {
                name: (*name).clone(),
                attributes: to_attributes(attrs, &query.output),
            })
            .collect();
        let next_token = (offset + limit < matched.len()).then(|| (offset + limit).to_string());
        Ok(SelectResult { items, next_token })
    }
}

// ============================================================================
// Select dialect
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Name(String),
    Text(String),
    Symbol(&'static str),
}

fn syntax(msg: impl Into<String>) -> ClientError {
    ClientError::Validation(format!("Invalid select expression: {}", msg.into()))
}

fn tokenize(input: &str) -> ClientResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '`' => {
                let (text, end) = quoted(&chars, i)?;
                tokens.push(Token::Name(text));
                i = end;
            }
            '\'' | '"' => {
                let (text, end) = quoted(&chars, i)?;
                tokens.push(Token::Text(text));
                i = end;
            }
            '(' | ')' | ',' | '*' | '=' => {
                tokens.push(Token::Symbol(match c {
                    '(' => "(",
                    ')' => ")",
                    ',' => ",",
                    '*' => "*",
                    _ => "=",
                }));
                i += 1;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Symbol("!="));
                i += 2;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Symbol("<="));
                i += 2;
            }
            '<' if next == Some('>') => {
                tokens.push(Token::Symbol("!="));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Symbol("<"));
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Symbol(">="));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Symbol(">"));
                i += 1;
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-'))
                {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => return Err(syntax(format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

/// Read a quoted run starting at `start`; the quote character doubles as its escape
fn quoted(chars: &[char], start: usize) -> ClientResult<(String, usize)> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
                continue;
            }
            return Ok((out, i + 1));
        }
        out.push(chars[i]);
        i += 1;
    }
    Err(syntax("unterminated quoted string"))
}

fn like_pattern(pattern: &str) -> ClientResult<Regex> {
    let mut re = String::from("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().unwrap_or('\\');
                re.push_str(&regex::escape(&escaped.to_string()));
            }
            '%' => re.push_str(".*"),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| syntax(e.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
enum Output {
    All,
    ItemName,
    Count,
    Attributes(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Target {
    ItemName,
    Attribute(String),
}

impl Target {
    fn values<'a>(&self, item_name: &'a str, attrs: &'a Attributes) -> Vec<&'a str> {
        match self {
            Target::ItemName => vec![item_name],
            Target::Attribute(name) => attrs
                .get(name)
                .map(|values| values.iter().map(String::as_str).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Target, &'static str, String),
    In(Target, Vec<String>),
    Between(Target, String, String),
    Like(Target, Regex, bool),
    IsNull(Target, bool),
}

impl Expr {
    fn eval(&self, item_name: &str, attrs: &Attributes) -> bool {
        match self {
            Expr::Or(l, r) => l.eval(item_name, attrs) || r.eval(item_name, attrs),
            Expr::And(l, r) => l.eval(item_name, attrs) && r.eval(item_name, attrs),
            Expr::Not(e) => !e.eval(item_name, attrs),
            Expr::Compare(target, op, literal) => {
                target.values(item_name, attrs).iter().any(|v| {
                    let ordering = (*v).cmp(literal.as_str());
                    match *op {
                        "=" => ordering == Ordering::Equal,
                        "!=" => ordering != Ordering::Equal,
                        "<" => ordering == Ordering::Less,
                        "<=" => ordering != Ordering::Greater,
                        ">" => ordering == Ordering::Greater,
                        _ => ordering != Ordering::Less,
                    }
                })
            }
            Expr::In(target, list) => target
                .values(item_name, attrs)
                .iter()
                .any(|v| list.iter().any(|l| l == v)),
            Expr::Between(target, lo, hi) => target
                .values(item_name, attrs)
                .iter()
                .any(|v| *v >= lo.as_str() && *v <= hi.as_str()),
            Expr::Like(target, re, negated) => target
                .values(item_name, attrs)
                .iter()
                .any(|v| re.is_match(v) != *negated),
            Expr::IsNull(target, negated) => target.values(item_name, attrs).is_empty() != *negated,
        }
    }

    fn mentions(&self, target: &Target) -> bool {
        match self {
            Expr::Or(l, r) | Expr::And(l, r) => l.mentions(target) || r.mentions(target),
            Expr::Not(e) => e.mentions(target),
            Expr::Compare(t, _, _)
            | Expr::In(t, _)
            | Expr::Between(t, _, _)
            | Expr::Like(t, _, _)
            | Expr::IsNull(t, _) => t == target,
        }
    }
}

#[derive(Debug)]
struct SelectQuery {
    output: Output,
    domain: String,
    filter: Option<Expr>,
    order: Option<(Target, bool)>,
    limit: Option<usize>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> ClientResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| syntax("unexpected end of expression"))?;
        self.pos += 1;
        Ok(token)
    }

    fn keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> ClientResult<()> {
        if self.keyword(keyword) {
            Ok(())
        } else {
            Err(syntax(format!("expected '{}'", keyword)))
        }
    }

    fn symbol(&mut self, symbol: &str) -> bool {
        match self.peek() {
            Some(Token::Symbol(s)) if *s == symbol => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> ClientResult<()> {
        if self.symbol(symbol) {
            Ok(())
        } else {
            Err(syntax(format!("expected '{}'", symbol)))
        }
    }

    fn query(&mut self) -> ClientResult<SelectQuery> {
        self.expect_keyword("select")?;
        let output = self.output()?;
        self.expect_keyword("from")?;
        let domain = self.name()?;
        let filter = if self.keyword("where") {
            Some(self.or_expr()?)
        } else {
            None
        };
        let order = if self.keyword("order") {
            self.expect_keyword("by")?;
            let target = self.target()?;
            let descending = if self.keyword("desc") {
                true
            } else {
                self.keyword("asc");
                false
            };
            Some((target, descending))
        } else {
            None
        };
        let limit = if self.keyword("limit") {
            let limit = match self.advance()? {
                Token::Word(w) => w.parse::<usize>().ok(),
                _ => None,
            }
            .filter(|l| (1..=MAX_SELECT_LIMIT).contains(l))
            .ok_or_else(|| syntax(format!("limit must be between 1 and {}", MAX_SELECT_LIMIT)))?;
            Some(limit)
        } else {
            None
        };
        if let Some(token) = self.peek() {
            return Err(syntax(format!("unexpected {:?}", token)));
        }
        Ok(SelectQuery {
            output,
            domain,
            filter,
            order,
            limit,
        })
    }

    fn output(&mut self) -> ClientResult<Output> {
        if self.symbol("*") {
            return Ok(Output::All);
        }
        if self.item_name_call() {
            return Ok(Output::ItemName);
        }
        if matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case("count"))
            && self.tokens.get(self.pos + 1) == Some(&Token::Symbol("("))
        {
            self.pos += 2;
            self.expect_symbol("*")?;
            self.expect_symbol(")")?;
            return Ok(Output::Count);
        }
        let mut names = vec![self.name()?];
        while self.symbol(",") {
            names.push(self.name()?);
        }
        Ok(Output::Attributes(names))
    }

    fn item_name_call(&mut self) -> bool {
        let is_call = matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case("itemName"))
            && self.tokens.get(self.pos + 1) == Some(&Token::Symbol("("))
            && self.tokens.get(self.pos + 2) == Some(&Token::Symbol(")"));
        if is_call {
            self.pos += 3;
        }
        is_call
    }

    fn name(&mut self) -> ClientResult<String> {
        match self.advance()? {
            Token::Name(n) | Token::Word(n) => Ok(n),
            other => Err(syntax(format!("expected a name, found {:?}", other))),
        }
    }

    fn target(&mut self) -> ClientResult<Target> {
        if self.item_name_call() {
            Ok(Target::ItemName)
        } else {
            self.name().map(Target::Attribute)
        }
    }

    fn literal(&mut self) -> ClientResult<String> {
        match self.advance()? {
            Token::Text(t) => Ok(t),
            other => Err(syntax(format!("expected a quoted value, found {:?}", other))),
        }
    }

    fn or_expr(&mut self) -> ClientResult<Expr> {
        let mut left = self.and_expr()?;
        while self.keyword("or") {
            left = Expr::Or(Box::new(left), Box::new(self.and_expr()?));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ClientResult<Expr> {
        let mut left = self.not_expr()?;
        while self.keyword("and") {
            left = Expr::And(Box::new(left), Box::new(self.not_expr()?));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> ClientResult<Expr> {
        if self.keyword("not") {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> ClientResult<Expr> {
        if self.symbol("(") {
            let inner = self.or_expr()?;
            self.expect_symbol(")")?;
            return Ok(inner);
        }
        let target = self.target()?;
        if self.keyword("is") {
            let negated = self.keyword("not");
            self.expect_keyword("null")?;
            return Ok(Expr::IsNull(target, negated));
        }
        if self.keyword("not") {
            self.expect_keyword("like")?;
            return Ok(Expr::Like(target, like_pattern(&self.literal()?)?, true));
        }
        if self.keyword("like") {
            return Ok(Expr::Like(target, like_pattern(&self.literal()?)?, false));
        }
        if self.keyword("in") {
            self.expect_symbol("(")?;
            let mut values = vec![self.literal()?];
            while self.symbol(",") {
                values.push(self.literal()?);
            }
            self.expect_symbol(")")?;
            return Ok(Expr::In(target, values));
        }
        if self.keyword("between") {
            let lo = self.literal()?;
            self.expect_keyword("and")?;
            let hi = self.literal()?;
            return Ok(Expr::Between(target, lo, hi));
        }
        match self.advance()? {
            Token::Symbol(op @ ("=" | "!=" | "<" | "<=" | ">" | ">=")) => {
                Ok(Expr::Compare(target, op, self.literal()?))
            }
            other => Err(syntax(format!("expected a comparison, found {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn widgets() -> MemorySimpleDbClient {
        let client = MemorySimpleDbClient::new();
        client.create_domain("widgets").await.unwrap();
        for (name, color, qty) in [("w1", "red", "5"), ("w2", "blue", "12"), ("w3", "red", "3")] {
            client
                .put_attributes(
                    "widgets",
                    name,
                    vec![
                        ReplaceableAttribute::replace("color", color),
                        ReplaceableAttribute::replace("qty", qty),
                    ],
                    None,
                )
                .await
                .unwrap();
        }
        client
    }

    async fn names(client: &MemorySimpleDbClient, expression: &str) -> Vec<String> {
        client
            .select(expression, None, true)
            .await
            .unwrap()
            .items
            .into_iter()
            .map(|i| i.name)
            .collect()
    }

    // ==================== Select Dialect ====================

    #[tokio::test]
    async fn test_comparisons_are_lexicographic() {
        let client = widgets().await;
        // "12" < "3" as strings
        assert_eq!(
            names(&client, "select * from `widgets` where `qty` >= '3'").await,
            vec!["w1", "w3"]
        );
    }

    #[tokio::test]
    async fn test_item_name_in_like_and_null() {
        let client = widgets().await;
        assert_eq!(
            names(&client, "select itemName() from `widgets` where itemName() in ('w1', 'w3')").await,
            vec!["w1", "w3"]
        );
        assert_eq!(
            names(&client, "select * from `widgets` where `color` like 'bl%'").await,
            vec!["w2"]
        );
        assert_eq!(
            names(&client, "select * from `widgets` where `color` not like '%e%'").await,
            Vec::<String>::new()
        );
        assert_eq!(
            names(&client, "select * from `widgets` where `size` is null and (`color` = 'red' or `qty` = '12')").await,
            vec!["w1", "w2", "w3"]
        );
    }

    #[tokio::test]
    async fn test_like_escapes_percent() {
        let client = MemorySimpleDbClient::new();
        client.create_domain("d").await.unwrap();
        for (name, v) in [("a", "5% off"), ("b", "50 off")] {
            client
                .put_attributes("d", name, vec![ReplaceableAttribute::replace("tag", v)], None)
                .await
                .unwrap();
        }
        assert_eq!(
            names(&client, "select * from `d` where `tag` like '5\\%%'").await,
            vec!["a"]
        );
    }

    #[tokio::test]
    async fn test_order_count_and_paging() {
        let client = widgets().await;
        assert_eq!(
            names(&client, "select * from `widgets` where `color` > '' order by `color` desc").await,
            vec!["w1", "w3", "w2"]
        );
        let err = client
            .select("select * from `widgets` order by `color`", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));

        let count = client
            .select("select count(*) from `widgets` where `color` = 'red'", None, true)
            .await
            .unwrap();
        assert_eq!(count.items[0].attributes[0], Attribute::new("Count", "2"));

        let first = client
            .select("select * from `widgets` limit 2", None, true)
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        let second = client
            .select("select * from `widgets` limit 2", first.next_token, true)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next_token.is_none());
    }

    #[tokio::test]
    async fn test_malformed_expressions_are_rejected() {
        let client = widgets().await;
        for expression in [
            "select * from `widgets` where `qty` >= 3",
            "select * from `widgets` where `qty` ~ '3'",
            "select * from `widgets` where `color` = 'red",
            "select * from `missing`",
        ] {
            assert!(client.select(expression, None, true).await.is_err(), "{}", expression);
        }
    }

    // ==================== Writes ====================

    #[tokio::test]
    async fn test_conditional_put_and_delete() {
        let client = widgets().await;
        let err = client
            .put_attributes(
                "widgets",
                "w1",
                vec![ReplaceableAttribute::replace("color", "green")],
                Some(UpdateCondition::absent("color")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConditionFailed(_)));

        let err = client
            .delete_attributes("widgets", "w9", vec![], Some(UpdateCondition::equals("color", "red")))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConditionFailed(_)));

        client
            .delete_attributes("widgets", "w1", vec![DeleteAttribute::all("qty")], None)
            .await
            .unwrap();
        let attrs = client.get_attributes("widgets", "w1", true).await.unwrap();
        assert_eq!(attrs, vec![Attribute::new("color", "red")]);
    }

    #[tokio::test]
    async fn test_multi_valued_attributes() {
        let client = widgets().await;
        client
            .put_attributes(
                "widgets",
                "w2",
                vec![ReplaceableAttribute {
                    name: "color".into(),
                    value: "green".into(),
                    replace: false,
                }],
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            names(&client, "select * from `widgets` where `color` = 'green'").await,
            vec!["w2"]
        );
        let meta = client.domain_metadata("widgets").await.unwrap();
        assert_eq!(meta.item_count, 3);
        assert_eq!(meta.attribute_value_count, 7);
    }

    #[tokio::test]
    async fn test_batch_limits() {
        let client = widgets().await;
        let items = (0..26)
            .map(|i| ReplaceableItem {
                name: format!("i{}", i),
                attributes: vec![ReplaceableAttribute::replace("a", "b")],
            })
            .collect();
        assert!(matches!(
            client.batch_put_attributes("widgets", items).await.unwrap_err(),
            ClientError::Validation(_)
        ));
    }
}
