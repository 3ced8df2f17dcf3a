//! In-memory partitioned table client
//!
//! Entities are kept sorted by partition and row key, the order the service returns
//! them in. Query filters are parsed and evaluated as OData: `eq ne gt ge lt le`
//! between a property and a literal, combined with `and`, `or`, `not` and
//! parentheses. A comparison against a missing property, or a literal of another
//! type, is false.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::backend::table::client::{
    ANY_ETAG, Continuation, EdmValue, Entity, PARTITION_KEY, QueryOptions, QueryPage, ROW_KEY,
    TIMESTAMP, TableClient, TransactionAction,
};
use crate::backend::{ClientError, ClientResult};

const MAX_PAGE: usize = 1000;
const MAX_TRANSACTION: usize = 100;

type Rows = BTreeMap<(String, String), Entity>;

/// Thread-safe in-memory implementation of [`TableClient`]
#[derive(Debug, Default)]
pub struct MemoryTableClient {
    tables: RwLock<BTreeMap<String, Rows>>,
    filters: Mutex<Vec<String>>,
}

impl MemoryTableClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter strings received by `query_entities`
    pub fn filters(&self) -> Vec<String> {
        self.filters.lock().clone()
    }

    fn missing_table(table: &str) -> ClientError {
        ClientError::ResourceNotFound(format!("TableNotFound: {}", table))
    }
}

fn missing_entity(partition_key: &str, row_key: &str) -> ClientError {
    ClientError::ResourceNotFound(format!(
        "ResourceNotFound: entity ({}, {}) does not exist",
        partition_key, row_key
    ))
}

fn stamp(mut entity: Entity) -> Entity {
    entity.timestamp = Some(Utc::now());
    entity.etag = Some(format!("W/\"{}\"", Uuid::new_v4().simple()));
    entity
}

fn check_etag(current: &Entity, if_match: &str) -> ClientResult<()> {
    if if_match == ANY_ETAG || current.etag.as_deref() == Some(if_match) {
        Ok(())
    } else {
        Err(ClientError::ConditionFailed(
            "UpdateConditionNotSatisfied: the etag does not match".into(),
        ))
    }
}

fn insert(rows: &mut Rows, entity: Entity) -> ClientResult<Entity> {
    let key = (entity.partition_key.clone(), entity.row_key.clone());
    if rows.contains_key(&key) {
        return Err(ClientError::ConditionFailed(format!(
            "EntityAlreadyExists: ({}, {})",
            key.0, key.1
        )));
    }
    let stored = stamp(entity);
    rows.insert(key, stored.clone());
    Ok(stored)
}

fn replace(rows: &mut Rows, entity: Entity, if_match: &str, merge: bool) -> ClientResult<Entity> {
    let key = (entity.partition_key.clone(), entity.row_key.clone());
    let current = rows
        .get(&key)
        .ok_or_else(|| missing_entity(&key.0, &key.1))?;
    check_etag(current, if_match)?;
    let mut next = if merge { current.clone() } else { Entity::new(&key.0, &key.1) };
    next.properties.extend(entity.properties);
    let stored = stamp(next);
    rows.insert(key, stored.clone());
    Ok(stored)
}

fn remove(rows: &mut Rows, partition_key: &str, row_key: &str, if_match: &str) -> ClientResult<()> {
    let key = (partition_key.to_string(), row_key.to_string());
    let current = rows
        .get(&key)
        .ok_or_else(|| missing_entity(partition_key, row_key))?;
    check_etag(current, if_match)?;
    rows.remove(&key);
    Ok(())
}

fn apply(rows: &mut Rows, action: TransactionAction) -> ClientResult<Option<Entity>> {
    match action {
        TransactionAction::Insert(entity) => insert(rows, entity).map(Some),
        TransactionAction::Update { entity, if_match } => replace(rows, entity, &if_match, false).map(Some),
        TransactionAction::Merge { entity, if_match } => replace(rows, entity, &if_match, true).map(Some),
        TransactionAction::Delete {
            partition_key,
            row_key,
            if_match,
        } => remove(rows, &partition_key, &row_key, &if_match).map(|_| None),
    }
}

#[async_trait]
impl TableClient for MemoryTableClient {
    async fn create_table(&self, table: &str) -> ClientResult<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(table) {
            return Err(ClientError::ResourceInUse(format!("TableAlreadyExists: {}", table)));
        }
        tables.insert(table.to_string(), Rows::new());
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> ClientResult<()> {
        self.tables
            .write()
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| Self::missing_table(table))
    }

    async fn list_tables(&self) -> ClientResult<Vec<String>> {
        Ok(self.tables.read().keys().cloned().collect())
    }

    async fn table_exists(&self, table: &str) -> ClientResult<bool> {
        Ok(self.tables.read().contains_key(table))
    }

    async fn insert_entity(&self, table: &str, entity: Entity) -> ClientResult<Entity> {
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| Self::missing_table(table))?;
        insert(rows, entity)
    }

    async fn update_entity(&self, table: &str, entity: Entity, if_match: &str) -> ClientResult<Entity> {
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| Self::missing_table(table))?;
        replace(rows, entity, if_match, false)
    }

    async fn merge_entity(&self, table: &str, entity: Entity, if_match: &str) -> ClientResult<Entity> {
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| Self::missing_table(table))?;
        replace(rows, entity, if_match, true)
    }

    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        if_match: &str,
    ) -> ClientResult<()> {
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| Self::missing_table(table))?;
        remove(rows, partition_key, row_key, if_match)
    }

    async fn get_entity(&self, table: &str, partition_key: &str, row_key: &str) -> ClientResult<Option<Entity>> {
        let tables = self.tables.read();
        let rows = tables.get(table).ok_or_else(|| Self::missing_table(table))?;
        Ok(rows
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned())
    }

    async fn query_entities(&self, table: &str, options: QueryOptions) -> ClientResult<QueryPage> {
        if let Some(filter) = &options.filter {
            self.filters.lock().push(filter.clone());
        }
        let filter = options.filter.as_deref().map(parse_filter).transpose()?;
        let top = options.top.unwrap_or(MAX_PAGE);
        if top == 0 || top > MAX_PAGE {
            return Err(ClientError::Validation(format!(
                "$top must be between 1 and {}",
                MAX_PAGE
            )));
        }

        let tables = self.tables.read();
        let rows = tables.get(table).ok_or_else(|| Self::missing_table(table))?;
        let start = options
            .continuation
            .map(|c| (c.next_partition_key, c.next_row_key));

        let mut entities = Vec::new();
        let mut continuation = None;
        for (key, entity) in rows.range(start.unwrap_or_default()..) {
            if !filter.as_ref().is_none_or(|f| f.matches(entity)) {
                continue;
            }
            if entities.len() == top {
                continuation = Some(Continuation {
                    next_partition_key: key.0.clone(),
                    next_row_key: key.1.clone(),
                });
                break;
            }
            entities.push(select(entity, options.select.as_deref()));
        }
        Ok(QueryPage {
            entities,
            continuation,
        })
    }

    async fn submit_transaction(
        &self,
        table: &str,
        actions: Vec<TransactionAction>,
    ) -> ClientResult<Vec<Option<Entity>>> {
        if actions.is_empty() || actions.len() > MAX_TRANSACTION {
            return Err(ClientError::Validation(format!(
                "a transaction takes 1 to {} operations, got {}",
                MAX_TRANSACTION,
                actions.len()
            )));
        }
        let partition = actions[0].partition_key().to_string();
        let mut rows_seen = HashSet::new();
        for action in &actions {
            if action.partition_key() != partition {
                return Err(ClientError::Validation(
                    "all operations of a transaction must share one partition key".into(),
                ));
            }
            if !rows_seen.insert(action.row_key().to_string()) {
                return Err(ClientError::Validation(format!(
                    "row '{}' appears more than once in the transaction",
                    action.row_key()
                )));
            }
        }

        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| Self::missing_table(table))?;
        // apply to a copy of the partition so a failure leaves the table untouched
        let mut staged = rows.clone();
        let mut results = Vec::with_capacity(actions.len());
        for (index, action) in actions.into_iter().enumerate() {
            let result = apply(&mut staged, action).map_err(|e| match e {
                ClientError::ConditionFailed(msg) => {
                    ClientError::ConditionFailed(format!("operation {}: {}", index, msg))
                }
                ClientError::ResourceNotFound(msg) => {
                    ClientError::ResourceNotFound(format!("operation {}: {}", index, msg))
                }
                other => other,
            })?;
            results.push(result);
        }
        *rows = staged;
        Ok(results)
    }
}

fn select(entity: &Entity, names: Option<&[String]>) -> Entity {
    match names {
        None => entity.clone(),
        Some(names) => {
            let mut out = entity.clone();
            out.properties.retain(|k, _| names.contains(k));
            out
        }
    }
}

// ============================================================================
// OData filters
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Text(String),
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "eq" => CompareOp::Eq,
            "ne" => CompareOp::Ne,
            "gt" => CompareOp::Gt,
            "ge" => CompareOp::Ge,
            "lt" => CompareOp::Lt,
            "le" => CompareOp::Le,
            _ => return None,
        })
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Compare {
        property: String,
        op: CompareOp,
        literal: EdmValue,
    },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    fn matches(&self, entity: &Entity) -> bool {
        match self {
            Filter::Compare {
                property,
                op,
                literal,
            } => property_of(entity, property)
                .and_then(|value| compare(&value, literal))
                .is_some_and(|ordering| op.holds(ordering)),
            Filter::And(l, r) => l.matches(entity) && r.matches(entity),
            Filter::Or(l, r) => l.matches(entity) || r.matches(entity),
            Filter::Not(inner) => !inner.matches(entity),
        }
    }
}

fn property_of(entity: &Entity, name: &str) -> Option<EdmValue> {
    match name {
        PARTITION_KEY => Some(EdmValue::String(entity.partition_key.clone())),
        ROW_KEY => Some(EdmValue::String(entity.row_key.clone())),
        TIMESTAMP => entity.timestamp.map(EdmValue::DateTime),
        _ => entity.properties.get(name).cloned(),
    }
}

fn compare(value: &EdmValue, literal: &EdmValue) -> Option<Ordering> {
    match (value, literal) {
        (EdmValue::String(a), EdmValue::String(b)) => Some(a.cmp(b)),
        (EdmValue::Int64(a), EdmValue::Int64(b)) => Some(a.cmp(b)),
        (EdmValue::Int64(a), EdmValue::Double(b)) => (*a as f64).partial_cmp(b),
        (EdmValue::Double(a), EdmValue::Int64(b)) => a.partial_cmp(&(*b as f64)),
        (EdmValue::Double(a), EdmValue::Double(b)) => a.partial_cmp(b),
        (EdmValue::Boolean(a), EdmValue::Boolean(b)) => Some(a.cmp(b)),
        (EdmValue::DateTime(a), EdmValue::DateTime(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn syntax(message: impl Into<String>) -> ClientError {
    ClientError::Validation(format!("InvalidInput: {}", message.into()))
}

fn tokenize(input: &str) -> ClientResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax("unterminated string literal")),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(c) => {
                            text.push(*c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            c if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '+') => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | '.' | '+'))
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

fn parse_filter(input: &str) -> ClientResult<Filter> {
    let mut parser = FilterParser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let filter = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(syntax(format!("unexpected trailing input in '{}'", input)));
    }
    Ok(filter)
}

struct FilterParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl FilterParser {
    fn peek_word(&self, word: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Word(w)) if w == word)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or_expr(&mut self) -> ClientResult<Filter> {
        let mut left = self.and_expr()?;
        while self.peek_word("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Filter::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ClientResult<Filter> {
        let mut left = self.unary()?;
        while self.peek_word("and") {
            self.pos += 1;
            let right = self.unary()?;
            left = Filter::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> ClientResult<Filter> {
        if self.peek_word("not") {
            self.pos += 1;
            return Ok(Filter::Not(Box::new(self.unary()?)));
        }
        match self.next() {
            Some(Token::Open) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(syntax("missing ')'")),
                }
            }
            Some(Token::Word(property)) => {
                let op = match self.next() {
                    Some(Token::Word(w)) => CompareOp::parse(&w)
                        .ok_or_else(|| syntax(format!("unknown operator '{}'", w)))?,
                    _ => return Err(syntax(format!("operator expected after '{}'", property))),
                };
                let literal = match self.next() {
                    Some(Token::Text(text)) => EdmValue::String(text),
                    Some(Token::Word(word)) => literal(&word)?,
                    _ => return Err(syntax(format!("literal expected after '{}'", property))),
                };
                Ok(Filter::Compare {
                    property,
                    op,
                    literal,
                })
            }
            _ => Err(syntax("comparison expected")),
        }
    }
}

fn literal(word: &str) -> ClientResult<EdmValue> {
    match word {
        "true" => return Ok(EdmValue::Boolean(true)),
        "false" => return Ok(EdmValue::Boolean(false)),
        _ => {}
    }
    let digits = word.strip_suffix('L').unwrap_or(word);
    if let Ok(n) = digits.parse::<i64>() {
        return Ok(EdmValue::Int64(n));
    }
    word.parse::<f64>()
        .map(EdmValue::Double)
        .map_err(|_| syntax(format!("'{}' is not a literal", word)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(pk: &str, rk: &str, qty: i64, color: &str) -> Entity {
        Entity::new(pk, rk)
            .with_property("qty", EdmValue::Int64(qty))
            .with_property("color", EdmValue::String(color.into()))
    }

    async fn client() -> MemoryTableClient {
        let client = MemoryTableClient::new();
        client.create_table("widgets").await.unwrap();
        for e in [
            entity("eu", "w1", 5, "red"),
            entity("eu", "w2", 7, "blue"),
            entity("us", "w3", 3, "red"),
        ] {
            client.insert_entity("widgets", e).await.unwrap();
        }
        client
    }

    async fn rows(client: &MemoryTableClient, filter: &str) -> Vec<String> {
        let options = QueryOptions {
            filter: Some(filter.into()),
            ..QueryOptions::default()
        };
        client
            .query_entities("widgets", options)
            .await
            .unwrap()
            .entities
            .into_iter()
            .map(|e| e.row_key)
            .collect()
    }

    #[tokio::test]
    async fn test_filter_evaluation() {
        let client = client().await;
        assert_eq!(rows(&client, "qty ge 5").await, vec!["w1", "w2"]);
        assert_eq!(
            rows(&client, "PartitionKey eq 'eu' and (color eq 'red' or qty gt 6)").await,
            vec!["w1", "w2"]
        );
        assert_eq!(rows(&client, "not (color eq 'red')").await, vec!["w2"]);
        assert_eq!(rows(&client, "qty lt 4.5").await, vec!["w3"]);
        assert!(rows(&client, "missing eq 1").await.is_empty());
        assert!(rows(&client, "missing ne 1").await.is_empty());
        assert!(rows(&client, "color eq 1").await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_filters() {
        let client = client().await;
        for filter in ["qty", "qty like 3", "(qty eq 3", "qty eq 3 3", "name eq 'open"] {
            let options = QueryOptions {
                filter: Some(filter.into()),
                ..QueryOptions::default()
            };
            let err = client.query_entities("widgets", options).await.unwrap_err();
            assert!(matches!(err, ClientError::Validation(_)), "{}", filter);
        }
    }

    #[tokio::test]
    async fn test_paging_with_continuation() {
        let client = client().await;
        let first = client
            .query_entities(
                "widgets",
                QueryOptions {
                    top: Some(2),
                    ..QueryOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.entities.len(), 2);
        let next = first.continuation.clone().unwrap();
        assert_eq!(next.next_row_key, "w3");

        let second = client
            .query_entities(
                "widgets",
                QueryOptions {
                    top: Some(2),
                    continuation: Some(next),
                    ..QueryOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.entities.len(), 1);
        assert!(second.continuation.is_none());
    }

    #[tokio::test]
    async fn test_etags_and_existence() {
        let client = client().await;
        let err = client
            .insert_entity("widgets", entity("eu", "w1", 1, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConditionFailed(_)));

        let current = client.get_entity("widgets", "eu", "w1").await.unwrap().unwrap();
        let etag = current.etag.clone().unwrap();
        let merged = client
            .merge_entity(
                "widgets",
                Entity::new("eu", "w1").with_property("size", EdmValue::String("L".into())),
                &etag,
            )
            .await
            .unwrap();
        assert_eq!(merged.properties.len(), 3);

        let err = client
            .update_entity("widgets", entity("eu", "w1", 1, "x"), &etag)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConditionFailed(_)));

        let err = client
            .delete_entity("widgets", "eu", "nope", ANY_ETAG)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_transaction_is_atomic() {
        let client = client().await;
        let err = client
            .submit_transaction(
                "widgets",
                vec![
                    TransactionAction::Insert(entity("eu", "w9", 1, "x")),
                    TransactionAction::Insert(entity("eu", "w1", 1, "x")),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConditionFailed(ref m) if m.starts_with("operation 1")));
        assert!(client.get_entity("widgets", "eu", "w9").await.unwrap().is_none());

        let err = client
            .submit_transaction(
                "widgets",
                vec![
                    TransactionAction::Insert(entity("eu", "w8", 1, "x")),
                    TransactionAction::Insert(entity("us", "w9", 1, "x")),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }
}
