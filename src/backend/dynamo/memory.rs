//! In-memory DynamoDB-style client
//!
//! Evaluates condition maps, conditional writes, batch ceilings and pagination the
//! way the service does. A missing or `NULL` attribute satisfies only the `NULL`
//! operator. `leave_unprocessed` makes upcoming batch calls hand back their last
//! request unprocessed, as a throttled service would.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;

use crate::backend::dynamo::client::{
    AttributeAction, AttributeValue, BatchGetOutput, BatchWriteOutput, ComparisonOperator,
    Condition, ConditionMap, CreateTableInput, DynamoClient, Expected, ExpectedMap, Item,
    KeyType, QueryInput, ScanInput, ScanOutput, Select, TableDescription, UpdateTableInput,
    WriteRequest,
};
use crate::backend::{ClientError, ClientResult};

const MAX_BATCH_WRITE: usize = 25;
const MAX_BATCH_GET: usize = 100;

#[derive(Debug)]
struct MemoryTable {
    description: TableDescription,
    items: BTreeMap<String, Item>,
}

impl MemoryTable {
    fn encode_key(&self, item: &Item) -> ClientResult<String> {
        let mut parts = Vec::with_capacity(self.description.key_schema.len());
        for element in &self.description.key_schema {
            let value = item.get(&element.attribute_name).ok_or_else(|| {
                ClientError::Validation(format!(
                    "missing key attribute '{}'",
                    element.attribute_name
                ))
            })?;
            parts.push(match value {
                AttributeValue::N(n) => format!("N:{}", decimal(n)?.normalize()),
                AttributeValue::S(s) => format!("S:{}", s),
                AttributeValue::B(b) => format!("B:{}", b),
                other => {
                    return Err(ClientError::Validation(format!(
                        "key attribute '{}' cannot be of type {}",
                        element.attribute_name,
                        other.type_code()
                    )));
                }
            });
        }
        Ok(parts.join("\u{1f}"))
    }

    fn key_names(&self) -> Vec<&str> {
        self.description
            .key_schema
            .iter()
            .map(|k| k.attribute_name.as_str())
            .collect()
    }

    fn key_of(&self, item: &Item) -> Item {
        self.key_names()
            .into_iter()
            .filter_map(|name| item.get(name).map(|v| (name.to_string(), v.clone())))
            .collect()
    }

    fn hash_name(&self) -> Option<&str> {
        self.description
            .key_schema
            .iter()
            .find(|k| k.key_type == KeyType::Hash)
            .map(|k| k.attribute_name.as_str())
    }
}

/// Thread-safe in-memory implementation of [`DynamoClient`]
#[derive(Debug, Default)]
pub struct MemoryDynamoClient {
    tables: RwLock<BTreeMap<String, MemoryTable>>,
    unprocessed_batches: AtomicUsize,
    operations: Mutex<Vec<String>>,
}

impl MemoryDynamoClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `batches` batch calls leave their last request unprocessed
    pub fn leave_unprocessed(&self, batches: usize) {
        self.unprocessed_batches.store(batches, AtomicOrdering::SeqCst);
    }

    /// Names of the native operations issued so far
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }

    fn record(&self, operation: &str) {
        self.operations.lock().push(operation.to_string());
    }

    fn take_unprocessed(&self) -> bool {
        self.unprocessed_batches
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn missing_table(table: &str) -> ClientError {
        ClientError::ResourceNotFound(format!("Requested resource not found: Table: {} not found", table))
    }

    fn page(
        &self,
        table: &MemoryTable,
        candidates: Vec<(&String, &Item)>,
        filter: &ConditionMap,
        select: Select,
        limit: Option<usize>,
        start: Option<&Item>,
    ) -> ClientResult<ScanOutput> {
        let start_key = start.map(|k| table.encode_key(k)).transpose()?;
        let remaining: Vec<_> = candidates
            .into_iter()
            .filter(|(key, _)| start_key.as_ref().is_none_or(|s| key.as_str() > s.as_str()))
            .collect();

        let take = limit.unwrap_or(usize::MAX).max(1);
        let evaluated: Vec<_> = remaining.iter().take(take).collect();
        let last_evaluated_key = if remaining.len() > evaluated.len() {
            evaluated.last().map(|(_, item)| table.key_of(item))
        } else {
            None
        };

        let mut items = Vec::new();
        for (_, item) in evaluated {
            if matches_all(item, filter)? {
                items.push((*item).clone());
            }
        }
        let count = items.len() as u64;
        if select == Select::Count {
            items.clear();
        }
        Ok(ScanOutput {
            items,
            count,
            last_evaluated_key,
        })
    }
}

#[async_trait]
impl DynamoClient for MemoryDynamoClient {
    async fn describe_table(&self, table: &str) -> ClientResult<TableDescription> {
        self.record("DescribeTable");
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| Self::missing_table(table))?;
        let mut description = t.description.clone();
        description.item_count = t.items.len() as u64;
        Ok(description)
    }

    async fn create_table(&self, input: CreateTableInput) -> ClientResult<TableDescription> {
        self.record("CreateTable");
        let hash_count = input
            .key_schema
            .iter()
            .filter(|k| k.key_type == KeyType::Hash)
            .count();
        if hash_count != 1 || input.key_schema.len() > 2 {
            return Err(ClientError::Validation(
                "key schema needs exactly one HASH and at most one RANGE element".into(),
            ));
        }
        for element in &input.key_schema {
            if !input
                .attribute_definitions
                .iter()
                .any(|d| d.attribute_name == element.attribute_name)
            {
                return Err(ClientError::Validation(format!(
                    "no attribute definition for key '{}'",
                    element.attribute_name
                )));
            }
        }
        let mut tables = self.tables.write();
        if tables.contains_key(&input.table_name) {
            return Err(ClientError::ResourceInUse(format!(
                "Table already exists: {}",
                input.table_name
            )));
        }
        let description = TableDescription {
            table_name: input.table_name.clone(),
            key_schema: input.key_schema,
            attribute_definitions: input.attribute_definitions,
            table_status: "ACTIVE".to_string(),
            item_count: 0,
            read_capacity_units: input.read_capacity_units,
            write_capacity_units: input.write_capacity_units,
        };
        tables.insert(
            input.table_name,
            MemoryTable {
                description: description.clone(),
                items: BTreeMap::new(),
            },
        );
        Ok(description)
    }

    async fn update_table(&self, input: UpdateTableInput) -> ClientResult<TableDescription> {
        self.record("UpdateTable");
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(&input.table_name)
            .ok_or_else(|| Self::missing_table(&input.table_name))?;
        if let Some(read) = input.read_capacity_units {
            t.description.read_capacity_units = read;
        }
        if let Some(write) = input.write_capacity_units {
            t.description.write_capacity_units = write;
        }
        let mut description = t.description.clone();
        description.item_count = t.items.len() as u64;
        Ok(description)
    }

    async fn delete_table(&self, table: &str) -> ClientResult<TableDescription> {
        self.record("DeleteTable");
        let mut tables = self.tables.write();
        let t = tables.remove(table).ok_or_else(|| Self::missing_table(table))?;
        let mut description = t.description;
        description.table_status = "DELETING".to_string();
        Ok(description)
    }

    async fn list_tables(&self) -> ClientResult<Vec<String>> {
        self.record("ListTables");
        Ok(self.tables.read().keys().cloned().collect())
    }

    async fn get_item(&self, table: &str, key: Item) -> ClientResult<Option<Item>> {
        self.record("GetItem");
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| Self::missing_table(table))?;
        let encoded = t.encode_key(&key)?;
        Ok(t.items.get(&encoded).cloned())
    }

    async fn put_item(&self, table: &str, item: Item, expected: ExpectedMap) -> ClientResult<()> {
        self.record("PutItem");
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| Self::missing_table(table))?;
        let encoded = t.encode_key(&item)?;
        check_expected(t.items.get(&encoded), &expected)?;
        t.items.insert(encoded, item);
        Ok(())
    }

    async fn update_item(
        &self,
        table: &str,
        key: Item,
        updates: BTreeMap<String, AttributeAction>,
        expected: ExpectedMap,
    ) -> ClientResult<Item> {
        self.record("UpdateItem");
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| Self::missing_table(table))?;
        let encoded = t.encode_key(&key)?;
        check_expected(t.items.get(&encoded), &expected)?;
        let key_names: Vec<String> = t.key_names().into_iter().map(String::from).collect();
        if let Some(name) = updates.keys().find(|n| key_names.contains(n)) {
            return Err(ClientError::Validation(format!(
                "cannot update key attribute '{}'",
                name
            )));
        }

        let mut item = t.items.get(&encoded).cloned().unwrap_or(key);
        for (name, action) in updates {
            match action {
                AttributeAction::Put(value) => {
                    item.insert(name, value);
                }
                AttributeAction::Delete => {
                    item.remove(&name);
                }
            }
        }
        t.items.insert(encoded, item.clone());
        Ok(item)
    }

    async fn delete_item(
        &self,
        table: &str,
        key: Item,
        expected: ExpectedMap,
    ) -> ClientResult<Option<Item>> {
        self.record("DeleteItem");
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| Self::missing_table(table))?;
        let encoded = t.encode_key(&key)?;
        check_expected(t.items.get(&encoded), &expected)?;
        Ok(t.items.remove(&encoded))
    }

    async fn batch_get_item(&self, table: &str, keys: Vec<Item>) -> ClientResult<BatchGetOutput> {
        self.record("BatchGetItem");
        if keys.is_empty() || keys.len() > MAX_BATCH_GET {
            return Err(ClientError::Validation(format!(
                "batch get takes 1 to {} keys, got {}",
                MAX_BATCH_GET,
                keys.len()
            )));
        }
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| Self::missing_table(table))?;

        let mut seen = HashSet::new();
        for key in &keys {
            if !seen.insert(t.encode_key(key)?) {
                return Err(ClientError::Validation(
                    "Provided list of item keys contains duplicates".into(),
                ));
            }
        }

        let mut keys = keys;
        let unprocessed_keys = if self.take_unprocessed() {
            keys.pop().into_iter().collect()
        } else {
            Vec::new()
        };
        let mut items = Vec::new();
        for key in &keys {
            if let Some(item) = t.items.get(&t.encode_key(key)?) {
                items.push(item.clone());
            }
        }
        Ok(BatchGetOutput {
            items,
            unprocessed_keys,
        })
    }

    async fn batch_write_item(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> ClientResult<BatchWriteOutput> {
        self.record("BatchWriteItem");
        if requests.is_empty() || requests.len() > MAX_BATCH_WRITE {
            return Err(ClientError::Validation(format!(
                "batch write takes 1 to {} requests, got {}",
                MAX_BATCH_WRITE,
                requests.len()
            )));
        }
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| Self::missing_table(table))?;

        let mut seen = HashSet::new();
        for request in &requests {
            let item = match request {
                WriteRequest::Put(item) | WriteRequest::Delete(item) => item,
            };
            if !seen.insert(t.encode_key(item)?) {
                return Err(ClientError::Validation(
                    "Provided list of item keys contains duplicates".into(),
                ));
            }
        }

        let mut requests = requests;
        let unprocessed_items = if self.take_unprocessed() {
            requests.pop().into_iter().collect()
        } else {
            Vec::new()
        };
        for request in requests {
            match request {
                WriteRequest::Put(item) => {
                    let encoded = t.encode_key(&item)?;
                    t.items.insert(encoded, item);
                }
                WriteRequest::Delete(key) => {
                    let encoded = t.encode_key(&key)?;
                    t.items.remove(&encoded);
                }
            }
        }
        Ok(BatchWriteOutput { unprocessed_items })
    }

    async fn query(&self, input: QueryInput) -> ClientResult<ScanOutput> {
        self.record("Query");
        let tables = self.tables.read();
        let t = tables
            .get(&input.table_name)
            .ok_or_else(|| Self::missing_table(&input.table_name))?;

        let hash = t.hash_name().unwrap_or_default();
        let key_names = t.key_names();
        match input.key_conditions.get(hash) {
            Some(c) if c.comparison_operator == ComparisonOperator::Eq => {}
            _ => {
                return Err(ClientError::Validation(format!(
                    "query requires an EQ key condition on '{}'",
                    hash
                )));
            }
        }
        for (name, condition) in &input.key_conditions {
            if !key_names.contains(&name.as_str()) || !condition.comparison_operator.is_key_condition() {
                return Err(ClientError::Validation(format!(
                    "invalid key condition on '{}'",
                    name
                )));
            }
        }

        let mut candidates = Vec::new();
        for (key, item) in &t.items {
            if matches_all(item, &input.key_conditions)? {
                candidates.push((key, item));
            }
        }
        self.page(
            t,
            candidates,
            &input.query_filter,
            input.select,
            input.limit,
            input.exclusive_start_key.as_ref(),
        )
    }

    async fn scan(&self, input: ScanInput) -> ClientResult<ScanOutput> {
        self.record("Scan");
        let tables = self.tables.read();
        let t = tables
            .get(&input.table_name)
            .ok_or_else(|| Self::missing_table(&input.table_name))?;
        let candidates = t.items.iter().collect();
        self.page(
            t,
            candidates,
            &input.scan_filter,
            input.select,
            input.limit,
            input.exclusive_start_key.as_ref(),
        )
    }
}

fn check_expected(current: Option<&Item>, expected: &ExpectedMap) -> ClientResult<()> {
    for (name, expectation) in expected {
        let exists = current.is_some_and(|item| item.contains_key(name));
        match expectation {
            Expected::Exists if !exists => {
                return Err(ClientError::ConditionFailed(format!(
                    "attribute '{}' does not exist",
                    name
                )));
            }
            Expected::NotExists if exists => {
                return Err(ClientError::ConditionFailed(format!(
                    "attribute '{}' already exists",
                    name
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn matches_all(item: &Item, conditions: &ConditionMap) -> ClientResult<bool> {
    for (name, condition) in conditions {
        let attribute = item
            .get(name)
            .filter(|v| !matches!(v, AttributeValue::Null(_)));
        if !check(attribute, condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn check(attribute: Option<&AttributeValue>, condition: &Condition) -> ClientResult<bool> {
    use ComparisonOperator as Op;
    let values = &condition.attribute_value_list;
    let op = condition.comparison_operator;
    let arity_ok = match op {
        Op::Null | Op::NotNull => values.is_empty(),
        Op::In => !values.is_empty(),
        Op::Between => values.len() == 2,
        _ => values.len() == 1,
    };
    if !arity_ok {
        return Err(ClientError::Validation(format!(
            "invalid number of argument(s) for the {:?} ComparisonOperator",
            op
        )));
    }

    let Some(attribute) = attribute else {
        return Ok(op == Op::Null);
    };
    Ok(match op {
        Op::Null => false,
        Op::NotNull => true,
        Op::Eq => equal(attribute, &values[0])?,
        Op::Ne => !equal(attribute, &values[0])?,
        Op::Lt => compare(attribute, &values[0])? == Some(Ordering::Less),
        Op::Le => matches!(
            compare(attribute, &values[0])?,
            Some(Ordering::Less | Ordering::Equal)
        ),
        Op::Gt => compare(attribute, &values[0])? == Some(Ordering::Greater),
        Op::Ge => matches!(
            compare(attribute, &values[0])?,
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Op::In => {
            let mut found = false;
            for value in values {
                if equal(attribute, value)? {
                    found = true;
                    break;
                }
            }
            found
        }
        Op::Between => {
            matches!(
                compare(attribute, &values[0])?,
                Some(Ordering::Greater | Ordering::Equal)
            ) && matches!(
                compare(attribute, &values[1])?,
                Some(Ordering::Less | Ordering::Equal)
            )
        }
        Op::BeginsWith => match (attribute, &values[0]) {
            (AttributeValue::S(a), AttributeValue::S(p)) | (AttributeValue::B(a), AttributeValue::B(p)) => {
                a.starts_with(p.as_str())
            }
            _ => false,
        },
        Op::Contains => contains(attribute, &values[0])?,
        Op::NotContains => !contains(attribute, &values[0])?,
    })
}

fn decimal(n: &str) -> ClientResult<Decimal> {
    Decimal::from_str(n)
        .or_else(|_| Decimal::from_scientific(n))
        .map_err(|_| ClientError::Validation(format!("'{}' is not a valid number", n)))
}

fn compare(a: &AttributeValue, b: &AttributeValue) -> ClientResult<Option<Ordering>> {
    Ok(match (a, b) {
        (AttributeValue::N(x), AttributeValue::N(y)) => Some(decimal(x)?.cmp(&decimal(y)?)),
        (AttributeValue::S(x), AttributeValue::S(y)) | (AttributeValue::B(x), AttributeValue::B(y)) => {
            Some(x.cmp(y))
        }
        _ => None,
    })
}

fn equal(a: &AttributeValue, b: &AttributeValue) -> ClientResult<bool> {
    Ok(match (a, b) {
        (AttributeValue::N(_), AttributeValue::N(_))
        | (AttributeValue::S(_), AttributeValue::S(_))
        | (AttributeValue::B(_), AttributeValue::B(_)) => compare(a, b)? == Some(Ordering::Equal),
        _ => a == b,
    })
}

fn contains(attribute: &AttributeValue, needle: &AttributeValue) -> ClientResult<bool> {
    Ok(match (attribute, needle) {
        (AttributeValue::S(s), AttributeValue::S(n)) => s.contains(n.as_str()),
        (AttributeValue::Ss(items), AttributeValue::S(n)) => items.contains(n),
        (AttributeValue::Ns(items), AttributeValue::N(n)) => {
            let n = decimal(n)?;
            let mut found = false;
            for item in items {
                if decimal(item)? == n {
                    found = true;
                    break;
                }
            }
            found
        }
        (AttributeValue::L(items), _) => {
            let mut found = false;
            for item in items {
                if equal(item, needle)? {
                    found = true;
                    break;
                }
            }
            found
        }
        _ => false,
    })
}
