//! DynamoDB-like backend
//!
//! Records map onto typed attribute items. Single-record and rollback writes use
//! conditional `PutItem`/`UpdateItem`/`DeleteItem`; plain batches go through
//! `BatchWriteItem` in chunks, resubmitting unprocessed items with backoff. Batch
//! creates read their keys with `BatchGetItem` first so existing records are
//! reported as conflicts rather than overwritten. Filters
//! become legacy condition maps: one native request per OR branch, run as a `Query`
//! when the branch pins the hash key and as a `Scan` otherwise.

pub mod client;
pub mod memory;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

pub use client::{
    AttributeAction, AttributeValue, ComparisonOperator, Condition, ConditionMap, DynamoClient,
    Expected, ExpectedMap, Item, Select, TableDescription, WriteRequest,
};
pub use memory::MemoryDynamoClient;

use crate::adapter::{
    BackendAdapter, BatchCollector, QueryResult, RecordResult, TableInfo, TableSpec,
    first_failure, record_exists, record_not_found,
};
use crate::backend::dynamo::client::{
    AttributeDefinition, CreateTableInput, KeySchemaElement, KeyType, QueryInput, ScanInput,
    UpdateTableInput,
};
use crate::backend::{ClientError, retry_delay};
use crate::config::StoreConfig;
use crate::error::{RecordStoreError, Result};
use crate::extras::ExtrasConfig;
use crate::filter::Predicate;
use crate::key::{KeyCache, KeyDescriptor, KeyRole, resolve_from_metadata};
use crate::normalize::{IdGenerator, RandomIdGenerator, identity_key, identity_of};
use crate::projector::{finish_query, structured, validate_table_name};
use crate::types::{PrimitiveType, Record, Value, WireFormat};

const DEFAULT_CAPACITY_UNITS: u64 = 5;

/// Adapter over a [`DynamoClient`]
pub struct DynamoAdapter {
    client: Arc<dyn DynamoClient>,
    config: StoreConfig,
    keys: KeyCache,
    ids: Box<dyn IdGenerator>,
}

impl DynamoAdapter {
    pub fn new(client: Arc<dyn DynamoClient>, config: StoreConfig) -> Self {
        let keys = KeyCache::new(config.cache_key_descriptors);
        Self {
            client,
            config,
            keys,
            ids: Box::new(RandomIdGenerator),
        }
    }

    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    /// Conditional `PutItem` of one record
    async fn put_one(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        record: Record,
        expected: Expected,
    ) -> RecordResult {
        match self
            .client
            .put_item(table, to_item(&record, desc), expected_map(desc, expected))
            .await
        {
            Ok(_) => Ok(record),
            Err(ClientError::ConditionFailed(_)) => Err(match expected {
                Expected::NotExists => record_exists(table, &identity_of(&record, desc)),
                Expected::Exists => record_not_found(table, &identity_of(&record, desc)),
            }),
            Err(other) => Err(RecordStoreError::backend(table, other)),
        }
    }

    /// Conditional single-item writes, one record at a time
    async fn put_each(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        expected: Expected,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let operation = match expected {
            Expected::NotExists => "create",
            Expected::Exists => "update",
        };
        let mut collector = BatchCollector::new(table, operation, records.len(), extras.rollback);
        for record in records {
            collector.push(self.put_one(table, desc, record, expected).await)?;
        }
        Ok(collector.finish())
    }

    /// Batch create. `BatchWriteItem` cannot carry conditions, so existing keys are
    /// read first and reported as conflicts; keys that read could not settle are
    /// written with a conditional put instead.
    async fn create_in_batches(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
    ) -> Vec<RecordResult> {
        let (existing, unsettled) = self.existing_identities(table, desc, &records).await;

        let mut results: Vec<Option<RecordResult>> = (0..records.len()).map(|_| None).collect();
        let mut batched = Vec::new();
        let mut batched_at = Vec::new();
        for (i, record) in records.into_iter().enumerate() {
            let id = identity_key(&record, desc);
            if existing.contains(&id) {
                results[i] = Some(Err(record_exists(table, &identity_of(&record, desc))));
            } else if unsettled.contains(&id) {
                results[i] = Some(self.put_one(table, desc, record, Expected::NotExists).await);
            } else {
                batched_at.push(i);
                batched.push(record);
            }
        }
        if !existing.is_empty() {
            debug!(
                "dynamo: {} of the records to create already exist in '{}'",
                existing.len(),
                table
            );
        }

        let written = self.write_in_batches(table, desc, batched, false).await;
        for (i, result) in batched_at.into_iter().zip(written) {
            results[i] = Some(result);
        }
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(RecordStoreError::bad_request("record was not submitted"))))
            .collect()
    }

    /// Identities among `records` that already exist, and those the batch read
    /// could not settle (left unprocessed or failed)
    async fn existing_identities(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: &[Record],
    ) -> (HashSet<String>, HashSet<String>) {
        let mut existing = HashSet::new();
        let mut unsettled = HashSet::new();
        let mut seen = HashSet::new();
        let unique: Vec<&Record> = records
            .iter()
            .filter(|r| seen.insert(identity_key(r, desc)))
            .collect();
        for chunk in unique.chunks(self.config.batch_read_limit) {
            let keys = chunk.iter().map(|r| key_item(r, desc)).collect();
            match self.fetch_batch(table, keys).await {
                Ok((items, left)) => {
                    existing.extend(items.iter().map(|item| item_identity(item, desc)));
                    unsettled.extend(left.iter().map(|key| item_identity(key, desc)));
                }
                Err(e) => {
                    warn!("dynamo: existence check on '{}' failed: {}", table, e);
                    unsettled.extend(chunk.iter().map(|r| identity_key(r, desc)));
                }
            }
        }
        (existing, unsettled)
    }

    /// Chunked `BatchWriteItem`; records repeating an identity already in the batch
    /// are rejected in place
    async fn write_in_batches(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        delete: bool,
    ) -> Vec<RecordResult> {
        let mut results: Vec<Option<RecordResult>> = Vec::with_capacity(records.len());
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for (i, record) in records.iter().enumerate() {
            if seen.insert(identity_key(record, desc)) {
                results.push(None);
                accepted.push(i);
            } else {
                results.push(Some(Err(RecordStoreError::conflict(format!(
                    "Record ({}) appears more than once in the batch",
                    identity_key(record, desc).replace('\u{1f}', ", ")
                )))));
            }
        }

        for chunk in accepted.chunks(self.config.batch_write_limit) {
            let requests = chunk
                .iter()
                .map(|&i| {
                    if delete {
                        WriteRequest::Delete(key_item(&records[i], desc))
                    } else {
                        WriteRequest::Put(to_item(&records[i], desc))
                    }
                })
                .collect();
            let outcome = self.submit_writes(table, desc, requests).await;
            for &i in chunk {
                let result = match &outcome {
                    Ok(unprocessed) if unprocessed.contains(&identity_key(&records[i], desc)) => {
                        Err(RecordStoreError::backend(
                            table,
                            ClientError::Throttled("write left unprocessed after retries".into()),
                        ))
                    }
                    Ok(_) => Ok(records[i].clone()),
                    Err(e) => Err(RecordStoreError::backend(table, e.clone())),
                };
                results[i] = Some(result);
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(RecordStoreError::bad_request("record was not submitted"))))
            .collect()
    }

    /// Submit one batch, resubmitting unprocessed requests. Returns identities still
    /// unprocessed when retries run out.
    async fn submit_writes(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        requests: Vec<WriteRequest>,
    ) -> std::result::Result<HashSet<String>, ClientError> {
        let mut pending = requests;
        let mut attempt = 0;
        loop {
            debug!("dynamo: batch write of {} items to '{}'", pending.len(), table);
            pending = self
                .client
                .batch_write_item(table, pending)
                .await?
                .unprocessed_items;
            if pending.is_empty() {
                return Ok(HashSet::new());
            }
            if attempt >= self.config.max_batch_retries {
                warn!(
                    "dynamo: {} writes to '{}' still unprocessed after {} retries",
                    pending.len(),
                    table,
                    attempt
                );
                return Ok(pending
                    .iter()
                    .map(|request| match request {
                        WriteRequest::Put(item) | WriteRequest::Delete(item) => {
                            item_identity(item, desc)
                        }
                    })
                    .collect());
            }
            let delay = retry_delay(&self.config, attempt);
            warn!(
                "dynamo: {} unprocessed writes to '{}', retrying in {:?}",
                pending.len(),
                table,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// `BatchGetItem` with resubmission of unprocessed keys
    async fn fetch_batch(
        &self,
        table: &str,
        keys: Vec<Item>,
    ) -> std::result::Result<(Vec<Item>, Vec<Item>), ClientError> {
        let mut found = Vec::new();
        let mut pending = keys;
        let mut attempt = 0;
        loop {
            let output = self.client.batch_get_item(table, pending).await?;
            found.extend(output.items);
            pending = output.unprocessed_keys;
            if pending.is_empty() || attempt >= self.config.max_batch_retries {
                if !pending.is_empty() {
                    warn!(
                        "dynamo: {} reads from '{}' still unprocessed after {} retries",
                        pending.len(),
                        table,
                        attempt
                    );
                }
                return Ok((found, pending));
            }
            tokio::time::sleep(retry_delay(&self.config, attempt)).await;
            attempt += 1;
        }
    }

    /// Run one OR branch to exhaustion; returns the items and the native count
    async fn run_branch(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        branch: &ConditionMap,
        select: Select,
    ) -> Result<(Vec<Item>, u64)> {
        let (key_conditions, filter) = split_key_conditions(branch, desc);
        let use_query = !key_conditions.is_empty();
        debug!(
            "dynamo: {} '{}' with {} key and {} filter conditions",
            if use_query { "query" } else { "scan" },
            table,
            key_conditions.len(),
            filter.len()
        );

        let mut items = Vec::new();
        let mut count = 0;
        let mut start = None;
        loop {
            let page = if use_query {
                self.client
                    .query(QueryInput {
                        table_name: table.to_string(),
                        key_conditions: key_conditions.clone(),
                        query_filter: filter.clone(),
                        select,
                        limit: Some(self.config.page_size),
                        exclusive_start_key: start.take(),
                    })
                    .await
            } else {
                self.client
                    .scan(ScanInput {
                        table_name: table.to_string(),
                        scan_filter: filter.clone(),
                        select,
                        limit: Some(self.config.page_size),
                        exclusive_start_key: start.take(),
                    })
                    .await
            };
            let page = page.map_err(|e| RecordStoreError::backend(table, e))?;

            count += page.count;
            items.extend(page.items);
            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        Ok((items, count))
    }
}

#[async_trait]
impl BackendAdapter for DynamoAdapter {
    fn name(&self) -> &'static str {
        "dynamo"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Structured
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn key_cache(&self) -> &KeyCache {
        &self.keys
    }

    fn id_generator(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    async fn describe_keys(&self, table: &str) -> Result<KeyDescriptor> {
        let description = self
            .client
            .describe_table(table)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        describe_key(&description)
    }

    async fn create_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        if extras.rollback || records.len() == 1 {
            return self
                .put_each(table, desc, records, Expected::NotExists, extras)
                .await;
        }
        Ok(self.create_in_batches(table, desc, records).await)
    }

    async fn update_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        self.put_each(table, desc, records, Expected::Exists, extras)
            .await
    }

    async fn merge_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let mut collector = BatchCollector::new(table, "merge", records.len(), extras.rollback);
        for record in records {
            let key = identity_of(&record, desc);
            let updates: BTreeMap<String, AttributeAction> = record
                .iter()
                .filter(|(name, _)| !desc.is_identity(name) && !desc.is_managed(name))
                .map(|(name, value)| {
                    let action = if value.is_null() {
                        AttributeAction::Delete
                    } else {
                        AttributeAction::Put(AttributeValue::from_value(value))
                    };
                    (name.clone(), action)
                })
                .collect();

            let result = if updates.is_empty() {
                match self.client.get_item(table, key_item(&record, desc)).await {
                    Ok(Some(item)) => Ok(to_record(item)),
                    Ok(None) => Err(record_not_found(table, &key)),
                    Err(e) => Err(RecordStoreError::backend(table, e)),
                }
            } else {
                self.client
                    .update_item(table, key_item(&record, desc), updates, expected_map(desc, Expected::Exists))
                    .await
                    .map(to_record)
                    .map_err(|e| match e {
                        ClientError::ConditionFailed(_) => record_not_found(table, &key),
                        other => RecordStoreError::backend(table, other),
                    })
            };
            collector.push(result)?;
        }
        Ok(collector.finish())
    }

    async fn delete_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        keys: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        if !extras.rollback && keys.len() > 1 {
            return Ok(self.write_in_batches(table, desc, keys, true).await);
        }
        let mut collector = BatchCollector::new(table, "delete", keys.len(), extras.rollback);
        for key in keys {
            let result = match self
                .client
                .delete_item(table, key_item(&key, desc), expected_map(desc, Expected::Exists))
                .await
            {
                Ok(Some(item)) => Ok(to_record(item)),
                Ok(None) | Err(ClientError::ConditionFailed(_)) => {
                    Err(record_not_found(table, &identity_of(&key, desc)))
                }
                Err(e) => Err(RecordStoreError::backend(table, e)),
            };
            collector.push(result)?;
        }
        Ok(collector.finish())
    }

    async fn retrieve_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        keys: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        if let [key] = keys.as_slice() {
            let result = match self.client.get_item(table, key_item(key, desc)).await {
                Ok(Some(item)) => Ok(to_record(item)),
                Ok(None) => Err(record_not_found(table, &identity_of(key, desc))),
                Err(e) => Err(RecordStoreError::backend(table, e)),
            };
            return first_failure(vec![result], extras.rollback);
        }

        let mut found: HashMap<String, Item> = HashMap::new();
        let mut unprocessed: HashSet<String> = HashSet::new();
        let mut failed: HashMap<String, ClientError> = HashMap::new();

        let mut unique: Vec<&Record> = Vec::new();
        let mut seen = HashSet::new();
        for key in &keys {
            if seen.insert(identity_key(key, desc)) {
                unique.push(key);
            }
        }

        for chunk in unique.chunks(self.config.batch_read_limit) {
            let items = chunk.iter().map(|k| key_item(k, desc)).collect();
            debug!("dynamo: batch get of {} keys from '{}'", chunk.len(), table);
            match self.fetch_batch(table, items).await {
                Ok((items, left)) => {
                    for item in items {
                        found.insert(item_identity(&item, desc), item);
                    }
                    unprocessed.extend(left.iter().map(|k| item_identity(k, desc)));
                }
                Err(e) => {
                    for key in chunk {
                        failed.insert(identity_key(key, desc), e.clone());
                    }
                }
            }
        }

        let results = keys
            .iter()
            .map(|key| {
                let id = identity_key(key, desc);
                if let Some(item) = found.get(&id) {
                    Ok(to_record(item.clone()))
                } else if let Some(e) = failed.get(&id) {
                    Err(RecordStoreError::backend(table, e.clone()))
                } else if unprocessed.contains(&id) {
                    Err(RecordStoreError::backend(
                        table,
                        ClientError::Throttled("read left unprocessed after retries".into()),
                    ))
                } else {
                    Err(record_not_found(table, &identity_of(key, desc)))
                }
            })
            .collect();
        first_failure(results, extras.rollback)
    }

    async fn query_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        filter: Option<&Predicate>,
        extras: &ExtrasConfig,
    ) -> Result<QueryResult> {
        let branches = match filter {
            Some(predicate) => {
                structured::project(predicate, desc, self.config.max_filter_branches)?.branches
            }
            None => vec![ConditionMap::new()],
        };

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for branch in &branches {
            let (items, _) = self
                .run_branch(table, desc, branch, Select::AllAttributes)
                .await?;
            for item in items {
                let record = to_record(item);
                if seen.insert(identity_key(&record, desc)) {
                    records.push(record);
                }
            }
        }

        let mut result = finish_query(records, extras);
        if let (true, [branch]) = (extras.include_count, branches.as_slice()) {
            let (_, count) = self.run_branch(table, desc, branch, Select::Count).await?;
            result.count = Some(count);
        }
        Ok(result)
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        validate_table_name(&spec.name, WireFormat::Structured).map_err(RecordStoreError::bad_request)?;
        let key = spec.key.as_ref().ok_or_else(|| {
            RecordStoreError::bad_request(format!("Table '{}' needs a key definition", spec.name))
        })?;

        let input = CreateTableInput {
            table_name: spec.name.clone(),
            key_schema: key
                .fields()
                .iter()
                .map(|f| KeySchemaElement {
                    attribute_name: f.name.clone(),
                    key_type: match f.role {
                        KeyRole::Range => KeyType::Range,
                        KeyRole::Hash | KeyRole::Synthetic => KeyType::Hash,
                    },
                })
                .collect(),
            attribute_definitions: key
                .fields()
                .iter()
                .map(|f| AttributeDefinition {
                    attribute_name: f.name.clone(),
                    attribute_type: f.primitive_type.into(),
                })
                .collect(),
            read_capacity_units: spec
                .option_u64("read_capacity")
                .unwrap_or(DEFAULT_CAPACITY_UNITS),
            write_capacity_units: spec
                .option_u64("write_capacity")
                .unwrap_or(DEFAULT_CAPACITY_UNITS),
        };
        let description = self.client.create_table(input).await.map_err(|e| match e {
            ClientError::ResourceInUse(msg) => RecordStoreError::conflict(msg),
            other => RecordStoreError::backend(&spec.name, other),
        })?;
        self.keys.invalidate(&spec.name);
        info!("dynamo: created table '{}'", spec.name);
        table_info(description)
    }

    async fn get_table(&self, table: &str) -> Result<TableInfo> {
        let description = self
            .client
            .describe_table(table)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        table_info(description)
    }

    async fn update_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        let input = UpdateTableInput {
            table_name: spec.name.clone(),
            read_capacity_units: spec.option_u64("read_capacity"),
            write_capacity_units: spec.option_u64("write_capacity"),
        };
        let description = self
            .client
            .update_table(input)
            .await
            .map_err(|e| RecordStoreError::backend(&spec.name, e))?;
        self.keys.invalidate(&spec.name);
        info!("dynamo: updated table '{}'", spec.name);
        table_info(description)
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        self.client
            .delete_table(table)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        self.keys.invalidate(table);
        info!("dynamo: deleted table '{}'", table);
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.client
            .list_tables()
            .await
            .map_err(|e| RecordStoreError::backend("*", e))
    }
}

fn describe_key(description: &TableDescription) -> Result<KeyDescriptor> {
    let schema: Vec<(String, KeyRole)> = description
        .key_schema
        .iter()
        .map(|k| {
            let role = match k.key_type {
                KeyType::Hash => KeyRole::Hash,
                KeyType::Range => KeyRole::Range,
            };
            (k.attribute_name.clone(), role)
        })
        .collect();
    let types: Vec<(String, PrimitiveType)> = description
        .attribute_definitions
        .iter()
        .map(|d| (d.attribute_name.clone(), d.attribute_type.into()))
        .collect();
    resolve_from_metadata(&description.table_name, &schema, &types)
}

fn table_info(description: TableDescription) -> Result<TableInfo> {
    let key = describe_key(&description)?;
    let mut info = TableInfo::new(description.table_name);
    info.key = Some(key);
    info.item_count = Some(description.item_count);
    info.properties
        .insert("status".to_string(), Value::from(description.table_status));
    info.properties.insert(
        "read_capacity".to_string(),
        Value::from(description.read_capacity_units),
    );
    info.properties.insert(
        "write_capacity".to_string(),
        Value::from(description.write_capacity_units),
    );
    Ok(info)
}

fn expected_map(desc: &KeyDescriptor, expected: Expected) -> ExpectedMap {
    [(desc.primary().name.clone(), expected)].into_iter().collect()
}

fn encode(name: &str, value: &Value, desc: &KeyDescriptor) -> AttributeValue {
    match desc.field(name) {
        Some(key) => AttributeValue::key(value, key.primitive_type),
        None => AttributeValue::from_value(value),
    }
}

/// Full item; null fields are left out
fn to_item(record: &Record, desc: &KeyDescriptor) -> Item {
    record
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| (name.clone(), encode(name, value, desc)))
        .collect()
}

fn key_item(record: &Record, desc: &KeyDescriptor) -> Item {
    desc.fields()
        .iter()
        .filter_map(|f| {
            record
                .get(&f.name)
                .map(|v| (f.name.clone(), encode(&f.name, v, desc)))
        })
        .collect()
}

fn to_record(item: Item) -> Record {
    item.into_iter()
        .map(|(name, value)| {
            let value = value.to_value();
            (name, value)
        })
        .collect()
}

/// Same form as `identity_key` on the decoded record
fn item_identity(item: &Item, desc: &KeyDescriptor) -> String {
    desc.fields()
        .iter()
        .map(|f| {
            item.get(&f.name)
                .map(|v| v.to_value().to_text())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Move an EQ on the hash key (and a key-capable range condition) into key conditions
fn split_key_conditions(branch: &ConditionMap, desc: &KeyDescriptor) -> (ConditionMap, ConditionMap) {
    let mut filter = branch.clone();
    let mut key_conditions = ConditionMap::new();
    let hash = &desc.primary().name;
    let pins_hash = filter
        .get(hash)
        .is_some_and(|c| c.comparison_operator == ComparisonOperator::Eq);
    if !pins_hash {
        return (key_conditions, filter);
    }
    if let Some(condition) = filter.remove(hash) {
        key_conditions.insert(hash.clone(), condition);
    }
    if let Some(range) = desc.range() {
        let keyable = filter
            .get(&range.name)
            .is_some_and(|c| c.comparison_operator.is_key_condition());
        if keyable {
            if let Some(condition) = filter.remove(&range.name) {
                key_conditions.insert(range.name.clone(), condition);
            }
        }
    }
    (key_conditions, filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;
    use crate::key::FieldKey;
    use std::time::Duration;

    fn orders_key() -> KeyDescriptor {
        KeyDescriptor::new(vec![
            FieldKey::hash("customer", PrimitiveType::String),
            FieldKey::range("placed", PrimitiveType::Number),
        ])
        .unwrap()
    }

    async fn adapter() -> (Arc<MemoryDynamoClient>, DynamoAdapter) {
        let client = Arc::new(MemoryDynamoClient::new());
        let config = StoreConfig::builder()
            .retry_backoff(Duration::from_millis(1))
            .page_size(2)
            .build();
        let adapter = DynamoAdapter::new(client.clone(), config);
        adapter
            .create_table(&TableSpec::new("orders").with_key(orders_key()))
            .await
            .unwrap();
        (client, adapter)
    }

    fn order(customer: &str, placed: i64, total: i64) -> Record {
        Record::new()
            .with("customer", customer)
            .with("placed", placed)
            .with("total", total)
    }

    async fn seed(adapter: &DynamoAdapter) {
        let records = vec![order("a", 1, 10), order("a", 2, 20), order("b", 1, 30)];
        let results = adapter
            .create_records("orders", &orders_key(), records, &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
    }

    // ==================== Key Resolution ====================

    #[tokio::test]
    async fn test_describe_keys_reads_native_schema() {
        let (_, adapter) = adapter().await;
        let desc = adapter.describe_keys("orders").await.unwrap();
        assert_eq!(desc, orders_key());

        let err = adapter.describe_keys("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    // ==================== Writes ====================

    #[tokio::test]
    async fn test_single_create_is_conditional() {
        let (_, adapter) = adapter().await;
        seed(&adapter).await;
        let results = adapter
            .create_records("orders", &orders_key(), vec![order("a", 1, 99)], &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(matches!(results[0], Err(RecordStoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_batch_create_flags_duplicates_in_place() {
        let (_, adapter) = adapter().await;
        let records = vec![order("c", 1, 1), order("c", 1, 2), order("c", 2, 3)];
        let results = adapter
            .create_records("orders", &orders_key(), records, &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(RecordStoreError::Conflict(_))));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_batch_create_reports_existing_records() {
        let (client, adapter) = adapter().await;
        seed(&adapter).await;
        let records = vec![order("a", 1, 99), order("c", 1, 5)];
        let results = adapter
            .create_records("orders", &orders_key(), records, &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(matches!(results[0], Err(RecordStoreError::Conflict(_))));
        assert!(results[1].is_ok());

        let kept = client
            .get_item("orders", key_item(&order("a", 1, 0), &orders_key()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(to_record(kept).get("total"), Some(&Value::from(10)));
    }

    #[tokio::test]
    async fn test_unsettled_existence_falls_back_to_conditional_put() {
        let (client, adapter) = adapter().await;
        seed(&adapter).await;
        // every batch read leaves its last key unprocessed
        client.leave_unprocessed(4);
        let records = vec![order("c", 1, 1), order("a", 1, 99)];
        let results = adapter
            .create_records("orders", &orders_key(), records, &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(RecordStoreError::Conflict(_))));
        assert!(client.operations().iter().any(|op| op.as_str() == "PutItem"));
    }

    #[tokio::test]
    async fn test_unprocessed_writes_are_retried() {
        let (client, adapter) = adapter().await;
        seed(&adapter).await;
        let before = client
            .operations()
            .iter()
            .filter(|op| op.as_str() == "BatchWriteItem")
            .count();
        client.leave_unprocessed(2);
        let keys = vec![order("a", 1, 0), order("a", 2, 0), order("b", 1, 0)];
        let results = adapter
            .delete_records("orders", &orders_key(), keys, &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        let writes = client
            .operations()
            .iter()
            .filter(|op| op.as_str() == "BatchWriteItem")
            .count();
        assert_eq!(writes - before, 3);
        assert_eq!(client.describe_table("orders").await.unwrap().item_count, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_only_the_leftover() {
        let (client, adapter) = adapter().await;
        seed(&adapter).await;
        client.leave_unprocessed(10);
        let keys = vec![order("a", 1, 0), order("a", 2, 0)];
        let results = adapter
            .delete_records("orders", &orders_key(), keys, &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(RecordStoreError::Backend {
                source: ClientError::Throttled(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let (_, adapter) = adapter().await;
        seed(&adapter).await;
        let results = adapter
            .update_records(
                "orders",
                &orders_key(),
                vec![order("a", 1, 11), order("z", 9, 0)],
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        assert!(results[0].is_ok());
        assert!(results[1].as_ref().unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_merge_puts_and_removes_fields() {
        let (_, adapter) = adapter().await;
        seed(&adapter).await;
        let patch = Record::new()
            .with("customer", "a")
            .with("placed", 1)
            .with("total", Value::Null)
            .with("note", "gift");
        let results = adapter
            .merge_records("orders", &orders_key(), vec![patch], &ExtrasConfig::new())
            .await
            .unwrap();
        let merged = results[0].as_ref().unwrap();
        assert_eq!(merged.get("note"), Some(&Value::from("gift")));
        assert!(!merged.contains_key("total"));
    }

    #[tokio::test]
    async fn test_rollback_delete_stops_at_missing_record() {
        let (_, adapter) = adapter().await;
        seed(&adapter).await;
        let keys = vec![
            Record::new().with("customer", "a").with("placed", 1),
            Record::new().with("customer", "z").with("placed", 1),
            Record::new().with("customer", "b").with("placed", 1),
        ];
        let err = adapter
            .delete_records("orders", &orders_key(), keys, &ExtrasConfig::new().with_rollback(true))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        // the record after the failure is untouched
        let left = adapter
            .retrieve_records(
                "orders",
                &orders_key(),
                vec![Record::new().with("customer", "b").with("placed", 1)],
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        assert!(left[0].is_ok());
    }

    // ==================== Reads ====================

    #[tokio::test]
    async fn test_batch_retrieve_keeps_input_order() {
        let (_, adapter) = adapter().await;
        seed(&adapter).await;
        let keys = vec![
            Record::new().with("customer", "b").with("placed", 1),
            Record::new().with("customer", "x").with("placed", 1),
            Record::new().with("customer", "a").with("placed", "2"),
        ];
        let results = adapter
            .retrieve_records("orders", &orders_key(), keys, &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(results[0].as_ref().unwrap().get("total"), Some(&Value::from(30)));
        assert!(results[1].as_ref().unwrap_err().is_not_found());
        assert_eq!(results[2].as_ref().unwrap().get("total"), Some(&Value::from(20)));
    }

    #[tokio::test]
    async fn test_hash_equality_runs_as_query() {
        let (client, adapter) = adapter().await;
        seed(&adapter).await;
        let filter = parse("customer = 'a' and placed >= 2").unwrap();
        let result = adapter
            .query_records("orders", &orders_key(), Some(&filter), &ExtrasConfig::new().with_count())
            .await
            .unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.count, Some(1));
        assert!(client.operations().contains(&"Query".to_string()));
        assert!(!client.operations().contains(&"Scan".to_string()));
    }

    #[tokio::test]
    async fn test_or_branches_are_unioned_without_duplicates() {
        let (_, adapter) = adapter().await;
        seed(&adapter).await;
        let filter = parse("total >= 20 or customer = 'b'").unwrap();
        let extras = ExtrasConfig::new()
            .with_count()
            .with_order(vec![crate::extras::OrderSpec::desc("total")]);
        let result = adapter
            .query_records("orders", &orders_key(), Some(&filter), &extras)
            .await
            .unwrap();
        let totals: Vec<_> = result.records.iter().map(|r| r["total"].clone()).collect();
        assert_eq!(totals, vec![Value::from(30), Value::from(20)]);
        assert_eq!(result.count, Some(2));
    }

    #[tokio::test]
    async fn test_scan_follows_pages() {
        let (_, adapter) = adapter().await;
        seed(&adapter).await;
        // page_size is 2, so the full listing spans two scan pages
        let result = adapter
            .query_records("orders", &orders_key(), None, &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(result.records.len(), 3);
    }

    // ==================== Table Admin ====================

    #[tokio::test]
    async fn test_table_admin_round() {
        let (_, adapter) = adapter().await;
        let err = adapter
            .create_table(&TableSpec::new("orders").with_key(orders_key()))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::Conflict(_)));

        let info = adapter
            .update_table(&TableSpec::new("orders").with_option("read_capacity", 10))
            .await
            .unwrap();
        assert_eq!(info.properties.get("read_capacity"), Some(&Value::from(10u64)));

        assert_eq!(adapter.list_tables().await.unwrap(), vec!["orders".to_string()]);
        adapter.delete_table("orders").await.unwrap();
        assert!(adapter.get_table("orders").await.unwrap_err().is_not_found());
    }
}
