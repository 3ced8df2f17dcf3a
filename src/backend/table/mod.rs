//! Partitioned table backend
//!
//! Records are entities keyed by `PartitionKey` and `RowKey`; the service stamps
//! `Timestamp` and an etag on every write. Records missing a partition get the one
//! named in the extras, else the configured default. Rollback batches that stay
//! within one partition run as entity group transactions; anything else is written
//! one entity at a time. Filters render to OData and are scoped to the extras
//! partition when one is given.

pub mod client;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

pub use client::{
    ANY_ETAG, Continuation, EdmValue, Entity, QueryOptions, QueryPage, TableClient,
    TransactionAction,
};
pub use memory::MemoryTableClient;

use crate::adapter::{
    BackendAdapter, BatchCollector, QueryResult, RecordResult, TableInfo, TableSpec,
    record_exists, record_not_found,
};
use crate::backend::ClientError;
use crate::backend::table::client::{ETAG, PARTITION_KEY, ROW_KEY, TIMESTAMP};
use crate::config::StoreConfig;
use crate::error::{RecordStoreError, Result};
use crate::extras::ExtrasConfig;
use crate::filter::Predicate;
use crate::key::{FieldKey, KeyCache, KeyDescriptor};
use crate::normalize::{IdGenerator, RandomIdGenerator, identity_of};
use crate::projector::{finish_query, odata, validate_table_name};
use crate::types::{PrimitiveType, Record, Value, WireFormat};

const MAX_TRANSACTION: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Create,
    Update,
    Merge,
    Delete,
}

impl Write {
    fn name(&self) -> &'static str {
        match self {
            Write::Create => "create",
            Write::Update => "update",
            Write::Merge => "merge",
            Write::Delete => "delete",
        }
    }
}

/// Adapter over a [`TableClient`]
pub struct TableAdapter {
    client: Arc<dyn TableClient>,
    config: StoreConfig,
    keys: KeyCache,
    ids: Box<dyn IdGenerator>,
}

impl TableAdapter {
    pub fn new(client: Arc<dyn TableClient>, config: StoreConfig) -> Self {
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

    async fn ensure_table(&self, table: &str) -> Result<()> {
        let exists = self
            .client
            .table_exists(table)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        if exists {
            Ok(())
        } else {
            Err(RecordStoreError::not_found(format!("Table '{}' does not exist", table)))
        }
    }

    async fn write_one(&self, table: &str, desc: &KeyDescriptor, write: Write, record: Record) -> RecordResult {
        let fail = |e: ClientError| write_error(table, desc, &record, write, e);
        match write {
            Write::Create => {
                let entity = to_entity(&record, desc)?;
                let stored = self.client.insert_entity(table, entity).await.map_err(fail)?;
                Ok(to_record(stored, desc))
            }
            Write::Update => {
                let entity = to_entity(&record, desc)?;
                let stored = self
                    .client
                    .update_entity(table, entity, &if_match(&record))
                    .await
                    .map_err(fail)?;
                Ok(to_record(stored, desc))
            }
            Write::Merge if has_removals(&record, desc) => {
                // merge cannot drop properties, so rewrite the whole entity
                let (partition_key, row_key) = address(&record, desc)?;
                let current = self
                    .client
                    .get_entity(table, &partition_key, &row_key)
                    .await
                    .map_err(fail)?
                    .ok_or_else(|| record_not_found(table, &identity_of(&record, desc)))?;
                let etag = record
                    .get(ETAG)
                    .filter(|v| !v.is_null())
                    .map(Value::to_text)
                    .or(current.etag.clone())
                    .unwrap_or_else(|| ANY_ETAG.to_string());
                let mut merged = to_record(current, desc);
                for (name, value) in record.iter() {
                    if value.is_null() {
                        merged.remove(name);
                    } else {
                        merged.insert(name.clone(), value.clone());
                    }
                }
                let stored = self
                    .client
                    .update_entity(table, to_entity(&merged, desc)?, &etag)
                    .await
                    .map_err(fail)?;
                Ok(to_record(stored, desc))
            }
            Write::Merge => {
                let entity = to_entity(&record, desc)?;
                let stored = self
                    .client
                    .merge_entity(table, entity, &if_match(&record))
                    .await
                    .map_err(fail)?;
                Ok(to_record(stored, desc))
            }
            Write::Delete => {
                let (partition_key, row_key) = address(&record, desc)?;
                self.client
                    .delete_entity(table, &partition_key, &row_key, &if_match(&record))
                    .await
                    .map_err(fail)?;
                Ok(identity_of(&record, desc))
            }
        }
    }

    /// Atomic entity group transactions, one per chunk of the batch
    async fn transact(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        write: Write,
        records: Vec<Record>,
    ) -> Result<Vec<RecordResult>> {
        let mut actions = Vec::with_capacity(records.len());
        for record in &records {
            actions.push(action(record, desc, write)?);
        }

        let limit = self.config.batch_write_limit.clamp(1, MAX_TRANSACTION);
        let mut results = Vec::with_capacity(records.len());
        let mut pending = actions.into_iter().zip(records).peekable();
        while pending.peek().is_some() {
            let chunk: Vec<_> = pending.by_ref().take(limit).collect();
            let (chunk_actions, chunk_records): (Vec<_>, Vec<_>) = chunk.into_iter().unzip();
            debug!(
                "table: {} transaction of {} entities on '{}'",
                write.name(),
                chunk_actions.len(),
                table
            );
            let written = self
                .client
                .submit_transaction(table, chunk_actions)
                .await
                .map_err(|e| {
                    warn!("table: {} transaction on '{}' rolled back: {}", write.name(), table, e);
                    match e {
                        ClientError::ConditionFailed(msg) if write == Write::Create => {
                            RecordStoreError::conflict(format!("'{}': {}", table, msg))
                        }
                        ClientError::ConditionFailed(msg) => RecordStoreError::conflict(format!(
                            "'{}': entity was modified since it was read ({})",
                            table, msg
                        )),
                        ClientError::ResourceNotFound(msg) => {
                            RecordStoreError::not_found(format!("'{}': {}", table, msg))
                        }
                        other => RecordStoreError::backend(table, other),
                    }
                })?;
            for (entity, record) in written.into_iter().zip(chunk_records) {
                results.push(Ok(match entity {
                    Some(entity) => to_record(entity, desc),
                    None => identity_of(&record, desc),
                }));
            }
        }
        Ok(results)
    }

    async fn run(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        write: Write,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        if extras.rollback && records.len() > 1 && transactional(&records, desc, write) {
            return self.transact(table, desc, write, records).await;
        }
        let mut collector = BatchCollector::new(table, write.name(), records.len(), extras.rollback);
        for record in records {
            collector.push(self.write_one(table, desc, write, record).await)?;
        }
        Ok(collector.finish())
    }
}

#[async_trait]
impl BackendAdapter for TableAdapter {
    fn name(&self) -> &'static str {
        "table"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Typed
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
        self.ensure_table(table).await?;
        default_key()
    }

    fn decorate_key(&self, desc: KeyDescriptor) -> KeyDescriptor {
        desc.with_managed([TIMESTAMP, ETAG])
    }

    fn apply_defaults(&self, record: &mut Record, desc: &KeyDescriptor, extras: &ExtrasConfig) {
        let field = &desc.primary().name;
        if !record.has_value(field) {
            let partition = extras
                .partition_key
                .clone()
                .unwrap_or_else(|| self.config.default_partition_key.clone());
            record.insert(field.clone(), Value::String(partition));
        }
    }

    #[instrument(skip(self, desc, records, extras), fields(count = records.len()))]
    async fn create_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        self.run(table, desc, Write::Create, records, extras).await
    }

    async fn update_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        self.run(table, desc, Write::Update, records, extras).await
    }

    async fn merge_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        self.run(table, desc, Write::Merge, records, extras).await
    }

    async fn delete_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        keys: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        self.run(table, desc, Write::Delete, keys, extras).await
    }

    async fn retrieve_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        keys: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let mut collector = BatchCollector::new(table, "retrieve", keys.len(), extras.rollback);
        for key in keys {
            let result = match address(&key, desc) {
                Ok((partition_key, row_key)) => self
                    .client
                    .get_entity(table, &partition_key, &row_key)
                    .await
                    .map_err(|e| RecordStoreError::backend(table, e))
                    .and_then(|found| {
                        found
                            .map(|entity| to_record(entity, desc))
                            .ok_or_else(|| record_not_found(table, &identity_of(&key, desc)))
                    }),
                Err(e) => Err(e),
            };
            collector.push(result)?;
        }
        Ok(collector.finish())
    }

    async fn query_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        filter: Option<&Predicate>,
        extras: &ExtrasConfig,
    ) -> Result<QueryResult> {
        let rendered = filter.map(|p| odata::render_predicate(p, desc)).transpose()?;
        let rendered = match &extras.partition_key {
            Some(partition) => Some(odata::scope_to_partition(PARTITION_KEY, partition, rendered)),
            None => rendered,
        };
        debug!("table: querying '{}' with {:?}", table, rendered);

        let mut records = Vec::new();
        let mut continuation = None;
        loop {
            let options = QueryOptions {
                filter: rendered.clone(),
                select: None,
                top: Some(self.config.page_size.clamp(1, 1000)),
                continuation: continuation.take(),
            };
            let page = self
                .client
                .query_entities(table, options)
                .await
                .map_err(|e| RecordStoreError::backend(table, e))?;
            records.extend(page.entities.into_iter().map(|e| to_record(e, desc)));
            match page.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }
        Ok(finish_query(records, extras))
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        validate_table_name(&spec.name, WireFormat::Typed).map_err(RecordStoreError::bad_request)?;
        self.client
            .create_table(&spec.name)
            .await
            .map_err(|e| match e {
                ClientError::ResourceInUse(msg) => RecordStoreError::conflict(msg),
                other => RecordStoreError::backend(&spec.name, other),
            })?;
        self.keys.invalidate(&spec.name);
        info!("table: created table '{}'", spec.name);
        self.get_table(&spec.name).await
    }

    async fn get_table(&self, table: &str) -> Result<TableInfo> {
        self.ensure_table(table).await?;
        let mut info = TableInfo::new(table);
        info.key = Some(default_key()?);
        Ok(info)
    }

    /// Tables carry no settings; this confirms the table and drops cached keys
    async fn update_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        let info = self.get_table(&spec.name).await?;
        self.keys.invalidate(&spec.name);
        Ok(info)
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        self.client
            .delete_table(table)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        self.keys.invalidate(table);
        info!("table: deleted table '{}'", table);
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.client
            .list_tables()
            .await
            .map_err(|e| RecordStoreError::backend("*", e))
    }
}

fn default_key() -> Result<KeyDescriptor> {
    Ok(KeyDescriptor::new(vec![
        FieldKey::hash(PARTITION_KEY, PrimitiveType::String),
        FieldKey::range(ROW_KEY, PrimitiveType::String),
    ])?
    .with_managed([TIMESTAMP, ETAG]))
}

/// Partition and row key of a record; a key without a range field uses an empty row key
fn address(record: &Record, desc: &KeyDescriptor) -> Result<(String, String)> {
    let text = |name: &str| -> Result<String> {
        record
            .get(name)
            .filter(|v| !v.is_null())
            .map(Value::to_text)
            .ok_or_else(|| {
                RecordStoreError::bad_request(format!("Identifying field '{}' is required", name))
            })
    };
    let partition_key = text(&desc.primary().name)?;
    let row_key = match desc.range() {
        Some(range) => text(&range.name)?,
        None => String::new(),
    };
    Ok((partition_key, row_key))
}

fn if_match(record: &Record) -> String {
    record
        .get(ETAG)
        .filter(|v| !v.is_null())
        .map(Value::to_text)
        .unwrap_or_else(|| ANY_ETAG.to_string())
}

fn has_removals(record: &Record, desc: &KeyDescriptor) -> bool {
    record
        .iter()
        .any(|(name, value)| value.is_null() && !desc.is_identity(name) && !desc.is_managed(name))
}

/// Whether a rollback batch can run as transactions: one partition, no repeated
/// rows, and no merges that drop properties
fn transactional(records: &[Record], desc: &KeyDescriptor, write: Write) -> bool {
    let mut partition = None;
    let mut rows = std::collections::HashSet::new();
    for record in records {
        let Ok((pk, rk)) = address(record, desc) else {
            return false;
        };
        if partition.get_or_insert_with(|| pk.clone()) != &pk || !rows.insert(rk) {
            return false;
        }
        if write == Write::Merge && has_removals(record, desc) {
            return false;
        }
    }
    true
}

fn action(record: &Record, desc: &KeyDescriptor, write: Write) -> Result<TransactionAction> {
    Ok(match write {
        Write::Create => TransactionAction::Insert(to_entity(record, desc)?),
        Write::Update => TransactionAction::Update {
            entity: to_entity(record, desc)?,
            if_match: if_match(record),
        },
        Write::Merge => TransactionAction::Merge {
            entity: to_entity(record, desc)?,
            if_match: if_match(record),
        },
        Write::Delete => {
            let (partition_key, row_key) = address(record, desc)?;
            TransactionAction::Delete {
                partition_key,
                row_key,
                if_match: if_match(record),
            }
        }
    })
}

fn write_error(table: &str, desc: &KeyDescriptor, record: &Record, write: Write, e: ClientError) -> RecordStoreError {
    match (write, e) {
        (Write::Create, ClientError::ConditionFailed(_)) => record_exists(table, &identity_of(record, desc)),
        (_, ClientError::ConditionFailed(_)) => RecordStoreError::conflict(format!(
            "Entity ({}) in '{}' was modified since it was read",
            identity_of(record, desc)
                .iter()
                .filter(|(k, _)| desc.is_identity(k))
                .map(|(k, v)| format!("{}={}", k, v.to_text()))
                .collect::<Vec<_>>()
                .join(", "),
            table
        )),
        (Write::Create, other) => RecordStoreError::backend(table, other),
        (_, ClientError::ResourceNotFound(_)) => record_not_found(table, &identity_of(record, desc)),
        (_, other) => RecordStoreError::backend(table, other),
    }
}

fn to_edm(name: &str, value: &Value) -> Result<Option<EdmValue>> {
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::String(s) => EdmValue::String(s.clone()),
        Value::Bool(b) => EdmValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => EdmValue::Int64(i),
            None => EdmValue::Double(n.as_f64().unwrap_or_default()),
        },
        other => {
            return Err(RecordStoreError::bad_request(format!(
                "Field '{}': {} values are not supported by this store",
                name,
                other.type_name()
            )));
        }
    }))
}

fn to_entity(record: &Record, desc: &KeyDescriptor) -> Result<Entity> {
    let (partition_key, row_key) = address(record, desc)?;
    let mut entity = Entity::new(partition_key, row_key);
    for (name, value) in record.iter() {
        if desc.is_identity(name) || desc.is_managed(name) {
            continue;
        }
        if let Some(edm) = to_edm(name, value)? {
            entity.properties.insert(name.clone(), edm);
        }
    }
    Ok(entity)
}

fn to_record(entity: Entity, desc: &KeyDescriptor) -> Record {
    let mut record = Record::new();
    record.insert(desc.primary().name.clone(), Value::String(entity.partition_key));
    if let Some(range) = desc.range() {
        record.insert(range.name.clone(), Value::String(entity.row_key));
    }
    if let Some(timestamp) = entity.timestamp {
        record.insert(TIMESTAMP.to_string(), Value::String(timestamp.to_rfc3339()));
    }
    if let Some(etag) = entity.etag {
        record.insert(ETAG.to_string(), Value::String(etag));
    }
    for (name, value) in entity.properties {
        let value = match value {
            EdmValue::String(s) => Value::String(s),
            EdmValue::Int64(i) => Value::from(i),
            EdmValue::Double(f) => Value::from_f64(f),
            EdmValue::Boolean(b) => Value::Bool(b),
            EdmValue::DateTime(t) => Value::String(t.to_rfc3339()),
        };
        record.insert(name, value);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;

    fn key() -> KeyDescriptor {
        default_key().unwrap()
    }

    fn widget(pk: &str, rk: &str, qty: i64) -> Record {
        Record::new()
            .with(PARTITION_KEY, pk)
            .with(ROW_KEY, rk)
            .with("qty", qty)
    }

    async fn adapter() -> (Arc<MemoryTableClient>, TableAdapter) {
        let client = Arc::new(MemoryTableClient::new());
        let adapter = TableAdapter::new(client.clone(), StoreConfig::table());
        adapter.create_table(&TableSpec::new("widgets")).await.unwrap();
        adapter
            .create_records(
                "widgets",
                &key(),
                vec![widget("eu", "w1", 5), widget("eu", "w2", 7), widget("us", "w3", 3)],
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        (client, adapter)
    }

    // ==================== Identity ====================

    #[test]
    fn test_partition_defaults() {
        let adapter = TableAdapter::new(Arc::new(MemoryTableClient::new()), StoreConfig::table());
        let mut record = Record::new().with(ROW_KEY, "w1");
        adapter.apply_defaults(&mut record, &key(), &ExtrasConfig::new());
        assert_eq!(record[PARTITION_KEY], Value::from("default"));

        let mut record = Record::new().with(ROW_KEY, "w1");
        adapter.apply_defaults(&mut record, &key(), &ExtrasConfig::new().with_partition_key("eu"));
        assert_eq!(record[PARTITION_KEY], Value::from("eu"));

        let mut record = Record::new().with(PARTITION_KEY, "us").with(ROW_KEY, "w1");
        adapter.apply_defaults(&mut record, &key(), &ExtrasConfig::new().with_partition_key("eu"));
        assert_eq!(record[PARTITION_KEY], Value::from("us"));
    }

    #[test]
    fn test_nested_values_are_rejected() {
        let record = widget("eu", "w1", 1).with("tags", Value::List(vec!["a".into()]));
        let err = to_entity(&record, &key()).unwrap_err();
        assert!(matches!(err, RecordStoreError::BadRequest(_)));
    }

    // ==================== Writes ====================

    #[tokio::test]
    async fn test_create_conflict_and_stamps() {
        let (_, adapter) = adapter().await;
        let results = adapter
            .create_records(
                "widgets",
                &key(),
                vec![widget("eu", "w1", 1), widget("eu", "w4", 1)],
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        assert!(matches!(results[0], Err(RecordStoreError::Conflict(_))));
        let created = results[1].as_ref().unwrap();
        assert!(created.has_value(ETAG));
        assert!(created.has_value(TIMESTAMP));
    }

    #[tokio::test]
    async fn test_rollback_in_one_partition_is_transactional() {
        let (client, adapter) = adapter().await;
        let err = adapter
            .create_records(
                "widgets",
                &key(),
                vec![widget("eu", "w9", 1), widget("eu", "w1", 1)],
                &ExtrasConfig::new().with_rollback(true),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::Conflict(_)));
        assert!(client.get_entity("widgets", "eu", "w9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rollback_across_partitions_is_best_effort() {
        let (client, adapter) = adapter().await;
        let err = adapter
            .create_records(
                "widgets",
                &key(),
                vec![widget("asia", "w9", 1), widget("eu", "w1", 1)],
                &ExtrasConfig::new().with_rollback(true),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::Conflict(_)));
        assert!(client.get_entity("widgets", "asia", "w9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_checks_etag_and_existence() {
        let (_, adapter) = adapter().await;
        let stale = widget("eu", "w1", 9).with(ETAG, "W/\"stale\"");
        let results = adapter
            .update_records(
                "widgets",
                &key(),
                vec![stale, widget("eu", "ghost", 1)],
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        assert!(matches!(results[0], Err(RecordStoreError::Conflict(_))));
        assert!(results[1].as_ref().unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_merge_keeps_other_properties_and_drops_nulls() {
        let (_, adapter) = adapter().await;
        let patch = Record::new()
            .with(PARTITION_KEY, "eu")
            .with(ROW_KEY, "w1")
            .with("color", "red");
        adapter
            .merge_records("widgets", &key(), vec![patch], &ExtrasConfig::new())
            .await
            .unwrap();

        let removal = Record::new()
            .with(PARTITION_KEY, "eu")
            .with(ROW_KEY, "w1")
            .with("qty", Value::Null);
        let results = adapter
            .merge_records("widgets", &key(), vec![removal], &ExtrasConfig::new())
            .await
            .unwrap();
        let merged = results[0].as_ref().unwrap();
        assert_eq!(merged["color"], Value::from("red"));
        assert!(!merged.contains_key("qty"));
    }

    #[tokio::test]
    async fn test_rollback_delete_in_transaction() {
        let (_, adapter) = adapter().await;
        let keys = vec![
            Record::new().with(PARTITION_KEY, "eu").with(ROW_KEY, "w1"),
            Record::new().with(PARTITION_KEY, "eu").with(ROW_KEY, "w2"),
        ];
        let results = adapter
            .delete_records("widgets", &key(), keys, &ExtrasConfig::new().with_rollback(true))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        let remaining = adapter
            .query_records("widgets", &key(), None, &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(remaining.records.len(), 1);
    }

    // ==================== Reads ====================

    #[tokio::test]
    async fn test_query_is_scoped_to_partition() {
        let (client, adapter) = adapter().await;
        let extras = ExtrasConfig::new().with_partition_key("eu").with_count();
        let result = adapter
            .query_records("widgets", &key(), Some(&parse("qty >= 3").unwrap()), &extras)
            .await
            .unwrap();
        let rows: Vec<_> = result.records.iter().map(|r| r[ROW_KEY].to_text()).collect();
        assert_eq!(rows, vec!["w1", "w2"]);
        assert_eq!(result.count, Some(2));
        assert_eq!(client.filters().last().unwrap(), "PartitionKey eq 'eu' and qty ge 3");
    }

    #[tokio::test]
    async fn test_query_on_numeric_looking_row_key() {
        let (client, adapter) = adapter().await;
        adapter
            .create_records("widgets", &key(), vec![widget("eu", "5", 1)], &ExtrasConfig::new())
            .await
            .unwrap();
        let result = adapter
            .query_records("widgets", &key(), Some(&parse("RowKey = 5").unwrap()), &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0][ROW_KEY], Value::from("5"));
        assert_eq!(client.filters().last().unwrap(), "RowKey eq '5'");
    }

    #[tokio::test]
    async fn test_query_rejects_substring_filters() {
        let (_, adapter) = adapter().await;
        let err = adapter
            .query_records(
                "widgets",
                &key(),
                Some(&parse("name contains 'x'").unwrap()),
                &ExtrasConfig::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::UnsupportedFilter(_)));
    }

    #[tokio::test]
    async fn test_query_follows_continuations() {
        let client = Arc::new(MemoryTableClient::new());
        let config = StoreConfig::builder().page_size(1).build();
        let adapter = TableAdapter::new(client, config);
        adapter.create_table(&TableSpec::new("widgets")).await.unwrap();
        adapter
            .create_records(
                "widgets",
                &key(),
                vec![widget("eu", "w1", 5), widget("eu", "w2", 7)],
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        let result = adapter
            .query_records("widgets", &key(), None, &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(result.records.len(), 2);
    }

    #[tokio::test]
    async fn test_retrieve_missing_entity() {
        let (_, adapter) = adapter().await;
        let results = adapter
            .retrieve_records(
                "widgets",
                &key(),
                vec![
                    Record::new().with(PARTITION_KEY, "us").with(ROW_KEY, "w3"),
                    Record::new().with(PARTITION_KEY, "eu").with(ROW_KEY, "w3"),
                ],
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        assert_eq!(results[0].as_ref().unwrap()["qty"], Value::from(3));
        assert!(results[1].as_ref().unwrap_err().is_not_found());
    }
}
