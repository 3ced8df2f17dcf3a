//! SimpleDB-like backend
//!
//! Each record is an item whose name is the record's single identity field. The
//! identity is also stored as an attribute so conditional puts and deletes can
//! test for the item's existence. Values travel as strings, numbers in the
//! sortable form of the select projector so range filters compare by value;
//! lists become multi-valued attributes. Filters render into the select dialect.

pub mod client;
pub mod memory;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

pub use client::{
    Attribute, DeletableItem, DeleteAttribute, DomainMetadata, ReplaceableAttribute,
    ReplaceableItem, SdbItem, SelectResult, SimpleDbClient, UpdateCondition,
};
pub use memory::MemorySimpleDbClient;

use crate::adapter::{
    BackendAdapter, BatchCollector, QueryResult, RecordResult, TableInfo, TableSpec,
    first_failure, record_exists, record_not_found,
};
use crate::backend::ClientError;
use crate::config::StoreConfig;
use crate::error::{RecordStoreError, Result};
use crate::extras::ExtrasConfig;
use crate::filter::Predicate;
use crate::key::{FieldKey, KeyCache, KeyDescriptor};
use crate::normalize::{IdGenerator, RandomIdGenerator, identity_of};
use crate::projector::select::{
    attribute, decode_number, item_name_field, item_names_in, native_order, render_predicate,
    wire_text,
};
use crate::projector::{SelectOutput, SelectStatement, finish_query, validate_table_name};
use crate::types::{Record, Value, WireFormat};

/// Identity field name used when the configuration names none
pub const DEFAULT_ITEM_NAME_FIELD: &str = "Name";

const MAX_SELECT_LIMIT: usize = 2500;

/// Adapter over a [`SimpleDbClient`]
pub struct SimpleDbAdapter {
    client: Arc<dyn SimpleDbClient>,
    config: StoreConfig,
    keys: KeyCache,
    ids: Box<dyn IdGenerator>,
}

impl SimpleDbAdapter {
    pub fn new(client: Arc<dyn SimpleDbClient>, config: StoreConfig) -> Self {
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

    fn id_field(&self) -> &str {
        self.config
            .default_id_field
            .as_deref()
            .unwrap_or(DEFAULT_ITEM_NAME_FIELD)
    }

    fn default_key(&self) -> Result<KeyDescriptor> {
        KeyDescriptor::new(vec![FieldKey::synthetic(self.id_field())])
    }

    fn select_limit(&self) -> usize {
        self.config.page_size.clamp(1, MAX_SELECT_LIMIT)
    }

    /// Follow next tokens until exhausted or `wanted` items are in hand
    async fn select_all(&self, table: &str, expression: &str, wanted: Option<usize>) -> Result<Vec<SdbItem>> {
        debug!("simpledb: {}", expression);
        let mut items = Vec::new();
        let mut token = None;
        loop {
            let page = self
                .client
                .select(expression, token.take(), true)
                .await
                .map_err(|e| RecordStoreError::backend(table, e))?;
            items.extend(page.items);
            if wanted.is_some_and(|w| items.len() >= w) {
                break;
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(items)
    }

    async fn count(&self, table: &str, where_clause: Option<String>) -> Result<u64> {
        let statement = SelectStatement::new(table, SelectOutput::Count).with_where(where_clause);
        let items = self.select_all(table, &statement.to_string(), None).await?;
        items
            .first()
            .and_then(|item| item.attributes.iter().find(|a| a.name == "Count"))
            .and_then(|a| a.value.parse().ok())
            .ok_or_else(|| {
                RecordStoreError::backend(table, ClientError::Transport("count result missing".into()))
            })
    }

    async fn fetch(&self, table: &str, name: &str, field: &str) -> Result<Option<Record>> {
        let attributes = self
            .client
            .get_attributes(table, name, true)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        Ok((!attributes.is_empty()).then(|| from_attributes(name, field, attributes)))
    }

    async fn put_new(&self, table: &str, desc: &KeyDescriptor, record: Record) -> RecordResult {
        let (field, name) = item_name(&record, desc)?;
        self.client
            .put_attributes(table, &name, to_attributes(&record, desc), Some(UpdateCondition::absent(field)))
            .await
            .map_err(|e| match e {
                ClientError::ConditionFailed(_) => record_exists(table, &identity_of(&record, desc)),
                other => RecordStoreError::backend(table, other),
            })?;
        Ok(record)
    }

    async fn replace(&self, table: &str, desc: &KeyDescriptor, record: Record) -> RecordResult {
        let (field, name) = item_name(&record, desc)?;
        let current = self
            .fetch(table, &name, field)
            .await?
            .ok_or_else(|| record_not_found(table, &identity_of(&record, desc)))?;

        self.client
            .put_attributes(
                table,
                &name,
                to_attributes(&record, desc),
                Some(UpdateCondition::equals(field, name.clone())),
            )
            .await
            .map_err(|e| match e {
                ClientError::ConditionFailed(_) => record_not_found(table, &identity_of(&record, desc)),
                other => RecordStoreError::backend(table, other),
            })?;

        let stale: Vec<DeleteAttribute> = current
            .keys()
            .filter(|k| k.as_str() != field && !record.has_value(k))
            .map(DeleteAttribute::all)
            .collect();
        if !stale.is_empty() {
            self.client
                .delete_attributes(table, &name, stale, None)
                .await
                .map_err(|e| RecordStoreError::backend(table, e))?;
        }
        Ok(record)
    }

    async fn merge(&self, table: &str, desc: &KeyDescriptor, record: Record) -> RecordResult {
        let (field, name) = item_name(&record, desc)?;
        self.client
            .put_attributes(
                table,
                &name,
                to_attributes(&record, desc),
                Some(UpdateCondition::equals(field, name.clone())),
            )
            .await
            .map_err(|e| match e {
                ClientError::ConditionFailed(_) => record_not_found(table, &identity_of(&record, desc)),
                other => RecordStoreError::backend(table, other),
            })?;

        let removed: Vec<DeleteAttribute> = record
            .iter()
            .filter(|(k, v)| v.is_null() && !desc.is_identity(k))
            .map(|(k, _)| DeleteAttribute::all(k.clone()))
            .collect();
        if !removed.is_empty() {
            self.client
                .delete_attributes(table, &name, removed, None)
                .await
                .map_err(|e| RecordStoreError::backend(table, e))?;
        }
        self.fetch(table, &name, field)
            .await?
            .ok_or_else(|| record_not_found(table, &identity_of(&record, desc)))
    }

    async fn delete(&self, table: &str, desc: &KeyDescriptor, key: Record) -> RecordResult {
        let (field, name) = item_name(&key, desc)?;
        self.client
            .delete_attributes(table, &name, Vec::new(), Some(UpdateCondition::equals(field, name.clone())))
            .await
            .map_err(|e| match e {
                ClientError::ConditionFailed(_) => record_not_found(table, &identity_of(&key, desc)),
                other => RecordStoreError::backend(table, other),
            })?;
        Ok(identity_of(&key, desc))
    }

    /// Batch create. `BatchPutAttributes` has no conditions, so item names that
    /// already exist are looked up first and reported as conflicts.
    async fn create_in_batches(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
    ) -> Result<Vec<RecordResult>> {
        let names: Vec<String> = records
            .iter()
            .filter_map(|r| item_name(r, desc).ok().map(|(_, name)| name))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let existing = self.existing_names(table, &names).await?;

        let mut results: Vec<Option<RecordResult>> = (0..records.len()).map(|_| None).collect();
        let mut batched = Vec::new();
        let mut batched_at = Vec::new();
        for (i, record) in records.into_iter().enumerate() {
            match item_name(&record, desc) {
                Ok((_, name)) if existing.contains(&name) => {
                    results[i] = Some(Err(record_exists(table, &identity_of(&record, desc))));
                }
                _ => {
                    batched_at.push(i);
                    batched.push(record);
                }
            }
        }

        let written = self.write_in_batches(table, desc, batched, false).await;
        for (i, result) in batched_at.into_iter().zip(written) {
            results[i] = Some(result);
        }
        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(RecordStoreError::bad_request("record was not submitted"))))
            .collect())
    }

    async fn existing_names(&self, table: &str, names: &[String]) -> Result<HashSet<String>> {
        let mut existing = HashSet::new();
        for chunk in names.chunks(self.config.batch_read_limit) {
            let statement = SelectStatement::new(table, SelectOutput::ItemName)
                .with_where(Some(item_names_in(chunk)))
                .with_limit(self.select_limit());
            for item in self.select_all(table, &statement.to_string(), None).await? {
                existing.insert(item.name);
            }
        }
        Ok(existing)
    }

    /// Chunked batch put or delete; repeated item names are rejected in place
    async fn write_in_batches(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        delete: bool,
    ) -> Vec<RecordResult> {
        let mut results: Vec<Option<RecordResult>> = Vec::with_capacity(records.len());
        let mut accepted: Vec<(usize, String)> = Vec::new();
        let mut seen = HashSet::new();
        for (i, record) in records.iter().enumerate() {
            match item_name(record, desc) {
                Ok((_, name)) if seen.insert(name.clone()) => {
                    results.push(None);
                    accepted.push((i, name));
                }
                Ok((_, name)) => results.push(Some(Err(RecordStoreError::conflict(format!(
                    "Item '{}' appears more than once in the batch",
                    name
                ))))),
                Err(e) => results.push(Some(Err(e))),
            }
        }

        for chunk in accepted.chunks(self.config.batch_write_limit) {
            debug!(
                "simpledb: batch {} of {} items in '{}'",
                if delete { "delete" } else { "put" },
                chunk.len(),
                table
            );
            let outcome = if delete {
                let items = chunk
                    .iter()
                    .map(|(_, name)| DeletableItem {
                        name: name.clone(),
                        attributes: Vec::new(),
                    })
                    .collect();
                self.client.batch_delete_attributes(table, items).await
            } else {
                let items = chunk
                    .iter()
                    .map(|(i, name)| ReplaceableItem {
                        name: name.clone(),
                        attributes: to_attributes(&records[*i], desc),
                    })
                    .collect();
                self.client.batch_put_attributes(table, items).await
            };
            for (i, _) in chunk {
                results[*i] = Some(match &outcome {
                    Ok(()) if delete => Ok(identity_of(&records[*i], desc)),
                    Ok(()) => Ok(records[*i].clone()),
                    Err(e) => Err(RecordStoreError::backend(table, e.clone())),
                });
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(RecordStoreError::bad_request("record was not submitted"))))
            .collect()
    }
}

#[async_trait]
impl BackendAdapter for SimpleDbAdapter {
    fn name(&self) -> &'static str {
        "simpledb"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Text
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
        self.client
            .domain_metadata(table)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        self.default_key()
    }

    async fn create_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        if !extras.rollback && records.len() > 1 {
            return self.create_in_batches(table, desc, records).await;
        }
        let mut collector = BatchCollector::new(table, "create", records.len(), extras.rollback);
        for record in records {
            collector.push(self.put_new(table, desc, record).await)?;
        }
        Ok(collector.finish())
    }

    async fn update_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let mut collector = BatchCollector::new(table, "update", records.len(), extras.rollback);
        for record in records {
            collector.push(self.replace(table, desc, record).await)?;
        }
        Ok(collector.finish())
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
            collector.push(self.merge(table, desc, record).await)?;
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
            collector.push(self.delete(table, desc, key).await)?;
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
        let mut names: Vec<Result<(&str, String)>> = Vec::with_capacity(keys.len());
        for key in &keys {
            names.push(item_name(key, desc));
        }

        let mut unique = Vec::new();
        let mut seen = HashSet::new();
        for (_, name) in names.iter().flatten() {
            if seen.insert(name.clone()) {
                unique.push(name.clone());
            }
        }

        let mut found: HashMap<String, Record> = HashMap::new();
        for chunk in unique.chunks(self.config.batch_read_limit) {
            let statement = SelectStatement::new(table, SelectOutput::All)
                .with_where(Some(item_names_in(chunk)))
                .with_limit(self.select_limit());
            for item in self.select_all(table, &statement.to_string(), None).await? {
                let field = item_name_field(desc).unwrap_or(DEFAULT_ITEM_NAME_FIELD);
                let record = from_attributes(&item.name, field, item.attributes);
                found.insert(item.name, record);
            }
        }

        let results = names
            .into_iter()
            .zip(&keys)
            .map(|(name, key)| {
                let (_, name) = name?;
                found
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| record_not_found(table, &identity_of(key, desc)))
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
        let where_clause = filter.map(|p| render_predicate(p, desc)).transpose()?;
        let mut statement = SelectStatement::new(table, SelectOutput::All)
            .with_where(where_clause.clone())
            .with_limit(self.select_limit());

        let pushed_down = native_order(&extras.order, filter);
        if let Some(spec) = pushed_down {
            statement = statement.with_order(attribute(&spec.field, desc), spec.direction);
        }
        // without client-side ordering the scan can stop once the page is covered
        let wanted = if pushed_down.is_some() || extras.order.is_empty() {
            extras.limit.map(|l| l.saturating_add(extras.offset.unwrap_or(0)))
        } else {
            None
        };

        let field = item_name_field(desc).unwrap_or(DEFAULT_ITEM_NAME_FIELD);
        let records = self
            .select_all(table, &statement.to_string(), wanted)
            .await?
            .into_iter()
            .map(|item| from_attributes(&item.name, field, item.attributes))
            .collect();

        let mut result = finish_query(records, extras);
        if extras.include_count {
            result.count = Some(self.count(table, where_clause).await?);
        }
        Ok(result)
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        validate_table_name(&spec.name, WireFormat::Text).map_err(RecordStoreError::bad_request)?;
        self.client
            .create_domain(&spec.name)
            .await
            .map_err(|e| RecordStoreError::backend(&spec.name, e))?;
        self.keys.invalidate(&spec.name);
        info!("simpledb: created domain '{}'", spec.name);
        self.get_table(&spec.name).await
    }

    async fn get_table(&self, table: &str) -> Result<TableInfo> {
        let metadata = self
            .client
            .domain_metadata(table)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        let mut info = TableInfo::new(table);
        info.key = Some(self.default_key()?);
        info.item_count = Some(metadata.item_count);
        info.properties.insert(
            "attribute_name_count".to_string(),
            Value::from(metadata.attribute_name_count),
        );
        info.properties.insert(
            "attribute_value_count".to_string(),
            Value::from(metadata.attribute_value_count),
        );
        info.properties.insert(
            "timestamp".to_string(),
            Value::from(metadata.timestamp.to_rfc3339()),
        );
        Ok(info)
    }

    /// Domains carry no settings; this only confirms the domain and drops cached keys
    async fn update_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        let info = self.get_table(&spec.name).await?;
        self.keys.invalidate(&spec.name);
        Ok(info)
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        self.client
            .delete_domain(table)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        self.keys.invalidate(table);
        info!("simpledb: deleted domain '{}'", table);
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.client
            .list_domains()
            .await
            .map_err(|e| RecordStoreError::backend("*", e))
    }
}

/// Item-name field and the record's item name
fn item_name<'a>(record: &Record, desc: &'a KeyDescriptor) -> Result<(&'a str, String)> {
    let field = item_name_field(desc).ok_or_else(|| {
        RecordStoreError::bad_request(format!(
            "Items are named by a single identity field; got ({})",
            desc.field_names().join(", ")
        ))
    })?;
    let name = record
        .get(field)
        .filter(|v| !v.is_null())
        .map(Value::to_text)
        .ok_or_else(|| {
            RecordStoreError::bad_request(format!("Identifying field '{}' is required", field))
        })?;
    Ok((field, name))
}

/// Put payload: every non-null field, identity included, replacing old values.
/// Identity values are written as plain text, everything else in wire form.
fn to_attributes(record: &Record, desc: &KeyDescriptor) -> Vec<ReplaceableAttribute> {
    let mut out = Vec::new();
    for (name, value) in record.iter() {
        if desc.is_managed(name) {
            continue;
        }
        let text = |v: &Value| {
            if desc.is_identity(name) {
                v.to_text()
            } else {
                wire_text(v)
            }
        };
        match value {
            Value::Null => {}
            Value::List(items) => out.extend(
                items
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(|v| ReplaceableAttribute::replace(name.clone(), text(v))),
            ),
            other => out.push(ReplaceableAttribute::replace(name.clone(), text(other))),
        }
    }
    out
}

fn read_value(text: String) -> Value {
    decode_number(&text).unwrap_or(Value::String(text))
}

fn from_attributes(item_name: &str, field: &str, attributes: Vec<Attribute>) -> Record {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for attr in attributes {
        grouped.entry(attr.name).or_default().push(attr.value);
    }
    let mut record: Record = grouped
        .into_iter()
        .map(|(name, mut values)| {
            let value = if values.len() == 1 {
                read_value(values.remove(0))
            } else {
                Value::List(values.into_iter().map(read_value).collect())
            };
            (name, value)
        })
        .collect();
    record.insert(field.to_string(), Value::String(item_name.to_string()));
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extras::OrderSpec;
    use crate::filter::{ParseOptions, parse_with};

    fn key() -> KeyDescriptor {
        KeyDescriptor::new(vec![FieldKey::synthetic("Name")]).unwrap()
    }

    fn widget(name: &str, color: &str, qty: i64) -> Record {
        Record::new()
            .with("Name", name)
            .with("color", color)
            .with("qty", qty)
    }

    fn filter(text: &str) -> Predicate {
        parse_with(text, ParseOptions { booleans_as_numbers: true }).unwrap()
    }

    async fn adapter() -> (Arc<MemorySimpleDbClient>, SimpleDbAdapter) {
        let client = Arc::new(MemorySimpleDbClient::new());
        let adapter = SimpleDbAdapter::new(client.clone(), StoreConfig::simpledb());
        adapter.create_table(&TableSpec::new("widgets")).await.unwrap();
        let records = vec![
            widget("w1", "red", 5),
            widget("w2", "blue", 10),
            widget("w3", "red", 3),
        ];
        let results = adapter
            .create_records("widgets", &key(), records, &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        (client, adapter)
    }

    // ==================== Writes ====================

    #[tokio::test]
    async fn test_conditional_create_detects_existing_item() {
        let (_, adapter) = adapter().await;
        let results = adapter
            .create_records("widgets", &key(), vec![widget("w1", "green", 1)], &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(matches!(results[0], Err(RecordStoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_batch_create_reports_existing_items() {
        let (client, adapter) = adapter().await;
        let results = adapter
            .create_records(
                "widgets",
                &key(),
                vec![widget("w1", "green", 1), widget("w4", "green", 1)],
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        assert!(matches!(results[0], Err(RecordStoreError::Conflict(_))));
        assert!(results[1].is_ok());
        assert!(client
            .expressions()
            .iter()
            .any(|e| e.starts_with("select itemName() from `widgets` where itemName() in")));

        let kept = adapter.fetch("widgets", "w1", "Name").await.unwrap().unwrap();
        assert_eq!(kept.get("color"), Some(&Value::from("red")));
    }

    #[tokio::test]
    async fn test_update_drops_attributes_missing_from_record() {
        let (_, adapter) = adapter().await;
        let replacement = Record::new().with("Name", "w1").with("color", "green");
        adapter
            .update_records("widgets", &key(), vec![replacement], &ExtrasConfig::new())
            .await
            .unwrap();
        let fetched = adapter
            .retrieve_records("widgets", &key(), vec![Record::new().with("Name", "w1")], &ExtrasConfig::new())
            .await
            .unwrap();
        let record = fetched[0].as_ref().unwrap();
        assert_eq!(record.get("color"), Some(&Value::from("green")));
        assert!(!record.contains_key("qty"));
    }

    #[tokio::test]
    async fn test_merge_keeps_other_attributes_and_removes_nulls() {
        let (_, adapter) = adapter().await;
        let patch = Record::new()
            .with("Name", "w2")
            .with("color", Value::Null)
            .with("tags", Value::List(vec!["a".into(), "b".into()]));
        let results = adapter
            .merge_records("widgets", &key(), vec![patch], &ExtrasConfig::new())
            .await
            .unwrap();
        let merged = results[0].as_ref().unwrap();
        assert_eq!(merged.get("qty"), Some(&Value::from(10)));
        assert!(!merged.contains_key("color"));
        assert_eq!(
            merged.get("tags"),
            Some(&Value::List(vec!["a".into(), "b".into()]))
        );
    }

    #[tokio::test]
    async fn test_update_and_delete_of_missing_item() {
        let (_, adapter) = adapter().await;
        let results = adapter
            .update_records("widgets", &key(), vec![widget("w9", "red", 1)], &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(results[0].as_ref().unwrap_err().is_not_found());

        let err = adapter
            .delete_records(
                "widgets",
                &key(),
                vec![Record::new().with("Name", "w9")],
                &ExtrasConfig::new().with_rollback(true),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_composite_key_is_rejected_per_record() {
        let (_, adapter) = adapter().await;
        let composite = KeyDescriptor::new(vec![
            FieldKey::hash("a", crate::types::PrimitiveType::String),
            FieldKey::range("b", crate::types::PrimitiveType::String),
        ])
        .unwrap();
        let results = adapter
            .create_records(
                "widgets",
                &composite,
                vec![Record::new().with("a", "1").with("b", "2")],
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        assert!(matches!(results[0], Err(RecordStoreError::BadRequest(_))));
    }

    // ==================== Reads ====================

    #[tokio::test]
    async fn test_retrieve_by_names_uses_item_name_in() {
        let (client, adapter) = adapter().await;
        let keys = ["w3", "w0", "w1"]
            .iter()
            .map(|n| Record::new().with("Name", *n))
            .collect();
        let results = adapter
            .retrieve_records("widgets", &key(), keys, &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(results[0].as_ref().unwrap().get("qty"), Some(&Value::from(3)));
        assert!(results[1].as_ref().unwrap_err().is_not_found());
        assert!(results[2].is_ok());
        assert!(client
            .expressions()
            .iter()
            .any(|e| e.contains("itemName() in ('w3', 'w0', 'w1')")));
    }

    #[tokio::test]
    async fn test_query_pushes_order_down_when_constrained() {
        let (client, adapter) = adapter().await;
        let extras = ExtrasConfig::new()
            .with_order(vec![OrderSpec::desc("qty")])
            .with_count()
            .with_limit(2);
        let result = adapter
            .query_records("widgets", &key(), Some(&filter("qty >= 3")), &extras)
            .await
            .unwrap();
        let names: Vec<_> = result.records.iter().map(|r| r["Name"].clone()).collect();
        assert_eq!(names, vec![Value::from("w2"), Value::from("w1")]);
        assert_eq!(result.count, Some(3));
        assert!(client
            .expressions()
            .iter()
            .any(|e| e.ends_with("order by `qty` desc limit 2500")));
    }

    #[tokio::test]
    async fn test_numeric_filters_compare_by_value() {
        let (client, adapter) = adapter().await;
        let names = |result: QueryResult| {
            let mut names: Vec<String> = result.records.iter().map(|r| r["Name"].to_text()).collect();
            names.sort();
            names
        };
        let above = adapter
            .query_records("widgets", &key(), Some(&filter("qty > 4")), &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(names(above), vec!["w1", "w2"]);
        let below = adapter
            .query_records("widgets", &key(), Some(&filter("qty < 10")), &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(names(below), vec!["w1", "w3"]);

        let stored = client.get_attributes("widgets", "w2", true).await.unwrap();
        let qty = stored.iter().find(|a| a.name == "qty").unwrap();
        assert_eq!(qty.value, "100000000000000000010");
    }

    #[tokio::test]
    async fn test_huge_limit_with_offset_does_not_overflow() {
        let (_, adapter) = adapter().await;
        let extras = ExtrasConfig::new().with_limit(usize::MAX).with_offset(1);
        let result = adapter
            .query_records("widgets", &key(), Some(&filter("qty >= 3")), &extras)
            .await
            .unwrap();
        assert_eq!(result.records.len(), 2);
    }

    #[tokio::test]
    async fn test_query_orders_client_side_otherwise() {
        let (_, adapter) = adapter().await;
        let extras = ExtrasConfig::new().with_order(vec![OrderSpec::asc("qty")]);
        let result = adapter
            .query_records("widgets", &key(), Some(&filter("color = 'red'")), &extras)
            .await
            .unwrap();
        let names: Vec<_> = result.records.iter().map(|r| r["Name"].clone()).collect();
        assert_eq!(names, vec![Value::from("w3"), Value::from("w1")]);
    }

    #[tokio::test]
    async fn test_batch_delete() {
        let (_, adapter) = adapter().await;
        let keys = vec![Record::new().with("Name", "w1"), Record::new().with("Name", "w2")];
        let results = adapter
            .delete_records("widgets", &key(), keys, &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(adapter.get_table("widgets").await.unwrap().item_count, Some(1));
    }
}
