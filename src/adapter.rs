//! The backend adapter seam
//!
//! `RecordStore` validates and normalizes caller input, then hands prepared records
//! to a `BackendAdapter`. Adapters speak to exactly one native client and report
//! one result per input record, in input order.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{RecordStoreError, Result};
use crate::extras::ExtrasConfig;
use crate::filter::Predicate;
use crate::key::{KeyCache, KeyDescriptor, resolve_from_extras};
use crate::normalize::IdGenerator;
use crate::types::{Record, Value, WireFormat};

/// Outcome for one record of a batch
pub type RecordResult = Result<Record>;

/// Records matched by a filtered read
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub records: Vec<Record>,
    /// Total matches before paging, when `include_count` was requested
    pub count: Option<u64>,
}

/// Table definition passed to the admin passthroughs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    /// Identity of the table's records; backends with a fixed key model ignore it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyDescriptor>,
    /// Backend-specific settings such as provisioned throughput
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            options: BTreeMap::new(),
        }
    }

    pub fn with_key(mut self, key: KeyDescriptor) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    /// Numeric option, if set
    pub fn option_u64(&self, name: &str) -> Option<u64> {
        self.options.get(name).and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

/// Table metadata as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub key: Option<KeyDescriptor>,
    pub item_count: Option<u64>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            item_count: None,
            properties: BTreeMap::new(),
        }
    }
}

/// Operations every backend implements.
///
/// Records reach the write methods with identity present, synthetic ids generated
/// and values coerced to `wire_format()`. Every batch method returns exactly one
/// result per input record, or a single error when `extras.rollback` aborted it.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    fn wire_format(&self) -> WireFormat;

    fn config(&self) -> &StoreConfig;

    fn key_cache(&self) -> &KeyCache;

    fn id_generator(&self) -> &dyn IdGenerator;

    /// Read the table's native key schema
    async fn describe_keys(&self, table: &str) -> Result<KeyDescriptor>;

    /// Add backend-managed fields to a caller-supplied descriptor
    fn decorate_key(&self, desc: KeyDescriptor) -> KeyDescriptor {
        desc
    }

    /// Resolve the table's key descriptor: caller overrides first, then the cache,
    /// then native metadata.
    async fn key_descriptor(&self, table: &str, extras: &ExtrasConfig) -> Result<KeyDescriptor> {
        if let Some(desc) = resolve_from_extras(extras)? {
            return Ok(self.decorate_key(desc));
        }
        if let Some(desc) = self.key_cache().get(table) {
            return Ok(desc);
        }
        debug!("{}: resolving key schema for '{}'", self.name(), table);
        let desc = self.describe_keys(table).await?;
        self.key_cache().insert(table, desc.clone());
        Ok(desc)
    }

    /// Fill backend defaults on a record before identity checks
    fn apply_defaults(&self, _record: &mut Record, _desc: &KeyDescriptor, _extras: &ExtrasConfig) {}

    /// Insert new records
    async fn create_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>>;

    /// Replace existing records
    async fn update_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>>;

    /// Partially update existing records; null fields are removed
    async fn merge_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>>;

    /// Delete records by identity
    async fn delete_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        keys: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>>;

    /// Read full records by identity; missing records are `NotFound` in place
    async fn retrieve_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        keys: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>>;

    /// Read full records matching the filter (all records when `None`), honoring
    /// order, offset, limit and count from the extras
    async fn query_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        filter: Option<&Predicate>,
        extras: &ExtrasConfig,
    ) -> Result<QueryResult>;

    async fn create_table(&self, spec: &TableSpec) -> Result<TableInfo>;

    async fn get_table(&self, table: &str) -> Result<TableInfo>;

    async fn update_table(&self, spec: &TableSpec) -> Result<TableInfo>;

    async fn delete_table(&self, table: &str) -> Result<()>;

    async fn list_tables(&self) -> Result<Vec<String>>;
}

/// Collects per-record outcomes of a sequential batch.
///
/// In rollback mode the first failure is returned from `push` and the batch stops;
/// earlier writes are not undone.
#[derive(Debug)]
pub struct BatchCollector {
    table: String,
    operation: &'static str,
    rollback: bool,
    results: Vec<RecordResult>,
}

impl BatchCollector {
    pub fn new(table: &str, operation: &'static str, capacity: usize, rollback: bool) -> Self {
        Self {
            table: table.to_string(),
            operation,
            rollback,
            results: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, result: RecordResult) -> Result<()> {
        match result {
            Err(err) if self.rollback => {
                warn!(
                    "{} on '{}' aborted after {} applied records: {}",
                    self.operation,
                    self.table,
                    self.results.len(),
                    err
                );
                Err(err)
            }
            other => {
                self.results.push(other);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn finish(self) -> Vec<RecordResult> {
        self.results
    }
}

/// Abort a rollback batch on the first failed record of a native batch response
pub(crate) fn first_failure(results: Vec<RecordResult>, rollback: bool) -> Result<Vec<RecordResult>> {
    if !rollback {
        return Ok(results);
    }
    let mut out = Vec::with_capacity(results.len());
    for result in results {
        out.push(Ok(result?));
    }
    Ok(out)
}

/// Turn a missing record into the per-record error used by every adapter
pub(crate) fn record_not_found(table: &str, key: &Record) -> RecordStoreError {
    RecordStoreError::not_found(format!("Record ({}) not found in '{}'", render_key(key), table))
}

/// Per-record error for a create that hit an existing identity
pub(crate) fn record_exists(table: &str, key: &Record) -> RecordStoreError {
    RecordStoreError::conflict(format!(
        "Record ({}) already exists in '{}'",
        render_key(key),
        table
    ))
}

fn render_key(key: &Record) -> String {
    key.iter()
        .map(|(k, v)| format!("{}={}", k, v.to_text()))
        .collect::<Vec<_>>()
        .join(", ")
}
