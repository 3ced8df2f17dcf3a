//! CouchDB-like backend
//!
//! Records are JSON documents keyed by `_id` (or the configured id field, stored as
//! `_id`) and versioned by `_rev`. Every write goes through `_bulk_docs`; rollback
//! batches ask for `all_or_nothing`, so each request either applies fully or not at
//! all. Writes to existing documents carry the current revision, read through
//! `_all_docs` when the caller did not supply one. There is no server-side
//! filtering: filtered reads list the database and evaluate in process.

pub mod client;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

pub use client::{
    AllDocsQuery, AllDocsResponse, AllDocsRow, CouchClient, DatabaseInfo, DocResult, Document,
};
pub use memory::MemoryCouchClient;

use crate::adapter::{
    BackendAdapter, QueryResult, RecordResult, TableInfo, TableSpec, first_failure,
    record_exists, record_not_found,
};
use crate::backend::ClientError;
use crate::backend::couch::client::{DELETED, ID, REV};
use crate::config::StoreConfig;
use crate::error::{RecordStoreError, Result};
use crate::extras::ExtrasConfig;
use crate::filter::Predicate;
use crate::key::{FieldKey, KeyCache, KeyDescriptor};
use crate::normalize::{IdGenerator, RandomIdGenerator, identity_of};
use crate::projector::{ClientSideFilter, finish_query, validate_table_name};
use crate::types::{Record, Value, WireFormat};

const DESIGN_PREFIX: &str = "_design/";

/// Kind of document write, for mapping per-document failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Create,
    Replace,
    Delete,
}

/// Per-record outcomes filled out of order
struct Outcomes {
    table: String,
    rollback: bool,
    slots: Vec<Option<RecordResult>>,
}

impl Outcomes {
    fn new(table: &str, len: usize, rollback: bool) -> Self {
        Self {
            table: table.to_string(),
            rollback,
            slots: (0..len).map(|_| None).collect(),
        }
    }

    /// Record a failure found before anything was written; aborts a rollback batch
    fn reject(&mut self, index: usize, err: RecordStoreError) -> Result<()> {
        if self.rollback {
            warn!("couch: batch on '{}' rejected before writing: {}", self.table, err);
            return Err(err);
        }
        self.slots[index] = Some(Err(err));
        Ok(())
    }

    fn settle(&mut self, index: usize, result: RecordResult) {
        self.slots[index] = Some(result);
    }

    fn finish(self) -> Result<Vec<RecordResult>> {
        let results = self
            .slots
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(RecordStoreError::bad_request("record was not submitted"))))
            .collect();
        first_failure(results, self.rollback)
    }
}

/// Adapter over a [`CouchClient`]
pub struct CouchAdapter {
    client: Arc<dyn CouchClient>,
    config: StoreConfig,
    keys: KeyCache,
    ids: Box<dyn IdGenerator>,
}

impl CouchAdapter {
    pub fn new(client: Arc<dyn CouchClient>, config: StoreConfig) -> Self {
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

    fn default_key(&self) -> Result<KeyDescriptor> {
        let field = self.config.default_id_field.as_deref().unwrap_or(ID);
        Ok(KeyDescriptor::new(vec![FieldKey::synthetic(field)])?.with_managed([REV]))
    }

    /// Current documents by id, fetched in `_all_docs` key batches
    async fn current_docs(&self, table: &str, ids: &[String]) -> Result<HashMap<String, Document>> {
        let mut found = HashMap::new();
        for chunk in ids.chunks(self.config.batch_read_limit.max(1)) {
            debug!("couch: fetching {} documents from '{}'", chunk.len(), table);
            let response = self
                .client
                .all_docs(table, AllDocsQuery::keys(chunk.to_vec()))
                .await
                .map_err(|e| RecordStoreError::backend(table, e))?;
            for row in response.rows {
                if let (Some(id), Some(doc)) = (row.id, row.doc) {
                    found.insert(id, doc);
                }
            }
        }
        Ok(found)
    }

    /// Submit documents through chunked `_bulk_docs` and settle each outcome
    async fn bulk_write(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        write: Write,
        prepared: Vec<(usize, Record, Document)>,
        outcomes: &mut Outcomes,
    ) -> Result<()> {
        let mut prepared = prepared.into_iter().peekable();
        while prepared.peek().is_some() {
            let chunk: Vec<_> = prepared.by_ref().take(self.config.batch_write_limit.max(1)).collect();
            let (bases, docs): (Vec<_>, Vec<_>) = chunk
                .into_iter()
                .map(|(i, base, doc)| ((i, base), doc))
                .unzip();
            debug!(
                "couch: bulk write of {} documents to '{}' (all_or_nothing={})",
                docs.len(),
                table,
                outcomes.rollback
            );

            match self.client.bulk_docs(table, docs, outcomes.rollback).await {
                Ok(results) => {
                    for ((i, base), result) in bases.into_iter().zip(results) {
                        outcomes.settle(i, settle(table, desc, write, base, result));
                    }
                }
                Err(ClientError::ConditionFailed(reason)) if outcomes.rollback => {
                    warn!("couch: atomic batch on '{}' refused: {}", table, reason);
                    return Err(RecordStoreError::conflict(format!(
                        "Batch write on '{}' refused: {}",
                        table, reason
                    )));
                }
                Err(e) if outcomes.rollback => return Err(RecordStoreError::backend(table, e)),
                Err(e) => {
                    for (i, _) in bases {
                        outcomes.settle(i, Err(RecordStoreError::backend(table, e.clone())));
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve each record's document id, rejecting records without one
    fn resolve_ids(records: &[Record], desc: &KeyDescriptor, outcomes: &mut Outcomes) -> Result<Vec<Option<String>>> {
        let mut ids = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            match doc_id(record, desc) {
                Ok(id) => ids.push(Some(id)),
                Err(e) => {
                    outcomes.reject(i, e)?;
                    ids.push(None);
                }
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl BackendAdapter for CouchAdapter {
    fn name(&self) -> &'static str {
        "couch"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Document
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
            .db_info(table)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        self.default_key()
    }

    fn decorate_key(&self, desc: KeyDescriptor) -> KeyDescriptor {
        desc.with_managed([REV])
    }

    async fn create_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let mut outcomes = Outcomes::new(table, records.len(), extras.rollback);
        let ids = Self::resolve_ids(&records, desc, &mut outcomes)?;
        let prepared = records
            .into_iter()
            .zip(ids)
            .enumerate()
            .filter_map(|(i, (record, id))| {
                let id = id?;
                let doc = to_document(&record, desc, &id, None);
                Some((i, record, doc))
            })
            .collect();
        self.bulk_write(table, desc, Write::Create, prepared, &mut outcomes)
            .await?;
        outcomes.finish()
    }

    async fn update_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let mut outcomes = Outcomes::new(table, records.len(), extras.rollback);
        let ids = Self::resolve_ids(&records, desc, &mut outcomes)?;
        let unknown_revs: Vec<String> = records
            .iter()
            .zip(&ids)
            .filter(|(record, _)| !record.has_value(REV))
            .filter_map(|(_, id)| id.clone())
            .collect();
        let current = self.current_docs(table, &unknown_revs).await?;

        let mut prepared = Vec::with_capacity(records.len());
        for (i, (record, id)) in records.into_iter().zip(ids).enumerate() {
            let Some(id) = id else { continue };
            let rev = record
                .get(REV)
                .filter(|v| !v.is_null())
                .map(Value::to_text)
                .or_else(|| current.get(&id).and_then(revision_of));
            match rev {
                Some(rev) => {
                    let doc = to_document(&record, desc, &id, Some(rev));
                    prepared.push((i, record, doc));
                }
                None => outcomes.reject(i, record_not_found(table, &identity_of(&record, desc)))?,
            }
        }
        self.bulk_write(table, desc, Write::Replace, prepared, &mut outcomes)
            .await?;
        outcomes.finish()
    }

    /// Read-merge-write: the stored document is overlaid with the record's fields
    /// and written back under the revision it was read at
    async fn merge_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let mut outcomes = Outcomes::new(table, records.len(), extras.rollback);
        let ids = Self::resolve_ids(&records, desc, &mut outcomes)?;
        let wanted: Vec<String> = ids.iter().flatten().cloned().collect();
        let current = self.current_docs(table, &wanted).await?;

        let mut prepared = Vec::with_capacity(records.len());
        for (i, (patch, id)) in records.into_iter().zip(ids).enumerate() {
            let Some(id) = id else { continue };
            let Some(stored) = current.get(&id) else {
                outcomes.reject(i, record_not_found(table, &identity_of(&patch, desc)))?;
                continue;
            };
            let rev = patch
                .get(REV)
                .filter(|v| !v.is_null())
                .map(Value::to_text)
                .or_else(|| revision_of(stored));

            let mut merged = from_document(stored.clone(), desc);
            for (name, value) in patch.iter() {
                if name == REV || desc.is_identity(name) {
                    continue;
                }
                if value.is_null() {
                    merged.remove(name);
                } else {
                    merged.insert(name.clone(), value.clone());
                }
            }
            let doc = to_document(&merged, desc, &id, rev);
            prepared.push((i, merged, doc));
        }
        self.bulk_write(table, desc, Write::Replace, prepared, &mut outcomes)
            .await?;
        outcomes.finish()
    }

    async fn delete_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        keys: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let mut outcomes = Outcomes::new(table, keys.len(), extras.rollback);
        let ids = Self::resolve_ids(&keys, desc, &mut outcomes)?;
        let unknown_revs: Vec<String> = keys
            .iter()
            .zip(&ids)
            .filter(|(key, _)| !key.has_value(REV))
            .filter_map(|(_, id)| id.clone())
            .collect();
        let current = self.current_docs(table, &unknown_revs).await?;

        let mut prepared = Vec::with_capacity(keys.len());
        for (i, (key, id)) in keys.iter().zip(ids).enumerate() {
            let Some(id) = id else { continue };
            let rev = key
                .get(REV)
                .filter(|v| !v.is_null())
                .map(Value::to_text)
                .or_else(|| current.get(&id).and_then(revision_of));
            let Some(rev) = rev else {
                outcomes.reject(i, record_not_found(table, &identity_of(key, desc)))?;
                continue;
            };
            let mut doc = Document::new();
            doc.insert(ID.to_string(), JsonValue::String(id));
            doc.insert(REV.to_string(), JsonValue::String(rev));
            doc.insert(DELETED.to_string(), JsonValue::Bool(true));
            prepared.push((i, identity_of(key, desc), doc));
        }
        self.bulk_write(table, desc, Write::Delete, prepared, &mut outcomes)
            .await?;
        outcomes.finish()
    }

    async fn retrieve_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        keys: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let mut outcomes = Outcomes::new(table, keys.len(), extras.rollback);
        let ids = Self::resolve_ids(&keys, desc, &mut outcomes)?;
        let mut wanted: Vec<String> = Vec::new();
        for id in ids.iter().flatten() {
            if !wanted.contains(id) {
                wanted.push(id.clone());
            }
        }
        let current = self.current_docs(table, &wanted).await?;

        for (i, (key, id)) in keys.iter().zip(ids).enumerate() {
            let Some(id) = id else { continue };
            let result = current
                .get(&id)
                .map(|doc| from_document(doc.clone(), desc))
                .ok_or_else(|| record_not_found(table, &identity_of(key, desc)));
            outcomes.settle(i, result);
        }
        outcomes.finish()
    }

    async fn query_records(
        &self,
        table: &str,
        desc: &KeyDescriptor,
        filter: Option<&Predicate>,
        extras: &ExtrasConfig,
    ) -> Result<QueryResult> {
        let filter = ClientSideFilter::new(filter);
        let page_size = self.config.page_size.max(1);
        let mut matched = Vec::new();
        let mut skip = 0;
        loop {
            debug!("couch: listing '{}' from {}", table, skip);
            let response = self
                .client
                .all_docs(table, AllDocsQuery::page(skip, page_size))
                .await
                .map_err(|e| RecordStoreError::backend(table, e))?;
            let fetched = response.rows.len();
            for row in response.rows {
                if row.key.starts_with(DESIGN_PREFIX) {
                    continue;
                }
                if let Some(doc) = row.doc {
                    let record = from_document(doc, desc);
                    if filter.accepts(&record) {
                        matched.push(record);
                    }
                }
            }
            if fetched < page_size {
                break;
            }
            skip += fetched;
        }
        Ok(finish_query(matched, extras))
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        validate_table_name(&spec.name, WireFormat::Document).map_err(RecordStoreError::bad_request)?;
        self.client
            .create_db(&spec.name)
            .await
            .map_err(|e| match e {
                ClientError::ResourceInUse(msg) => RecordStoreError::conflict(msg),
                other => RecordStoreError::backend(&spec.name, other),
            })?;
        self.keys.invalidate(&spec.name);
        info!("couch: created database '{}'", spec.name);
        self.get_table(&spec.name).await
    }

    async fn get_table(&self, table: &str) -> Result<TableInfo> {
        let db = self
            .client
            .db_info(table)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        let mut info = TableInfo::new(table);
        info.key = Some(self.default_key()?);
        info.item_count = Some(db.doc_count);
        info.properties
            .insert("doc_del_count".to_string(), Value::from(db.doc_del_count));
        info.properties
            .insert("update_seq".to_string(), Value::from(db.update_seq));
        Ok(info)
    }

    /// Databases have no mutable settings; this confirms the database and drops
    /// cached keys
    async fn update_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        let info = self.get_table(&spec.name).await?;
        self.keys.invalidate(&spec.name);
        Ok(info)
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        self.client
            .delete_db(table)
            .await
            .map_err(|e| RecordStoreError::backend(table, e))?;
        self.keys.invalidate(table);
        info!("couch: deleted database '{}'", table);
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names = self
            .client
            .list_dbs()
            .await
            .map_err(|e| RecordStoreError::backend("*", e))?;
        names.retain(|n| !n.starts_with('_'));
        Ok(names)
    }
}

fn doc_id(record: &Record, desc: &KeyDescriptor) -> Result<String> {
    let field = desc.single().ok_or_else(|| {
        RecordStoreError::bad_request(format!(
            "Documents are addressed by a single id field; got ({})",
            desc.field_names().join(", ")
        ))
    })?;
    record
        .get(&field.name)
        .filter(|v| !v.is_null())
        .map(Value::to_text)
        .ok_or_else(|| {
            RecordStoreError::bad_request(format!("Identifying field '{}' is required", field.name))
        })
}

fn revision_of(doc: &Document) -> Option<String> {
    doc.get(REV).and_then(JsonValue::as_str).map(String::from)
}

/// Document body for a record: the id field becomes `_id`, other managed fields are
/// dropped and `rev` is attached when given
fn to_document(record: &Record, desc: &KeyDescriptor, id: &str, rev: Option<String>) -> Document {
    let mut doc = Document::new();
    doc.insert(ID.to_string(), JsonValue::String(id.to_string()));
    if let Some(rev) = rev {
        doc.insert(REV.to_string(), JsonValue::String(rev));
    }
    for (name, value) in record.iter() {
        if desc.is_identity(name) || desc.is_managed(name) || name.starts_with('_') {
            continue;
        }
        doc.insert(name.clone(), JsonValue::from(value.clone()));
    }
    doc
}

fn from_document(mut doc: Document, desc: &KeyDescriptor) -> Record {
    let id_field = desc.single().map_or(ID, |f| f.name.as_str());
    let id = doc.remove(ID);
    let mut record: Record = doc
        .into_iter()
        .map(|(name, value)| (name, Value::from(value)))
        .collect();
    if let Some(id) = id {
        record.insert(id_field.to_string(), Value::from(id));
    }
    record
}

fn settle(table: &str, desc: &KeyDescriptor, write: Write, base: Record, result: DocResult) -> RecordResult {
    if result.error.is_none() {
        return Ok(match (write, result.rev) {
            (Write::Delete, _) | (_, None) => base,
            (_, Some(rev)) => base.with(REV, rev),
        });
    }
    let identity = identity_of(&base, desc);
    if result.is_conflict() {
        return Err(match write {
            Write::Create => record_exists(table, &identity),
            _ => RecordStoreError::conflict(format!(
                "Document '{}' in '{}' was modified since revision was read",
                result.id, table
            )),
        });
    }
    if result.is_not_found() {
        return Err(record_not_found(table, &identity));
    }
    Err(RecordStoreError::backend(
        table,
        ClientError::Transport(format!(
            "{}: {}",
            result.error.unwrap_or_default(),
            result.reason.unwrap_or_default()
        )),
    ))
}
