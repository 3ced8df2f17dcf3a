//! RecordStore - the backend-agnostic CRUD contract
//!
//! Every operation resolves the table's key descriptor, validates and normalizes
//! the caller's records, dispatches them to the adapter, and projects the results.
//! Batch forms return one result per input record in input order; with
//! `extras.rollback` the first failure is returned on its own instead.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::adapter::{BackendAdapter, QueryResult, RecordResult, TableInfo, TableSpec};
use crate::backend::ClientError;
use crate::error::{RecordStoreError, Result};
use crate::extras::ExtrasConfig;
use crate::filter::{ParseOptions, Predicate, parse_with};
use crate::key::KeyDescriptor;
use crate::normalize::{
    coerce, fill_synthetic, identity_of, project, reattach, record_for_id,
    require_existing_identity, require_identity, strip_identity,
};
use crate::types::{FieldProjection, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Create,
    Update,
    Merge,
    Delete,
    Retrieve,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Merge => "merge",
            Operation::Delete => "delete",
            Operation::Retrieve => "retrieve",
        }
    }

    fn projection(&self, projection: &FieldProjection) -> FieldProjection {
        match self {
            Operation::Retrieve => projection.for_read(),
            _ => projection.for_write(),
        }
    }
}

/// Uniform record operations over one backend adapter
///
/// Field projections default to identity-only for writes and all fields for reads.
/// Identity and backend-managed fields (revisions, etags) are always returned.
#[derive(Clone)]
pub struct RecordStore {
    adapter: Arc<dyn BackendAdapter>,
}

impl RecordStore {
    pub fn new(adapter: impl BackendAdapter + 'static) -> Self {
        Self {
            adapter: Arc::new(adapter),
        }
    }

    /// Share an adapter between stores
    pub fn from_adapter(adapter: Arc<dyn BackendAdapter>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &dyn BackendAdapter {
        self.adapter.as_ref()
    }

    /// Resolve the key descriptor a table's operations use
    pub async fn key_descriptor(&self, table: &str, extras: &ExtrasConfig) -> Result<KeyDescriptor> {
        self.adapter.key_descriptor(table, extras).await
    }

    /// Parse filter text with the literal conventions of this backend
    pub fn parse_filter(&self, filter: &str) -> Result<Predicate> {
        let options = ParseOptions {
            booleans_as_numbers: !self.adapter.wire_format().has_native_booleans(),
        };
        parse_with(filter, options)
    }

    // ========================================================================
    // Create
    // ========================================================================

    pub async fn create_one(
        &self,
        table: &str,
        record: Record,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Record> {
        single(self.create_many(table, vec![record], projection, extras).await?)
    }

    #[instrument(skip(self, records, projection, extras), fields(count = records.len()))]
    pub async fn create_many(
        &self,
        table: &str,
        records: Vec<Record>,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        self.run(Operation::Create, table, records, projection, extras)
            .await
    }

    // ========================================================================
    // Update
    // ========================================================================

    pub async fn update_one(
        &self,
        table: &str,
        record: Record,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Record> {
        single(self.update_many(table, vec![record], projection, extras).await?)
    }

    #[instrument(skip(self, records, projection, extras), fields(count = records.len()))]
    pub async fn update_many(
        &self,
        table: &str,
        records: Vec<Record>,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        self.run(Operation::Update, table, records, projection, extras)
            .await
    }

    /// Replace the records with the given ids by `payload`
    pub async fn update_by_ids(
        &self,
        table: &str,
        ids: &[Value],
        payload: &Record,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let records = self.records_for_ids(table, ids, payload, extras).await?;
        self.run(Operation::Update, table, records, projection, extras)
            .await
    }

    /// Replace every record matching the filter by `payload`
    #[instrument(skip(self, payload, projection, extras))]
    pub async fn update_by_filter(
        &self,
        table: &str,
        filter: &str,
        payload: &Record,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let records = self.records_for_filter(table, filter, payload, extras).await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        self.run(Operation::Update, table, records, projection, extras)
            .await
    }

    // ========================================================================
    // Merge
    // ========================================================================

    pub async fn merge_one(
        &self,
        table: &str,
        record: Record,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Record> {
        single(self.merge_many(table, vec![record], projection, extras).await?)
    }

    /// Partial updates; null fields are removed from the stored record
    #[instrument(skip(self, records, projection, extras), fields(count = records.len()))]
    pub async fn merge_many(
        &self,
        table: &str,
        records: Vec<Record>,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        self.run(Operation::Merge, table, records, projection, extras)
            .await
    }

    pub async fn merge_by_ids(
        &self,
        table: &str,
        ids: &[Value],
        payload: &Record,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let records = self.records_for_ids(table, ids, payload, extras).await?;
        self.run(Operation::Merge, table, records, projection, extras)
            .await
    }

    #[instrument(skip(self, payload, projection, extras))]
    pub async fn merge_by_filter(
        &self,
        table: &str,
        filter: &str,
        payload: &Record,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let records = self.records_for_filter(table, filter, payload, extras).await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        self.run(Operation::Merge, table, records, projection, extras)
            .await
    }

    // ========================================================================
    // Delete
    // ========================================================================

    pub async fn delete_one(&self, table: &str, record: Record, extras: &ExtrasConfig) -> Result<Record> {
        single(self.delete_many(table, vec![record], extras).await?)
    }

    pub async fn delete_by_id(&self, table: &str, id: &Value, extras: &ExtrasConfig) -> Result<Record> {
        single(self.delete_by_ids(table, std::slice::from_ref(id), extras).await?)
    }

    /// Delete by identity; results carry the identity of each deleted record
    #[instrument(skip(self, records, extras), fields(count = records.len()))]
    pub async fn delete_many(
        &self,
        table: &str,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        self.run(Operation::Delete, table, records, &FieldProjection::Default, extras)
            .await
    }

    pub async fn delete_by_ids(
        &self,
        table: &str,
        ids: &[Value],
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let records = self.records_for_ids(table, ids, &Record::new(), extras).await?;
        self.run(Operation::Delete, table, records, &FieldProjection::Default, extras)
            .await
    }

    #[instrument(skip(self, extras))]
    pub async fn delete_by_filter(
        &self,
        table: &str,
        filter: &str,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let records = self
            .records_for_filter(table, filter, &Record::new(), extras)
            .await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        self.run(Operation::Delete, table, records, &FieldProjection::Default, extras)
            .await
    }

    // ========================================================================
    // Retrieve
    // ========================================================================

    pub async fn retrieve_one(
        &self,
        table: &str,
        record: Record,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Record> {
        single(self.retrieve_many(table, vec![record], projection, extras).await?)
    }

    pub async fn retrieve_by_id(
        &self,
        table: &str,
        id: &Value,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Record> {
        single(
            self.retrieve_by_ids(table, std::slice::from_ref(id), projection, extras)
                .await?,
        )
    }

    #[instrument(skip(self, records, projection, extras), fields(count = records.len()))]
    pub async fn retrieve_many(
        &self,
        table: &str,
        records: Vec<Record>,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        self.run(Operation::Retrieve, table, records, projection, extras)
            .await
    }

    pub async fn retrieve_by_ids(
        &self,
        table: &str,
        ids: &[Value],
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let records = self.records_for_ids(table, ids, &Record::new(), extras).await?;
        self.run(Operation::Retrieve, table, records, projection, extras)
            .await
    }

    /// Records matching the filter, ordered, paged and counted per the extras. An
    /// empty filter matches every record.
    #[instrument(skip(self, projection, extras))]
    pub async fn retrieve_by_filter(
        &self,
        table: &str,
        filter: &str,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<QueryResult> {
        let predicate = if filter.trim().is_empty() {
            None
        } else {
            Some(self.parse_filter(filter)?)
        };
        let desc = self.adapter.key_descriptor(table, extras).await?;
        let mut result = self
            .adapter
            .query_records(table, &desc, predicate.as_ref(), extras)
            .await?;
        let projection = projection.for_read();
        if !projection.is_all() {
            for record in result.records.iter_mut() {
                *record = project(record, &projection, &desc);
            }
        }
        Ok(result)
    }

    pub async fn retrieve_all(
        &self,
        table: &str,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<QueryResult> {
        self.retrieve_by_filter(table, "", projection, extras).await
    }

    // ========================================================================
    // Table admin
    // ========================================================================

    #[instrument(skip(self, spec), fields(table = %spec.name))]
    pub async fn create_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        let info = self.adapter.create_table(spec).await;
        self.adapter.key_cache().invalidate(&spec.name);
        info
    }

    pub async fn get_table(&self, table: &str) -> Result<TableInfo> {
        self.adapter.get_table(table).await
    }

    #[instrument(skip(self, spec), fields(table = %spec.name))]
    pub async fn update_table(&self, spec: &TableSpec) -> Result<TableInfo> {
        let info = self.adapter.update_table(spec).await;
        self.adapter.key_cache().invalidate(&spec.name);
        info
    }

    #[instrument(skip(self))]
    pub async fn delete_table(&self, table: &str) -> Result<()> {
        let deleted = self.adapter.delete_table(table).await;
        self.adapter.key_cache().invalidate(table);
        deleted
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.adapter.list_tables().await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Validate, dispatch and project one batch, keeping results in input order
    async fn run(
        &self,
        operation: Operation,
        table: &str,
        records: Vec<Record>,
        projection: &FieldProjection,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        if records.is_empty() {
            return Err(RecordStoreError::bad_request(format!(
                "No records supplied to {} on '{}'",
                operation.name(),
                table
            )));
        }
        let desc = self.adapter.key_descriptor(table, extras).await?;

        // `None` marks a record handed to the adapter
        let mut slots: Vec<Option<RecordResult>> = Vec::with_capacity(records.len());
        let mut ready = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            match self.prepare(operation, table, &desc, record, extras) {
                Ok(prepared) => {
                    slots.push(None);
                    ready.push(prepared);
                }
                Err(e) if extras.rollback => {
                    warn!(
                        "{} on '{}' aborted before dispatch, record {}: {}",
                        operation.name(),
                        table,
                        index,
                        e
                    );
                    return Err(e);
                }
                Err(e) => slots.push(Some(Err(e))),
            }
        }

        debug!(
            "{}: {} of {} records on '{}' ({} rejected)",
            self.adapter.name(),
            operation.name(),
            table,
            ready.len(),
            slots.len() - ready.len()
        );
        let dispatched = if ready.is_empty() {
            Vec::new()
        } else {
            self.dispatch(operation, table, &desc, ready, extras).await?
        };

        let projection = operation.projection(projection);
        let mut dispatched = dispatched.into_iter();
        let results = slots
            .into_iter()
            .map(|slot| match slot {
                Some(rejected) => rejected,
                None => dispatched
                    .next()
                    .unwrap_or_else(|| Err(missing_result(table)))
                    .map(|record| project(&record, &projection, &desc)),
            })
            .collect();
        Ok(results)
    }

    fn prepare(
        &self,
        operation: Operation,
        table: &str,
        desc: &KeyDescriptor,
        mut record: Record,
        extras: &ExtrasConfig,
    ) -> Result<Record> {
        self.adapter.apply_defaults(&mut record, desc, extras);
        match operation {
            Operation::Create => {
                fill_synthetic(&mut record, desc, self.adapter.id_generator(), table);
                require_identity(&record, desc)?;
                record.retain(|name, _| !desc.is_managed(name));
            }
            _ => require_existing_identity(&record, desc)?,
        }
        let record = match operation {
            Operation::Delete | Operation::Retrieve => identity_of(&record, desc),
            _ => record,
        };
        coerce(&record, desc, self.adapter.wire_format())
    }

    async fn dispatch(
        &self,
        operation: Operation,
        table: &str,
        desc: &KeyDescriptor,
        records: Vec<Record>,
        extras: &ExtrasConfig,
    ) -> Result<Vec<RecordResult>> {
        let adapter = self.adapter.as_ref();
        match operation {
            Operation::Create => adapter.create_records(table, desc, records, extras).await,
            Operation::Update => adapter.update_records(table, desc, records, extras).await,
            Operation::Merge => adapter.merge_records(table, desc, records, extras).await,
            Operation::Delete => adapter.delete_records(table, desc, records, extras).await,
            Operation::Retrieve => adapter.retrieve_records(table, desc, records, extras).await,
        }
    }

    /// Identity records for ids, each carrying the payload's non-identity fields
    async fn records_for_ids(
        &self,
        table: &str,
        ids: &[Value],
        payload: &Record,
        extras: &ExtrasConfig,
    ) -> Result<Vec<Record>> {
        let desc = self.adapter.key_descriptor(table, extras).await?;
        let (fields, _) = strip_identity(payload, &desc);
        ids.iter()
            .map(|id| {
                let key = self.id_record(&desc, id, extras)?;
                Ok(reattach(fields.clone(), &key))
            })
            .collect()
    }

    /// Read the records matching a filter and lay the payload over their identity.
    /// Managed fields of the match (revisions, etags) are kept so the write is
    /// checked against what was read.
    async fn records_for_filter(
        &self,
        table: &str,
        filter: &str,
        payload: &Record,
        extras: &ExtrasConfig,
    ) -> Result<Vec<Record>> {
        if filter.trim().is_empty() {
            return Err(RecordStoreError::bad_request(
                "A filter is required to select records",
            ));
        }
        let predicate = self.parse_filter(filter)?;
        let desc = self.adapter.key_descriptor(table, extras).await?;
        let matched = self
            .adapter
            .query_records(table, &desc, Some(&predicate), extras)
            .await?;
        debug!(
            "{}: filter on '{}' selected {} records",
            self.adapter.name(),
            table,
            matched.records.len()
        );
        let (fields, _) = strip_identity(payload, &desc);
        Ok(matched
            .records
            .iter()
            .map(|record| reattach(fields.clone(), &identity_of(record, &desc)))
            .collect())
    }

    /// Identity record for one id. Composite keys accept an id for the range field
    /// when the backend supplies the remaining fields.
    fn id_record(&self, desc: &KeyDescriptor, id: &Value, extras: &ExtrasConfig) -> Result<Record> {
        if let (true, Some(range)) = (desc.is_composite(), desc.range()) {
            let mut record = Record::new().with(range.name.clone(), id.clone());
            self.adapter.apply_defaults(&mut record, desc, extras);
            if !id.is_null() && desc.fields().iter().all(|f| record.has_value(&f.name)) {
                return Ok(record);
            }
        }
        record_for_id(desc, id)
    }
}

/// Unwrap the single result of a one-record batch
fn single(results: Vec<RecordResult>) -> Result<Record> {
    results
        .into_iter()
        .next()
        .unwrap_or_else(|| Err(RecordStoreError::bad_request("No record was processed")))
}

fn missing_result(table: &str) -> RecordStoreError {
    RecordStoreError::backend(
        table,
        ClientError::Transport("adapter returned fewer results than records".into()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::couch::{CouchAdapter, MemoryCouchClient};
    use crate::backend::dynamo::{DynamoAdapter, MemoryDynamoClient};
    use crate::backend::simpledb::{MemorySimpleDbClient, SimpleDbAdapter};
    use crate::backend::table::{MemoryTableClient, TableAdapter};
    use crate::config::StoreConfig;
    use crate::key::FieldKey;
    use crate::normalize::IdGenerator;
    use crate::types::PrimitiveType;
    use serde_json::json;

    struct Sequence;

    impl IdGenerator for Sequence {
        fn generate(&self, table: &str) -> String {
            format!("{}-generated", table)
        }
    }

    fn record(value: serde_json::Value) -> Record {
        Record::from_json(value).unwrap()
    }

    async fn dynamo_store() -> RecordStore {
        let adapter = DynamoAdapter::new(Arc::new(MemoryDynamoClient::new()), StoreConfig::dynamo());
        let store = RecordStore::new(adapter);
        let key = KeyDescriptor::new(vec![FieldKey::hash("id", PrimitiveType::String)]).unwrap();
        store
            .create_table(&TableSpec::new("widgets").with_key(key))
            .await
            .unwrap();
        store
    }

    async fn seeded() -> RecordStore {
        let store = dynamo_store().await;
        let records = vec![
            record(json!({"id": "w1", "color": "red", "qty": 5})),
            record(json!({"id": "w2", "color": "blue", "qty": 2})),
            record(json!({"id": "w3", "color": "red", "qty": 9})),
        ];
        store
            .create_many("widgets", records, &FieldProjection::Default, &ExtrasConfig::new())
            .await
            .unwrap();
        store
    }

    // ==================== Projection ====================

    #[tokio::test]
    async fn test_create_returns_identity_by_default() {
        let store = dynamo_store().await;
        let created = store
            .create_one(
                "widgets",
                record(json!({"id": "w1", "color": "red", "qty": 5})),
                &FieldProjection::Default,
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        assert_eq!(created.to_json(), json!({"id": "w1"}));

        let fetched = store
            .retrieve_by_id("widgets", &Value::from("w1"), &FieldProjection::parse("color"), &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(fetched.to_json(), json!({"id": "w1", "color": "red"}));
    }

    // ==================== Batches ====================

    #[tokio::test]
    async fn test_invalid_record_fails_in_place() {
        let store = dynamo_store().await;
        let records = vec![
            record(json!({"id": "a", "n": 1})),
            record(json!({"n": 2})),
            record(json!({"id": "c", "n": 3})),
        ];
        let results = store
            .create_many("widgets", records.clone(), &FieldProjection::Default, &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(RecordStoreError::BadRequest(_))));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_invalid_record_aborts_rollback_batch() {
        let store = dynamo_store().await;
        let records = vec![
            record(json!({"id": "a", "n": 1})),
            record(json!({"n": 2})),
        ];
        let err = store
            .create_many(
                "widgets",
                records,
                &FieldProjection::Default,
                &ExtrasConfig::new().with_rollback(true),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::BadRequest(_)));
        let all = store
            .retrieve_all("widgets", &FieldProjection::All, &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(all.records.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let store = dynamo_store().await;
        let err = store
            .update_many("widgets", Vec::new(), &FieldProjection::Default, &ExtrasConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::BadRequest(_)));
    }

    // ==================== Ids and filters ====================

    #[tokio::test]
    async fn test_update_by_filter_replaces_matches() {
        let store = seeded().await;
        let results = store
            .update_by_filter(
                "widgets",
                "color = 'red'",
                &record(json!({"id": "ignored", "color": "green"})),
                &FieldProjection::All,
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 2);

        let green = store
            .retrieve_by_filter("widgets", "color = 'green'", &FieldProjection::All, &ExtrasConfig::new())
            .await
            .unwrap();
        let mut ids: Vec<_> = green.records.iter().map(|r| r["id"].to_text()).collect();
        ids.sort();
        assert_eq!(ids, vec!["w1", "w3"]);
        assert!(green.records.iter().all(|r| !r.contains_key("qty")));
    }

    #[tokio::test]
    async fn test_merge_by_ids_keeps_other_fields() {
        let store = seeded().await;
        let results = store
            .merge_by_ids(
                "widgets",
                &[Value::from("w1"), Value::from("missing")],
                &record(json!({"qty": 6})),
                &FieldProjection::All,
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        let merged = results[0].as_ref().unwrap();
        assert_eq!(merged["qty"], Value::from(6));
        assert_eq!(merged["color"], Value::from("red"));
        assert!(results[1].as_ref().unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_by_filter_and_missing_match() {
        let store = seeded().await;
        let deleted = store
            .delete_by_filter("widgets", "qty > 4", &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(deleted.len(), 2);
        let none = store
            .delete_by_filter("widgets", "qty > 100", &ExtrasConfig::new())
            .await
            .unwrap();
        assert!(none.is_empty());
        let err = store
            .retrieve_by_id("widgets", &Value::from("w1"), &FieldProjection::All, &ExtrasConfig::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_filter_errors_surface() {
        let store = seeded().await;
        let err = store
            .retrieve_by_filter("widgets", "a nor b", &FieldProjection::All, &ExtrasConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::UnsupportedFilter(_)));
        let err = store
            .delete_by_filter("widgets", "  ", &ExtrasConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_paged_retrieve_counts_all_matches() {
        let store = seeded().await;
        let extras = ExtrasConfig::new()
            .with_order(vec![crate::extras::OrderSpec::desc("qty")])
            .with_limit(1)
            .with_count();
        let result = store
            .retrieve_by_filter("widgets", "qty >= 2", &FieldProjection::All, &extras)
            .await
            .unwrap();
        assert_eq!(result.count, Some(3));
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0]["id"], Value::from("w3"));
    }

    // ==================== Backend specifics ====================

    #[tokio::test]
    async fn test_synthetic_ids_are_generated() {
        let config = crate::config::StoreConfigBuilder::from_config(StoreConfig::simpledb())
            .default_id_field("id")
            .build();
        let adapter = SimpleDbAdapter::new(Arc::new(MemorySimpleDbClient::new()), config)
            .with_id_generator(Sequence);
        let store = RecordStore::new(adapter);
        store.create_table(&TableSpec::new("widgets")).await.unwrap();
        let created = store
            .create_one(
                "widgets",
                record(json!({"color": "red", "active": true})),
                &FieldProjection::All,
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        assert_eq!(created["id"], Value::from("widgets-generated"));

        let found = store
            .retrieve_by_filter("widgets", "active = true", &FieldProjection::All, &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(found.records.len(), 1);
        assert_eq!(found.records[0]["active"], Value::from(1));
    }

    #[tokio::test]
    async fn test_update_by_filter_keeps_revisions() {
        let store = RecordStore::new(CouchAdapter::new(
            Arc::new(MemoryCouchClient::new()),
            StoreConfig::couch(),
        ));
        store.create_table(&TableSpec::new("widgets")).await.unwrap();
        store
            .create_one(
                "widgets",
                record(json!({"_id": "w1", "color": "red"})),
                &FieldProjection::Default,
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        let results = store
            .update_by_filter(
                "widgets",
                "color = 'red'",
                &record(json!({"color": "blue"})),
                &FieldProjection::All,
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        let updated = results[0].as_ref().unwrap();
        assert!(updated["_rev"].to_text().starts_with("2-"));
        assert_eq!(updated["color"], Value::from("blue"));
    }

    #[tokio::test]
    async fn test_row_key_ids_use_default_partition() {
        let store = RecordStore::new(TableAdapter::new(
            Arc::new(MemoryTableClient::new()),
            StoreConfig::table(),
        ));
        store.create_table(&TableSpec::new("widgets")).await.unwrap();
        store
            .create_one(
                "widgets",
                record(json!({"RowKey": "w1", "qty": 5})),
                &FieldProjection::Default,
                &ExtrasConfig::new(),
            )
            .await
            .unwrap();
        let found = store
            .retrieve_by_id("widgets", &Value::from("w1"), &FieldProjection::All, &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(found["PartitionKey"], Value::from("default"));
        assert_eq!(found["qty"], Value::from(5));
    }

    #[tokio::test]
    async fn test_admin_invalidates_cached_keys() {
        let store = dynamo_store().await;
        store
            .key_descriptor("widgets", &ExtrasConfig::new())
            .await
            .unwrap();
        assert_eq!(store.adapter().key_cache().len(), 1);
        store.delete_table("widgets").await.unwrap();
        assert!(store.adapter().key_cache().is_empty());
        let err = store
            .key_descriptor("widgets", &ExtrasConfig::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
