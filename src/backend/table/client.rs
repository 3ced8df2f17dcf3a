//! Partitioned table native surface: entities addressed by `PartitionKey` and
//! `RowKey`, holding typed scalar properties, queried with OData filter strings.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::ClientResult;

pub const PARTITION_KEY: &str = "PartitionKey";
pub const ROW_KEY: &str = "RowKey";
pub const TIMESTAMP: &str = "Timestamp";
pub const ETAG: &str = "etag";

/// `If-Match` value that matches any etag
pub const ANY_ETAG: &str = "*";

/// Entity data model property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EdmValue {
    #[serde(rename = "Edm.String")]
    String(String),
    #[serde(rename = "Edm.Int64")]
    Int64(i64),
    #[serde(rename = "Edm.Double")]
    Double(f64),
    #[serde(rename = "Edm.Boolean")]
    Boolean(bool),
    #[serde(rename = "Edm.DateTime")]
    DateTime(DateTime<Utc>),
}

impl EdmValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            EdmValue::String(_) => "Edm.String",
            EdmValue::Int64(_) => "Edm.Int64",
            EdmValue::Double(_) => "Edm.Double",
            EdmValue::Boolean(_) => "Edm.Boolean",
            EdmValue::DateTime(_) => "Edm.DateTime",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entity {
    pub partition_key: String,
    pub row_key: String,
    /// Set by the service on every write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "odata.etag")]
    pub etag: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, EdmValue>,
}

impl Entity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            timestamp: None,
            etag: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: EdmValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// One operation of an entity group transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionAction {
    Insert(Entity),
    Update { entity: Entity, if_match: String },
    Merge { entity: Entity, if_match: String },
    Delete {
        partition_key: String,
        row_key: String,
        if_match: String,
    },
}

impl TransactionAction {
    pub fn partition_key(&self) -> &str {
        match self {
            TransactionAction::Insert(entity)
            | TransactionAction::Update { entity, .. }
            | TransactionAction::Merge { entity, .. } => &entity.partition_key,
            TransactionAction::Delete { partition_key, .. } => partition_key,
        }
    }

    pub fn row_key(&self) -> &str {
        match self {
            TransactionAction::Insert(entity)
            | TransactionAction::Update { entity, .. }
            | TransactionAction::Merge { entity, .. } => &entity.row_key,
            TransactionAction::Delete { row_key, .. } => row_key,
        }
    }
}

/// Resume point of a paged query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub next_partition_key: String,
    pub next_row_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// OData `$filter`
    pub filter: Option<String>,
    /// OData `$select`
    pub select: Option<Vec<String>>,
    /// OData `$top`, at most 1000 per page
    pub top: Option<usize>,
    pub continuation: Option<Continuation>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryPage {
    pub entities: Vec<Entity>,
    pub continuation: Option<Continuation>,
}

/// Partitioned table client.
///
/// Missing entities on update, merge and delete are `ResourceNotFound`; an existing
/// entity on insert and an etag mismatch are `ConditionFailed`.
#[async_trait]
pub trait TableClient: Send + Sync {
    async fn create_table(&self, table: &str) -> ClientResult<()>;

    async fn delete_table(&self, table: &str) -> ClientResult<()>;

    async fn list_tables(&self) -> ClientResult<Vec<String>>;

    async fn table_exists(&self, table: &str) -> ClientResult<bool>;

    async fn insert_entity(&self, table: &str, entity: Entity) -> ClientResult<Entity>;

    /// Replace an entity's properties
    async fn update_entity(&self, table: &str, entity: Entity, if_match: &str) -> ClientResult<Entity>;

    /// Add or overwrite the given properties, leaving others in place
    async fn merge_entity(&self, table: &str, entity: Entity, if_match: &str) -> ClientResult<Entity>;

    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        if_match: &str,
    ) -> ClientResult<()>;

    async fn get_entity(&self, table: &str, partition_key: &str, row_key: &str) -> ClientResult<Option<Entity>>;

    async fn query_entities(&self, table: &str, options: QueryOptions) -> ClientResult<QueryPage>;

    /// Apply every action or none. All actions must target one partition. Returns
    /// the written entity per action, `None` for deletes.
    async fn submit_transaction(
        &self,
        table: &str,
        actions: Vec<TransactionAction>,
    ) -> ClientResult<Vec<Option<Entity>>>;
}
