//! CouchDB-style native surface: databases of JSON documents addressed by `_id`,
//! versioned by `_rev`, listed through `_all_docs`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::backend::ClientResult;

/// A JSON document body, `_id` and `_rev` included when present
pub type Document = Map<String, JsonValue>;

pub const ID: &str = "_id";
pub const REV: &str = "_rev";
pub const DELETED: &str = "_deleted";

/// Outcome for one document of a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// `conflict`, `not_found`, `forbidden`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DocResult {
    pub fn ok(id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: Some(rev.into()),
            error: None,
            reason: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: &str, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            error: Some(error.to_string()),
            reason: Some(reason.into()),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.error.as_deref() == Some("conflict")
    }

    pub fn is_not_found(&self) -> bool {
        self.error.as_deref() == Some("not_found")
    }
}

/// Parameters of an `_all_docs` request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllDocsQuery {
    /// Fetch exactly these ids, in this order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    pub include_docs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub skip: usize,
}

impl AllDocsQuery {
    pub fn keys(keys: Vec<String>) -> Self {
        Self {
            keys: Some(keys),
            include_docs: true,
            ..Self::default()
        }
    }

    pub fn page(skip: usize, limit: usize) -> Self {
        Self {
            keys: None,
            include_docs: true,
            limit: Some(limit),
            skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowValue {
    pub rev: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllDocsRow {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<RowValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AllDocsResponse {
    pub total_rows: u64,
    pub offset: u64,
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub db_name: String,
    pub doc_count: u64,
    pub doc_del_count: u64,
    pub update_seq: u64,
}

/// CouchDB-style client.
///
/// Database-level failures are `ClientError`s; per-document failures (stale
/// revision, missing document) come back inside `DocResult`.
#[async_trait]
pub trait CouchClient: Send + Sync {
    async fn create_db(&self, db: &str) -> ClientResult<()>;

    async fn delete_db(&self, db: &str) -> ClientResult<()>;

    async fn db_info(&self, db: &str) -> ClientResult<DatabaseInfo>;

    async fn list_dbs(&self) -> ClientResult<Vec<String>>;

    /// Current revision of a document, `None` when it does not exist
    async fn get_doc(&self, db: &str, id: &str) -> ClientResult<Option<Document>>;

    /// Create or replace a document; replacing requires the current `_rev`
    async fn put_doc(&self, db: &str, doc: Document) -> ClientResult<DocResult>;

    async fn delete_doc(&self, db: &str, id: &str, rev: &str) -> ClientResult<DocResult>;

    /// Write many documents. With `all_or_nothing` any conflict fails the whole
    /// request with `ConditionFailed` and nothing is written.
    async fn bulk_docs(
        &self,
        db: &str,
        docs: Vec<Document>,
        all_or_nothing: bool,
    ) -> ClientResult<Vec<DocResult>>;

    async fn all_docs(&self, db: &str, query: AllDocsQuery) -> ClientResult<AllDocsResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_doc_result_shapes() {
        let ok = DocResult::ok("w1", "1-abc");
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"id": "w1", "rev": "1-abc"})
        );

        let conflict: DocResult =
            serde_json::from_value(json!({"id": "w1", "error": "conflict", "reason": "Document update conflict."}))
                .unwrap();
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());
    }

    #[test]
    fn test_missing_row_shape() {
        let row: AllDocsRow =
            serde_json::from_value(json!({"key": "nope", "error": "not_found"})).unwrap();
        assert!(row.doc.is_none());
        assert_eq!(row.error.as_deref(), Some("not_found"));
    }
}
