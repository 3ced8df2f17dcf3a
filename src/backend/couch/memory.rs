//! In-memory CouchDB-style client
//!
//! Keeps one revision per document. Revisions are `<generation>-<random hex>`; a
//! write to an existing document must name its current revision and a write naming
//! a revision for a missing document conflicts, as on the server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::backend::couch::client::{
    AllDocsQuery, AllDocsResponse, AllDocsRow, CouchClient, DELETED, DatabaseInfo, DocResult,
    Document, ID, REV, RowValue,
};
use crate::backend::{ClientError, ClientResult};

#[derive(Debug, Clone)]
struct StoredDoc {
    generation: u64,
    rev: String,
    body: Document,
}

impl StoredDoc {
    fn to_document(&self, id: &str) -> Document {
        let mut doc = Document::new();
        doc.insert(ID.to_string(), JsonValue::String(id.to_string()));
        doc.insert(REV.to_string(), JsonValue::String(self.rev.clone()));
        doc.extend(self.body.clone());
        doc
    }
}

#[derive(Debug, Default)]
struct Database {
    docs: BTreeMap<String, StoredDoc>,
    deleted: u64,
    update_seq: u64,
}

/// A write checked against the database but not yet applied
enum Pending {
    Put { id: String, body: Document, generation: u64 },
    Delete { id: String },
}

impl Database {
    /// Validate one write and describe it; failures come back as a `DocResult`
    fn plan(&self, mut doc: Document) -> Result<Pending, DocResult> {
        let id = match doc.remove(ID) {
            Some(JsonValue::String(id)) if !id.is_empty() => id,
            _ => Uuid::new_v4().simple().to_string(),
        };
        let rev = match doc.remove(REV) {
            Some(JsonValue::String(rev)) => Some(rev),
            _ => None,
        };
        let deleted = matches!(doc.remove(DELETED), Some(JsonValue::Bool(true)));

        match (self.docs.get(&id), rev) {
            (Some(current), Some(rev)) if current.rev == rev => Ok(if deleted {
                Pending::Delete { id }
            } else {
                Pending::Put {
                    id,
                    body: doc,
                    generation: current.generation + 1,
                }
            }),
            (None, _) if deleted => Err(DocResult::failed(id, "not_found", "missing")),
            (None, None) => Ok(Pending::Put {
                id,
                body: doc,
                generation: 1,
            }),
            _ => Err(DocResult::failed(id, "conflict", "Document update conflict.")),
        }
    }

    fn apply(&mut self, pending: Pending) -> DocResult {
        self.update_seq += 1;
        match pending {
            Pending::Put { id, body, generation } => {
                let rev = format!("{}-{}", generation, Uuid::new_v4().simple());
                self.docs.insert(
                    id.clone(),
                    StoredDoc {
                        generation,
                        rev: rev.clone(),
                        body,
                    },
                );
                DocResult::ok(id, rev)
            }
            Pending::Delete { id } => {
                let generation = self.docs.remove(&id).map_or(1, |d| d.generation + 1);
                self.deleted += 1;
                DocResult::ok(id, format!("{}-{}", generation, Uuid::new_v4().simple()))
            }
        }
    }

    fn write(&mut self, doc: Document) -> DocResult {
        match self.plan(doc) {
            Ok(pending) => self.apply(pending),
            Err(failed) => failed,
        }
    }

    fn row(&self, id: &str, include_docs: bool) -> AllDocsRow {
        match self.docs.get(id) {
            Some(stored) => AllDocsRow {
                key: id.to_string(),
                id: Some(id.to_string()),
                value: Some(RowValue {
                    rev: stored.rev.clone(),
                }),
                doc: include_docs.then(|| stored.to_document(id)),
                error: None,
            },
            None => AllDocsRow {
                key: id.to_string(),
                id: None,
                value: None,
                doc: None,
                error: Some("not_found".to_string()),
            },
        }
    }
}

/// Thread-safe in-memory implementation of [`CouchClient`]
#[derive(Debug, Default)]
pub struct MemoryCouchClient {
    databases: RwLock<BTreeMap<String, Database>>,
    operations: Mutex<Vec<String>>,
}

impl MemoryCouchClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the native operations issued so far
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }

    fn record(&self, operation: &str) {
        self.operations.lock().push(operation.to_string());
    }

    fn missing_db(db: &str) -> ClientError {
        ClientError::ResourceNotFound(format!("Database does not exist: {}", db))
    }
}

#[async_trait]
impl CouchClient for MemoryCouchClient {
    async fn create_db(&self, db: &str) -> ClientResult<()> {
        self.record("PUT /db");
        let mut databases = self.databases.write();
        if databases.contains_key(db) {
            return Err(ClientError::ResourceInUse(format!(
                "The database could not be created, the file already exists: {}",
                db
            )));
        }
        databases.insert(db.to_string(), Database::default());
        Ok(())
    }

    async fn delete_db(&self, db: &str) -> ClientResult<()> {
        self.record("DELETE /db");
        self.databases
            .write()
            .remove(db)
            .map(|_| ())
            .ok_or_else(|| Self::missing_db(db))
    }

    async fn db_info(&self, db: &str) -> ClientResult<DatabaseInfo> {
        self.record("GET /db");
        let databases = self.databases.read();
        let database = databases.get(db).ok_or_else(|| Self::missing_db(db))?;
        Ok(DatabaseInfo {
            db_name: db.to_string(),
            doc_count: database.docs.len() as u64,
            doc_del_count: database.deleted,
            update_seq: database.update_seq,
        })
    }

    async fn list_dbs(&self) -> ClientResult<Vec<String>> {
        self.record("GET /_all_dbs");
        Ok(self.databases.read().keys().cloned().collect())
    }

    async fn get_doc(&self, db: &str, id: &str) -> ClientResult<Option<Document>> {
        self.record("GET /db/doc");
        let databases = self.databases.read();
        let database = databases.get(db).ok_or_else(|| Self::missing_db(db))?;
        Ok(database.docs.get(id).map(|d| d.to_document(id)))
    }

    async fn put_doc(&self, db: &str, doc: Document) -> ClientResult<DocResult> {
        self.record("PUT /db/doc");
        let mut databases = self.databases.write();
        let database = databases.get_mut(db).ok_or_else(|| Self::missing_db(db))?;
        Ok(database.write(doc))
    }

    async fn delete_doc(&self, db: &str, id: &str, rev: &str) -> ClientResult<DocResult> {
        self.record("DELETE /db/doc");
        let mut databases = self.databases.write();
        let database = databases.get_mut(db).ok_or_else(|| Self::missing_db(db))?;
        let mut doc = Document::new();
        doc.insert(ID.to_string(), JsonValue::String(id.to_string()));
        doc.insert(REV.to_string(), JsonValue::String(rev.to_string()));
        doc.insert(DELETED.to_string(), JsonValue::Bool(true));
        Ok(database.write(doc))
    }

    async fn bulk_docs(
        &self,
        db: &str,
        docs: Vec<Document>,
        all_or_nothing: bool,
    ) -> ClientResult<Vec<DocResult>> {
        self.record("POST /db/_bulk_docs");
        let mut databases = self.databases.write();
        let database = databases.get_mut(db).ok_or_else(|| Self::missing_db(db))?;

        if !all_or_nothing {
            return Ok(docs.into_iter().map(|doc| database.write(doc)).collect());
        }

        let mut planned = Vec::with_capacity(docs.len());
        let mut seen = std::collections::HashSet::new();
        for doc in docs {
            let pending = database.plan(doc).map_err(|failed| {
                ClientError::ConditionFailed(format!(
                    "{} on '{}': {}",
                    failed.error.unwrap_or_default(),
                    failed.id,
                    failed.reason.unwrap_or_default()
                ))
            })?;
            let id = match &pending {
                Pending::Put { id, .. } | Pending::Delete { id } => id.clone(),
            };
            if !seen.insert(id.clone()) {
                return Err(ClientError::ConditionFailed(format!(
                    "conflict on '{}': document appears twice in the request",
                    id
                )));
            }
            planned.push(pending);
        }
        Ok(planned.into_iter().map(|p| database.apply(p)).collect())
    }

    async fn all_docs(&self, db: &str, query: AllDocsQuery) -> ClientResult<AllDocsResponse> {
        self.record("GET /db/_all_docs");
        let databases = self.databases.read();
        let database = databases.get(db).ok_or_else(|| Self::missing_db(db))?;
        let total_rows = database.docs.len() as u64;

        let rows = match &query.keys {
            Some(keys) => keys
                .iter()
                .map(|id| database.row(id, query.include_docs))
                .collect(),
            None => database
                .docs
                .keys()
                .skip(query.skip)
                .take(query.limit.unwrap_or(usize::MAX))
                .map(|id| database.row(id, query.include_docs))
                .collect(),
        };
        Ok(AllDocsResponse {
            total_rows,
            offset: query.skip as u64,
            rows,
        })
    }
}
