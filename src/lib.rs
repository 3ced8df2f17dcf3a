//! # runtara-record-store
//!
//! One CRUD contract over heterogeneous NoSQL and cloud-table stores.
//!
//! Callers create, retrieve, update, merge and delete records singly, by id list or
//! by filter expression without knowing the target store's query language, key
//! model or consistency rules. Four store families are supported:
//!
//! - **DynamoDB-like** stores: hash/range keys, structured condition maps, batch
//!   writes with unprocessed-item retries
//! - **SimpleDB-like** stores: a synthetic item name, string-only attributes and a
//!   restricted select dialect
//! - **CouchDB-like** document stores: document ids with revisions for optimistic
//!   concurrency and no server-side filtering
//! - **Partitioned table** stores: partition and row keys, etags and OData filters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use runtara_record_store::backend::dynamo::{DynamoAdapter, MemoryDynamoClient};
//! use runtara_record_store::{
//!     ExtrasConfig, FieldKey, FieldProjection, KeyDescriptor, PrimitiveType, Record,
//!     RecordStore, StoreConfig, TableSpec,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(MemoryDynamoClient::new());
//!     let store = RecordStore::new(DynamoAdapter::new(client, StoreConfig::dynamo()));
//!
//!     let key = KeyDescriptor::new(vec![FieldKey::hash("id", PrimitiveType::String)])?;
//!     store.create_table(&TableSpec::new("widgets").with_key(key)).await?;
//!
//!     let widget = Record::new().with("id", "w1").with("color", "red").with("qty", 5);
//!     store
//!         .create_one("widgets", widget, &FieldProjection::Default, &ExtrasConfig::new())
//!         .await?;
//!
//!     let red = store
//!         .retrieve_by_filter(
//!             "widgets",
//!             "qty >= 3 and color = 'red'",
//!             &FieldProjection::All,
//!             &ExtrasConfig::new().with_count(),
//!         )
//!         .await?;
//!     assert_eq!(red.count, Some(1));
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Filters
//!
//! Filters are loosely SQL-like: `eq ne gte lte gt lt in between begins_with
//! contains not_contains like`, joined by `and`/`or`. `nor`, a leading `not` and
//! `like` patterns anchored only at the end are rejected rather than guessed at.
//! Each family executes the parsed predicate natively where it can and in process
//! where it cannot.
//!
//! ## Batches and rollback
//!
//! Batch operations return one result per input record. With
//! `ExtrasConfig::with_rollback(true)` the first failure aborts the batch instead;
//! writes already applied are only undone where the store has a native
//! transaction (CouchDB-like `all_or_nothing` bulk writes, partitioned table
//! entity group transactions).

pub mod adapter;
pub mod backend;
pub mod config;
pub mod error;
pub mod extras;
pub mod filter;
pub mod key;
pub mod normalize;
pub mod projector;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use adapter::{BackendAdapter, QueryResult, RecordResult, TableInfo, TableSpec};
pub use backend::{ClientError, ClientResult};
pub use config::{StoreConfig, StoreConfigBuilder};
pub use error::{RecordStoreError, Result};
pub use extras::{Direction, ExtrasConfig, OrderSpec, RelationSpec};
pub use filter::{Operator, ParseOptions, Predicate, parse, parse_with};
pub use key::{FieldKey, KeyCache, KeyDescriptor, KeyRole};
pub use normalize::{IdGenerator, RandomIdGenerator};
pub use store::RecordStore;
pub use types::{FieldProjection, PrimitiveType, Record, Value, WireFormat};
