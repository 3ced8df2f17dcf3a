//! SimpleDB-style native surface: domains of named items holding multi-valued string
//! attributes, queried with a select dialect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::ClientResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Attribute of a put; `replace` drops the attribute's existing values first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplaceableAttribute {
    pub name: String,
    pub value: String,
    pub replace: bool,
}

impl ReplaceableAttribute {
    pub fn replace(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            replace: true,
        }
    }
}

/// Attribute of a delete; without a value every value of the attribute goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteAttribute {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl DeleteAttribute {
    pub fn all(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// Expected state of one attribute for a conditional put or delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateCondition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub exists: bool,
}

impl UpdateCondition {
    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            exists: false,
        }
    }

    pub fn equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            exists: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SdbItem {
    pub name: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceableItem {
    pub name: String,
    pub attributes: Vec<ReplaceableAttribute>,
}

/// Item of a batch delete; no attributes removes the whole item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletableItem {
    pub name: String,
    pub attributes: Vec<DeleteAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DomainMetadata {
    pub item_count: u64,
    pub attribute_name_count: u64,
    pub attribute_value_count: u64,
    pub timestamp: DateTime<Utc>,
}

/// One page of select results
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectResult {
    pub items: Vec<SdbItem>,
    pub next_token: Option<String>,
}

/// SimpleDB-style client
#[async_trait]
pub trait SimpleDbClient: Send + Sync {
    async fn create_domain(&self, domain: &str) -> ClientResult<()>;

    async fn delete_domain(&self, domain: &str) -> ClientResult<()>;

    async fn list_domains(&self) -> ClientResult<Vec<String>>;

    async fn domain_metadata(&self, domain: &str) -> ClientResult<DomainMetadata>;

    /// Attributes of an item; empty when the item does not exist
    async fn get_attributes(
        &self,
        domain: &str,
        item_name: &str,
        consistent: bool,
    ) -> ClientResult<Vec<Attribute>>;

    async fn put_attributes(
        &self,
        domain: &str,
        item_name: &str,
        attributes: Vec<ReplaceableAttribute>,
        expected: Option<UpdateCondition>,
    ) -> ClientResult<()>;

    async fn batch_put_attributes(&self, domain: &str, items: Vec<ReplaceableItem>) -> ClientResult<()>;

    /// Remove attributes; an empty list removes the item
    async fn delete_attributes(
        &self,
        domain: &str,
        item_name: &str,
        attributes: Vec<DeleteAttribute>,
        expected: Option<UpdateCondition>,
    ) -> ClientResult<()>;

    async fn batch_delete_attributes(&self, domain: &str, items: Vec<DeletableItem>) -> ClientResult<()>;

    async fn select(
        &self,
        expression: &str,
        next_token: Option<String>,
        consistent: bool,
    ) -> ClientResult<SelectResult>;
}
