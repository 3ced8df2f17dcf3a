//! Key descriptor resolution
//!
//! Determines which fields identify a record in a table, their primitive types and
//! their structural role, either from caller overrides (`id_field`, `id_type`,
//! `id_key_type`) or from the backend's native table metadata. Resolved descriptors
//! may be cached per adapter; the cache is invalidated by table admin operations.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{RecordStoreError, Result};
use crate::extras::ExtrasConfig;
use crate::types::PrimitiveType;

/// Structural role of an identifying field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    /// Primary identity / partition field
    Hash,
    /// Secondary identity / sort field
    Range,
    /// Identity generated by the adapter when the caller supplies none
    Synthetic,
}

impl KeyRole {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hash" | "partition" | "primary" => Ok(KeyRole::Hash),
            "range" | "sort" => Ok(KeyRole::Range),
            "synthetic" | "auto" | "generated" => Ok(KeyRole::Synthetic),
            other => Err(RecordStoreError::bad_request(format!(
                "Unknown key type '{}'",
                other
            ))),
        }
    }
}

/// One identifying field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldKey {
    pub name: String,
    #[serde(rename = "type")]
    pub primitive_type: PrimitiveType,
    pub role: KeyRole,
}

impl FieldKey {
    pub fn new(name: impl Into<String>, primitive_type: PrimitiveType, role: KeyRole) -> Self {
        Self {
            name: name.into(),
            primitive_type,
            role,
        }
    }

    pub fn hash(name: impl Into<String>, primitive_type: PrimitiveType) -> Self {
        Self::new(name, primitive_type, KeyRole::Hash)
    }

    pub fn range(name: impl Into<String>, primitive_type: PrimitiveType) -> Self {
        Self::new(name, primitive_type, KeyRole::Range)
    }

    pub fn synthetic(name: impl Into<String>) -> Self {
        Self::new(name, PrimitiveType::String, KeyRole::Synthetic)
    }
}

/// Identity of a table's records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedKeyDescriptor")]
pub struct KeyDescriptor {
    fields: Vec<FieldKey>,
    /// Server-managed fields (revisions, timestamps) stripped from write payloads
    managed: Vec<String>,
}

/// Deserialized form, validated through `KeyDescriptor::new`
#[derive(Deserialize)]
struct UncheckedKeyDescriptor {
    fields: Vec<FieldKey>,
    #[serde(default)]
    managed: Vec<String>,
}

impl TryFrom<UncheckedKeyDescriptor> for KeyDescriptor {
    type Error = RecordStoreError;

    fn try_from(raw: UncheckedKeyDescriptor) -> Result<Self> {
        Ok(KeyDescriptor::new(raw.fields)?.with_managed(raw.managed))
    }
}

impl KeyDescriptor {
    /// Build a descriptor, enforcing a non-empty, duplicate-free field list with at
    /// least one `hash` or `synthetic` field.
    pub fn new(fields: Vec<FieldKey>) -> Result<Self> {
        if fields.is_empty() {
            return Err(RecordStoreError::configuration(
                "Key descriptor requires at least one identifying field",
            ));
        }
        if !fields
            .iter()
            .any(|f| matches!(f.role, KeyRole::Hash | KeyRole::Synthetic))
        {
            return Err(RecordStoreError::configuration(
                "Key descriptor requires a hash or synthetic field",
            ));
        }
        for (i, field) in fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(RecordStoreError::configuration("Identifying field name is empty"));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(RecordStoreError::configuration(format!(
                    "Identifying field '{}' listed twice",
                    field.name
                )));
            }
        }
        Ok(Self {
            fields,
            managed: Vec::new(),
        })
    }

    /// Attach backend-managed field names
    pub fn with_managed<I, S>(mut self, managed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in managed {
            let name = name.into();
            if !self.managed.contains(&name) && !self.is_identity(&name) {
                self.managed.push(name);
            }
        }
        self
    }

    pub fn fields(&self) -> &[FieldKey] {
        &self.fields
    }

    pub fn managed(&self) -> &[String] {
        &self.managed
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldKey> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_identity(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn is_managed(&self, name: &str) -> bool {
        self.managed.iter().any(|m| m == name)
    }

    /// First hash or synthetic field
    pub fn primary(&self) -> &FieldKey {
        self.fields
            .iter()
            .find(|f| matches!(f.role, KeyRole::Hash | KeyRole::Synthetic))
            .unwrap_or(&self.fields[0])
    }

    pub fn range(&self) -> Option<&FieldKey> {
        self.fields.iter().find(|f| f.role == KeyRole::Range)
    }

    /// The only identifying field, when the key is not composite
    pub fn single(&self) -> Option<&FieldKey> {
        match self.fields.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        self.fields.len() > 1
    }

    pub fn field_types(&self) -> Vec<(&str, PrimitiveType)> {
        self.fields
            .iter()
            .map(|f| (f.name.as_str(), f.primitive_type))
            .collect()
    }
}

/// Build a descriptor from `id_field` / `id_type` / `id_key_type` overrides.
///
/// Returns `Ok(None)` when no override is present. Types default to `string`, roles
/// to `hash` for the first field and `range` after it.
pub fn resolve_from_extras(extras: &ExtrasConfig) -> Result<Option<KeyDescriptor>> {
    if extras.id_field.is_empty() {
        return Ok(None);
    }
    let mut fields = Vec::with_capacity(extras.id_field.len());
    for (i, name) in extras.id_field.iter().enumerate() {
        let primitive_type = match extras.id_type.get(i) {
            Some(t) => PrimitiveType::parse(t)?,
            None => PrimitiveType::String,
        };
        let role = match extras.id_key_type.get(i) {
            Some(r) => KeyRole::parse(r)?,
            None if i == 0 => KeyRole::Hash,
            None => KeyRole::Range,
        };
        fields.push(FieldKey::new(name.trim(), primitive_type, role));
    }
    KeyDescriptor::new(fields).map(Some)
}

/// Build a descriptor from native key schema and attribute type metadata.
///
/// Key fields without an attribute type entry default to `string`.
pub fn resolve_from_metadata(
    table: &str,
    key_schema: &[(String, KeyRole)],
    attribute_types: &[(String, PrimitiveType)],
) -> Result<KeyDescriptor> {
    if key_schema.is_empty() {
        return Err(RecordStoreError::configuration(format!(
            "No identifying fields could be determined for table '{}'",
            table
        )));
    }
    let fields = key_schema
        .iter()
        .map(|(name, role)| {
            let primitive_type = attribute_types
                .iter()
                .find(|(attr, _)| attr == name)
                .map(|(_, t)| *t)
                .unwrap_or_default();
            FieldKey::new(name.clone(), primitive_type, *role)
        })
        .collect();
    KeyDescriptor::new(fields)
}

/// Per-adapter cache of resolved descriptors, keyed by table name
#[derive(Debug)]
pub struct KeyCache {
    enabled: bool,
    entries: RwLock<HashMap<String, KeyDescriptor>>,
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl KeyCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, table: &str) -> Option<KeyDescriptor> {
        if !self.enabled {
            return None;
        }
        self.entries.read().get(table).cloned()
    }

    pub fn insert(&self, table: &str, descriptor: KeyDescriptor) {
        if self.enabled {
            self.entries.write().insert(table.to_string(), descriptor);
        }
    }

    pub fn invalidate(&self, table: &str) {
        self.entries.write().remove(table);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
