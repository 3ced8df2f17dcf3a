//! Core type definitions for the record store
//!
//! Includes the dynamically typed `Value`, the `Record` map, primitive key types,
//! field projections and the wire formats adapters coerce records into.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::error::{RecordStoreError, Result};

// ============================================================================
// Values
// ============================================================================

/// Closed value variant stored in record fields
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing or explicit null
    #[default]
    Null,
    Bool(bool),
    /// Integer or floating point number
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a number from an `f64`; non-finite values become `Null`
    pub fn from_f64(f: f64) -> Self {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }

    /// Parse a decimal string into a number value, preferring integers
    pub fn parse_number(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Some(Value::Number(i.into()));
        }
        if let Ok(u) = trimmed.parse::<u64>() {
            return Some(Value::Number(u.into()));
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => Some(Value::from_f64(f)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::List(_) | Value::Map(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Plain text rendering used by text-only backends and key encoding
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => serde_json::Value::from(self.clone()).to_string(),
        }
    }

    /// Total-ish ordering used by filters and client-side sorting.
    ///
    /// Numbers compare numerically, strings lexicographically, booleans with
    /// `false < true`. A string compared with a number is read as a number when it
    /// parses as one. Any other pairing is incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Number(a), Value::String(b)) => {
                a.as_f64()?.partial_cmp(&b.trim().parse::<f64>().ok()?)
            }
            (Value::String(a), Value::Number(b)) => {
                a.trim().parse::<f64>().ok()?.partial_cmp(&b.as_f64()?)
            }
            (Value::List(a), Value::List(b)) if a == b => Some(Ordering::Equal),
            (Value::Map(a), Value::Map(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Equality under `compare`, so `5`, `5.0` and `"5"` are all equal
    pub fn loosely_equals(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(i64::from(v).into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Number(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::from_f64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// A schemaless record: field name to value, iterated in field-name order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON object
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Self(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            )),
            other => Err(RecordStoreError::bad_request(format!(
                "Record must be a JSON object, got {}",
                Value::from(other).type_name()
            ))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Map(self.0.clone()).into()
    }

    /// Builder-style insert
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Whether the field is present with a non-null value
    pub fn has_value(&self, field: &str) -> bool {
        self.0.get(field).is_some_and(|v| !v.is_null())
    }

    /// Copy every field of `other` over this record
    pub fn overlay(&mut self, other: &Record) {
        for (name, value) in other.iter() {
            self.0.insert(name.clone(), value.clone());
        }
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl Deref for Record {
    type Target = BTreeMap<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Record {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl TryFrom<serde_json::Value> for Record {
    type Error = RecordStoreError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        Record::from_json(value)
    }
}

// ============================================================================
// Primitive key types
// ============================================================================

/// Primitive type of an identifying field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    #[default]
    String,
    Number,
    Binary,
    Boolean,
}

impl PrimitiveType {
    /// Parse the `id_type` spellings accepted from callers and native metadata
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "string" | "str" | "s" | "text" => Ok(PrimitiveType::String),
            "number" | "n" | "int" | "integer" | "float" | "double" | "numeric" => {
                Ok(PrimitiveType::Number)
            }
            "binary" | "b" | "bytes" => Ok(PrimitiveType::Binary),
            "boolean" | "bool" => Ok(PrimitiveType::Boolean),
            other => Err(RecordStoreError::bad_request(format!(
                "Unknown field type '{}'",
                other
            ))),
        }
    }

    /// Coerce a value to this type.
    ///
    /// Numeric strings become numbers, booleans become `1`/`0` for numbers and
    /// `"1"`/`"0"` for strings. Values that cannot represent the type are an error.
    pub fn coerce(&self, value: &Value) -> std::result::Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (PrimitiveType::String, Value::String(_)) => Ok(value.clone()),
            (PrimitiveType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (PrimitiveType::String, Value::Bool(b)) => {
                Ok(Value::String(if *b { "1" } else { "0" }.to_string()))
            }
            (PrimitiveType::Number, Value::Number(_)) => Ok(value.clone()),
            (PrimitiveType::Number, Value::String(s)) => Value::parse_number(s)
                .ok_or_else(|| format!("Cannot convert '{}' to number", s)),
            (PrimitiveType::Number, Value::Bool(b)) => Ok(Value::from(i64::from(*b))),
            (PrimitiveType::Binary, Value::String(_)) => Ok(value.clone()),
            (PrimitiveType::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (PrimitiveType::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(format!("Cannot convert {} to boolean", n)),
            },
            (PrimitiveType::Boolean, Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(format!("Cannot convert '{}' to boolean", s)),
            },
            (t, v) => Err(format!(
                "Type mismatch: expected {:?}, got {}",
                t,
                v.type_name()
            )),
        }
    }
}

// ============================================================================
// Projections and wire formats
// ============================================================================

/// Fields requested on returned records
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldProjection {
    /// Identity fields on writes, every field on reads
    #[default]
    Default,
    /// `*`
    All,
    /// Explicit, de-duplicated field list in request order
    Fields(Vec<String>),
}

impl FieldProjection {
    /// Parse a comma separated field list, `*`, or an empty string
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return FieldProjection::Default;
        }
        let mut fields: Vec<String> = Vec::new();
        for part in trimmed.split(',') {
            let name = part.trim();
            if name == "*" {
                return FieldProjection::All;
            }
            if !name.is_empty() && !fields.iter().any(|f| f == name) {
                fields.push(name.to_string());
            }
        }
        if fields.is_empty() {
            FieldProjection::Default
        } else {
            FieldProjection::Fields(fields)
        }
    }

    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for f in fields {
            let f = f.into();
            if !list.contains(&f) {
                list.push(f);
            }
        }
        FieldProjection::Fields(list)
    }

    /// Resolve `Default` for the kind of operation
    pub fn for_write(&self) -> FieldProjection {
        match self {
            FieldProjection::Default => FieldProjection::Fields(Vec::new()),
            other => other.clone(),
        }
    }

    pub fn for_read(&self) -> FieldProjection {
        match self {
            FieldProjection::Default => FieldProjection::All,
            other => other.clone(),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, FieldProjection::All)
    }
}

/// How a backend represents values on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Typed attribute values with native lists and maps (DynamoDB-like)
    Structured,
    /// Strings only, lists as multi-valued attributes (SimpleDB-like)
    Text,
    /// JSON documents (CouchDB-like)
    Document,
    /// Typed scalar properties only (partitioned table stores)
    Typed,
}

impl WireFormat {
    /// Whether filter literals `true`/`false` should stay booleans
    pub fn has_native_booleans(&self) -> bool {
        !matches!(self, WireFormat::Text)
    }
}
