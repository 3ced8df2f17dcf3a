//! DynamoDB-style native surface: attribute values, legacy condition maps and the
//! client trait the adapter drives.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::ClientResult;
use crate::types::{PrimitiveType, Value};

/// Typed attribute value, serialized in the service's JSON shape (`{"S": "x"}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    B(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    L(Vec<AttributeValue>),
    M(BTreeMap<String, AttributeValue>),
    #[serde(rename = "SS")]
    Ss(Vec<String>),
    #[serde(rename = "NS")]
    Ns(Vec<String>),
}

pub type Item = BTreeMap<String, AttributeValue>;

impl AttributeValue {
    /// Encode a record value using its natural attribute type
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => AttributeValue::Null(true),
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => AttributeValue::N(n.to_string()),
            Value::String(s) => AttributeValue::S(s.clone()),
            Value::List(items) => AttributeValue::L(items.iter().map(Self::from_value).collect()),
            Value::Map(map) => AttributeValue::M(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_value(v)))
                    .collect(),
            ),
        }
    }

    /// Encode a key value with the attribute type declared for the key
    pub fn key(value: &Value, primitive_type: PrimitiveType) -> Self {
        match primitive_type {
            PrimitiveType::Number => AttributeValue::N(value.to_text()),
            PrimitiveType::Binary => AttributeValue::B(value.to_text()),
            PrimitiveType::String => AttributeValue::S(value.to_text()),
            PrimitiveType::Boolean => AttributeValue::from_value(value),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            AttributeValue::S(s) | AttributeValue::B(s) => Value::String(s.clone()),
            AttributeValue::N(n) => Value::parse_number(n).unwrap_or_else(|| Value::String(n.clone())),
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Null(_) => Value::Null,
            AttributeValue::L(items) => Value::List(items.iter().map(Self::to_value).collect()),
            AttributeValue::M(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            AttributeValue::Ss(items) => {
                Value::List(items.iter().map(|s| Value::String(s.clone())).collect())
            }
            AttributeValue::Ns(items) => Value::List(
                items
                    .iter()
                    .map(|n| Value::parse_number(n).unwrap_or_else(|| Value::String(n.clone())))
                    .collect(),
            ),
        }
    }

    /// Type descriptor as used in error messages and attribute definitions
    pub fn type_code(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
            AttributeValue::Ss(_) => "SS",
            AttributeValue::Ns(_) => "NS",
        }
    }
}

/// Legacy comparison operators of `ScanFilter` / `QueryFilter` / `KeyConditions`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Le,
    Lt,
    Ge,
    Gt,
    NotNull,
    Null,
    Contains,
    NotContains,
    BeginsWith,
    In,
    Between,
}

impl ComparisonOperator {
    /// Operators a `KeyConditions` entry may use on the range key
    pub fn is_key_condition(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::Eq
                | ComparisonOperator::Le
                | ComparisonOperator::Lt
                | ComparisonOperator::Ge
                | ComparisonOperator::Gt
                | ComparisonOperator::BeginsWith
                | ComparisonOperator::Between
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Condition {
    pub comparison_operator: ComparisonOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attribute_value_list: Vec<AttributeValue>,
}

impl Condition {
    pub fn new(op: ComparisonOperator, values: Vec<AttributeValue>) -> Self {
        Self {
            comparison_operator: op,
            attribute_value_list: values,
        }
    }
}

/// Field name to condition; entries are ANDed
pub type ConditionMap = BTreeMap<String, Condition>;

/// `Expected` clause of conditional writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Exists,
    NotExists,
}

pub type ExpectedMap = BTreeMap<String, Expected>;

/// `Action` of an `AttributeUpdates` entry
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeAction {
    Put(AttributeValue),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    Hash,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    S,
    N,
    B,
}

impl From<PrimitiveType> for ScalarType {
    fn from(t: PrimitiveType) -> Self {
        match t {
            PrimitiveType::Number => ScalarType::N,
            PrimitiveType::Binary => ScalarType::B,
            PrimitiveType::String | PrimitiveType::Boolean => ScalarType::S,
        }
    }
}

impl From<ScalarType> for PrimitiveType {
    fn from(t: ScalarType) -> Self {
        match t {
            ScalarType::S => PrimitiveType::String,
            ScalarType::N => PrimitiveType::Number,
            ScalarType::B => PrimitiveType::Binary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchemaElement {
    pub attribute_name: String,
    pub key_type: KeyType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeDefinition {
    pub attribute_name: String,
    pub attribute_type: ScalarType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDescription {
    pub table_name: String,
    pub key_schema: Vec<KeySchemaElement>,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub table_status: String,
    pub item_count: u64,
    pub read_capacity_units: u64,
    pub write_capacity_units: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTableInput {
    pub table_name: String,
    pub key_schema: Vec<KeySchemaElement>,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub read_capacity_units: u64,
    pub write_capacity_units: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTableInput {
    pub table_name: String,
    pub read_capacity_units: Option<u64>,
    pub write_capacity_units: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Select {
    #[default]
    AllAttributes,
    Count,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanInput {
    pub table_name: String,
    pub scan_filter: ConditionMap,
    pub select: Select,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryInput {
    pub table_name: String,
    pub key_conditions: ConditionMap,
    pub query_filter: ConditionMap,
    pub select: Select,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
}

/// One page of a query or scan
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanOutput {
    pub items: Vec<Item>,
    /// Matching items on this page (also set for `Select::Count`)
    pub count: u64,
    pub last_evaluated_key: Option<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Put(Item),
    Delete(Item),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchWriteOutput {
    pub unprocessed_items: Vec<WriteRequest>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchGetOutput {
    pub items: Vec<Item>,
    pub unprocessed_keys: Vec<Item>,
}

/// DynamoDB-style client
#[async_trait]
pub trait DynamoClient: Send + Sync {
    async fn describe_table(&self, table: &str) -> ClientResult<TableDescription>;

    async fn create_table(&self, input: CreateTableInput) -> ClientResult<TableDescription>;

    async fn update_table(&self, input: UpdateTableInput) -> ClientResult<TableDescription>;

    async fn delete_table(&self, table: &str) -> ClientResult<TableDescription>;

    async fn list_tables(&self) -> ClientResult<Vec<String>>;

    async fn get_item(&self, table: &str, key: Item) -> ClientResult<Option<Item>>;

    /// Conditional put; a failed `expected` check is `ConditionFailed`
    async fn put_item(&self, table: &str, item: Item, expected: ExpectedMap) -> ClientResult<()>;

    /// Apply attribute updates and return the item as it is afterwards
    async fn update_item(
        &self,
        table: &str,
        key: Item,
        updates: BTreeMap<String, AttributeAction>,
        expected: ExpectedMap,
    ) -> ClientResult<Item>;

    /// Delete and return the old item, if there was one
    async fn delete_item(
        &self,
        table: &str,
        key: Item,
        expected: ExpectedMap,
    ) -> ClientResult<Option<Item>>;

    async fn batch_get_item(&self, table: &str, keys: Vec<Item>) -> ClientResult<BatchGetOutput>;

    async fn batch_write_item(
        &self,
        table: &str,
        requests: Vec<WriteRequest>,
    ) -> ClientResult<BatchWriteOutput>;

    async fn query(&self, input: QueryInput) -> ClientResult<ScanOutput>;

    async fn scan(&self, input: ScanInput) -> ClientResult<ScanOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_value_wire_shape() {
        let item: Item = [
            ("id".to_string(), AttributeValue::S("w1".into())),
            ("qty".to_string(), AttributeValue::N("5".into())),
            ("ok".to_string(), AttributeValue::Bool(true)),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            json!({"id": {"S": "w1"}, "qty": {"N": "5"}, "ok": {"BOOL": true}})
        );
    }

    #[test]
    fn test_value_conversion() {
        let value = Value::from(json!({"a": [1, "x", null], "b": false}));
        let av = AttributeValue::from_value(&value);
        assert_eq!(av.type_code(), "M");
        assert_eq!(av.to_value(), value);

        let ns = AttributeValue::Ns(vec!["1".into(), "2.5".into()]);
        assert_eq!(
            ns.to_value(),
            Value::List(vec![Value::from(1), Value::from(2.5)])
        );
    }

    #[test]
    fn test_key_encoding_follows_declared_type() {
        assert_eq!(
            AttributeValue::key(&Value::from("42"), PrimitiveType::Number),
            AttributeValue::N("42".into())
        );
        assert_eq!(
            AttributeValue::key(&Value::from(7), PrimitiveType::String),
            AttributeValue::S("7".into())
        );
    }

    #[test]
    fn test_condition_serializes_like_legacy_api() {
        let cond = Condition::new(ComparisonOperator::BeginsWith, vec![AttributeValue::S("Jo".into())]);
        assert_eq!(
            serde_json::to_value(&cond).unwrap(),
            json!({"ComparisonOperator": "BEGINS_WITH", "AttributeValueList": [{"S": "Jo"}]})
        );
    }
}
