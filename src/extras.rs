//! Per-call options bag
//!
//! `ExtrasConfig` carries the recognised request options (identity overrides, paging,
//! ordering, counting, rollback, partition scoping, relation specs). It can be built
//! directly, deserialized, or parsed from query-parameter style string pairs, where
//! unknown keys are ignored.

use serde::{Deserialize, Serialize};

use crate::error::{RecordStoreError, Result};

/// Sort direction of one ordering term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One `field [asc|desc]` ordering term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

impl OrderSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }

    /// Parse `"name desc, qty"` into ordering terms
    pub fn parse_list(s: &str) -> Result<Vec<OrderSpec>> {
        let mut specs = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let mut tokens = part.split_whitespace();
            let field = tokens.next().unwrap_or_default().to_string();
            let direction = match tokens.next().map(|t| t.to_uppercase()) {
                None => Direction::Asc,
                Some(t) if t == "ASC" => Direction::Asc,
                Some(t) if t == "DESC" => Direction::Desc,
                Some(t) => {
                    return Err(RecordStoreError::bad_request(format!(
                        "Invalid sort order: '{}'. Must be 'asc' or 'desc'.",
                        t
                    )));
                }
            };
            if tokens.next().is_some() {
                return Err(RecordStoreError::bad_request(format!(
                    "Invalid order term: '{}'",
                    part
                )));
            }
            specs.push(OrderSpec { field, direction });
        }
        Ok(specs)
    }
}

/// Relation expansion request, passed through untouched to the relation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

/// Recognised per-call options
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrasConfig {
    /// Identity field override, in key order
    pub id_field: Vec<String>,
    /// Primitive types paired positionally with `id_field`
    pub id_type: Vec<String>,
    /// Key roles paired positionally with `id_field` (`hash`, `range`, `synthetic`)
    pub id_key_type: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order: Vec<OrderSpec>,
    pub include_count: bool,
    /// Abort on the first failing record instead of collecting per-record errors
    pub rollback: bool,
    /// Partition for partitioned-table backends
    pub partition_key: Option<String>,
    pub related: Vec<RelationSpec>,
}

impl ExtrasConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse query-parameter style pairs. Unknown keys are ignored.
    pub fn from_params<I, K, V>(params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut extras = ExtrasConfig::default();
        for (key, value) in params {
            let value = value.as_ref();
            match key.as_ref() {
                "id_field" => extras.id_field = split_list(value),
                "id_type" => extras.id_type = split_list(value),
                "id_key_type" => extras.id_key_type = split_list(value),
                "limit" => extras.limit = parse_count("limit", value)?,
                "offset" => extras.offset = parse_count("offset", value)?,
                "order" => extras.order = OrderSpec::parse_list(value)?,
                "include_count" => extras.include_count = parse_flag("include_count", value)?,
                "rollback" => extras.rollback = parse_flag("rollback", value)?,
                "partition_key" => {
                    let value = value.trim();
                    extras.partition_key = (!value.is_empty()).then(|| value.to_string());
                }
                "related" => {
                    extras.related = split_list(value)
                        .into_iter()
                        .map(|name| RelationSpec {
                            name,
                            fields: None,
                            order: None,
                        })
                        .collect();
                }
                _ => {}
            }
        }
        Ok(extras)
    }

    pub fn with_id_field<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_field = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_id_type<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_type = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_id_key_type<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_key_type = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_order(mut self, order: Vec<OrderSpec>) -> Self {
        self.order = order;
        self
    }

    pub fn with_count(mut self) -> Self {
        self.include_count = true;
        self
    }

    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    pub fn with_partition_key(mut self, partition: impl Into<String>) -> Self {
        self.partition_key = Some(partition.into());
        self
    }

    /// Whether any paging option is set
    pub fn is_paged(&self) -> bool {
        self.limit.is_some() || self.offset.unwrap_or(0) > 0
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_count(name: &str, value: &str) -> Result<Option<usize>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<usize>()
        .map(Some)
        .map_err(|_| RecordStoreError::bad_request(format!("Invalid {} '{}'", name, value)))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(RecordStoreError::bad_request(format!(
            "Invalid {} flag '{}'",
            name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_params_recognised_keys() {
        let extras = ExtrasConfig::from_params([
            ("id_field", "pk, sk"),
            ("id_type", "string,number"),
            ("id_key_type", "hash,range"),
            ("limit", "10"),
            ("offset", "5"),
            ("order", "name desc, qty"),
            ("include_count", "true"),
            ("rollback", "1"),
            ("partition_key", "tenant"),
            ("related", "owner,parts"),
        ])
        .unwrap();

        assert_eq!(extras.id_field, vec!["pk", "sk"]);
        assert_eq!(extras.id_type, vec!["string", "number"]);
        assert_eq!(extras.id_key_type, vec!["hash", "range"]);
        assert_eq!(extras.limit, Some(10));
        assert_eq!(extras.offset, Some(5));
        assert_eq!(
            extras.order,
            vec![OrderSpec::desc("name"), OrderSpec::asc("qty")]
        );
        assert!(extras.include_count);
        assert!(extras.rollback);
        assert_eq!(extras.partition_key.as_deref(), Some("tenant"));
        assert_eq!(extras.related.len(), 2);
        assert_eq!(extras.related[1].name, "parts");
    }

    #[test]
    fn test_from_params_ignores_unknown_keys() {
        let extras = ExtrasConfig::from_params([("session_token", "abc"), ("fields", "*")]).unwrap();
        assert_eq!(extras, ExtrasConfig::default());
    }

    #[test]
    fn test_from_params_rejects_malformed_values() {
        assert!(ExtrasConfig::from_params([("limit", "ten")]).is_err());
        assert!(ExtrasConfig::from_params([("rollback", "maybe")]).is_err());
        assert!(ExtrasConfig::from_params([("order", "name sideways")]).is_err());
    }

    #[test]
    fn test_defaults_are_unbounded_best_effort() {
        let extras = ExtrasConfig::new();
        assert!(extras.limit.is_none());
        assert!(extras.offset.is_none());
        assert!(!extras.rollback);
        assert!(!extras.is_paged());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let extras: ExtrasConfig =
            serde_json::from_value(serde_json::json!({"limit": 3, "unknown": true})).unwrap();
        assert_eq!(extras.limit, Some(3));
        assert!(!extras.include_count);
    }
}
