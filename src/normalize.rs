//! Record shape normalization
//!
//! Everything that happens to a record between the caller and a native client:
//! identity checks, stripping identity and backend-managed fields from write
//! payloads (and putting them back on results), wire-format coercion, synthetic id
//! generation, and the client-side projection/ordering/paging used by adapters whose
//! backend cannot do it natively.

use std::cmp::Ordering;

use uuid::Uuid;

use crate::error::{RecordStoreError, Result};
use crate::extras::{Direction, OrderSpec};
use crate::key::{KeyDescriptor, KeyRole};
use crate::types::{FieldProjection, Record, Value, WireFormat};

// ============================================================================
// Identity
// ============================================================================

/// Check that every hash and range field has a value. Synthetic fields may be
/// missing; they are generated before dispatch.
pub fn require_identity(record: &Record, desc: &KeyDescriptor) -> Result<()> {
    for field in desc.fields() {
        if field.role != KeyRole::Synthetic && !record.has_value(&field.name) {
            return Err(missing_identity(&field.name));
        }
    }
    Ok(())
}

/// Check that every identifying field, synthetic included, has a value
pub fn require_existing_identity(record: &Record, desc: &KeyDescriptor) -> Result<()> {
    for field in desc.fields() {
        if !record.has_value(&field.name) {
            return Err(missing_identity(&field.name));
        }
    }
    Ok(())
}

fn missing_identity(field: &str) -> RecordStoreError {
    RecordStoreError::bad_request(format!("Identifying field '{}' is required", field))
}

/// Identity and managed fields present on the record
pub fn identity_of(record: &Record, desc: &KeyDescriptor) -> Record {
    record
        .iter()
        .filter(|(name, _)| desc.is_identity(name) || desc.is_managed(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Split a record into its write payload and its identity/managed values
pub fn strip_identity(record: &Record, desc: &KeyDescriptor) -> (Record, Record) {
    let mut clean = Record::new();
    let mut identity = Record::new();
    for (name, value) in record.iter() {
        if desc.is_identity(name) || desc.is_managed(name) {
            identity.insert(name.clone(), value.clone());
        } else {
            clean.insert(name.clone(), value.clone());
        }
    }
    (clean, identity)
}

/// Put identity values back onto a payload returned by a backend
pub fn reattach(mut clean: Record, identity: &Record) -> Record {
    clean.overlay(identity);
    clean
}

/// Stable string form of a record's key values, for de-duplication and lookup
pub fn identity_key(record: &Record, desc: &KeyDescriptor) -> String {
    desc.fields()
        .iter()
        .map(|f| record.get(&f.name).map(Value::to_text).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Build an identity-only record for a single-field key
pub fn record_for_id(desc: &KeyDescriptor, id: &Value) -> Result<Record> {
    let field = desc.single().ok_or_else(|| {
        RecordStoreError::bad_request(format!(
            "Table has a composite key ({}); address records by their key fields",
            desc.field_names().join(", ")
        ))
    })?;
    if id.is_null() {
        return Err(missing_identity(&field.name));
    }
    Ok(Record::new().with(field.name.clone(), id.clone()))
}

/// Split a comma separated id list
pub fn parse_id_list(ids: &str) -> Vec<Value> {
    ids.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Value::from)
        .collect()
}

// ============================================================================
// Id generation
// ============================================================================

/// Produces values for synthetic identity fields
pub trait IdGenerator: Send + Sync {
    fn generate(&self, table: &str) -> String;
}

/// `<table>-<random uuid>`
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self, table: &str) -> String {
        format!("{}-{}", table, Uuid::new_v4().simple())
    }
}

/// Generate every missing synthetic field. Returns whether anything was generated.
pub fn fill_synthetic(
    record: &mut Record,
    desc: &KeyDescriptor,
    generator: &dyn IdGenerator,
    table: &str,
) -> bool {
    let mut generated = false;
    for field in desc.fields() {
        if field.role == KeyRole::Synthetic && !record.has_value(&field.name) {
            record.insert(field.name.clone(), Value::String(generator.generate(table)));
            generated = true;
        }
    }
    generated
}

// ============================================================================
// Coercion
// ============================================================================

/// Coerce a record into what the wire format can carry.
///
/// Key fields are converted to their declared primitive type. Other fields follow
/// the format: text stores get flat scalars and scalar lists with booleans as the
/// numbers `1`/`0` (the adapter writes numbers in sortable text form and key fields
/// as plain text), typed stores reject nested values, structured and document
/// stores take values as they are.
pub fn coerce(record: &Record, desc: &KeyDescriptor, format: WireFormat) -> Result<Record> {
    let mut out = Record::new();
    for (name, value) in record.iter() {
        let coerced = match desc.field(name) {
            Some(key) => {
                let typed = key
                    .primitive_type
                    .coerce(value)
                    .map_err(|e| RecordStoreError::bad_request(format!("Field '{}': {}", name, e)))?;
                match format {
                    WireFormat::Text => key_text(typed),
                    _ => typed,
                }
            }
            None => coerce_for_format(name, value, format)?,
        };
        out.insert(name.clone(), coerced);
    }
    Ok(out)
}

fn coerce_for_format(name: &str, value: &Value, format: WireFormat) -> Result<Value> {
    match format {
        WireFormat::Structured | WireFormat::Document => Ok(value.clone()),
        WireFormat::Typed => {
            if value.is_scalar() {
                Ok(value.clone())
            } else {
                Err(RecordStoreError::bad_request(format!(
                    "Field '{}': {} values are not supported by this store",
                    name,
                    value.type_name()
                )))
            }
        }
        WireFormat::Text => match value {
            Value::List(items) => items
                .iter()
                .map(|item| text_scalar(name, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            other => text_scalar(name, other),
        },
    }
}

/// Key values name items on text stores
fn key_text(value: Value) -> Value {
    match value {
        Value::Null | Value::String(_) => value,
        Value::Bool(b) => Value::String(if b { "1" } else { "0" }.to_string()),
        other => Value::String(other.to_text()),
    }
}

fn text_scalar(name: &str, value: &Value) -> Result<Value> {
    match value {
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        Value::Null | Value::Number(_) | Value::String(_) => Ok(value.clone()),
        other => Err(RecordStoreError::bad_request(format!(
            "Field '{}': nested {} values are not supported by this store",
            name,
            other.type_name()
        ))),
    }
}

// ============================================================================
// Projection, ordering, paging
// ============================================================================

/// Keep the projected fields plus identity and managed fields.
///
/// `Default` is treated as `All`; callers resolve it per operation first.
pub fn project(record: &Record, projection: &FieldProjection, desc: &KeyDescriptor) -> Record {
    match projection {
        FieldProjection::All | FieldProjection::Default => record.clone(),
        FieldProjection::Fields(fields) => record
            .iter()
            .filter(|(name, _)| {
                desc.is_identity(name) || desc.is_managed(name) || fields.contains(name)
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    }
}

/// Stable sort by the ordering terms; missing fields sort before present ones
pub fn sort_records(records: &mut [Record], order: &[OrderSpec]) {
    if order.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for spec in order {
            let ordering = compare_fields(a.get(&spec.field), b.get(&spec.field));
            let ordering = match spec.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a
            .compare(b)
            .unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)).then_with(|| a.to_text().cmp(&b.to_text()))),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::List(_) => 4,
        Value::Map(_) => 5,
    }
}

/// Apply offset and limit
pub fn page(records: Vec<Record>, offset: Option<usize>, limit: Option<usize>) -> Vec<Record> {
    let iter = records.into_iter().skip(offset.unwrap_or(0));
    match limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::FieldKey;
    use crate::types::PrimitiveType;

    fn composite() -> KeyDescriptor {
        KeyDescriptor::new(vec![
            FieldKey::hash("pk", PrimitiveType::String),
            FieldKey::range("sk", PrimitiveType::Number),
        ])
        .unwrap()
    }

    fn couch() -> KeyDescriptor {
        KeyDescriptor::new(vec![FieldKey::synthetic("_id")])
            .unwrap()
            .with_managed(["_rev"])
    }

    struct FixedIds;

    impl IdGenerator for FixedIds {
        fn generate(&self, table: &str) -> String {
            format!("{}-fixed", table)
        }
    }

    // ==================== Identity ====================

    #[test]
    fn test_require_identity_reports_missing_range() {
        let record = Record::new().with("pk", "a");
        let err = require_identity(&record, &composite()).unwrap_err();
        assert!(matches!(err, RecordStoreError::BadRequest(ref m) if m.contains("sk")));

        let record = record.with("sk", 1);
        assert!(require_identity(&record, &composite()).is_ok());
    }

    #[test]
    fn test_synthetic_missing_is_not_an_error_until_existing() {
        let record = Record::new().with("title", "x");
        assert!(require_identity(&record, &couch()).is_ok());
        assert!(require_existing_identity(&record, &couch()).is_err());
    }

    #[test]
    fn test_null_identity_counts_as_missing() {
        let record = Record::new().with("pk", Value::Null).with("sk", 1);
        assert!(require_identity(&record, &composite()).is_err());
    }

    #[test]
    fn test_strip_then_reattach_restores_record() {
        let record = Record::new()
            .with("_id", "doc-1")
            .with("_rev", "1-abc")
            .with("title", "hello")
            .with("n", 3);
        let desc = couch();

        let (clean, identity) = strip_identity(&record, &desc);
        assert!(!clean.contains_key("_id"));
        assert!(!clean.contains_key("_rev"));
        assert_eq!(identity.len(), 2);
        assert_eq!(identity, identity_of(&record, &desc));

        assert_eq!(reattach(clean, &identity), record);
    }

    #[test]
    fn test_fill_synthetic_only_when_missing() {
        let desc = couch();
        let mut record = Record::new().with("title", "x");
        assert!(fill_synthetic(&mut record, &desc, &FixedIds, "docs"));
        assert_eq!(record.get("_id"), Some(&Value::from("docs-fixed")));

        let mut record = Record::new().with("_id", "mine");
        assert!(!fill_synthetic(&mut record, &desc, &FixedIds, "docs"));
        assert_eq!(record.get("_id"), Some(&Value::from("mine")));
    }

    #[test]
    fn test_random_ids_are_table_scoped_and_distinct() {
        let a = RandomIdGenerator.generate("widgets");
        let b = RandomIdGenerator.generate("widgets");
        assert!(a.starts_with("widgets-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_for_id_requires_single_key() {
        let desc = KeyDescriptor::new(vec![FieldKey::hash("id", PrimitiveType::String)]).unwrap();
        let record = record_for_id(&desc, &Value::from("w1")).unwrap();
        assert_eq!(record, Record::new().with("id", "w1"));
        assert!(record_for_id(&composite(), &Value::from("w1")).is_err());
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(
            parse_id_list(" a, b,,c "),
            vec![Value::from("a"), Value::from("b"), Value::from("c")]
        );
    }

    // ==================== Coercion ====================

    #[test]
    fn test_coerce_key_fields_to_declared_type() {
        let record = Record::new().with("pk", 7).with("sk", "42").with("qty", "5");
        let out = coerce(&record, &composite(), WireFormat::Structured).unwrap();
        assert_eq!(out.get("pk"), Some(&Value::from("7")));
        assert_eq!(out.get("sk"), Some(&Value::from(42)));
        assert_eq!(out.get("qty"), Some(&Value::from("5")));

        let bad = Record::new().with("pk", "a").with("sk", "x");
        assert!(matches!(
            coerce(&bad, &composite(), WireFormat::Structured).unwrap_err(),
            RecordStoreError::BadRequest(_)
        ));
    }

    #[test]
    fn test_coerce_text_format() {
        let desc = KeyDescriptor::new(vec![FieldKey::synthetic("Name")]).unwrap();
        let record = Record::new()
            .with("Name", 17)
            .with("active", true)
            .with("qty", 5)
            .with("tags", Value::List(vec![Value::from("a"), Value::from(2)]));
        let out = coerce(&record, &desc, WireFormat::Text).unwrap();
        assert_eq!(out.get("Name"), Some(&Value::from("17")));
        assert_eq!(out.get("active"), Some(&Value::from(1)));
        assert_eq!(out.get("qty"), Some(&Value::from(5)));
        assert_eq!(
            out.get("tags"),
            Some(&Value::List(vec![Value::from("a"), Value::from(2)]))
        );

        let nested = Record::new().with("Name", "i1").with(
            "meta",
            Value::List(vec![Value::List(vec![])]),
        );
        assert!(coerce(&nested, &desc, WireFormat::Text).is_err());
    }

    #[test]
    fn test_coerce_typed_rejects_nested() {
        let desc = composite();
        let ok = Record::new().with("pk", "a").with("sk", 1).with("flag", true);
        assert_eq!(
            coerce(&ok, &desc, WireFormat::Typed).unwrap().get("flag"),
            Some(&Value::Bool(true))
        );

        let nested = ok.with("tags", Value::List(vec![Value::from("x")]));
        assert!(coerce(&nested, &desc, WireFormat::Typed).is_err());
    }

    // ==================== Projection / Ordering / Paging ====================

    #[test]
    fn test_project_keeps_identity() {
        let desc = couch();
        let record = Record::new()
            .with("_id", "d")
            .with("_rev", "1-a")
            .with("a", 1)
            .with("b", 2);

        let only_a = project(&record, &FieldProjection::fields(["a"]), &desc);
        assert_eq!(only_a.len(), 3);
        assert!(!only_a.contains_key("b"));

        let identity = project(&record, &FieldProjection::Default.for_write(), &desc);
        assert_eq!(identity, identity_of(&record, &desc));

        assert_eq!(project(&record, &FieldProjection::All, &desc), record);
    }

    #[test]
    fn test_sort_and_page() {
        let mut records = vec![
            Record::new().with("n", 2).with("s", "b"),
            Record::new().with("s", "z"),
            Record::new().with("n", 10).with("s", "a"),
            Record::new().with("n", 2).with("s", "a"),
        ];
        sort_records(
            &mut records,
            &[OrderSpec::desc("n"), OrderSpec::asc("s")],
        );
        let keys: Vec<_> = records.iter().map(|r| r.get("s").cloned()).collect();
        assert_eq!(
            keys,
            vec![
                Some(Value::from("a")),
                Some(Value::from("a")),
                Some(Value::from("b")),
                Some(Value::from("z")),
            ]
        );
        assert_eq!(records[0].get("n"), Some(&Value::from(10)));

        let paged = page(records, Some(1), Some(2));
        assert_eq!(paged.len(), 2);
        assert_eq!(paged[0].get("n"), Some(&Value::from(2)));
        assert_eq!(paged[1].get("s"), Some(&Value::from("b")));
    }
}
