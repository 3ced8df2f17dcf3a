//! Predicate projectors
//!
//! Turn a parsed predicate into the native query form of each backend family:
//! structured condition maps, select-statement text, OData filter text, or a
//! marker asking the adapter to filter in process.

pub mod client_side;
pub mod odata;
pub mod sanitize;
pub mod select;
pub mod structured;

pub use client_side::{ClientSideFilter, finish_query};
pub use sanitize::{escape_like, quote_literal, quote_name, validate_table_name};
pub use select::{SelectOutput, SelectStatement};
pub use structured::StructuredQuery;

use crate::error::Result;
use crate::filter::Predicate;
use crate::key::KeyDescriptor;
use crate::types::WireFormat;

/// A predicate in the form a backend family executes
#[derive(Debug, Clone, PartialEq)]
pub enum NativeQuery {
    /// One condition map per OR branch
    Structured(StructuredQuery),
    /// Where clause of a select statement
    Select(String),
    /// OData filter string
    OData(String),
    ClientSide(ClientSideFilter),
}

/// Project a predicate for the family speaking `format`
pub fn project(
    predicate: &Predicate,
    desc: &KeyDescriptor,
    format: WireFormat,
    max_branches: usize,
) -> Result<NativeQuery> {
    match format {
        WireFormat::Structured => {
            structured::project(predicate, desc, max_branches).map(NativeQuery::Structured)
        }
        WireFormat::Text => select::render_predicate(predicate, desc).map(NativeQuery::Select),
        WireFormat::Typed => odata::render_predicate(predicate, desc).map(NativeQuery::OData),
        WireFormat::Document => Ok(NativeQuery::ClientSide(ClientSideFilter::new(Some(predicate)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordStoreError;
    use crate::filter::parse;
    use crate::key::FieldKey;

    #[test]
    fn test_project_dispatches_per_family() {
        let desc = KeyDescriptor::new(vec![FieldKey::synthetic("id")]).unwrap();
        let p = parse("qty >= 3").unwrap();

        assert!(matches!(
            project(&p, &desc, WireFormat::Structured, 8).unwrap(),
            NativeQuery::Structured(_)
        ));
        assert_eq!(
            project(&p, &desc, WireFormat::Text, 8).unwrap(),
            NativeQuery::Select("`qty` >= '100000000000000000003'".to_string())
        );
        assert_eq!(
            project(&p, &desc, WireFormat::Typed, 8).unwrap(),
            NativeQuery::OData("qty ge 3".to_string())
        );
        assert!(matches!(
            project(&p, &desc, WireFormat::Document, 8).unwrap(),
            NativeQuery::ClientSide(_)
        ));
    }

    #[test]
    fn test_unsupported_surfaces_per_family() {
        let desc = KeyDescriptor::new(vec![FieldKey::synthetic("id")]).unwrap();
        let p = parse("name contains 'x'").unwrap();
        assert!(project(&p, &desc, WireFormat::Text, 8).is_ok());
        assert!(matches!(
            project(&p, &desc, WireFormat::Typed, 8).unwrap_err(),
            RecordStoreError::UnsupportedFilter(_)
        ));
    }
}
