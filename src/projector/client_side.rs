//! Fetch-all-then-filter for stores without server-side filtering

use crate::adapter::QueryResult;
use crate::extras::ExtrasConfig;
use crate::filter::{Predicate, evaluate};
use crate::normalize::{page, sort_records};
use crate::types::Record;

/// Marker telling the adapter to list everything and evaluate in process
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientSideFilter {
    predicate: Option<Predicate>,
}

impl ClientSideFilter {
    pub fn new(predicate: Option<&Predicate>) -> Self {
        Self {
            predicate: predicate.cloned(),
        }
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn accepts(&self, record: &Record) -> bool {
        self.predicate
            .as_ref()
            .is_none_or(|p| evaluate(p, record))
    }

    /// Filter, count, order and page a full listing
    pub fn apply(&self, records: Vec<Record>, extras: &ExtrasConfig) -> QueryResult {
        let matched = records.into_iter().filter(|r| self.accepts(r)).collect();
        finish_query(matched, extras)
    }
}

/// Count, order and page records that already satisfy the filter
pub fn finish_query(mut records: Vec<Record>, extras: &ExtrasConfig) -> QueryResult {
    let count = extras.include_count.then_some(records.len() as u64);
    sort_records(&mut records, &extras.order);
    QueryResult {
        records: page(records, extras.offset, extras.limit),
        count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extras::OrderSpec;
    use crate::filter::parse;
    use crate::types::Value;

    fn fixture() -> Vec<Record> {
        (1..=5)
            .map(|i| Record::new().with("id", format!("r{}", i)).with("qty", i))
            .collect()
    }

    #[test]
    fn test_apply_filters_counts_and_pages() {
        let filter = ClientSideFilter::new(Some(&parse("qty >= 2").unwrap()));
        let extras = ExtrasConfig::new()
            .with_count()
            .with_order(vec![OrderSpec::desc("qty")])
            .with_offset(1)
            .with_limit(2);

        let result = filter.apply(fixture(), &extras);
        assert_eq!(result.count, Some(4));
        let qty: Vec<_> = result.records.iter().map(|r| r["qty"].clone()).collect();
        assert_eq!(qty, vec![Value::from(4), Value::from(3)]);
    }

    #[test]
    fn test_no_predicate_accepts_everything() {
        let filter = ClientSideFilter::new(None);
        let result = filter.apply(fixture(), &ExtrasConfig::new());
        assert_eq!(result.records.len(), 5);
        assert!(result.count.is_none());
    }
}
