//! Projection onto structured comparison-operator condition maps
//!
//! The native form has one condition per attribute and no OR, so the predicate is
//! rewritten into disjunctive normal form and every AND branch becomes its own
//! condition map. The adapter runs one request per branch and unions the results.

use crate::backend::dynamo::client::{AttributeValue, ComparisonOperator, Condition, ConditionMap};
use crate::error::{RecordStoreError, Result};
use crate::filter::{Comparison, Operator, Predicate};
use crate::key::KeyDescriptor;

/// One condition map per OR branch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuredQuery {
    pub branches: Vec<ConditionMap>,
}

impl StructuredQuery {
    pub fn is_disjunction(&self) -> bool {
        self.branches.len() > 1
    }
}

/// Project a predicate into condition-map branches.
///
/// Two conditions on the same attribute inside one branch can only be expressed
/// when they form a `GE`/`LE` pair, which becomes `BETWEEN`.
pub fn project(predicate: &Predicate, desc: &KeyDescriptor, max_branches: usize) -> Result<StructuredQuery> {
    let branches = predicate
        .disjunctive_branches(max_branches)?
        .iter()
        .map(|branch| project_branch(branch, desc))
        .collect::<Result<Vec<_>>>()?;
    Ok(StructuredQuery { branches })
}

fn project_branch(branch: &[Comparison], desc: &KeyDescriptor) -> Result<ConditionMap> {
    let mut conditions = ConditionMap::new();
    for comparison in branch {
        let condition = project_comparison(comparison, desc);
        match conditions.remove(comparison.field()) {
            None => {
                conditions.insert(comparison.field().to_string(), condition);
            }
            Some(existing) => {
                let merged = merge_range(comparison.field(), existing, condition)?;
                conditions.insert(comparison.field().to_string(), merged);
            }
        }
    }
    Ok(conditions)
}

fn merge_range(field: &str, a: Condition, b: Condition) -> Result<Condition> {
    use ComparisonOperator::{Ge, Le};
    let (lower, upper) = match (a.comparison_operator, b.comparison_operator) {
        (Ge, Le) => (a, b),
        (Le, Ge) => (b, a),
        (x, y) => {
            return Err(RecordStoreError::unsupported_filter(format!(
                "Cannot combine {:?} and {:?} on '{}' in one condition",
                x, y, field
            )));
        }
    };
    let mut values = lower.attribute_value_list;
    values.extend(upper.attribute_value_list);
    Ok(Condition::new(ComparisonOperator::Between, values))
}

fn project_comparison(comparison: &Comparison, desc: &KeyDescriptor) -> Condition {
    let op = match comparison.op() {
        Operator::Eq => ComparisonOperator::Eq,
        Operator::Ne => ComparisonOperator::Ne,
        Operator::Gt => ComparisonOperator::Gt,
        Operator::Ge => ComparisonOperator::Ge,
        Operator::Lt => ComparisonOperator::Lt,
        Operator::Le => ComparisonOperator::Le,
        Operator::In => ComparisonOperator::In,
        Operator::Between => ComparisonOperator::Between,
        Operator::BeginsWith => ComparisonOperator::BeginsWith,
        Operator::Contains => ComparisonOperator::Contains,
        Operator::NotContains => ComparisonOperator::NotContains,
        Operator::IsNull => ComparisonOperator::Null,
        Operator::IsNotNull => ComparisonOperator::NotNull,
    };
    let key_type = desc.field(comparison.field()).map(|k| k.primitive_type);
    let values = comparison
        .values()
        .iter()
        .map(|v| match (key_type, comparison.op()) {
            (_, Operator::BeginsWith) => AttributeValue::S(v.to_text()),
            (Some(t), op) if op != Operator::Contains => AttributeValue::key(v, t),
            _ => AttributeValue::from_value(v),
        })
        .collect();
    Condition::new(op, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;
    use crate::key::FieldKey;
    use crate::types::PrimitiveType;

    fn desc() -> KeyDescriptor {
        KeyDescriptor::new(vec![
            FieldKey::hash("customer", PrimitiveType::String),
            FieldKey::range("placed", PrimitiveType::Number),
        ])
        .unwrap()
    }

    #[test]
    fn test_single_branch() {
        let query = project(&parse("age >= 30 and name begins_with 'Jo'").unwrap(), &desc(), 8).unwrap();
        assert!(!query.is_disjunction());
        let branch = &query.branches[0];
        assert_eq!(
            branch["age"],
            Condition::new(ComparisonOperator::Ge, vec![AttributeValue::N("30".into())])
        );
        assert_eq!(
            branch["name"],
            Condition::new(ComparisonOperator::BeginsWith, vec![AttributeValue::S("Jo".into())])
        );
    }

    #[test]
    fn test_key_values_use_declared_types() {
        let query = project(&parse("customer = 42 and placed > '100'").unwrap(), &desc(), 8).unwrap();
        let branch = &query.branches[0];
        assert_eq!(branch["customer"].attribute_value_list, vec![AttributeValue::S("42".into())]);
        assert_eq!(branch["placed"].attribute_value_list, vec![AttributeValue::N("100".into())]);
    }

    #[test]
    fn test_or_becomes_branches() {
        let query = project(&parse("status = null or id in (1,2,3)").unwrap(), &desc(), 8).unwrap();
        assert_eq!(query.branches.len(), 2);
        assert_eq!(query.branches[0]["status"].comparison_operator, ComparisonOperator::Null);
        assert!(query.branches[0]["status"].attribute_value_list.is_empty());
        assert_eq!(query.branches[1]["id"].attribute_value_list.len(), 3);
    }

    #[test]
    fn test_ge_le_pair_merges_into_between() {
        let query = project(&parse("qty <= 9 and qty >= 3").unwrap(), &desc(), 8).unwrap();
        assert_eq!(
            query.branches[0]["qty"],
            Condition::new(
                ComparisonOperator::Between,
                vec![AttributeValue::N("3".into()), AttributeValue::N("9".into())]
            )
        );
    }

    #[test]
    fn test_other_duplicates_are_unsupported() {
        let err = project(&parse("qty > 3 and qty != 5").unwrap(), &desc(), 8).unwrap_err();
        assert!(matches!(err, RecordStoreError::UnsupportedFilter(_)));
    }

    #[test]
    fn test_branch_cap() {
        let err = project(&parse("a = 1 or b = 2 or c = 3").unwrap(), &desc(), 2).unwrap_err();
        assert!(matches!(err, RecordStoreError::UnsupportedFilter(_)));
    }
}
