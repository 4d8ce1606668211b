// ============================================================================
// Dynamo Query Compilation
// ============================================================================
//
// The native filter form is a single attribute -> condition map combined with
// AND, so OR queries are first flattened into disjunctive normal form: one
// scan per alternative, results unioned and deduplicated by identifier in
// first-seen order. Ordering has no native support and is applied in memory
// after fetching the full candidate set.
//
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;

use crate::core::{DbError, Result, Value};
use crate::engine::{NativeEntry, NativeResults};
use crate::model::PersistentEntity;
use crate::query::{
    apply_order, apply_pagination, apply_projections, flatten, resolve_id_shortcut, LikePattern,
    Projection, PropertyCriterion, Query,
};

use super::store::entry_from_item;
use super::template::{ComparisonOperator, Condition, DynamoTemplate};

pub fn execute(
    template: &dyn DynamoTemplate,
    entity: &Arc<PersistentEntity>,
    table: &str,
    query: &Query,
) -> Result<NativeResults> {
    for projection in query.projections() {
        match projection {
            Projection::Count | Projection::Id | Projection::Property(_) => {}
            other => return Err(DbError::UnsupportedProjection(other.name().to_string())),
        }
    }
    if !query.order().is_empty() && !query.projections().is_empty() {
        return Err(DbError::UnsupportedOperation(
            "Ordering cannot be combined with projections".to_string(),
        ));
    }

    let filters = if query.has_criteria() {
        let alternatives = flatten(&query.root())?;
        let mut filters = Vec::with_capacity(alternatives.len());
        for alternative in &alternatives {
            filters.push(build_filter(entity, alternative)?);
        }
        filters
    } else {
        // No criteria: one unfiltered scan
        vec![HashMap::new()]
    };
    debug!(
        "scanning '{}' with {} filter alternative(s)",
        table,
        filters.len()
    );

    // A count over a single filter never transfers items
    if query.projections() == [Projection::Count]
        && filters.len() == 1
        && query.order().is_empty()
    {
        let count = template.scan_count(table, &filters[0])?;
        return Ok(NativeResults::Values(vec![Value::Integer(count as i64)]));
    }

    // With in-memory ordering the full candidate set is needed before the
    // page can be cut; otherwise the scans can stop early.
    let max_to_get = if query.order().is_empty() {
        query
            .max()
            .map(|max| query.offset() + max)
            .unwrap_or(usize::MAX)
    } else {
        usize::MAX
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut rows: Vec<(Value, NativeEntry)> = Vec::new();
    for filter in &filters {
        for (id, item) in template.scan(table, filter, max_to_get)? {
            if !seen.insert(id.clone()) {
                continue;
            }
            let entry = entry_from_item(entity, &item);
            let id_value = entry
                .get(entity.identity_name())
                .cloned()
                .unwrap_or(Value::Text(id));
            rows.push((id_value, entry));
        }
    }

    apply_order(entity, &mut rows, query.order())?;
    let rows = apply_pagination(rows, query.offset(), query.max());

    if query.projections().is_empty() {
        return Ok(NativeResults::Entries(rows));
    }
    Ok(NativeResults::Values(apply_projections(
        entity,
        &rows,
        query.projections(),
    )?))
}

/// Fold one flattened alternative into a native filter map. The native form
/// admits one condition per attribute; colliding criteria are an error
/// rather than a silent overwrite.
fn build_filter(
    entity: &PersistentEntity,
    alternative: &[PropertyCriterion],
) -> Result<HashMap<String, Condition>> {
    let mut filter: HashMap<String, Condition> = HashMap::new();
    for criterion in alternative {
        let criterion = resolve_id_shortcut(entity, criterion);
        let key = entity
            .mapped_key(criterion.property_name(entity))
            .ok_or_else(|| {
                DbError::PropertyNotFound(
                    criterion.property_name(entity).to_string(),
                    entity.name().to_string(),
                )
            })?
            .to_string();
        let condition = build_condition(&criterion)?;
        if filter.insert(key.clone(), condition).is_some() {
            return Err(DbError::IllegalArgument(format!(
                "Only one condition per attribute is supported; '{}' appears more than once in one alternative",
                key
            )));
        }
    }
    Ok(filter)
}

fn build_condition(criterion: &PropertyCriterion) -> Result<Condition> {
    let condition = match criterion {
        PropertyCriterion::Equals { value, .. } => Condition::new(
            ComparisonOperator::Eq,
            vec![value.to_storage_string()],
            value.is_numeric(),
        ),
        PropertyCriterion::NotEquals { value, .. } => Condition::new(
            ComparisonOperator::Ne,
            vec![value.to_storage_string()],
            value.is_numeric(),
        ),
        PropertyCriterion::GreaterThan { value, .. } => Condition::new(
            ComparisonOperator::Gt,
            vec![value.to_storage_string()],
            value.is_numeric(),
        ),
        PropertyCriterion::GreaterThanEquals { value, .. } => Condition::new(
            ComparisonOperator::Ge,
            vec![value.to_storage_string()],
            value.is_numeric(),
        ),
        PropertyCriterion::LessThan { value, .. } => Condition::new(
            ComparisonOperator::Lt,
            vec![value.to_storage_string()],
            value.is_numeric(),
        ),
        PropertyCriterion::LessThanEquals { value, .. } => Condition::new(
            ComparisonOperator::Le,
            vec![value.to_storage_string()],
            value.is_numeric(),
        ),
        PropertyCriterion::Between { from, to, .. } => Condition::new(
            ComparisonOperator::Between,
            vec![from.to_storage_string(), to.to_storage_string()],
            from.is_numeric() || to.is_numeric(),
        ),
        PropertyCriterion::In { values, .. } => Condition::new(
            ComparisonOperator::In,
            values.iter().map(Value::to_storage_string).collect(),
            values.first().map(Value::is_numeric).unwrap_or(false),
        ),
        PropertyCriterion::Like { pattern, .. } => match LikePattern::categorize(pattern)? {
            LikePattern::Exact(literal) => {
                Condition::new(ComparisonOperator::Eq, vec![literal], false)
            }
            LikePattern::Prefix(literal) => {
                Condition::new(ComparisonOperator::BeginsWith, vec![literal], false)
            }
            // No native ends-with; contains is the closest the filter
            // language offers
            LikePattern::Suffix(literal) | LikePattern::Contains(literal) => {
                Condition::new(ComparisonOperator::Contains, vec![literal], false)
            }
        },
        PropertyCriterion::IdEquals { value } => Condition::new(
            ComparisonOperator::Eq,
            vec![value.to_storage_string()],
            value.is_numeric(),
        ),
    };
    Ok(condition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::model::PersistentProperty;

    fn entity() -> PersistentEntity {
        PersistentEntity::build("Person")
            .property(PersistentProperty::new("name", DataType::Text))
            .property(PersistentProperty::new("age", DataType::Integer))
    }

    #[test]
    fn test_duplicate_attribute_in_alternative_fails() {
        let entity = entity();
        let alternative = vec![
            PropertyCriterion::GreaterThan {
                property: "age".into(),
                value: Value::Integer(1),
            },
            PropertyCriterion::LessThan {
                property: "age".into(),
                value: Value::Integer(10),
            },
        ];
        assert!(matches!(
            build_filter(&entity, &alternative),
            Err(DbError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_like_translation() {
        let prefix = build_condition(&PropertyCriterion::Like {
            property: "name".into(),
            pattern: "Bo%".into(),
        })
        .unwrap();
        assert_eq!(prefix.operator, ComparisonOperator::BeginsWith);
        assert_eq!(prefix.values, vec!["Bo".to_string()]);

        let contains = build_condition(&PropertyCriterion::Like {
            property: "name".into(),
            pattern: "%o%".into(),
        })
        .unwrap();
        assert_eq!(contains.operator, ComparisonOperator::Contains);

        let interior = build_condition(&PropertyCriterion::Like {
            property: "name".into(),
            pattern: "B%b".into(),
        });
        assert!(matches!(interior, Err(DbError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_id_shortcut_maps_to_identity_attribute() {
        let entity = entity();
        let filter = build_filter(
            &entity,
            &[PropertyCriterion::IdEquals {
                value: Value::Text("abc".into()),
            }],
        )
        .unwrap();
        assert!(filter.contains_key("id"));
    }

    #[test]
    fn test_unsupported_projection_fails_fast() {
        let entity = Arc::new(entity());
        let template = super::super::template::MemoryDynamoTemplate::new();
        let query = Query::new(Arc::clone(&entity)).projection(Projection::Avg("age".into()));
        let err = execute(&template, &entity, "t", &query).unwrap_err();
        assert!(err.to_string().contains("[avg]"));
    }
}
