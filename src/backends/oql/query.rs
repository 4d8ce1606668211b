// ============================================================================
// OQL Compilation
// ============================================================================
//
// Criteria compile by recursive descent into an object query string with
// positional `$n` bind parameters collected in a side list. LIKE patterns
// are the one exception: the query language accepts them only as literals,
// so they are inlined quoted. Ordering, pagination and projections have no
// server-side form and run in memory over the result set.
//
// ============================================================================

use std::fmt::Write;
use std::sync::Arc;

use log::debug;

use crate::core::{DbError, Result, Value};
use crate::engine::{NativeEntry, NativeResults};
use crate::model::PersistentEntity;
use crate::query::{
    apply_order, apply_pagination, apply_projections, Criterion, Junction, PropertyCriterion,
    Query,
};

use super::template::{CompiledQuery, OqlTemplate};

pub fn execute(
    template: &dyn OqlTemplate,
    entity: &Arc<PersistentEntity>,
    region: &str,
    query: &Query,
) -> Result<NativeResults> {
    let root = query.root();
    let raw = if query.has_criteria() {
        let (text, params) = build(entity, region, &root)?;
        template.query(
            region,
            &CompiledQuery {
                text,
                params,
                criteria: &root,
                entity,
            },
        )?
    } else {
        template.entries(region)?
    };

    let mut rows: Vec<(Value, NativeEntry)> = raw
        .into_iter()
        .map(|(key, entry)| {
            let id = entry
                .get(entity.identity_name())
                .cloned()
                .unwrap_or(Value::Text(key));
            (id, entry)
        })
        .collect();

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

/// Compile a criteria tree into query text plus positional parameters.
pub fn build(
    entity: &PersistentEntity,
    region: &str,
    junction: &Junction,
) -> Result<(String, Vec<Value>)> {
    let mut text = format!("SELECT DISTINCT * FROM /{}", region);
    let mut params = Vec::new();
    if !junction.is_empty() {
        let clause = junction_clause(entity, junction, &mut params)?;
        write!(text, " WHERE {}", clause).expect("writing to a String cannot fail");
    }
    debug!("compiled query: {}", text);
    Ok((text, params))
}

fn junction_clause(
    entity: &PersistentEntity,
    junction: &Junction,
    params: &mut Vec<Value>,
) -> Result<String> {
    match junction {
        Junction::Conjunction(children) => combine(entity, children, " AND ", "TRUE", params),
        Junction::Disjunction(children) => combine(entity, children, " OR ", "FALSE", params),
        Junction::Negation(inner) => Ok(format!(
            "NOT ({})",
            junction_clause(entity, inner, params)?
        )),
    }
}

fn combine(
    entity: &PersistentEntity,
    children: &[Criterion],
    separator: &str,
    empty: &str,
    params: &mut Vec<Value>,
) -> Result<String> {
    if children.is_empty() {
        return Ok(empty.to_string());
    }
    let clauses: Vec<String> = children
        .iter()
        .map(|child| match child {
            Criterion::Property(criterion) => criterion_clause(entity, criterion, params),
            Criterion::Junction(junction) => {
                Ok(format!("({})", junction_clause(entity, junction, params)?))
            }
        })
        .collect::<Result<_>>()?;
    Ok(clauses.join(separator))
}

fn criterion_clause(
    entity: &PersistentEntity,
    criterion: &PropertyCriterion,
    params: &mut Vec<Value>,
) -> Result<String> {
    let field = entity
        .mapped_key(criterion.property_name(entity))
        .ok_or_else(|| {
            DbError::PropertyNotFound(
                criterion.property_name(entity).to_string(),
                entity.name().to_string(),
            )
        })?
        .to_string();
    let clause = match criterion {
        PropertyCriterion::Equals { value, .. } | PropertyCriterion::IdEquals { value } => {
            format!("{} = {}", field, bind(params, value))
        }
        PropertyCriterion::NotEquals { value, .. } => {
            format!("{} <> {}", field, bind(params, value))
        }
        PropertyCriterion::GreaterThan { value, .. } => {
            format!("{} > {}", field, bind(params, value))
        }
        PropertyCriterion::GreaterThanEquals { value, .. } => {
            format!("{} >= {}", field, bind(params, value))
        }
        PropertyCriterion::LessThan { value, .. } => {
            format!("{} < {}", field, bind(params, value))
        }
        PropertyCriterion::LessThanEquals { value, .. } => {
            format!("{} <= {}", field, bind(params, value))
        }
        PropertyCriterion::Between { from, to, .. } => {
            let low = bind(params, from);
            let high = bind(params, to);
            format!("({field} >= {low} AND {field} <= {high})")
        }
        PropertyCriterion::In { values, .. } => {
            let binds: Vec<String> = values.iter().map(|value| bind(params, value)).collect();
            format!("{} IN SET ({})", field, binds.join(", "))
        }
        // The query language accepts LIKE patterns only as literals
        PropertyCriterion::Like { pattern, .. } => {
            format!("{} LIKE '{}'", field, pattern.replace('\'', "''"))
        }
    };
    Ok(clause)
}

fn bind(params: &mut Vec<Value>, value: &Value) -> String {
    params.push(value.clone());
    format!("${}", params.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::model::PersistentProperty;
    use crate::query::restrict::*;

    fn entity() -> PersistentEntity {
        PersistentEntity::build("Person")
            .property(PersistentProperty::new("name", DataType::Text))
            .property(PersistentProperty::new("age", DataType::Integer))
    }

    #[test]
    fn test_positional_parameters() {
        let entity = entity();
        let tree = Junction::Conjunction(vec![eq("name", "Ann"), gt("age", 21i64)]);
        let (text, params) = build(&entity, "person", &tree).unwrap();
        assert_eq!(
            text,
            "SELECT DISTINCT * FROM /person WHERE name = $1 AND age > $2"
        );
        assert_eq!(params, vec![Value::Text("Ann".into()), Value::Integer(21)]);
    }

    #[test]
    fn test_nested_junctions_parenthesize() {
        let entity = entity();
        let tree = Junction::Conjunction(vec![
            disjunction(vec![eq("name", "Ann"), eq("name", "Bob")]),
            le("age", 65i64),
        ]);
        let (text, _) = build(&entity, "person", &tree).unwrap();
        assert_eq!(
            text,
            "SELECT DISTINCT * FROM /person WHERE (name = $1 OR name = $2) AND age <= $3"
        );
    }

    #[test]
    fn test_like_is_inlined_and_escaped() {
        let entity = entity();
        let tree = Junction::Conjunction(vec![like("name", "O'%")]);
        let (text, params) = build(&entity, "person", &tree).unwrap();
        assert_eq!(
            text,
            "SELECT DISTINCT * FROM /person WHERE name LIKE 'O''%'"
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_negation_and_in_set() {
        let entity = entity();
        let tree = Junction::Conjunction(vec![
            in_list("age", vec![Value::Integer(1), Value::Integer(2)]),
            negation(Junction::Conjunction(vec![eq("name", "Ann")])),
        ]);
        let (text, params) = build(&entity, "person", &tree).unwrap();
        assert_eq!(
            text,
            "SELECT DISTINCT * FROM /person WHERE age IN SET ($1, $2) AND (NOT (name = $3))"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_empty_disjunction_compiles_to_false() {
        let entity = entity();
        let tree = Junction::Conjunction(vec![disjunction(vec![]), eq("name", "Ann")]);
        let (text, _) = build(&entity, "person", &tree).unwrap();
        assert_eq!(
            text,
            "SELECT DISTINCT * FROM /person WHERE (FALSE) AND name = $1"
        );
    }
}
