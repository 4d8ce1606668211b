use std::collections::HashSet;

use crate::core::{DbError, Result, Value};
use crate::engine::NativeEntry;
use crate::model::PersistentEntity;
use crate::query::order::compare_for_sort;
use crate::query::projection::Projection;

/// In-memory projection evaluation for backends whose query language cannot
/// compute aggregates server-side. Operates on the already-loaded candidate
/// rows; `Sum` and `Avg` are rejected rather than silently computed over a
/// potentially huge scan.
pub fn apply_projections(
    entity: &PersistentEntity,
    rows: &[(Value, NativeEntry)],
    projections: &[Projection],
) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for projection in projections {
        match projection {
            Projection::Count => out.push(Value::Integer(rows.len() as i64)),
            Projection::CountDistinct(property) => {
                let values = property_values(entity, rows, property)?;
                let distinct: HashSet<&Value> = values.iter().filter(|v| !v.is_null()).collect();
                out.push(Value::Integer(distinct.len() as i64));
            }
            Projection::Id => out.extend(rows.iter().map(|(id, _)| id.clone())),
            Projection::Property(property) => {
                out.extend(property_values(entity, rows, property)?);
            }
            Projection::Min(property) => {
                out.push(extremum(entity, rows, property, false)?);
            }
            Projection::Max(property) => {
                out.push(extremum(entity, rows, property, true)?);
            }
            Projection::Sum(_) | Projection::Avg(_) => {
                return Err(DbError::UnsupportedProjection(
                    projection.name().to_string(),
                ));
            }
        }
    }
    Ok(out)
}

fn property_values(
    entity: &PersistentEntity,
    rows: &[(Value, NativeEntry)],
    property: &str,
) -> Result<Vec<Value>> {
    let key = entity
        .mapped_key(property)
        .ok_or_else(|| DbError::PropertyNotFound(property.to_string(), entity.name().to_string()))?;
    Ok(rows
        .iter()
        .map(|(_, entry)| entry.get(key).cloned().unwrap_or(Value::Null))
        .collect())
}

fn extremum(
    entity: &PersistentEntity,
    rows: &[(Value, NativeEntry)],
    property: &str,
    max: bool,
) -> Result<Value> {
    let values = property_values(entity, rows, property)?;
    let mut best: Option<Value> = None;
    for value in values.into_iter().filter(|v| !v.is_null()) {
        best = Some(match best.take() {
            None => value,
            Some(current) => {
                let keep_new = if max {
                    compare_for_sort(&value, &current).is_gt()
                } else {
                    compare_for_sort(&value, &current).is_lt()
                };
                if keep_new { value } else { current }
            }
        });
    }
    Ok(best.unwrap_or(Value::Null))
}
