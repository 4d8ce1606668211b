use std::cmp::Ordering;

use crate::core::{DbError, Result, Value};
use crate::engine::NativeEntry;
use crate::model::PersistentEntity;
use crate::query::projection::{Direction, Order};

/// In-memory ordering over loaded native entries.
///
/// Backends without a native ORDER BY fetch the full candidate set, sort it
/// here and only then apply offset and max. Sorting is stable, so equal keys
/// keep their store order and secondary clauses compose by sorting from the
/// last clause to the first.
pub fn apply_order(
    entity: &PersistentEntity,
    rows: &mut [(Value, NativeEntry)],
    order: &[Order],
) -> Result<()> {
    for clause in order.iter().rev() {
        let key = entity.mapped_key(&clause.property).ok_or_else(|| {
            DbError::PropertyNotFound(clause.property.clone(), entity.name().to_string())
        })?;
        rows.sort_by(|(_, a), (_, b)| {
            let left = a.get(key).cloned().unwrap_or(Value::Null);
            let right = b.get(key).cloned().unwrap_or(Value::Null);
            let ordering = compare_for_sort(&left, &right);
            match clause.direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            }
        });
    }
    Ok(())
}

/// Cut a sorted row set down to the requested page.
pub fn apply_pagination<T>(rows: Vec<T>, offset: usize, max: Option<usize>) -> Vec<T> {
    let mut page: Vec<T> = rows.into_iter().skip(offset).collect();
    if let Some(max) = max {
        page.truncate(max);
    }
    page
}

/// Total order for sorting: NULLs sort last, incomparable types fall back to
/// their type name so the result stays deterministic.
pub(crate) fn compare_for_sort(left: &Value, right: &Value) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => left
            .compare(right)
            .unwrap_or_else(|_| left.type_name().cmp(right.type_name())),
    }
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

    fn row(id: &str, name: &str, age: i64) -> (Value, NativeEntry) {
        let mut entry = NativeEntry::new();
        entry.set("name", Value::Text(name.into()));
        entry.set("age", Value::Integer(age));
        (Value::Text(id.into()), entry)
    }

    #[test]
    fn test_multi_key_ordering_is_stable() {
        let entity = entity();
        let mut rows = vec![
            row("1", "Bob", 30),
            row("2", "Ann", 25),
            row("3", "Bob", 20),
            row("4", "Ann", 30),
        ];
        apply_order(
            &entity,
            &mut rows,
            &[Order::asc("name"), Order::desc("age")],
        )
        .unwrap();

        let ids: Vec<String> = rows.iter().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, vec!["4", "2", "1", "3"]);
    }

    #[test]
    fn test_nulls_sort_last_ascending() {
        let entity = entity();
        let mut rows = vec![row("1", "Zed", 1), row("2", "Ann", 1)];
        rows[0].1.remove("age");
        rows[0].1.set("age", Value::Null);
        apply_order(&entity, &mut rows, &[Order::asc("age")]).unwrap();
        assert_eq!(rows[0].0, Value::Text("2".into()));
    }

    #[test]
    fn test_pagination_cuts_after_sort() {
        let page = apply_pagination(vec![1, 2, 3, 4, 5], 1, Some(2));
        assert_eq!(page, vec![2, 3]);
    }

    #[test]
    fn test_unknown_order_property_fails() {
        let entity = entity();
        let mut rows = vec![row("1", "Ann", 1)];
        assert!(apply_order(&entity, &mut rows, &[Order::asc("missing")]).is_err());
    }
}
