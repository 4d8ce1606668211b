use std::sync::Arc;
use std::time::Duration;

use crate::config::DatastoreConfig;
use crate::core::{DbError, Result, Value};
use crate::engine::{CascadeAction, NativeEntry, NativeEntryStore, NativeResults, VERSION_KEY};
use crate::model::{Association, AssociationKind, PersistentEntity};
use crate::query::Query;

use super::query;
use super::template::{DynamoAttribute, DynamoItem, DynamoTemplate};

const SEQUENCE_COUNTER: &str = "sequence";

/// Entity store over an attribute-map item backend.
///
/// Secondary property indexes are not maintained; equality and range queries
/// run as filtered scans. To-many association keys live in a side table as
/// multi-valued attributes.
pub struct DynamoStore {
    entity: Arc<PersistentEntity>,
    template: Arc<dyn DynamoTemplate>,
    table: String,
    association_table: String,
}

impl DynamoStore {
    pub fn new(
        entity: Arc<PersistentEntity>,
        template: Arc<dyn DynamoTemplate>,
        config: &DatastoreConfig,
    ) -> Self {
        let table = format!("{}_{}", config.database, entity.family());
        Self {
            association_table: format!("{}_assoc", table),
            entity,
            template,
            table,
        }
    }

    fn association_item_id(owner: &Value, association: &str) -> String {
        format!("{}:{}", association, owner.to_storage_string())
    }
}

impl NativeEntryStore for DynamoStore {
    fn family(&self) -> &str {
        &self.table
    }

    fn next_sequence_value(&self, _entity: &PersistentEntity) -> Result<i64> {
        self.template
            .increment_counter(&self.table, SEQUENCE_COUNTER)
    }

    fn retrieve_entry(
        &self,
        entity: &PersistentEntity,
        key: &Value,
    ) -> Result<Option<NativeEntry>> {
        Ok(self
            .template
            .get(&self.table, &key.to_storage_string())?
            .map(|item| entry_from_item(entity, &item)))
    }

    fn insert_batch(
        &self,
        entity: &PersistentEntity,
        batch: &[(Value, NativeEntry)],
    ) -> Result<()> {
        let items = batch
            .iter()
            .map(|(key, entry)| (key.to_storage_string(), item_from_entry(entity, entry)))
            .collect();
        self.template.put_items(&self.table, items)
    }

    fn update_entry(
        &self,
        entity: &PersistentEntity,
        key: &Value,
        entry: &NativeEntry,
    ) -> Result<()> {
        self.template.put_item(
            &self.table,
            &key.to_storage_string(),
            item_from_entry(entity, entry),
        )
    }

    fn delete_entries(&self, _entity: &PersistentEntity, keys: &[Value]) -> Result<()> {
        for key in keys {
            self.template
                .delete_item(&self.table, &key.to_storage_string())?;
        }
        Ok(())
    }

    fn association_keys(
        &self,
        _entity: &PersistentEntity,
        owner: &Value,
        association: &Association,
    ) -> Result<Vec<Value>> {
        let item_id = Self::association_item_id(owner, &association.name);
        let Some(item) = self.template.get(&self.association_table, &item_id)? else {
            return Ok(Vec::new());
        };
        Ok(item
            .get("keys")
            .map(|attribute| {
                attribute
                    .values
                    .iter()
                    .map(|raw| infer_value(raw, attribute.number))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn apply_index(
        &self,
        _entity: &PersistentEntity,
        owner: &Value,
        action: &CascadeAction,
    ) -> Result<()> {
        match action {
            // Query execution is scan-based; per-property indexes are not
            // maintained for this backend.
            CascadeAction::IndexProperty { .. } | CascadeAction::UnindexProperty { .. } => Ok(()),
            CascadeAction::IndexAssociation {
                association,
                child_keys,
            } => {
                let mut item = DynamoItem::new();
                let number = child_keys.first().map(Value::is_numeric).unwrap_or(false);
                item.insert(
                    "keys".to_string(),
                    DynamoAttribute::multi(
                        child_keys.iter().map(Value::to_storage_string).collect(),
                        number,
                    ),
                );
                self.template.put_item(
                    &self.association_table,
                    &Self::association_item_id(owner, association),
                    item,
                )
            }
        }
    }

    fn execute_query(&self, q: &Query) -> Result<NativeResults> {
        query::execute(self.template.as_ref(), &self.entity, &self.table, q)
    }

    fn lock_entry(
        &self,
        entity: &PersistentEntity,
        _key: &Value,
        _timeout: Duration,
    ) -> Result<()> {
        Err(DbError::UnsupportedOperation(format!(
            "Explicit locks are not supported for entity '{}' on this backend",
            entity.name()
        )))
    }

    fn unlock_entry(&self, _entity: &PersistentEntity, _key: &Value) -> Result<()> {
        Ok(())
    }
}

/// Rebuild a typed entry from a raw item using the entity mapping; attributes
/// without a declared property fall back to the numeric flag.
pub(super) fn entry_from_item(entity: &PersistentEntity, item: &DynamoItem) -> NativeEntry {
    let mut entry = NativeEntry::new();
    for (key, attribute) in item {
        let raw = attribute.first();
        if raw.is_empty() {
            continue;
        }
        let value = if entity.is_identity_name(key) || key == VERSION_KEY {
            infer_value(raw, attribute.number)
        } else if let Some(property) = entity
            .properties()
            .iter()
            .find(|p| p.mapping.target_name == *key)
        {
            property.data_type.parse_storage_string(raw)
        } else if entity
            .associations()
            .iter()
            .any(|a| a.kind == AssociationKind::ToOne && a.mapping.target_name == *key)
        {
            infer_value(raw, attribute.number)
        } else {
            Value::Text(raw.to_string())
        };
        entry.set(key.clone(), value);
    }
    entry
}

pub(super) fn item_from_entry(_entity: &PersistentEntity, entry: &NativeEntry) -> DynamoItem {
    entry
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.to_string(), DynamoAttribute::from_value(value)))
        .collect()
}

fn infer_value(raw: &str, number: bool) -> Value {
    if number {
        if let Ok(i) = raw.parse::<i64>() {
            return Value::Integer(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return Value::Float(f);
        }
    }
    Value::Text(raw.to_string())
}
