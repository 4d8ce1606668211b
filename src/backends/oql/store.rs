use std::sync::Arc;
use std::time::Duration;

use crate::config::DatastoreConfig;
use crate::core::{DbError, Result, Value};
use crate::engine::{CascadeAction, NativeEntry, NativeEntryStore, NativeResults};
use crate::model::{Association, PersistentEntity};
use crate::query::Query;

use super::query;
use super::template::OqlTemplate;

/// Entity store over a region-style object store.
///
/// Entries are kept in their native form inside the region; queries compile
/// to object query strings. To-many association keys live as JSON arrays in
/// a side region.
pub struct OqlStore {
    entity: Arc<PersistentEntity>,
    template: Arc<dyn OqlTemplate>,
    region: String,
    link_region: String,
}

impl OqlStore {
    pub fn new(
        entity: Arc<PersistentEntity>,
        template: Arc<dyn OqlTemplate>,
        config: &DatastoreConfig,
    ) -> Self {
        let region = format!("{}_{}", config.database, entity.family());
        Self {
            link_region: format!("{}_links", region),
            entity,
            template,
            region,
        }
    }

    fn link_key(owner: &Value, association: &str) -> String {
        format!("{}:{}", association, owner.to_storage_string())
    }
}

impl NativeEntryStore for OqlStore {
    fn family(&self) -> &str {
        &self.region
    }

    fn next_sequence_value(&self, _entity: &PersistentEntity) -> Result<i64> {
        self.template.next_sequence(&self.region)
    }

    fn retrieve_entry(
        &self,
        _entity: &PersistentEntity,
        key: &Value,
    ) -> Result<Option<NativeEntry>> {
        self.template.get(&self.region, &key.to_storage_string())
    }

    fn insert_batch(
        &self,
        _entity: &PersistentEntity,
        batch: &[(Value, NativeEntry)],
    ) -> Result<()> {
        let entries: Vec<(String, NativeEntry)> = batch
            .iter()
            .map(|(key, entry)| (key.to_storage_string(), entry.clone()))
            .collect();
        self.template.put_all(&self.region, &entries)
    }

    fn update_entry(
        &self,
        _entity: &PersistentEntity,
        key: &Value,
        entry: &NativeEntry,
    ) -> Result<()> {
        self.template
            .put(&self.region, &key.to_storage_string(), entry)
    }

    fn delete_entries(&self, _entity: &PersistentEntity, keys: &[Value]) -> Result<()> {
        for key in keys {
            self.template.remove(&self.region, &key.to_storage_string())?;
        }
        Ok(())
    }

    fn association_keys(
        &self,
        _entity: &PersistentEntity,
        owner: &Value,
        association: &Association,
    ) -> Result<Vec<Value>> {
        let Some(entry) = self
            .template
            .get(&self.link_region, &Self::link_key(owner, &association.name))?
        else {
            return Ok(Vec::new());
        };
        let Some(raw) = entry.get("keys").and_then(Value::as_str) else {
            return Ok(Vec::new());
        };
        serde_json::from_str(raw).map_err(|e| {
            DbError::DataRetrievalFailure(format!(
                "Corrupt association index for '{}': {}",
                association.name, e
            ))
        })
    }

    fn apply_index(
        &self,
        _entity: &PersistentEntity,
        owner: &Value,
        action: &CascadeAction,
    ) -> Result<()> {
        match action {
            // Queries scan through the object query engine; no per-property
            // index structures exist for this backend.
            CascadeAction::IndexProperty { .. } | CascadeAction::UnindexProperty { .. } => Ok(()),
            CascadeAction::IndexAssociation {
                association,
                child_keys,
            } => {
                let raw = serde_json::to_string(child_keys).map_err(|e| {
                    DbError::DataIntegrityViolation(format!(
                        "Cannot serialize association index for '{}': {}",
                        association, e
                    ))
                })?;
                let mut entry = NativeEntry::new();
                entry.set("keys", Value::Text(raw));
                self.template
                    .put(&self.link_region, &Self::link_key(owner, association), &entry)
            }
        }
    }

    fn execute_query(&self, q: &Query) -> Result<NativeResults> {
        query::execute(self.template.as_ref(), &self.entity, &self.region, q)
    }

    fn lock_entry(&self, _entity: &PersistentEntity, key: &Value, timeout: Duration) -> Result<()> {
        self.template
            .lock(&self.region, &key.to_storage_string(), timeout)
    }

    fn unlock_entry(&self, _entity: &PersistentEntity, key: &Value) -> Result<()> {
        self.template.unlock(&self.region, &key.to_storage_string())
    }
}
