use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{DbError, Result};
use crate::model::entity::PersistentEntity;

/// Registry of persistent entities, fully resolved before any query or
/// persist call. Owned per-Datastore; no global state.
#[derive(Debug, Default)]
pub struct MappingContext {
    entities: HashMap<String, Arc<PersistentEntity>>,
}

impl MappingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity: PersistentEntity) -> Arc<PersistentEntity> {
        let entity = Arc::new(entity);
        self.entities
            .insert(entity.name().to_string(), Arc::clone(&entity));
        entity
    }

    pub fn entity(&self, name: &str) -> Result<Arc<PersistentEntity>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NonPersistentType(name.to_string()))
    }

    pub fn is_persistent(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Validate that every association points at a registered entity.
    pub fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            for assoc in entity.associations() {
                if !self.is_persistent(&assoc.target_entity) {
                    return Err(DbError::IllegalMapping(format!(
                        "Association '{}' of entity '{}' targets unknown entity '{}'",
                        assoc.name,
                        entity.name(),
                        assoc.target_entity
                    )));
                }
            }
        }
        Ok(())
    }
}
