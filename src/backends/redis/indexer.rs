use std::sync::Arc;

use crate::core::{Result, Value};
use crate::engine::CascadeAction;
use crate::model::PersistentEntity;

use super::template::RedisTemplate;

/// Key layout for one entity family. Everything is namespaced under
/// `{database}:{family}` so datastores sharing a server never collide.
#[derive(Debug, Clone)]
pub(super) struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(database: &str, family: &str) -> Self {
        Self {
            prefix: format!("{}:{}", database, family),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Hash holding one record
    pub fn entity(&self, id: &Value) -> String {
        format!("{}:{}", self.prefix, id.to_storage_string())
    }

    /// Pattern for SORT BY / GET over one hash field
    pub fn entity_field_pattern(&self, field: &str) -> String {
        format!("{}:*->{}", self.prefix, field)
    }

    /// Set of all identifiers of the family
    pub fn all(&self) -> String {
        format!("{}.all", self.prefix)
    }

    /// Set of identifiers having one property value
    pub fn index(&self, field: &str, value: &Value) -> String {
        format!("{}:{}:{}", self.prefix, field, value.to_storage_string())
    }

    /// Glob over all index sets of one property
    pub fn index_glob(&self, field: &str, glob: &str) -> String {
        format!("{}:{}:{}", self.prefix, field, glob)
    }

    /// Sorted set scoring identifiers by a numeric property
    pub fn sorted(&self, field: &str) -> String {
        format!("{}:{}.sorted", self.prefix, field)
    }

    /// Set of child identifiers of one to-many association
    pub fn association(&self, owner: &Value, association: &str) -> String {
        format!(
            "{}:{}:{}",
            self.prefix,
            owner.to_storage_string(),
            association
        )
    }

    pub fn sequence(&self) -> String {
        format!("{}.next_id", self.prefix)
    }

    pub fn lock(&self, id: &Value) -> String {
        format!("{}:{}.lock", self.prefix, id.to_storage_string())
    }
}

/// Maintains the secondary index structures for one entity: plain value sets
/// for equality, sorted sets for range queries over numeric properties and
/// per-owner sets for to-many associations.
pub(super) struct RedisIndexer {
    entity: Arc<PersistentEntity>,
    keys: KeySpace,
}

impl RedisIndexer {
    pub fn new(entity: Arc<PersistentEntity>, keys: KeySpace) -> Self {
        Self { entity, keys }
    }

    fn mapped(&self, property: &str) -> String {
        self.entity
            .mapped_key(property)
            .unwrap_or(property)
            .to_string()
    }

    pub fn apply(
        &self,
        template: &dyn RedisTemplate,
        owner: &Value,
        action: &CascadeAction,
    ) -> Result<()> {
        let member = owner.to_storage_string();
        match action {
            CascadeAction::IndexProperty { property, value } => {
                let field = self.mapped(property);
                template.sadd(&self.keys.index(&field, value), &member)?;
                if let Some(score) = value.as_f64() {
                    template.zadd(&self.keys.sorted(&field), score, &member)?;
                }
                Ok(())
            }
            CascadeAction::UnindexProperty { property, value } => {
                let field = self.mapped(property);
                template.srem(&self.keys.index(&field, value), &member)?;
                if value.as_f64().is_some() {
                    template.zrem(&self.keys.sorted(&field), &member)?;
                }
                Ok(())
            }
            CascadeAction::IndexAssociation {
                association,
                child_keys,
            } => {
                let key = self.keys.association(owner, association);
                template.del(&key)?;
                for child in child_keys {
                    template.sadd(&key, &child.to_storage_string())?;
                }
                Ok(())
            }
        }
    }
}
