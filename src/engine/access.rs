// ============================================================================
// Entity Data and Access
// ============================================================================
//
// Domain instances are explicit value maps rather than reflective objects: an
// `EntityData` carries the identifier slot, simple property values and
// association references. Instances are shared within one session through
// `EntityHandle` so that cascade fixups and cache hits observe the same
// object.
//
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::core::{DbError, Result, Value};
use crate::model::{AssociationKind, PersistentEntity};

/// Shared, session-local handle to one domain instance.
pub type EntityHandle = Rc<RefCell<EntityData>>;

/// Stable identity of a handle within one session, independent of whether an
/// identifier has been assigned yet.
pub fn handle_key(handle: &EntityHandle) -> usize {
    Rc::as_ptr(handle) as usize
}

/// A reference to an associated instance. Loading an entity materializes
/// associations lazily: only the identifier is known until `resolve` is
/// called through the session.
#[derive(Debug, Clone)]
pub enum Ref {
    /// Identifier known, instance not loaded
    Unresolved(Value),
    Resolved(EntityHandle),
}

impl Ref {
    /// The identifier, when one is known. A resolved, not-yet-persisted
    /// instance has none.
    pub fn identifier(&self) -> Option<Value> {
        match self {
            Self::Unresolved(id) => Some(id.clone()),
            Self::Resolved(handle) => handle.borrow().identifier().cloned(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn resolved(&self) -> Option<&EntityHandle> {
        match self {
            Self::Resolved(handle) => Some(handle),
            Self::Unresolved(_) => None,
        }
    }
}

/// Value of one association slot on an instance.
#[derive(Debug, Clone)]
pub enum AssociationValue {
    One(Ref),
    Many(Vec<Ref>),
}

/// One domain instance as an explicit value map.
#[derive(Debug, Clone, Default)]
pub struct EntityData {
    entity_name: String,
    id: Option<Value>,
    fields: HashMap<String, Value>,
    associations: HashMap<String, AssociationValue>,
}

impl EntityData {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            ..Self::default()
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn identifier(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn set_identifier(&mut self, id: Value) {
        self.id = Some(id);
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.fields.get(property)
    }

    pub fn set(&mut self, property: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(property.into(), value.into());
    }

    /// Builder-style property assignment
    pub fn with(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(property, value);
        self
    }

    pub fn association(&self, name: &str) -> Option<&AssociationValue> {
        self.associations.get(name)
    }

    pub fn set_to_one(&mut self, name: impl Into<String>, reference: Ref) {
        self.associations
            .insert(name.into(), AssociationValue::One(reference));
    }

    pub fn set_many(&mut self, name: impl Into<String>, references: Vec<Ref>) {
        self.associations
            .insert(name.into(), AssociationValue::Many(references));
    }

    /// Append to a to-many association, creating the slot if absent.
    pub fn add_to_many(&mut self, name: impl Into<String>, reference: Ref) {
        match self
            .associations
            .entry(name.into())
            .or_insert_with(|| AssociationValue::Many(Vec::new()))
        {
            AssociationValue::Many(refs) => refs.push(reference),
            AssociationValue::One(slot) => *slot = reference,
        }
    }

    pub fn into_handle(self) -> EntityHandle {
        Rc::new(RefCell::new(self))
    }
}

/// Typed access to one instance under its entity mapping. Bundles the handle
/// with the metadata so persisters read and write properties without
/// re-resolving the entity.
#[derive(Debug, Clone)]
pub struct EntityAccess {
    entity: Arc<PersistentEntity>,
    handle: EntityHandle,
}

impl EntityAccess {
    pub fn new(entity: Arc<PersistentEntity>, handle: EntityHandle) -> Result<Self> {
        if handle.borrow().entity_name() != entity.name() {
            return Err(DbError::IllegalArgument(format!(
                "Instance of '{}' accessed through mapping of '{}'",
                handle.borrow().entity_name(),
                entity.name()
            )));
        }
        Ok(Self { entity, handle })
    }

    pub fn entity(&self) -> &Arc<PersistentEntity> {
        &self.entity
    }

    pub fn handle(&self) -> &EntityHandle {
        &self.handle
    }

    pub fn identifier(&self) -> Option<Value> {
        self.handle.borrow().identifier().cloned()
    }

    pub fn set_identifier(&self, id: Value) {
        self.handle.borrow_mut().set_identifier(id);
    }

    pub fn property(&self, name: &str) -> Value {
        self.handle
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn set_property(&self, name: &str, value: Value) {
        self.handle.borrow_mut().set(name, value);
    }

    pub fn association(&self, name: &str) -> Option<AssociationValue> {
        self.handle.borrow().association(name).cloned()
    }

    /// Current in-memory version, defaulting to zero for unversioned or
    /// fresh instances.
    pub fn version(&self) -> i64 {
        self.handle
            .borrow()
            .get("version")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    pub fn set_version(&self, version: i64) {
        self.handle.borrow_mut().set("version", version);
    }

    /// Fix up the inverse side of a bidirectional association in memory so
    /// both sides observe the link before flush.
    pub fn attach_inverse(
        &self,
        child: &EntityHandle,
        inverse_property: &str,
        child_entity: &PersistentEntity,
    ) {
        let Some(inverse) = child_entity.association_by_name(inverse_property) else {
            return;
        };
        match inverse.kind {
            AssociationKind::ToOne => {
                child
                    .borrow_mut()
                    .set_to_one(inverse_property, Ref::Resolved(Rc::clone(&self.handle)));
            }
            AssociationKind::OneToMany => {
                let already_linked = match child.borrow().association(inverse_property) {
                    Some(AssociationValue::Many(refs)) => refs.iter().any(|r| {
                        r.resolved()
                            .is_some_and(|h| Rc::ptr_eq(h, &self.handle))
                    }),
                    _ => false,
                };
                if !already_linked {
                    child
                        .borrow_mut()
                        .add_to_many(inverse_property, Ref::Resolved(Rc::clone(&self.handle)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::model::{Association, PersistentProperty};

    #[test]
    fn test_access_rejects_wrong_entity() {
        let entity = Arc::new(PersistentEntity::build("Person"));
        let handle = EntityData::new("Address").into_handle();
        assert!(EntityAccess::new(entity, handle).is_err());
    }

    #[test]
    fn test_inverse_fixup_to_one() {
        let person = Arc::new(
            PersistentEntity::build("Person")
                .property(PersistentProperty::new("name", DataType::Text)),
        );
        let address_entity = PersistentEntity::build("Address").association(
            Association::new("resident", "Person", crate::model::AssociationKind::ToOne),
        );

        let parent = EntityData::new("Person").with("name", "Ann").into_handle();
        let child = EntityData::new("Address").into_handle();
        let access = EntityAccess::new(person, Rc::clone(&parent)).unwrap();

        access.attach_inverse(&child, "resident", &address_entity);
        let linked = child.borrow();
        match linked.association("resident") {
            Some(AssociationValue::One(Ref::Resolved(handle))) => {
                assert!(Rc::ptr_eq(handle, &parent));
            }
            other => panic!("expected resolved to-one link, got {:?}", other),
        }
    }
}
