// ============================================================================
// Native Entry Persister
// ============================================================================
//
// Backend-independent persistence over a flat native record form. The
// persister owns the write algorithm: identifier generation, optimistic
// version checking, cascades, bidirectional fixups and pending-operation
// construction. Everything backend-specific sits behind the NativeEntryStore
// trait.
//
// Writes are not executed here; `persist` and `delete` queue pending
// operations into the session's unit of work, and `flush_*` executes a
// drained batch against the store.
//
// ============================================================================

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use uuid::Uuid;

use crate::core::{DbError, Result, Value};
use crate::engine::access::{AssociationValue, EntityAccess, EntityData, EntityHandle, Ref};
use crate::engine::entry::NativeEntry;
use crate::engine::event::EventDispatch;
use crate::engine::pending::{
    CascadeAction, OperationKind, PendingDelete, PendingOperation, PreAction,
};
use crate::model::{Association, AssociationKind, CascadeType, IdGenerator, PersistentEntity};
use crate::query::{Query, QueryResult};
use crate::session::{Datastore, UnitOfWork};

pub const VERSION_KEY: &str = "version";

/// Raw results of a native query execution.
#[derive(Debug, Clone)]
pub enum NativeResults {
    Entries(Vec<(Value, NativeEntry)>),
    Values(Vec<Value>),
}

/// Backend contract for one entity family. Implementations translate the
/// flat `NativeEntry` form to their own storage layout and compile `Query`
/// objects into their native query language.
pub trait NativeEntryStore {
    /// Native table / region / key-prefix this store writes to
    fn family(&self) -> &str;

    /// Next value of the backend-native identifier sequence
    fn next_sequence_value(&self, entity: &PersistentEntity) -> Result<i64>;

    fn retrieve_entry(&self, entity: &PersistentEntity, key: &Value)
        -> Result<Option<NativeEntry>>;

    /// Write a batch of fresh entries, in one round trip where the backend
    /// supports it.
    fn insert_batch(&self, entity: &PersistentEntity, batch: &[(Value, NativeEntry)])
        -> Result<()>;

    fn update_entry(&self, entity: &PersistentEntity, key: &Value, entry: &NativeEntry)
        -> Result<()>;

    fn delete_entries(&self, entity: &PersistentEntity, keys: &[Value]) -> Result<()>;

    /// Identifiers currently recorded in the owner's association index
    fn association_keys(
        &self,
        entity: &PersistentEntity,
        owner: &Value,
        association: &Association,
    ) -> Result<Vec<Value>>;

    /// Apply one secondary-index side effect for a record
    fn apply_index(
        &self,
        entity: &PersistentEntity,
        owner: &Value,
        action: &CascadeAction,
    ) -> Result<()>;

    /// Compile and run a query against the backend
    fn execute_query(&self, query: &Query) -> Result<NativeResults>;

    fn lock_entry(&self, entity: &PersistentEntity, key: &Value, timeout: Duration) -> Result<()>;

    fn unlock_entry(&self, entity: &PersistentEntity, key: &Value) -> Result<()>;
}

/// Persister for one entity, shared by all sessions of a datastore.
pub struct NativeEntryPersister {
    entity: Arc<PersistentEntity>,
    store: Box<dyn NativeEntryStore>,
    /// Native keys this datastore currently holds explicit locks on
    held_locks: Mutex<HashSet<String>>,
}

impl NativeEntryPersister {
    pub fn new(entity: Arc<PersistentEntity>, store: Box<dyn NativeEntryStore>) -> Self {
        Self {
            entity,
            store,
            held_locks: Mutex::new(HashSet::new()),
        }
    }

    pub fn entity(&self) -> &Arc<PersistentEntity> {
        &self.entity
    }

    pub fn store(&self) -> &dyn NativeEntryStore {
        self.store.as_ref()
    }

    // --- persist -----------------------------------------------------------

    /// Queue an insert or update for the instance and return its identifier.
    ///
    /// The identifier is generated eagerly so callers can reference it before
    /// flush. The native write itself is deferred; repeated persists of the
    /// same instance coalesce into the already-queued operation.
    pub fn persist(
        &self,
        datastore: &Datastore,
        uow: &mut UnitOfWork,
        handle: &EntityHandle,
    ) -> Result<Value> {
        let access = EntityAccess::new(Arc::clone(&self.entity), Rc::clone(handle))?;

        // Cascade cycles re-enter persist for an instance already on the
        // stack; its identifier is known by then, so just hand it back.
        if let Some(id) = uow.in_flight_identifier(handle) {
            return Ok(id);
        }

        let existing_id = access.identifier();
        let is_update = match &existing_id {
            None => false,
            // An assigned identifier does not prove the record exists; only
            // treat it as an update when this session has seen the instance.
            Some(id) => {
                self.entity.generator() != IdGenerator::Assigned
                    || uow.cached_instance(self.entity.name(), id).is_some()
            }
        };

        let id = match existing_id {
            Some(id) => id,
            None => {
                let id = self.generate_identifier()?;
                access.set_identifier(id.clone());
                id
            }
        };

        uow.begin_persist(handle, id.clone());
        let outcome = self.queue_persist(datastore, uow, &access, &id, is_update);
        uow.end_persist(handle);
        outcome?;

        uow.cache_instance(self.entity.name(), &id, handle);
        Ok(id)
    }

    fn generate_identifier(&self) -> Result<Value> {
        match self.entity.generator() {
            IdGenerator::Uuid => Ok(Value::Text(Uuid::new_v4().to_string())),
            IdGenerator::Sequence => Ok(Value::Integer(
                self.store.next_sequence_value(&self.entity)?,
            )),
            IdGenerator::Assigned => Err(DbError::DataIntegrityViolation(format!(
                "Entity '{}' uses assigned identifiers but none was set",
                self.entity.name()
            ))),
        }
    }

    fn queue_persist(
        &self,
        datastore: &Datastore,
        uow: &mut UnitOfWork,
        access: &EntityAccess,
        id: &Value,
        is_update: bool,
    ) -> Result<()> {
        let mut entry = NativeEntry::new();
        entry.set(self.entity.identity_name(), id.clone());
        let mut pre = Vec::new();
        let mut cascades = Vec::new();

        let previous = if is_update {
            self.store.retrieve_entry(&self.entity, id)?
        } else {
            None
        };

        for property in self.entity.properties() {
            if self.entity.is_identity_name(&property.name) || property.name == VERSION_KEY {
                continue;
            }
            let value = access.property(&property.name);
            let key = property.mapping.target_name.as_str();
            if property.mapping.indexed {
                let old = previous.as_ref().and_then(|e| e.get(key)).cloned();
                if let Some(old) = old.filter(|old| !old.is_null() && *old != value) {
                    cascades.push(CascadeAction::UnindexProperty {
                        property: property.name.clone(),
                        value: old,
                    });
                }
                if !value.is_null() {
                    cascades.push(CascadeAction::IndexProperty {
                        property: property.name.clone(),
                        value: value.clone(),
                    });
                }
            }
            if !value.is_null() {
                entry.set(key, value);
            }
        }

        if self.entity.is_versioned() {
            if is_update {
                // Checked against the store at flush, bumped on success
                let expected = access.version();
                pre.push(PreAction::CheckVersion { expected });
                entry.set(VERSION_KEY, Value::Integer(expected));
            } else {
                access.set_version(1);
                entry.set(VERSION_KEY, Value::Integer(1));
            }
        }

        for association in self.entity.associations() {
            self.queue_association(
                datastore,
                uow,
                access,
                association,
                &mut entry,
                &mut cascades,
            )?;
        }

        let operation = PendingOperation {
            kind: if is_update {
                OperationKind::Update
            } else {
                OperationKind::Insert
            },
            entity: Arc::clone(&self.entity),
            native_key: id.clone(),
            entry,
            access: access.clone(),
            pre,
            cascades,
        };
        uow.queue_operation(operation);
        Ok(())
    }

    fn queue_association(
        &self,
        datastore: &Datastore,
        uow: &mut UnitOfWork,
        access: &EntityAccess,
        association: &Association,
        entry: &mut NativeEntry,
        cascades: &mut Vec<CascadeAction>,
    ) -> Result<()> {
        let Some(value) = access.association(&association.name) else {
            return Ok(());
        };
        match value {
            AssociationValue::One(reference) => {
                let child_id =
                    self.association_key(datastore, uow, access, association, &reference)?;
                if let Some(child_id) = child_id {
                    entry.set(association.mapping.target_name.as_str(), child_id.clone());
                    if association.mapping.indexed {
                        cascades.push(CascadeAction::IndexProperty {
                            property: association.name.clone(),
                            value: child_id,
                        });
                    }
                }
            }
            AssociationValue::Many(references) => {
                let mut child_keys = Vec::with_capacity(references.len());
                for reference in &references {
                    if let Some(key) =
                        self.association_key(datastore, uow, access, association, reference)?
                    {
                        child_keys.push(key);
                    }
                }
                cascades.push(CascadeAction::IndexAssociation {
                    association: association.name.clone(),
                    child_keys,
                });
            }
        }
        Ok(())
    }

    /// Resolve the native key of one associated reference, cascading the
    /// persist when the association asks for it. Unresolved references are
    /// never cascaded into; their identifier is written as-is.
    fn association_key(
        &self,
        datastore: &Datastore,
        uow: &mut UnitOfWork,
        access: &EntityAccess,
        association: &Association,
        reference: &Ref,
    ) -> Result<Option<Value>> {
        match reference {
            Ref::Unresolved(id) => Ok(Some(id.clone())),
            Ref::Resolved(child) => {
                if !association.does_cascade(CascadeType::Persist) {
                    return Ok(reference.identifier());
                }
                if !uow.mark_association_visited(self.entity.name(), &association.name, child) {
                    return Ok(reference.identifier());
                }
                if let Some(inverse) = &association.inverse_property {
                    let child_entity = datastore
                        .mapping_context()
                        .entity(&association.target_entity)?;
                    access.attach_inverse(child, inverse, &child_entity);
                }
                let child_persister = datastore.persister(&association.target_entity)?;
                Ok(Some(child_persister.persist(datastore, uow, child)?))
            }
        }
    }

    // --- delete ------------------------------------------------------------

    /// Queue a delete for the instance, cascading removal to owned
    /// associations first.
    pub fn delete(
        &self,
        datastore: &Datastore,
        uow: &mut UnitOfWork,
        handle: &EntityHandle,
    ) -> Result<()> {
        let access = EntityAccess::new(Arc::clone(&self.entity), Rc::clone(handle))?;
        let Some(id) = access.identifier() else {
            return Ok(());
        };

        for association in self.entity.associations() {
            if !association.does_cascade(CascadeType::Remove) {
                continue;
            }
            let child_persister = datastore.persister(&association.target_entity)?;
            match access.association(&association.name) {
                Some(AssociationValue::One(reference)) => {
                    self.delete_reference(datastore, uow, &child_persister, &reference)?;
                }
                Some(AssociationValue::Many(references)) => {
                    for reference in references {
                        self.delete_reference(datastore, uow, &child_persister, &reference)?;
                    }
                }
                None => {}
            }
        }

        self.queue_delete(uow, &id)?;
        uow.evict(self.entity.name(), &id);
        Ok(())
    }

    fn delete_reference(
        &self,
        datastore: &Datastore,
        uow: &mut UnitOfWork,
        child_persister: &Arc<NativeEntryPersister>,
        reference: &Ref,
    ) -> Result<()> {
        match reference {
            Ref::Resolved(child) => child_persister.delete(datastore, uow, child),
            Ref::Unresolved(child_id) => {
                child_persister.queue_delete(uow, child_id)?;
                uow.evict(child_persister.entity.name(), child_id);
                Ok(())
            }
        }
    }

    /// Queue a delete by native key, deriving index cleanup from the
    /// currently stored entry.
    pub fn queue_delete(&self, uow: &mut UnitOfWork, id: &Value) -> Result<()> {
        let mut cascades = Vec::new();
        if let Some(stored) = self.store.retrieve_entry(&self.entity, id)? {
            for property in self.entity.properties() {
                if !property.mapping.indexed {
                    continue;
                }
                if let Some(value) = stored.get(&property.mapping.target_name) {
                    if !value.is_null() {
                        cascades.push(CascadeAction::UnindexProperty {
                            property: property.name.clone(),
                            value: value.clone(),
                        });
                    }
                }
            }
        }
        uow.queue_delete(PendingDelete {
            entity: Arc::clone(&self.entity),
            native_key: id.clone(),
            cascades,
        });
        Ok(())
    }

    // --- retrieve ----------------------------------------------------------

    /// Load an instance by identifier, hitting the session cache first.
    pub fn retrieve(
        &self,
        uow: &mut UnitOfWork,
        id: &Value,
    ) -> Result<Option<EntityHandle>> {
        if let Some(handle) = uow.cached_instance(self.entity.name(), id) {
            return Ok(Some(handle));
        }
        let Some(entry) = self.store.retrieve_entry(&self.entity, id)? else {
            return Ok(None);
        };
        let handle = self.instantiate(id, &entry)?;
        uow.cache_instance(self.entity.name(), id, &handle);
        Ok(Some(handle))
    }

    /// Rebuild a domain instance from its native entry. To-one associations
    /// come back unresolved; to-many associations come back as unresolved
    /// keys read from the association index.
    pub fn instantiate(&self, id: &Value, entry: &NativeEntry) -> Result<EntityHandle> {
        let mut data = EntityData::new(self.entity.name());
        data.set_identifier(id.clone());

        for property in self.entity.properties() {
            if self.entity.is_identity_name(&property.name) {
                continue;
            }
            if let Some(value) = entry.get(&property.mapping.target_name) {
                data.set(property.name.clone(), value.clone());
            }
        }
        if self.entity.is_versioned() {
            if let Some(version) = entry.get(VERSION_KEY) {
                data.set(VERSION_KEY, version.clone());
            }
        }

        for association in self.entity.associations() {
            match association.kind {
                AssociationKind::ToOne => {
                    if let Some(child_id) = entry.get(&association.mapping.target_name) {
                        data.set_to_one(
                            association.name.clone(),
                            Ref::Unresolved(child_id.clone()),
                        );
                    }
                }
                AssociationKind::OneToMany => {
                    let keys = self.store.association_keys(&self.entity, id, association)?;
                    data.set_many(
                        association.name.clone(),
                        keys.into_iter().map(Ref::Unresolved).collect(),
                    );
                }
            }
        }

        Ok(data.into_handle())
    }

    // --- flush execution ---------------------------------------------------

    /// Execute one drained batch of pending operations for this entity.
    ///
    /// Pre-checks and cancellable pre-events run first; cancelled operations
    /// drop out silently. Inserts go to the store as one batch, updates
    /// individually. Index side effects and post-events run only after every
    /// main write of the batch completed.
    pub fn flush_operations(
        &self,
        events: &EventDispatch,
        operations: Vec<PendingOperation>,
    ) -> Result<usize> {
        let mut live: Vec<PendingOperation> = Vec::new();
        for mut operation in operations {
            for pre in &operation.pre {
                match pre {
                    PreAction::CheckVersion { expected } => {
                        self.check_version(&operation.native_key, *expected)?;
                    }
                }
            }
            let decision = match operation.kind {
                OperationKind::Insert => events.before_insert(&self.entity, &operation.access),
                OperationKind::Update => events.before_update(&self.entity, &operation.access),
            };
            if decision.is_cancelled() {
                debug!(
                    "listener cancelled {:?} of {}[{}]",
                    operation.kind,
                    self.entity.name(),
                    operation.native_key
                );
                continue;
            }
            if operation.kind == OperationKind::Update && self.entity.is_versioned() {
                let next = operation
                    .entry
                    .get(VERSION_KEY)
                    .and_then(Value::as_i64)
                    .unwrap_or(0)
                    + 1;
                operation.entry.set(VERSION_KEY, Value::Integer(next));
                operation.access.set_version(next);
            }
            live.push(operation);
        }

        let inserts: Vec<(Value, NativeEntry)> = live
            .iter()
            .filter(|op| op.kind == OperationKind::Insert)
            .map(|op| (op.native_key.clone(), op.entry.clone()))
            .collect();
        if !inserts.is_empty() {
            debug!(
                "flushing {} insert(s) into family '{}'",
                inserts.len(),
                self.store.family()
            );
            self.store.insert_batch(&self.entity, &inserts)?;
        }
        for operation in live.iter().filter(|op| op.kind == OperationKind::Update) {
            self.store
                .update_entry(&self.entity, &operation.native_key, &operation.entry)?;
        }

        for operation in &live {
            for action in &operation.cascades {
                self.store
                    .apply_index(&self.entity, &operation.native_key, action)?;
            }
            match operation.kind {
                OperationKind::Insert => events.after_insert(&self.entity, &operation.access),
                OperationKind::Update => events.after_update(&self.entity, &operation.access),
            }
        }
        Ok(live.len())
    }

    /// Execute one drained batch of pending deletes for this entity.
    pub fn flush_deletes(
        &self,
        events: &EventDispatch,
        deletes: Vec<PendingDelete>,
    ) -> Result<usize> {
        let mut live = Vec::new();
        for delete in deletes {
            if events.before_delete(&self.entity).is_cancelled() {
                debug!(
                    "listener cancelled delete of {}[{}]",
                    self.entity.name(),
                    delete.native_key
                );
                continue;
            }
            live.push(delete);
        }
        let keys: Vec<Value> = live.iter().map(|d| d.native_key.clone()).collect();
        if !keys.is_empty() {
            self.store.delete_entries(&self.entity, &keys)?;
        }
        for delete in &live {
            for action in &delete.cascades {
                self.store
                    .apply_index(&self.entity, &delete.native_key, action)?;
            }
            events.after_delete(&self.entity);
        }
        Ok(live.len())
    }

    fn check_version(&self, key: &Value, expected: i64) -> Result<()> {
        let stored = self
            .store
            .retrieve_entry(&self.entity, key)?
            .and_then(|entry| entry.get(VERSION_KEY).and_then(Value::as_i64))
            .unwrap_or(0);
        if stored != expected {
            return Err(DbError::OptimisticLocking(format!(
                "{}[{}] was updated by another session (expected version {}, found {})",
                self.entity.name(),
                key,
                expected,
                stored
            )));
        }
        Ok(())
    }

    // --- queries -----------------------------------------------------------

    /// Run a query, rebuilding entity instances through the session cache.
    pub fn execute_query(&self, uow: &mut UnitOfWork, query: &Query) -> Result<QueryResult<EntityHandle>> {
        query.validate()?;
        match self.store.execute_query(query)? {
            NativeResults::Values(values) => Ok(QueryResult::Values(values)),
            NativeResults::Entries(rows) => {
                let mut handles = Vec::with_capacity(rows.len());
                for (id, entry) in rows {
                    let handle = match uow.cached_instance(self.entity.name(), &id) {
                        Some(handle) => handle,
                        None => {
                            let handle = self.instantiate(&id, &entry)?;
                            uow.cache_instance(self.entity.name(), &id, &handle);
                            handle
                        }
                    };
                    handles.push(handle);
                }
                Ok(QueryResult::Entities(handles))
            }
        }
    }

    // --- locking -----------------------------------------------------------

    /// Acquire an exclusive backend lock on one record.
    pub fn lock(&self, key: &Value, timeout: Duration) -> Result<()> {
        self.store.lock_entry(&self.entity, key, timeout)?;
        self.held_locks.lock()?.insert(key.to_storage_string());
        Ok(())
    }

    pub fn unlock(&self, key: &Value) -> Result<()> {
        let released = self.held_locks.lock()?.remove(&key.to_storage_string());
        if released {
            self.store.unlock_entry(&self.entity, key)?;
        }
        Ok(())
    }

    pub fn is_locked(&self, key: &Value) -> Result<bool> {
        Ok(self.held_locks.lock()?.contains(&key.to_storage_string()))
    }
}

impl std::fmt::Debug for NativeEntryPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeEntryPersister")
            .field("entity", &self.entity.name())
            .field("family", &self.store.family())
            .finish()
    }
}
