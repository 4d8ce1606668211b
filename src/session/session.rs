// ============================================================================
// Session / Unit of Work
// ============================================================================
//
// One session is one unit of work: persist and delete calls queue pending
// operations instead of writing, flush executes the queues in deterministic
// entity-type order, and a first-level cache guarantees one shared instance
// per (entity, identifier).
//
// Sessions are single-threaded by construction; everything shared across
// sessions lives in the Datastore.
//
// ============================================================================

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::core::{DbError, Result, Value};
use crate::engine::{
    handle_key, AssociationValue, EntityHandle, OperationKind, PendingDelete, PendingOperation,
    Ref,
};
use crate::query::{Query, QueryResult};
use crate::session::Datastore;

/// Mutable per-session state: pending queues, the first-level cache and the
/// cascade bookkeeping. Separated from `Session` so persisters can take it
/// alongside a `&Datastore` without borrowing the whole session.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    /// Pending inserts and updates, grouped by entity type. BTreeMap gives
    /// flush a deterministic cross-type order.
    pending: BTreeMap<String, Vec<PendingOperation>>,
    deletes: BTreeMap<String, Vec<PendingDelete>>,
    /// One shared instance per (entity, identifier)
    cache: HashMap<(String, String), EntityHandle>,
    /// Instances whose persist call is currently on the stack
    in_flight: HashMap<usize, Value>,
    /// (entity, association, child) triples already cascaded this flush cycle
    visited: HashSet<(String, String, usize)>,
    error_occurred: bool,
}

impl UnitOfWork {
    fn cache_key(entity_name: &str, id: &Value) -> (String, String) {
        (entity_name.to_string(), id.to_storage_string())
    }

    pub fn cached_instance(&self, entity_name: &str, id: &Value) -> Option<EntityHandle> {
        self.cache
            .get(&Self::cache_key(entity_name, id))
            .map(Rc::clone)
    }

    pub fn cache_instance(&mut self, entity_name: &str, id: &Value, handle: &EntityHandle) {
        self.cache
            .insert(Self::cache_key(entity_name, id), Rc::clone(handle));
    }

    pub fn evict(&mut self, entity_name: &str, id: &Value) {
        self.cache.remove(&Self::cache_key(entity_name, id));
    }

    pub fn begin_persist(&mut self, handle: &EntityHandle, id: Value) {
        self.in_flight.insert(handle_key(handle), id);
    }

    pub fn end_persist(&mut self, handle: &EntityHandle) {
        self.in_flight.remove(&handle_key(handle));
    }

    pub fn in_flight_identifier(&self, handle: &EntityHandle) -> Option<Value> {
        self.in_flight.get(&handle_key(handle)).cloned()
    }

    /// Mark a child as cascaded through one association; returns false when
    /// it was already processed, so cascade cycles terminate.
    pub fn mark_association_visited(
        &mut self,
        entity_name: &str,
        association: &str,
        child: &EntityHandle,
    ) -> bool {
        self.visited.insert((
            entity_name.to_string(),
            association.to_string(),
            handle_key(child),
        ))
    }

    /// Queue a pending insert or update. At most one operation exists per
    /// (entity, identifier): a repeated persist refreshes the queued entry in
    /// place and keeps the original operation kind, so an unflushed insert
    /// never silently becomes an update.
    pub fn queue_operation(&mut self, operation: PendingOperation) {
        let queue = self
            .pending
            .entry(operation.entity.name().to_string())
            .or_default();
        if let Some(existing) = queue
            .iter_mut()
            .find(|op| op.native_key == operation.native_key)
        {
            let kind = existing.kind;
            *existing = operation;
            existing.kind = kind;
            if kind == OperationKind::Insert {
                // No stored row exists yet, so there is nothing to
                // version-check against.
                existing.pre.clear();
            }
            return;
        }
        queue.push(operation);
    }

    /// Queue a pending delete, discarding any unflushed write for the same
    /// record.
    pub fn queue_delete(&mut self, delete: PendingDelete) {
        if let Some(queue) = self.pending.get_mut(delete.entity.name()) {
            queue.retain(|op| op.native_key != delete.native_key);
        }
        self.deletes
            .entry(delete.entity.name().to_string())
            .or_default()
            .push(delete);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum::<usize>()
            + self.deletes.values().map(Vec::len).sum::<usize>()
    }

    fn drain_operations(&mut self) -> BTreeMap<String, Vec<PendingOperation>> {
        std::mem::take(&mut self.pending)
    }

    fn drain_deletes(&mut self) -> BTreeMap<String, Vec<PendingDelete>> {
        std::mem::take(&mut self.deletes)
    }

    fn after_flush(&mut self) {
        self.visited.clear();
        self.in_flight.clear();
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A unit of work against one datastore.
pub struct Session {
    datastore: Arc<Datastore>,
    uow: UnitOfWork,
    open: bool,
}

impl Session {
    pub(crate) fn new(datastore: Arc<Datastore>) -> Self {
        Self {
            datastore,
            uow: UnitOfWork::default(),
            open: true,
        }
    }

    pub fn datastore(&self) -> &Arc<Datastore> {
        &self.datastore
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether a flush failure has poisoned this session
    pub fn has_error(&self) -> bool {
        self.uow.error_occurred
    }

    pub fn pending_count(&self) -> usize {
        self.uow.pending_count()
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.open {
            return Err(DbError::InvalidResourceUsage(
                "Session has been disconnected".to_string(),
            ));
        }
        Ok(())
    }

    // --- write path --------------------------------------------------------

    /// Queue a persist for the instance and return its identifier. The
    /// identifier is assigned eagerly; the native write happens at flush.
    pub fn persist(&mut self, handle: &EntityHandle) -> Result<Value> {
        self.ensure_open()?;
        let entity_name = handle.borrow().entity_name().to_string();
        let persister = self.datastore.persister(&entity_name)?;
        let datastore = Arc::clone(&self.datastore);
        persister.persist(&datastore, &mut self.uow, handle)
    }

    /// Persist a batch of instances, returning their identifiers in order.
    pub fn persist_all(&mut self, handles: &[EntityHandle]) -> Result<Vec<Value>> {
        handles.iter().map(|handle| self.persist(handle)).collect()
    }

    /// Queue a delete for the instance, cascading to owned associations.
    pub fn delete(&mut self, handle: &EntityHandle) -> Result<()> {
        self.ensure_open()?;
        let entity_name = handle.borrow().entity_name().to_string();
        let persister = self.datastore.persister(&entity_name)?;
        let datastore = Arc::clone(&self.datastore);
        persister.delete(&datastore, &mut self.uow, handle)
    }

    /// Execute all pending operations against the store.
    ///
    /// Operations are grouped by entity type and flushed in deterministic
    /// name order; deletes run after all writes. A store error marks the
    /// session as poisoned: the error propagates once, and every later flush
    /// is a warned no-op until `clear` resets the session.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.uow.error_occurred {
            warn!("session is in an error state; flush skipped");
            return Ok(());
        }
        let outcome = self.flush_pending();
        if let Err(error) = &outcome {
            warn!("flush failed, session poisoned: {}", error);
            self.uow.error_occurred = true;
        }
        outcome
    }

    fn flush_pending(&mut self) -> Result<()> {
        let events = self.datastore.events();
        let mut written = 0;
        for (entity_name, operations) in self.uow.drain_operations() {
            let persister = self.datastore.persister(&entity_name)?;
            written += persister.flush_operations(events, operations)?;
        }
        for (entity_name, deletes) in self.uow.drain_deletes() {
            let persister = self.datastore.persister(&entity_name)?;
            written += persister.flush_deletes(events, deletes)?;
        }
        self.uow.after_flush();
        debug!("flush executed {} native operation(s)", written);
        Ok(())
    }

    /// Drop all pending operations, cached instances and the error flag.
    pub fn clear(&mut self) {
        self.uow.clear();
    }

    /// Close the unit of work. Pending operations are discarded, not
    /// flushed.
    pub fn disconnect(&mut self) {
        if self.uow.pending_count() > 0 {
            warn!(
                "session disconnected with {} unflushed operation(s)",
                self.uow.pending_count()
            );
        }
        self.uow.clear();
        self.open = false;
    }

    // --- read path ---------------------------------------------------------

    /// Load one instance by identifier, hitting the first-level cache first.
    pub fn retrieve(&mut self, entity_name: &str, id: impl Into<Value>) -> Result<Option<EntityHandle>> {
        self.ensure_open()?;
        let persister = self.datastore.persister(entity_name)?;
        persister.retrieve(&mut self.uow, &id.into())
    }

    /// Whether the session currently holds an instance for this identifier
    pub fn contains(&self, entity_name: &str, id: &Value) -> bool {
        self.uow.cached_instance(entity_name, id).is_some()
    }

    /// Resolve one association of an instance, replacing unresolved
    /// references with loaded instances in place. Returns the resolved
    /// handles; for a to-one association the vector has at most one element.
    pub fn resolve(&mut self, handle: &EntityHandle, association: &str) -> Result<Vec<EntityHandle>> {
        self.ensure_open()?;
        let entity_name = handle.borrow().entity_name().to_string();
        let entity = self.datastore.mapping_context().entity(&entity_name)?;
        let assoc = entity.association_by_name(association).ok_or_else(|| {
            DbError::PropertyNotFound(association.to_string(), entity_name.clone())
        })?;
        let persister = self.datastore.persister(&assoc.target_entity)?;

        let value = handle.borrow().association(association).cloned();
        match value {
            None => Ok(Vec::new()),
            Some(AssociationValue::One(reference)) => {
                let resolved = self.resolve_reference(&persister, reference)?;
                if let Some(child) = &resolved {
                    handle
                        .borrow_mut()
                        .set_to_one(association, Ref::Resolved(Rc::clone(child)));
                }
                Ok(resolved.into_iter().collect())
            }
            Some(AssociationValue::Many(references)) => {
                let mut resolved_refs = Vec::with_capacity(references.len());
                let mut handles = Vec::with_capacity(references.len());
                for reference in references {
                    match self.resolve_reference(&persister, reference)? {
                        Some(child) => {
                            handles.push(Rc::clone(&child));
                            resolved_refs.push(Ref::Resolved(child));
                        }
                        // Dangling key in the association index
                        None => {}
                    }
                }
                handle.borrow_mut().set_many(association, resolved_refs);
                Ok(handles)
            }
        }
    }

    fn resolve_reference(
        &mut self,
        persister: &Arc<crate::engine::NativeEntryPersister>,
        reference: Ref,
    ) -> Result<Option<EntityHandle>> {
        match reference {
            Ref::Resolved(child) => Ok(Some(child)),
            Ref::Unresolved(id) => persister.retrieve(&mut self.uow, &id),
        }
    }

    // --- queries -----------------------------------------------------------

    /// Start building a query against one entity.
    pub fn query(&self, entity_name: &str) -> Result<Query> {
        self.ensure_open()?;
        let entity = self.datastore.mapping_context().entity(entity_name)?;
        Ok(Query::new(entity))
    }

    /// Compile and execute a query through the entity's backend store.
    pub fn execute(&mut self, query: &Query) -> Result<QueryResult<EntityHandle>> {
        self.ensure_open()?;
        let persister = self.datastore.persister(query.entity().name())?;
        persister.execute_query(&mut self.uow, query)
    }

    /// Execute a query expected to match at most one record.
    pub fn single_result(&mut self, query: &Query) -> Result<Option<EntityHandle>> {
        Ok(self.execute(query)?.entities().into_iter().next())
    }

    // --- locking -----------------------------------------------------------

    /// Acquire an exclusive lock on one record, blocking up to the timeout
    /// (the configured default when none is given).
    pub fn lock(
        &mut self,
        entity_name: &str,
        id: &Value,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.ensure_open()?;
        let persister = self.datastore.persister(entity_name)?;
        let timeout = timeout.unwrap_or(self.datastore.config().lock_timeout);
        persister.lock(id, timeout)
    }

    pub fn unlock(&mut self, entity_name: &str, id: &Value) -> Result<()> {
        self.ensure_open()?;
        let persister = self.datastore.persister(entity_name)?;
        persister.unlock(id)
    }

    pub fn is_locked(&self, entity_name: &str, id: &Value) -> Result<bool> {
        let persister = self.datastore.persister(entity_name)?;
        persister.is_locked(id)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.open {
            self.disconnect();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.open)
            .field("pending", &self.uow.pending_count())
            .field("error", &self.uow.error_occurred)
            .finish()
    }
}
