use std::sync::Arc;

use crate::core::Value;
use crate::engine::access::EntityAccess;
use crate::engine::entry::NativeEntry;
use crate::model::PersistentEntity;

/// Kind of write a pending operation performs at flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    Update,
}

/// Check run against the store before the main write of one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PreAction {
    /// Optimistic lock check: the stored version must still equal the
    /// version the instance was loaded with.
    CheckVersion { expected: i64 },
}

/// Side effect executed after the main writes of a flush batch complete.
/// These are explicit data, not callbacks, so the flush loop can order and
/// log them deterministically.
#[derive(Debug, Clone, PartialEq)]
pub enum CascadeAction {
    /// Add the record to the secondary index of one property value
    IndexProperty { property: String, value: Value },
    /// Remove the record from the secondary index of a previous value
    UnindexProperty { property: String, value: Value },
    /// Replace the owner's association index with the given child keys
    IndexAssociation {
        association: String,
        child_keys: Vec<Value>,
    },
}

/// One deferred write, queued by `persist` and executed by `flush`.
///
/// At most one pending operation exists per (entity, identifier) within a
/// session; repeated persists of the same instance refresh the entry of the
/// already-queued operation instead of queuing another write.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub kind: OperationKind,
    pub entity: Arc<PersistentEntity>,
    pub native_key: Value,
    pub entry: NativeEntry,
    pub access: EntityAccess,
    pub pre: Vec<PreAction>,
    pub cascades: Vec<CascadeAction>,
}

/// One deferred delete.
#[derive(Debug, Clone)]
pub struct PendingDelete {
    pub entity: Arc<PersistentEntity>,
    pub native_key: Value,
    /// Index cleanup derived from the stored entry at queue time
    pub cascades: Vec<CascadeAction>,
}
