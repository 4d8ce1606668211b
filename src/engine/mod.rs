mod access;
mod entry;
mod event;
mod pending;
mod persister;

pub use access::{
    handle_key, AssociationValue, EntityAccess, EntityData, EntityHandle, Ref,
};
pub use entry::NativeEntry;
pub use event::{EventDecision, EventDispatch, PersistenceListener};
pub use pending::{CascadeAction, OperationKind, PendingDelete, PendingOperation, PreAction};
pub use persister::{NativeEntryPersister, NativeEntryStore, NativeResults, VERSION_KEY};
