use crate::engine::access::EntityAccess;
use crate::model::PersistentEntity;

/// Outcome of a pre-persistence listener. Returning `Cancel` from any
/// listener elides the write silently; flush neither errors nor retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDecision {
    Proceed,
    Cancel,
}

impl EventDecision {
    pub fn is_cancelled(self) -> bool {
        self == Self::Cancel
    }
}

/// Lifecycle hooks around native writes. All methods default to no-ops so
/// listeners implement only what they observe.
///
/// Pre-hooks run at flush time, immediately before the corresponding write;
/// post-hooks run after all main writes of the batch completed.
pub trait PersistenceListener {
    fn before_insert(&self, _entity: &PersistentEntity, _access: &EntityAccess) -> EventDecision {
        EventDecision::Proceed
    }

    fn before_update(&self, _entity: &PersistentEntity, _access: &EntityAccess) -> EventDecision {
        EventDecision::Proceed
    }

    fn before_delete(&self, _entity: &PersistentEntity) -> EventDecision {
        EventDecision::Proceed
    }

    fn after_insert(&self, _entity: &PersistentEntity, _access: &EntityAccess) {}

    fn after_update(&self, _entity: &PersistentEntity, _access: &EntityAccess) {}

    fn after_delete(&self, _entity: &PersistentEntity) {}
}

/// Listener registry owned by the datastore and shared by its sessions.
#[derive(Default)]
pub struct EventDispatch {
    listeners: Vec<Box<dyn PersistenceListener>>,
}

impl EventDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Box<dyn PersistenceListener>) {
        self.listeners.push(listener);
    }

    pub fn before_insert(&self, entity: &PersistentEntity, access: &EntityAccess) -> EventDecision {
        for listener in &self.listeners {
            if listener.before_insert(entity, access).is_cancelled() {
                return EventDecision::Cancel;
            }
        }
        EventDecision::Proceed
    }

    pub fn before_update(&self, entity: &PersistentEntity, access: &EntityAccess) -> EventDecision {
        for listener in &self.listeners {
            if listener.before_update(entity, access).is_cancelled() {
                return EventDecision::Cancel;
            }
        }
        EventDecision::Proceed
    }

    pub fn before_delete(&self, entity: &PersistentEntity) -> EventDecision {
        for listener in &self.listeners {
            if listener.before_delete(entity).is_cancelled() {
                return EventDecision::Cancel;
            }
        }
        EventDecision::Proceed
    }

    pub fn after_insert(&self, entity: &PersistentEntity, access: &EntityAccess) {
        for listener in &self.listeners {
            listener.after_insert(entity, access);
        }
    }

    pub fn after_update(&self, entity: &PersistentEntity, access: &EntityAccess) {
        for listener in &self.listeners {
            listener.after_update(entity, access);
        }
    }

    pub fn after_delete(&self, entity: &PersistentEntity) {
        for listener in &self.listeners {
            listener.after_delete(entity);
        }
    }
}

impl std::fmt::Debug for EventDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatch")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
