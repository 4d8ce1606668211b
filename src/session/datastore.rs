use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;

use crate::config::DatastoreConfig;
use crate::core::Result;
use crate::engine::{EventDispatch, NativeEntryPersister, NativeEntryStore, PersistenceListener};
use crate::model::{MappingContext, PersistentEntity};
use crate::session::Session;

/// Factory for per-entity stores; one implementation per supported backend.
pub trait Backend {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    fn create_store(
        &self,
        entity: &Arc<PersistentEntity>,
        config: &DatastoreConfig,
    ) -> Box<dyn NativeEntryStore>;
}

/// One configured connection to a backend: the mapping context, the backend
/// factory and the shared persister registry. All state is owned here; two
/// datastores never share anything.
pub struct Datastore {
    context: MappingContext,
    backend: Box<dyn Backend>,
    config: DatastoreConfig,
    events: EventDispatch,
    persisters: Mutex<HashMap<String, Arc<NativeEntryPersister>>>,
}

impl Datastore {
    /// Validate the mapping and wire the datastore up. Fails fast on
    /// dangling associations rather than at first persist.
    pub fn new(
        context: MappingContext,
        backend: Box<dyn Backend>,
        config: DatastoreConfig,
    ) -> Result<Self> {
        context.validate()?;
        info!(
            "datastore initialized for backend '{}' at {}:{}",
            backend.name(),
            config.host,
            config.port
        );
        Ok(Self {
            context,
            backend,
            config,
            events: EventDispatch::new(),
            persisters: Mutex::new(HashMap::new()),
        })
    }

    /// Register a persistence listener. Listeners are fixed before the first
    /// session connects.
    pub fn listener(mut self, listener: Box<dyn PersistenceListener>) -> Self {
        self.events.register(listener);
        self
    }

    /// Open a new unit of work against this datastore.
    pub fn connect(self: &Arc<Self>) -> Session {
        Session::new(Arc::clone(self))
    }

    pub fn mapping_context(&self) -> &MappingContext {
        &self.context
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    pub fn events(&self) -> &EventDispatch {
        &self.events
    }

    /// Persister for one entity, created lazily and shared by every session
    /// of this datastore.
    pub fn persister(&self, entity_name: &str) -> Result<Arc<NativeEntryPersister>> {
        {
            let persisters = self.persisters.lock()?;
            if let Some(persister) = persisters.get(entity_name) {
                return Ok(Arc::clone(persister));
            }
        }
        let entity = self.context.entity(entity_name)?;
        let store = self.backend.create_store(&entity, &self.config);
        let persister = Arc::new(NativeEntryPersister::new(entity, store));
        let mut persisters = self.persisters.lock()?;
        Ok(Arc::clone(
            persisters
                .entry(entity_name.to_string())
                .or_insert(persister),
        ))
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("backend", &self.backend.name())
            .field("database", &self.config.database)
            .finish()
    }
}
