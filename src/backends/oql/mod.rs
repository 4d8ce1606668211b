//! Region-style object store backend: criteria compile to an object query
//! language string with positional bind parameters.

mod query;
mod store;
mod template;

pub use query::build as build_oql;
pub use store::OqlStore;
pub use template::{CompiledQuery, MemoryOqlTemplate, OqlTemplate};

use std::sync::Arc;

use crate::config::DatastoreConfig;
use crate::engine::NativeEntryStore;
use crate::model::PersistentEntity;
use crate::session::Backend;

/// Backend factory wiring every entity store to one shared template.
pub struct OqlBackend {
    template: Arc<dyn OqlTemplate>,
}

impl OqlBackend {
    pub fn new(template: Arc<dyn OqlTemplate>) -> Self {
        Self { template }
    }

    /// Backend over a fresh in-memory region set
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryOqlTemplate::new()))
    }
}

impl Backend for OqlBackend {
    fn name(&self) -> &'static str {
        "oql"
    }

    fn create_store(
        &self,
        entity: &Arc<PersistentEntity>,
        config: &DatastoreConfig,
    ) -> Box<dyn NativeEntryStore> {
        Box::new(OqlStore::new(
            Arc::clone(entity),
            Arc::clone(&self.template),
            config,
        ))
    }
}
