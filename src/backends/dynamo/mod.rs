//! Attribute-map item backend: AND-only scan filters with disjunction
//! flattening.

mod query;
mod store;
mod template;

pub use store::DynamoStore;
pub use template::{
    ComparisonOperator, Condition, DynamoAttribute, DynamoItem, DynamoTemplate,
    MemoryDynamoTemplate,
};

use std::sync::Arc;

use crate::config::DatastoreConfig;
use crate::engine::NativeEntryStore;
use crate::model::PersistentEntity;
use crate::session::Backend;

/// Backend factory wiring every entity store to one shared template.
pub struct DynamoBackend {
    template: Arc<dyn DynamoTemplate>,
}

impl DynamoBackend {
    pub fn new(template: Arc<dyn DynamoTemplate>) -> Self {
        Self { template }
    }

    /// Backend over a fresh in-memory template
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryDynamoTemplate::new()))
    }
}

impl Backend for DynamoBackend {
    fn name(&self) -> &'static str {
        "dynamo"
    }

    fn create_store(
        &self,
        entity: &Arc<PersistentEntity>,
        config: &DatastoreConfig,
    ) -> Box<dyn NativeEntryStore> {
        Box::new(DynamoStore::new(
            Arc::clone(entity),
            Arc::clone(&self.template),
            config,
        ))
    }
}
