//! Hash/set key-value backend: queries as set algebra over secondary
//! indexes.

mod indexer;
mod query;
mod store;
mod template;

pub use store::RedisStore;
pub use template::{MemoryRedisTemplate, RedisTemplate, SortParams};

use std::sync::Arc;

use crate::config::DatastoreConfig;
use crate::engine::NativeEntryStore;
use crate::model::PersistentEntity;
use crate::session::Backend;

/// Backend factory wiring every entity store to one shared template.
pub struct RedisBackend {
    template: Arc<dyn RedisTemplate>,
}

impl RedisBackend {
    pub fn new(template: Arc<dyn RedisTemplate>) -> Self {
        Self { template }
    }

    /// Backend over a fresh in-memory template
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRedisTemplate::new()))
    }
}

impl Backend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn create_store(
        &self,
        entity: &Arc<PersistentEntity>,
        config: &DatastoreConfig,
    ) -> Box<dyn NativeEntryStore> {
        Box::new(RedisStore::new(
            Arc::clone(entity),
            Arc::clone(&self.template),
            config,
        ))
    }
}
