// ============================================================================
// Polystore Library
// ============================================================================

pub mod backends;
pub mod config;
pub mod core;
pub mod engine;
pub mod model;
pub mod query;
pub mod session;

// Re-export main types for convenience
pub use config::DatastoreConfig;
pub use core::{DataType, DbError, Result, Value};
pub use model::{
    Association, AssociationKind, CascadeType, IdGenerator, MappingContext, PersistentEntity,
    PersistentProperty,
};
pub use query::{restrict, Order, Projection, Query, QueryResult};
pub use session::{Backend, Datastore, Session};

// Re-export the runtime entity surface
pub use engine::{
    EntityAccess, EntityData, EntityHandle, EventDecision, PersistenceListener,
};

// ============================================================================
// High-level usage
// ============================================================================
//
// Map entities once into a `MappingContext`, pick a backend, and work through
// sessions:
//
// ```
// use polystore::backends::redis::RedisBackend;
// use polystore::{
//     restrict, DataType, Datastore, DatastoreConfig, EntityData, MappingContext,
//     PersistentEntity, PersistentProperty, Value,
// };
// use std::sync::Arc;
//
// # fn main() -> polystore::Result<()> {
// let mut context = MappingContext::new();
// context.register(
//     PersistentEntity::build("Person")
//         .property(PersistentProperty::new("name", DataType::Text).indexed())
//         .property(PersistentProperty::new("age", DataType::Integer).indexed()),
// );
//
// let datastore = Arc::new(Datastore::new(
//     context,
//     Box::new(RedisBackend::in_memory()),
//     DatastoreConfig::default(),
// )?);
//
// let mut session = datastore.connect();
// let person = EntityData::new("Person")
//     .with("name", "Alice")
//     .with("age", 30i64)
//     .into_handle();
// let id = session.persist(&person)?;
// session.flush()?;
//
// let query = session.query("Person")?.gt("age", 25i64);
// let found = session.execute(&query)?;
// assert_eq!(found.len(), 1);
// let _ = id;
// # Ok(())
// # }
// ```
