mod context;
mod entity;

pub use context::MappingContext;
pub use entity::{
    Association, AssociationKind, CascadeType, IdGenerator, PersistentEntity,
    PersistentProperty, PropertyMapping,
};
