// ============================================================================
// Persistent Entity Metadata
// ============================================================================
//
// Immutable description of a domain type: identity, simple properties,
// associations and their per-backend mapping details. Built once at startup
// through the MappingContext and shared behind Arc; never mutated by query or
// persist operations.
//
// ============================================================================

use crate::core::DataType;

/// Identifier generation strategy declared on an entity's identity mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenerator {
    /// Random UUID assigned by the mapping layer before the native write
    Uuid,
    /// Backend-native monotonic sequence (HiLo style counter seeded from the
    /// store)
    Sequence,
    /// Application-assigned; the identifier must be present before persist
    Assigned,
}

/// Per-property backend mapping: the native key the value is stored under and
/// whether a secondary index is maintained for it.
#[derive(Debug, Clone)]
pub struct PropertyMapping {
    pub target_name: String,
    pub indexed: bool,
}

#[derive(Debug, Clone)]
pub struct PersistentProperty {
    pub name: String,
    pub data_type: DataType,
    pub mapping: PropertyMapping,
}

impl PersistentProperty {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            mapping: PropertyMapping {
                target_name: name.clone(),
                indexed: false,
            },
            name,
            data_type,
        }
    }

    /// Maintain a secondary index for this property
    pub fn indexed(mut self) -> Self {
        self.mapping.indexed = true;
        self
    }

    /// Store the value under a different native key
    pub fn target_name(mut self, key: impl Into<String>) -> Self {
        self.mapping.target_name = key.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    ToOne,
    OneToMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeType {
    Persist,
    Remove,
}

#[derive(Debug, Clone)]
pub struct Association {
    pub name: String,
    pub target_entity: String,
    pub kind: AssociationKind,
    pub cascade_persist: bool,
    pub cascade_remove: bool,
    pub owning_side: bool,
    /// Name of the inverse property on the target entity, when bidirectional
    pub inverse_property: Option<String>,
    pub mapping: PropertyMapping,
}

impl Association {
    pub fn new(
        name: impl Into<String>,
        target_entity: impl Into<String>,
        kind: AssociationKind,
    ) -> Self {
        let name = name.into();
        Self {
            mapping: PropertyMapping {
                target_name: name.clone(),
                indexed: false,
            },
            name,
            target_entity: target_entity.into(),
            kind,
            cascade_persist: false,
            cascade_remove: false,
            owning_side: true,
            inverse_property: None,
        }
    }

    pub fn cascade(mut self, cascade: CascadeType) -> Self {
        match cascade {
            CascadeType::Persist => self.cascade_persist = true,
            CascadeType::Remove => self.cascade_remove = true,
        }
        self
    }

    pub fn bidirectional(mut self, inverse_property: impl Into<String>) -> Self {
        self.inverse_property = Some(inverse_property.into());
        self
    }

    pub fn owned_by_other_side(mut self) -> Self {
        self.owning_side = false;
        self
    }

    pub fn does_cascade(&self, cascade: CascadeType) -> bool {
        match cascade {
            CascadeType::Persist => self.cascade_persist,
            CascadeType::Remove => self.cascade_remove,
        }
    }

    pub fn is_bidirectional(&self) -> bool {
        self.inverse_property.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct PersistentEntity {
    name: String,
    family: String,
    identity_name: String,
    id_generator: IdGenerator,
    versioned: bool,
    properties: Vec<PersistentProperty>,
    associations: Vec<Association>,
    root: bool,
}

impl PersistentEntity {
    pub fn build(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            family: name.to_lowercase(),
            name,
            identity_name: "id".to_string(),
            id_generator: IdGenerator::Uuid,
            versioned: false,
            properties: Vec::new(),
            associations: Vec::new(),
            root: true,
        }
    }

    /// Native table / region / key-prefix the entity maps to
    pub fn family_name(mut self, family: impl Into<String>) -> Self {
        self.family = family.into();
        self
    }

    pub fn id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = generator;
        self
    }

    /// Declare a `version` property used for optimistic lock checking
    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    pub fn property(mut self, property: PersistentProperty) -> Self {
        self.properties.push(property);
        self
    }

    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    pub fn child_of_root(mut self) -> Self {
        self.root = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn identity_name(&self) -> &str {
        &self.identity_name
    }

    pub fn is_identity_name(&self, name: &str) -> bool {
        self.identity_name == name
    }

    pub fn generator(&self) -> IdGenerator {
        self.id_generator
    }

    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn properties(&self) -> &[PersistentProperty] {
        &self.properties
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn property_by_name(&self, name: &str) -> Option<&PersistentProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn association_by_name(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name == name)
    }

    /// The native key a property is stored under. The identity is always
    /// stored under its own name.
    pub fn mapped_key(&self, property_name: &str) -> Option<&str> {
        if self.is_identity_name(property_name) {
            return Some(&self.identity_name);
        }
        self.property_by_name(property_name)
            .map(|p| p.mapping.target_name.as_str())
            .or_else(|| {
                self.association_by_name(property_name)
                    .map(|a| a.mapping.target_name.as_str())
            })
    }

    pub fn is_property_indexed(&self, property_name: &str) -> bool {
        self.property_by_name(property_name)
            .map(|p| p.mapping.indexed)
            .or_else(|| {
                self.association_by_name(property_name)
                    .map(|a| a.mapping.indexed)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_key_falls_back_to_property_name() {
        let entity = PersistentEntity::build("Person")
            .property(PersistentProperty::new("name", DataType::Text))
            .property(PersistentProperty::new("age", DataType::Integer).target_name("years"));

        assert_eq!(entity.mapped_key("name"), Some("name"));
        assert_eq!(entity.mapped_key("age"), Some("years"));
        assert_eq!(entity.mapped_key("id"), Some("id"));
        assert_eq!(entity.mapped_key("missing"), None);
    }

    #[test]
    fn test_association_cascade_flags() {
        let assoc = Association::new("address", "Address", AssociationKind::ToOne)
            .cascade(CascadeType::Persist)
            .bidirectional("resident");

        assert!(assoc.does_cascade(CascadeType::Persist));
        assert!(!assoc.does_cascade(CascadeType::Remove));
        assert!(assoc.is_bidirectional());
    }
}
