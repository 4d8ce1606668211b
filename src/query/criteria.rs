// ============================================================================
// Criteria Model
// ============================================================================
//
// Store-agnostic representation of a query predicate: a recursive tree of
// junctions (AND / OR / NOT) over property criteria. Criteria are immutable
// value objects; backends compile them into their native query form and must
// never mutate them.
//
// Contract carried by every compiler:
//   - an empty Conjunction matches all records
//   - an empty Disjunction matches none
//
// ============================================================================

use crate::core::{DbError, Result, Value};
use crate::engine::NativeEntry;
use crate::model::PersistentEntity;
use crate::query::like::eval_like;

/// A single restriction on one property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyCriterion {
    Equals { property: String, value: Value },
    NotEquals { property: String, value: Value },
    /// SQL-style pattern with `%` wildcards
    Like { property: String, pattern: String },
    In { property: String, values: Vec<Value> },
    /// Inclusive range
    Between { property: String, from: Value, to: Value },
    GreaterThan { property: String, value: Value },
    GreaterThanEquals { property: String, value: Value },
    LessThan { property: String, value: Value },
    LessThanEquals { property: String, value: Value },
    /// Identity shortcut
    IdEquals { value: Value },
}

impl PropertyCriterion {
    /// The property the criterion restricts; the identity property for
    /// `IdEquals`.
    pub fn property_name<'a>(&'a self, entity: &'a PersistentEntity) -> &'a str {
        match self {
            Self::Equals { property, .. }
            | Self::NotEquals { property, .. }
            | Self::Like { property, .. }
            | Self::In { property, .. }
            | Self::Between { property, .. }
            | Self::GreaterThan { property, .. }
            | Self::GreaterThanEquals { property, .. }
            | Self::LessThan { property, .. }
            | Self::LessThanEquals { property, .. } => property,
            Self::IdEquals { .. } => entity.identity_name(),
        }
    }

    /// Reference evaluation against one native entry. Backends with real
    /// query engines never call this; it backs the in-memory region template
    /// and the test oracle for compiler equivalence.
    pub fn matches(&self, entity: &PersistentEntity, entry: &NativeEntry) -> Result<bool> {
        let key = entity.mapped_key(self.property_name(entity)).ok_or_else(|| {
            DbError::PropertyNotFound(
                self.property_name(entity).to_string(),
                entity.name().to_string(),
            )
        })?;
        let actual = entry.get(key).cloned().unwrap_or(Value::Null);
        match self {
            Self::Equals { value, .. } => Ok(actual == *value),
            Self::NotEquals { value, .. } => Ok(actual != *value),
            Self::IdEquals { value } => Ok(actual == *value),
            Self::Like { pattern, .. } => match actual {
                Value::Text(text) => eval_like(&text, pattern, true),
                _ => Ok(false),
            },
            Self::In { values, .. } => Ok(values.contains(&actual)),
            Self::Between { from, to, .. } => {
                if actual.is_null() {
                    return Ok(false);
                }
                Ok(actual.compare(from)?.is_ge() && actual.compare(to)?.is_le())
            }
            Self::GreaterThan { value, .. } => {
                Ok(!actual.is_null() && actual.compare(value)?.is_gt())
            }
            Self::GreaterThanEquals { value, .. } => {
                Ok(!actual.is_null() && actual.compare(value)?.is_ge())
            }
            Self::LessThan { value, .. } => {
                Ok(!actual.is_null() && actual.compare(value)?.is_lt())
            }
            Self::LessThanEquals { value, .. } => {
                Ok(!actual.is_null() && actual.compare(value)?.is_le())
            }
        }
    }
}

/// A node in the criteria tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Property(PropertyCriterion),
    Junction(Junction),
}

impl Criterion {
    pub fn matches(&self, entity: &PersistentEntity, entry: &NativeEntry) -> Result<bool> {
        match self {
            Self::Property(p) => p.matches(entity, entry),
            Self::Junction(j) => j.matches(entity, entry),
        }
    }
}

/// Boolean combinator over criteria.
#[derive(Debug, Clone, PartialEq)]
pub enum Junction {
    /// AND; empty matches all
    Conjunction(Vec<Criterion>),
    /// OR; empty matches none
    Disjunction(Vec<Criterion>),
    /// NOT over a nested junction
    Negation(Box<Junction>),
}

impl Junction {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Conjunction(c) | Self::Disjunction(c) => c.is_empty(),
            Self::Negation(_) => false,
        }
    }

    pub fn children(&self) -> &[Criterion] {
        match self {
            Self::Conjunction(c) | Self::Disjunction(c) => c,
            Self::Negation(_) => &[],
        }
    }

    pub fn matches(&self, entity: &PersistentEntity, entry: &NativeEntry) -> Result<bool> {
        match self {
            Self::Conjunction(children) => {
                for child in children {
                    if !child.matches(entity, entry)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Disjunction(children) => {
                for child in children {
                    if child.matches(entity, entry)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Negation(inner) => Ok(!inner.matches(entity, entry)?),
        }
    }
}

/// Criterion constructors, in the manner of a restrictions factory.
pub mod restrict {
    use super::*;

    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Criterion {
        Criterion::Property(PropertyCriterion::Equals {
            property: property.into(),
            value: value.into(),
        })
    }

    pub fn ne(property: impl Into<String>, value: impl Into<Value>) -> Criterion {
        Criterion::Property(PropertyCriterion::NotEquals {
            property: property.into(),
            value: value.into(),
        })
    }

    pub fn like(property: impl Into<String>, pattern: impl Into<String>) -> Criterion {
        Criterion::Property(PropertyCriterion::Like {
            property: property.into(),
            pattern: pattern.into(),
        })
    }

    pub fn in_list(property: impl Into<String>, values: Vec<Value>) -> Criterion {
        Criterion::Property(PropertyCriterion::In {
            property: property.into(),
            values,
        })
    }

    pub fn between(
        property: impl Into<String>,
        from: impl Into<Value>,
        to: impl Into<Value>,
    ) -> Criterion {
        Criterion::Property(PropertyCriterion::Between {
            property: property.into(),
            from: from.into(),
            to: to.into(),
        })
    }

    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Criterion {
        Criterion::Property(PropertyCriterion::GreaterThan {
            property: property.into(),
            value: value.into(),
        })
    }

    pub fn ge(property: impl Into<String>, value: impl Into<Value>) -> Criterion {
        Criterion::Property(PropertyCriterion::GreaterThanEquals {
            property: property.into(),
            value: value.into(),
        })
    }

    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Criterion {
        Criterion::Property(PropertyCriterion::LessThan {
            property: property.into(),
            value: value.into(),
        })
    }

    pub fn le(property: impl Into<String>, value: impl Into<Value>) -> Criterion {
        Criterion::Property(PropertyCriterion::LessThanEquals {
            property: property.into(),
            value: value.into(),
        })
    }

    pub fn id_eq(value: impl Into<Value>) -> Criterion {
        Criterion::Property(PropertyCriterion::IdEquals {
            value: value.into(),
        })
    }

    pub fn conjunction(criteria: Vec<Criterion>) -> Criterion {
        Criterion::Junction(Junction::Conjunction(criteria))
    }

    pub fn disjunction(criteria: Vec<Criterion>) -> Criterion {
        Criterion::Junction(Junction::Disjunction(criteria))
    }

    pub fn negation(inner: Junction) -> Criterion {
        Criterion::Junction(Junction::Negation(Box::new(inner)))
    }
}
