use std::sync::Arc;

use crate::core::{DbError, Result, Value};
use crate::model::PersistentEntity;
use crate::query::criteria::{restrict, Criterion, Junction, PropertyCriterion};
use crate::query::projection::{Order, Projection};

/// A backend-agnostic query under construction.
///
/// The criteria list forms an implicit root conjunction. The query itself is
/// pure data; `Session::execute` hands it to the entity's store for
/// compilation into the native query form.
#[derive(Debug, Clone)]
pub struct Query {
    entity: Arc<PersistentEntity>,
    criteria: Vec<Criterion>,
    projections: Vec<Projection>,
    order: Vec<Order>,
    offset: usize,
    max: Option<usize>,
}

/// What a query execution produced: entity instances, or scalar values when
/// projections were requested.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult<T> {
    Entities(Vec<T>),
    Values(Vec<Value>),
}

impl<T> QueryResult<T> {
    pub fn len(&self) -> usize {
        match self {
            Self::Entities(e) => e.len(),
            Self::Values(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unwrap entity results; empty when the query projected values.
    pub fn entities(self) -> Vec<T> {
        match self {
            Self::Entities(e) => e,
            Self::Values(_) => Vec::new(),
        }
    }

    /// Unwrap projected values; empty when the query returned entities.
    pub fn values(self) -> Vec<Value> {
        match self {
            Self::Entities(_) => Vec::new(),
            Self::Values(v) => v,
        }
    }
}

impl Query {
    pub fn new(entity: Arc<PersistentEntity>) -> Self {
        Self {
            entity,
            criteria: Vec::new(),
            projections: Vec::new(),
            order: Vec::new(),
            offset: 0,
            max: None,
        }
    }

    pub fn entity(&self) -> &Arc<PersistentEntity> {
        &self.entity
    }

    /// The criteria as a root conjunction
    pub fn root(&self) -> Junction {
        Junction::Conjunction(self.criteria.clone())
    }

    pub fn has_criteria(&self) -> bool {
        !self.criteria.is_empty()
    }

    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    pub fn order(&self) -> &[Order] {
        &self.order
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn max(&self) -> Option<usize> {
        self.max
    }

    // --- builder -----------------------------------------------------------

    pub fn criterion(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn eq(self, property: &str, value: impl Into<Value>) -> Self {
        self.criterion(restrict::eq(property, value))
    }

    pub fn ne(self, property: &str, value: impl Into<Value>) -> Self {
        self.criterion(restrict::ne(property, value))
    }

    pub fn like(self, property: &str, pattern: &str) -> Self {
        self.criterion(restrict::like(property, pattern))
    }

    pub fn in_list(self, property: &str, values: Vec<Value>) -> Self {
        self.criterion(restrict::in_list(property, values))
    }

    pub fn between(self, property: &str, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        self.criterion(restrict::between(property, from, to))
    }

    pub fn gt(self, property: &str, value: impl Into<Value>) -> Self {
        self.criterion(restrict::gt(property, value))
    }

    pub fn ge(self, property: &str, value: impl Into<Value>) -> Self {
        self.criterion(restrict::ge(property, value))
    }

    pub fn lt(self, property: &str, value: impl Into<Value>) -> Self {
        self.criterion(restrict::lt(property, value))
    }

    pub fn le(self, property: &str, value: impl Into<Value>) -> Self {
        self.criterion(restrict::le(property, value))
    }

    pub fn id_eq(self, value: impl Into<Value>) -> Self {
        self.criterion(restrict::id_eq(value))
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projections.push(projection);
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn skip(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn max_results(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    // --- validation --------------------------------------------------------

    /// Check every referenced property against the entity mapping before the
    /// query reaches a backend compiler.
    pub fn validate(&self) -> Result<()> {
        let root = self.root();
        self.validate_junction(&root)?;
        for projection in &self.projections {
            if let Some(property) = projection.property_name() {
                self.require_property(property)?;
            }
        }
        for clause in &self.order {
            self.require_property(&clause.property)?;
        }
        Ok(())
    }

    fn validate_junction(&self, junction: &Junction) -> Result<()> {
        if let Junction::Negation(inner) = junction {
            return self.validate_junction(inner);
        }
        for child in junction.children() {
            match child {
                Criterion::Property(p) => {
                    self.require_property(p.property_name(&self.entity))?;
                }
                Criterion::Junction(j) => self.validate_junction(j)?,
            }
        }
        Ok(())
    }

    fn require_property(&self, property: &str) -> Result<()> {
        if self.entity.mapped_key(property).is_none() {
            return Err(DbError::PropertyNotFound(
                property.to_string(),
                self.entity.name().to_string(),
            ));
        }
        Ok(())
    }
}

/// Criteria helper shared by compilers: turn an `IdEquals` shortcut into an
/// equality on the identity property.
pub fn resolve_id_shortcut(entity: &PersistentEntity, criterion: &PropertyCriterion) -> PropertyCriterion {
    match criterion {
        PropertyCriterion::IdEquals { value } => PropertyCriterion::Equals {
            property: entity.identity_name().to_string(),
            value: value.clone(),
        },
        other => other.clone(),
    }
}
