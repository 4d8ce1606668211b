// ============================================================================
// Redis Query Compilation
// ============================================================================
//
// Criteria compile to set algebra over the secondary indexes: equality is an
// index-set lookup, AND is SINTERSTORE, OR is SUNIONSTORE, NOT is SDIFFSTORE
// against the all-entity index. Range criteria materialize a slice of the
// property's sorted set into a short-lived derived set. The final set holds
// matching identifiers; ordering and pagination ride the server-side SORT
// command where a single order clause allows it.
//
// Derived sets and min/max aggregates are cached under deterministic keys
// with a short expiry, so repeated identical queries within the window reuse
// the server-side work.
//
// ============================================================================

use std::time::Duration;

use log::debug;

use crate::core::{DataType, DbError, Result, Value};
use crate::engine::{NativeEntry, NativeResults, VERSION_KEY};
use crate::model::{AssociationKind, PersistentEntity};
use crate::query::{
    apply_order, apply_pagination, Criterion, Junction, Projection, PropertyCriterion, Query,
};

use super::indexer::KeySpace;
use super::template::{RedisTemplate, SortParams};

pub(super) struct RedisQuery<'a> {
    pub template: &'a dyn RedisTemplate,
    pub entity: &'a PersistentEntity,
    pub keys: &'a KeySpace,
    pub cache_expiry: Duration,
}

impl RedisQuery<'_> {
    pub fn execute(&self, query: &Query) -> Result<NativeResults> {
        for projection in query.projections() {
            if matches!(projection, Projection::Sum(_) | Projection::Avg(_)) {
                return Err(DbError::UnsupportedProjection(
                    projection.name().to_string(),
                ));
            }
        }

        let final_key = if query.has_criteria() {
            self.junction_key(&query.root())?
        } else {
            self.keys.all()
        };
        debug!("query on '{}' resolved to set '{}'", self.keys.prefix(), final_key);

        if !query.projections().is_empty() {
            return Ok(NativeResults::Values(self.project(&final_key, query)?));
        }

        // A single order clause rides the server-side SORT; multiple clauses
        // fall back to loading and ordering in memory.
        if query.order().len() == 1 {
            let clause = &query.order()[0];
            let field = self.mapped(&clause.property)?;
            let alpha = self
                .entity
                .property_by_name(&clause.property)
                .map(|p| p.data_type == DataType::Text)
                .unwrap_or(true);
            let ids = self.template.sort(
                &final_key,
                &SortParams {
                    by: Some(self.keys.entity_field_pattern(&field)),
                    get: None,
                    alpha,
                    desc: clause.direction == crate::query::Direction::Descending,
                    limit: Some((query.offset(), query.max().unwrap_or(usize::MAX))),
                },
            )?;
            return Ok(NativeResults::Entries(self.load_rows(&ids)?));
        }
        if query.order().len() > 1 {
            let ids = self.template.smembers(&final_key)?;
            let mut rows = self.load_rows(&ids)?;
            apply_order(self.entity, &mut rows, query.order())?;
            return Ok(NativeResults::Entries(apply_pagination(
                rows,
                query.offset(),
                query.max(),
            )));
        }

        let ids = apply_pagination(
            self.template.smembers(&final_key)?,
            query.offset(),
            query.max(),
        );
        Ok(NativeResults::Entries(self.load_rows(&ids)?))
    }

    // --- set algebra -------------------------------------------------------

    fn junction_key(&self, junction: &Junction) -> Result<String> {
        match junction {
            Junction::Conjunction(children) => {
                if children.is_empty() {
                    return Ok(self.keys.all());
                }
                let keys = self.child_keys(children)?;
                if keys.len() == 1 {
                    return Ok(keys.into_iter().next().unwrap());
                }
                let destination = format!("~&[{}]", keys.join(","));
                self.template.sinterstore(&destination, &keys)?;
                self.template.expire(&destination, self.cache_expiry)?;
                Ok(destination)
            }
            Junction::Disjunction(children) => {
                if children.is_empty() {
                    // OR of nothing matches nothing
                    let destination = format!("~none:{}", self.keys.prefix());
                    self.template.del(&destination)?;
                    return Ok(destination);
                }
                let keys = self.child_keys(children)?;
                let destination = format!("~|[{}]", keys.join(","));
                self.template.sunionstore(&destination, &keys)?;
                self.template.expire(&destination, self.cache_expiry)?;
                Ok(destination)
            }
            Junction::Negation(inner) => {
                let inner_key = self.junction_key(inner)?;
                let destination = format!("~-[{}]", inner_key);
                self.template
                    .sdiffstore(&destination, &[self.keys.all(), inner_key])?;
                self.template.expire(&destination, self.cache_expiry)?;
                Ok(destination)
            }
        }
    }

    fn child_keys(&self, children: &[Criterion]) -> Result<Vec<String>> {
        children
            .iter()
            .map(|child| match child {
                Criterion::Property(criterion) => self.criterion_key(criterion),
                Criterion::Junction(junction) => self.junction_key(junction),
            })
            .collect()
    }

    fn criterion_key(&self, criterion: &PropertyCriterion) -> Result<String> {
        match criterion {
            PropertyCriterion::IdEquals { value } => self.identity_key(value),
            PropertyCriterion::Equals { property, value } => {
                if self.entity.is_identity_name(property) {
                    return self.identity_key(value);
                }
                let field = self.require_indexed(property)?;
                Ok(self.keys.index(&field, value))
            }
            PropertyCriterion::NotEquals { property, value } => {
                let field = self.require_indexed(property)?;
                let equal = self.keys.index(&field, value);
                let destination = format!("~![{}]", equal);
                self.template
                    .sdiffstore(&destination, &[self.keys.all(), equal])?;
                self.template.expire(&destination, self.cache_expiry)?;
                Ok(destination)
            }
            PropertyCriterion::In { property, values } => {
                let field = self.require_indexed(property)?;
                let keys: Vec<String> = values
                    .iter()
                    .map(|value| self.keys.index(&field, value))
                    .collect();
                let destination = format!("~in[{}]", keys.join(","));
                self.template.sunionstore(&destination, &keys)?;
                self.template.expire(&destination, self.cache_expiry)?;
                Ok(destination)
            }
            PropertyCriterion::Like { property, pattern } => {
                let field = self.require_indexed(property)?;
                let glob = pattern.replace('%', "*");
                let matching = self
                    .template
                    .keys(&self.keys.index_glob(&field, &glob))?;
                let destination = format!("~like[{}:{}]", field, glob);
                if matching.is_empty() {
                    self.template.del(&destination)?;
                } else {
                    self.template.sunionstore(&destination, &matching)?;
                    self.template.expire(&destination, self.cache_expiry)?;
                }
                Ok(destination)
            }
            PropertyCriterion::Between { property, from, to } => {
                let field = self.require_indexed(property)?;
                let min = self.score(property, from)?;
                let max = self.score(property, to)?;
                self.range_key(&field, min, max, false, false)
            }
            PropertyCriterion::GreaterThan { property, value } => {
                let field = self.require_indexed(property)?;
                let min = self.score(property, value)?;
                self.range_key(&field, min, f64::INFINITY, true, false)
            }
            PropertyCriterion::GreaterThanEquals { property, value } => {
                let field = self.require_indexed(property)?;
                let min = self.score(property, value)?;
                self.range_key(&field, min, f64::INFINITY, false, false)
            }
            PropertyCriterion::LessThan { property, value } => {
                let field = self.require_indexed(property)?;
                let max = self.score(property, value)?;
                self.range_key(&field, f64::NEG_INFINITY, max, false, true)
            }
            PropertyCriterion::LessThanEquals { property, value } => {
                let field = self.require_indexed(property)?;
                let max = self.score(property, value)?;
                self.range_key(&field, f64::NEG_INFINITY, max, false, false)
            }
        }
    }

    /// A singleton (or empty) set for an identity lookup; there is no
    /// secondary index for identifiers, existence of the hash decides.
    fn identity_key(&self, id: &Value) -> Result<String> {
        let destination = format!("~id[{}:{}]", self.keys.prefix(), id.to_storage_string());
        self.template.del(&destination)?;
        if self.template.exists(&self.keys.entity(id))? {
            self.template.sadd(&destination, &id.to_storage_string())?;
            self.template.expire(&destination, self.cache_expiry)?;
        }
        Ok(destination)
    }

    /// Materialize a sorted-set score range as a derived set, reusing a
    /// cached one when the same range was queried within the expiry window.
    fn range_key(
        &self,
        field: &str,
        min: f64,
        max: f64,
        min_strict: bool,
        max_strict: bool,
    ) -> Result<String> {
        let destination = format!(
            "~range[{}:{}:{}{}-{}{}]",
            self.keys.prefix(),
            field,
            if min_strict { "(" } else { "" },
            min,
            if max_strict { "(" } else { "" },
            max
        );
        if self.template.exists(&destination)? {
            return Ok(destination);
        }
        let members = self
            .template
            .zrangebyscore(&self.keys.sorted(field), min, max)?;
        let mut stored = false;
        for (member, score) in members {
            if (min_strict && score <= min) || (max_strict && score >= max) {
                continue;
            }
            self.template.sadd(&destination, &member)?;
            stored = true;
        }
        if stored {
            self.template.expire(&destination, self.cache_expiry)?;
        }
        Ok(destination)
    }

    fn score(&self, property: &str, value: &Value) -> Result<f64> {
        value.as_f64().ok_or_else(|| {
            DbError::TypeMismatch(format!(
                "Range query on '{}' requires a numeric value, got {}",
                property,
                value.type_name()
            ))
        })
    }

    // --- projections -------------------------------------------------------

    fn project(&self, final_key: &str, query: &Query) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for projection in query.projections() {
            match projection {
                Projection::Count => {
                    out.push(Value::Integer(self.template.scard(final_key)? as i64));
                }
                Projection::CountDistinct(property) => {
                    let mut values = self.property_values(final_key, property)?;
                    values.sort_by(crate::query::compare_for_sort);
                    values.dedup();
                    out.push(Value::Integer(
                        values.iter().filter(|v| !v.is_null()).count() as i64,
                    ));
                }
                Projection::Id => {
                    for raw in self.template.smembers(final_key)? {
                        out.push(self.id_value(&raw));
                    }
                }
                Projection::Property(property) => {
                    out.extend(self.property_values(final_key, property)?);
                }
                Projection::Min(property) => {
                    out.push(self.extremum(final_key, property, false)?);
                }
                Projection::Max(property) => {
                    out.push(self.extremum(final_key, property, true)?);
                }
                Projection::Sum(_) | Projection::Avg(_) => unreachable!("rejected above"),
            }
        }
        Ok(out)
    }

    fn property_values(&self, final_key: &str, property: &str) -> Result<Vec<Value>> {
        let field = self.mapped(property)?;
        let data_type = self.property_type(property);
        let raw = self.template.sort(
            final_key,
            &SortParams {
                by: None,
                get: Some(self.keys.entity_field_pattern(&field)),
                alpha: true,
                desc: false,
                limit: None,
            },
        )?;
        Ok(raw
            .iter()
            .map(|value| data_type.parse_storage_string(value))
            .collect())
    }

    /// Min or max of a property over the final set, served from a cached
    /// aggregate key within the expiry window.
    fn extremum(&self, final_key: &str, property: &str, max: bool) -> Result<Value> {
        let field = self.mapped(property)?;
        let data_type = self.property_type(property);
        let cache_key = format!(
            "~agg[{}:{}:{}]",
            final_key,
            field,
            if max { "max" } else { "min" }
        );
        if let Some(cached) = self.template.get(&cache_key)? {
            return Ok(data_type.parse_storage_string(&cached));
        }
        let alpha = data_type == DataType::Text;
        let extreme = self
            .template
            .sort(
                final_key,
                &SortParams {
                    by: Some(self.keys.entity_field_pattern(&field)),
                    get: Some(self.keys.entity_field_pattern(&field)),
                    alpha,
                    desc: max,
                    limit: Some((0, 1)),
                },
            )?
            .into_iter()
            .next();
        match extreme {
            Some(raw) => {
                self.template.setex(&cache_key, &raw, self.cache_expiry)?;
                Ok(data_type.parse_storage_string(&raw))
            }
            None => Ok(Value::Null),
        }
    }

    // --- row loading -------------------------------------------------------

    fn load_rows(&self, ids: &[String]) -> Result<Vec<(Value, NativeEntry)>> {
        let mut rows = Vec::with_capacity(ids.len());
        for raw in ids {
            let id = self.id_value(raw);
            let hash = self.template.hgetall(&self.keys.entity(&id))?;
            if hash.is_empty() {
                // Identifier in an index but hash already gone
                continue;
            }
            rows.push((id.clone(), self.entry_from_hash(&id, &hash)));
        }
        Ok(rows)
    }

    pub fn id_value(&self, raw: &str) -> Value {
        match raw.parse::<i64>() {
            Ok(i) if self.entity.generator() == crate::model::IdGenerator::Sequence => {
                Value::Integer(i)
            }
            _ => Value::Text(raw.to_string()),
        }
    }

    pub fn entry_from_hash(
        &self,
        id: &Value,
        hash: &std::collections::HashMap<String, String>,
    ) -> NativeEntry {
        let mut entry = NativeEntry::new();
        entry.set(self.entity.identity_name(), id.clone());
        for (field, raw) in hash {
            if self.entity.is_identity_name(field) {
                continue;
            }
            let value = if field == VERSION_KEY {
                DataType::Integer.parse_storage_string(raw)
            } else if let Some(property) = self
                .entity
                .properties()
                .iter()
                .find(|p| p.mapping.target_name == *field)
            {
                property.data_type.parse_storage_string(raw)
            } else if self
                .entity
                .associations()
                .iter()
                .any(|a| a.kind == AssociationKind::ToOne && a.mapping.target_name == *field)
            {
                raw.parse::<i64>()
                    .map(Value::Integer)
                    .unwrap_or_else(|_| Value::Text(raw.clone()))
            } else {
                Value::Text(raw.clone())
            };
            entry.set(field.clone(), value);
        }
        entry
    }

    fn mapped(&self, property: &str) -> Result<String> {
        self.entity
            .mapped_key(property)
            .map(str::to_string)
            .ok_or_else(|| {
                DbError::PropertyNotFound(property.to_string(), self.entity.name().to_string())
            })
    }

    fn property_type(&self, property: &str) -> DataType {
        self.entity
            .property_by_name(property)
            .map(|p| p.data_type)
            .unwrap_or(DataType::Text)
    }

    fn require_indexed(&self, property: &str) -> Result<String> {
        if !self.entity.is_property_indexed(property) {
            return Err(DbError::DataRetrievalFailure(format!(
                "Cannot query property '{}' of '{}': it is not indexed",
                property,
                self.entity.name()
            )));
        }
        self.mapped(property)
    }
}
