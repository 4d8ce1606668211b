// ============================================================================
// Dynamo Template
// ============================================================================
//
// Thin wrapper over an attribute-map item store: items are string attribute
// maps with a numeric flag, queries are full scans filtered by per-attribute
// conditions combined with AND. The in-memory implementation mirrors the
// remote service's data model so the compiler above it is exercised for real.
//
// ============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::core::{Result, Value};

/// One attribute of an item: string-rendered values plus a numeric flag that
/// switches comparison semantics. Most attributes are single-valued;
/// association indexes use the multi-valued form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamoAttribute {
    pub values: Vec<String>,
    pub number: bool,
}

impl DynamoAttribute {
    pub fn from_value(value: &Value) -> Self {
        Self {
            values: vec![value.to_storage_string()],
            number: value.is_numeric(),
        }
    }

    pub fn multi(values: Vec<String>, number: bool) -> Self {
        Self { values, number }
    }

    pub fn first(&self) -> &str {
        self.values.first().map(String::as_str).unwrap_or("")
    }
}

pub type DynamoItem = HashMap<String, DynamoAttribute>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
    In,
    BeginsWith,
    Contains,
}

/// One scan filter condition on a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub operator: ComparisonOperator,
    pub values: Vec<String>,
    pub number: bool,
}

impl Condition {
    pub fn new(operator: ComparisonOperator, values: Vec<String>, number: bool) -> Self {
        Self {
            operator,
            values,
            number,
        }
    }

    /// Evaluate the condition against one attribute. A missing attribute
    /// never matches, `Ne` included; this follows the remote service, which
    /// filters on present attributes only, so records lacking the attribute
    /// fall out of `Ne` scans that the other backends would include.
    pub fn matches(&self, attribute: Option<&DynamoAttribute>) -> bool {
        let Some(attribute) = attribute else {
            return false;
        };
        match self.operator {
            ComparisonOperator::Eq => attribute
                .values
                .iter()
                .any(|v| self.compare(v, &self.values[0]).is_eq()),
            ComparisonOperator::Ne => !attribute
                .values
                .iter()
                .any(|v| self.compare(v, &self.values[0]).is_eq()),
            ComparisonOperator::Gt => self.compare(attribute.first(), &self.values[0]).is_gt(),
            ComparisonOperator::Ge => self.compare(attribute.first(), &self.values[0]).is_ge(),
            ComparisonOperator::Lt => self.compare(attribute.first(), &self.values[0]).is_lt(),
            ComparisonOperator::Le => self.compare(attribute.first(), &self.values[0]).is_le(),
            ComparisonOperator::Between => {
                let v = attribute.first();
                self.compare(v, &self.values[0]).is_ge() && self.compare(v, &self.values[1]).is_le()
            }
            ComparisonOperator::In => self
                .values
                .iter()
                .any(|candidate| self.compare(attribute.first(), candidate).is_eq()),
            ComparisonOperator::BeginsWith => attribute.first().starts_with(&self.values[0]),
            ComparisonOperator::Contains => attribute.first().contains(&self.values[0]),
        }
    }

    fn compare(&self, left: &str, right: &str) -> std::cmp::Ordering {
        if self.number {
            let l: f64 = left.parse().unwrap_or(f64::NAN);
            let r: f64 = right.parse().unwrap_or(f64::NAN);
            l.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Equal)
        } else {
            left.cmp(right)
        }
    }
}

/// Backend connection surface the store and compiler run against.
pub trait DynamoTemplate {
    fn get(&self, table: &str, id: &str) -> Result<Option<DynamoItem>>;

    fn put_item(&self, table: &str, id: &str, item: DynamoItem) -> Result<()>;

    /// Batched multi-put, one round trip against the real service
    fn put_items(&self, table: &str, items: Vec<(String, DynamoItem)>) -> Result<()>;

    fn delete_item(&self, table: &str, id: &str) -> Result<()>;

    /// Scan the table with AND-combined per-attribute conditions, returning
    /// at most `max` items.
    fn scan(
        &self,
        table: &str,
        filter: &HashMap<String, Condition>,
        max: usize,
    ) -> Result<Vec<(String, DynamoItem)>>;

    /// Server-side count of a scan, avoiding item transfer
    fn scan_count(&self, table: &str, filter: &HashMap<String, Condition>) -> Result<usize>;

    /// Atomically advance a named counter and return its new value
    fn increment_counter(&self, table: &str, name: &str) -> Result<i64>;
}

/// In-memory template with the same semantics as the remote service.
#[derive(Debug, Default)]
pub struct MemoryDynamoTemplate {
    tables: Mutex<HashMap<String, BTreeMap<String, DynamoItem>>>,
    counters: Mutex<HashMap<String, i64>>,
}

impl MemoryDynamoTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(filter: &HashMap<String, Condition>, item: &DynamoItem) -> bool {
        filter
            .iter()
            .all(|(attribute, condition)| condition.matches(item.get(attribute)))
    }
}

impl DynamoTemplate for MemoryDynamoTemplate {
    fn get(&self, table: &str, id: &str) -> Result<Option<DynamoItem>> {
        let tables = self.tables.lock()?;
        Ok(tables.get(table).and_then(|t| t.get(id)).cloned())
    }

    fn put_item(&self, table: &str, id: &str, item: DynamoItem) -> Result<()> {
        let mut tables = self.tables.lock()?;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), item);
        Ok(())
    }

    fn put_items(&self, table: &str, items: Vec<(String, DynamoItem)>) -> Result<()> {
        let mut tables = self.tables.lock()?;
        let slot = tables.entry(table.to_string()).or_default();
        for (id, item) in items {
            slot.insert(id, item);
        }
        Ok(())
    }

    fn delete_item(&self, table: &str, id: &str) -> Result<()> {
        let mut tables = self.tables.lock()?;
        if let Some(slot) = tables.get_mut(table) {
            slot.remove(id);
        }
        Ok(())
    }

    fn scan(
        &self,
        table: &str,
        filter: &HashMap<String, Condition>,
        max: usize,
    ) -> Result<Vec<(String, DynamoItem)>> {
        let tables = self.tables.lock()?;
        let Some(slot) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(slot
            .iter()
            .filter(|(_, item)| Self::matches(filter, item))
            .take(max)
            .map(|(id, item)| (id.clone(), item.clone()))
            .collect())
    }

    fn scan_count(&self, table: &str, filter: &HashMap<String, Condition>) -> Result<usize> {
        let tables = self.tables.lock()?;
        let Some(slot) = tables.get(table) else {
            return Ok(0);
        };
        Ok(slot.values().filter(|item| Self::matches(filter, item)).count())
    }

    fn increment_counter(&self, table: &str, name: &str) -> Result<i64> {
        let mut counters = self.counters.lock()?;
        let slot = counters.entry(format!("{}:{}", table, name)).or_insert(0);
        *slot += 1;
        Ok(*slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, age: i64) -> DynamoItem {
        let mut item = DynamoItem::new();
        item.insert("name".into(), DynamoAttribute::from_value(&Value::Text(name.into())));
        item.insert("age".into(), DynamoAttribute::from_value(&Value::Integer(age)));
        item
    }

    #[test]
    fn test_numeric_comparison_is_not_lexical() {
        let template = MemoryDynamoTemplate::new();
        template.put_item("t", "1", item("Ann", 9)).unwrap();
        template.put_item("t", "2", item("Bob", 10)).unwrap();

        let mut filter = HashMap::new();
        filter.insert(
            "age".to_string(),
            Condition::new(ComparisonOperator::Gt, vec!["9".into()], true),
        );
        let found = template.scan("t", &filter, usize::MAX).unwrap();
        // lexically "10" < "9"; numerically 10 > 9
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "2");
    }

    #[test]
    fn test_scan_count_matches_scan() {
        let template = MemoryDynamoTemplate::new();
        template.put_item("t", "1", item("Ann", 1)).unwrap();
        template.put_item("t", "2", item("Ann", 2)).unwrap();

        let mut filter = HashMap::new();
        filter.insert(
            "name".to_string(),
            Condition::new(ComparisonOperator::Eq, vec!["Ann".into()], false),
        );
        assert_eq!(template.scan_count("t", &filter).unwrap(), 2);
    }

    #[test]
    fn test_missing_attribute_never_matches() {
        let ne = Condition::new(ComparisonOperator::Ne, vec!["Ann".into()], false);
        assert!(!ne.matches(None));
        assert!(ne.matches(Some(&DynamoAttribute::from_value(&Value::Text("Bob".into())))));
    }

    #[test]
    fn test_begins_with_and_contains() {
        let attribute = DynamoAttribute::from_value(&Value::Text("gormless".into()));
        let begins = Condition::new(ComparisonOperator::BeginsWith, vec!["gorm".into()], false);
        let contains = Condition::new(ComparisonOperator::Contains, vec!["rml".into()], false);
        assert!(begins.matches(Some(&attribute)));
        assert!(contains.matches(Some(&attribute)));
    }
}
