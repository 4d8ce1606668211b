// ============================================================================
// OQL Region Template
// ============================================================================
//
// Region-style object store: values are full native entries keyed by string,
// queried through an object query language string with positional bind
// parameters. A real deployment ships the compiled query text to the server;
// the in-memory region has no OQL engine and evaluates the criteria tree the
// text was compiled from, so compiler and evaluator can be checked against
// each other.
//
// ============================================================================

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::core::{DbError, Result, Value};
use crate::engine::NativeEntry;
use crate::model::PersistentEntity;
use crate::query::Junction;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// A compiled object query: the text and bind parameters a live region
/// executes, plus the criteria they were compiled from.
#[derive(Debug, Clone)]
pub struct CompiledQuery<'a> {
    pub text: String,
    pub params: Vec<Value>,
    pub criteria: &'a Junction,
    pub entity: &'a PersistentEntity,
}

pub trait OqlTemplate {
    fn get(&self, region: &str, key: &str) -> Result<Option<NativeEntry>>;

    fn put(&self, region: &str, key: &str, entry: &NativeEntry) -> Result<()>;

    /// Bulk put, one round trip against a live region
    fn put_all(&self, region: &str, entries: &[(String, NativeEntry)]) -> Result<()>;

    fn remove(&self, region: &str, key: &str) -> Result<()>;

    /// Full region contents, for unrestricted queries
    fn entries(&self, region: &str) -> Result<Vec<(String, NativeEntry)>>;

    /// Execute a compiled query against the region
    fn query(&self, region: &str, compiled: &CompiledQuery<'_>)
        -> Result<Vec<(String, NativeEntry)>>;

    fn next_sequence(&self, region: &str) -> Result<i64>;

    fn lock(&self, region: &str, key: &str, timeout: Duration) -> Result<()>;

    fn unlock(&self, region: &str, key: &str) -> Result<()>;
}

/// In-memory region set.
#[derive(Debug, Default)]
pub struct MemoryOqlTemplate {
    regions: Mutex<HashMap<String, BTreeMap<String, NativeEntry>>>,
    counters: Mutex<HashMap<String, i64>>,
    locks: Mutex<HashSet<String>>,
}

impl MemoryOqlTemplate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OqlTemplate for MemoryOqlTemplate {
    fn get(&self, region: &str, key: &str) -> Result<Option<NativeEntry>> {
        let regions = self.regions.lock()?;
        Ok(regions.get(region).and_then(|r| r.get(key)).cloned())
    }

    fn put(&self, region: &str, key: &str, entry: &NativeEntry) -> Result<()> {
        let mut regions = self.regions.lock()?;
        regions
            .entry(region.to_string())
            .or_default()
            .insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn put_all(&self, region: &str, entries: &[(String, NativeEntry)]) -> Result<()> {
        let mut regions = self.regions.lock()?;
        let slot = regions.entry(region.to_string()).or_default();
        for (key, entry) in entries {
            slot.insert(key.clone(), entry.clone());
        }
        Ok(())
    }

    fn remove(&self, region: &str, key: &str) -> Result<()> {
        let mut regions = self.regions.lock()?;
        if let Some(slot) = regions.get_mut(region) {
            slot.remove(key);
        }
        Ok(())
    }

    fn entries(&self, region: &str) -> Result<Vec<(String, NativeEntry)>> {
        let regions = self.regions.lock()?;
        Ok(regions
            .get(region)
            .map(|slot| {
                slot.iter()
                    .map(|(key, entry)| (key.clone(), entry.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn query(
        &self,
        region: &str,
        compiled: &CompiledQuery<'_>,
    ) -> Result<Vec<(String, NativeEntry)>> {
        debug!(
            "executing against region '{}': {} (params: {:?})",
            region, compiled.text, compiled.params
        );
        let regions = self.regions.lock()?;
        let Some(slot) = regions.get(region) else {
            return Ok(Vec::new());
        };
        let mut matched = Vec::new();
        for (key, entry) in slot {
            if compiled.criteria.matches(compiled.entity, entry)? {
                matched.push((key.clone(), entry.clone()));
            }
        }
        Ok(matched)
    }

    fn next_sequence(&self, region: &str) -> Result<i64> {
        let mut counters = self.counters.lock()?;
        let slot = counters.entry(region.to_string()).or_insert(0);
        *slot += 1;
        Ok(*slot)
    }

    fn lock(&self, region: &str, key: &str, timeout: Duration) -> Result<()> {
        let lock_id = format!("{}:{}", region, key);
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut locks = self.locks.lock()?;
                if locks.insert(lock_id.clone()) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(DbError::CannotAcquireLock(format!(
                    "Timed out after {:?} waiting for lock on region entry {}",
                    timeout, lock_id
                )));
            }
            thread::sleep(LOCK_RETRY_INTERVAL.min(deadline - Instant::now()));
        }
    }

    fn unlock(&self, region: &str, key: &str) -> Result<()> {
        let mut locks = self.locks.lock()?;
        locks.remove(&format!("{}:{}", region, key));
        Ok(())
    }
}
