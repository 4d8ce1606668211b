use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::DatastoreConfig;
use crate::core::{DbError, Result, Value};
use crate::engine::{CascadeAction, NativeEntry, NativeEntryStore, NativeResults};
use crate::model::{Association, PersistentEntity};
use crate::query::Query;

use super::indexer::{KeySpace, RedisIndexer};
use super::query::RedisQuery;
use super::template::RedisTemplate;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Entity store over a hash/set/sorted-set key-value backend.
///
/// Records live in hashes; every query-relevant property carries explicit
/// secondary indexes maintained through cascade actions, and queries resolve
/// entirely through set algebra over those indexes.
pub struct RedisStore {
    entity: Arc<PersistentEntity>,
    template: Arc<dyn RedisTemplate>,
    keys: KeySpace,
    indexer: RedisIndexer,
    cache_expiry: Duration,
}

impl RedisStore {
    pub fn new(
        entity: Arc<PersistentEntity>,
        template: Arc<dyn RedisTemplate>,
        config: &DatastoreConfig,
    ) -> Self {
        let keys = KeySpace::new(&config.database, entity.family());
        Self {
            indexer: RedisIndexer::new(Arc::clone(&entity), keys.clone()),
            entity,
            template,
            keys,
            cache_expiry: config.aggregate_cache_expiry,
        }
    }

    fn query_engine(&self) -> RedisQuery<'_> {
        RedisQuery {
            template: self.template.as_ref(),
            entity: &self.entity,
            keys: &self.keys,
            cache_expiry: self.cache_expiry,
        }
    }

    fn hash_from_entry(entry: &NativeEntry) -> HashMap<String, String> {
        entry
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(field, value)| (field.to_string(), value.to_storage_string()))
            .collect()
    }
}

impl NativeEntryStore for RedisStore {
    fn family(&self) -> &str {
        self.entity.family()
    }

    fn next_sequence_value(&self, _entity: &PersistentEntity) -> Result<i64> {
        self.template.incr(&self.keys.sequence())
    }

    fn retrieve_entry(
        &self,
        _entity: &PersistentEntity,
        key: &Value,
    ) -> Result<Option<NativeEntry>> {
        let hash = self.template.hgetall(&self.keys.entity(key))?;
        if hash.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.query_engine().entry_from_hash(key, &hash)))
    }

    fn insert_batch(
        &self,
        _entity: &PersistentEntity,
        batch: &[(Value, NativeEntry)],
    ) -> Result<()> {
        let hashes: Vec<(String, HashMap<String, String>)> = batch
            .iter()
            .map(|(key, entry)| (self.keys.entity(key), Self::hash_from_entry(entry)))
            .collect();
        self.template.hmset_many(&hashes)?;
        for (key, _) in batch {
            self.template
                .sadd(&self.keys.all(), &key.to_storage_string())?;
        }
        Ok(())
    }

    fn update_entry(
        &self,
        _entity: &PersistentEntity,
        key: &Value,
        entry: &NativeEntry,
    ) -> Result<()> {
        let entity_key = self.keys.entity(key);
        // Full rewrite; a plain hmset would leave removed fields behind
        self.template.del(&entity_key)?;
        self.template.hmset(&entity_key, &Self::hash_from_entry(entry))
    }

    fn delete_entries(&self, _entity: &PersistentEntity, keys: &[Value]) -> Result<()> {
        for key in keys {
            self.template.del(&self.keys.entity(key))?;
            self.template
                .srem(&self.keys.all(), &key.to_storage_string())?;
        }
        Ok(())
    }

    fn association_keys(
        &self,
        _entity: &PersistentEntity,
        owner: &Value,
        association: &Association,
    ) -> Result<Vec<Value>> {
        let engine = self.query_engine();
        Ok(self
            .template
            .smembers(&self.keys.association(owner, &association.name))?
            .iter()
            .map(|raw| engine.id_value(raw))
            .collect())
    }

    fn apply_index(
        &self,
        _entity: &PersistentEntity,
        owner: &Value,
        action: &CascadeAction,
    ) -> Result<()> {
        self.indexer.apply(self.template.as_ref(), owner, action)
    }

    fn execute_query(&self, query: &Query) -> Result<NativeResults> {
        self.query_engine().execute(query)
    }

    /// Spin on SETNX against a per-record lock key until acquired or the
    /// timeout expires.
    fn lock_entry(&self, entity: &PersistentEntity, key: &Value, timeout: Duration) -> Result<()> {
        let lock_key = self.keys.lock(key);
        let deadline = Instant::now() + timeout;
        loop {
            if self.template.setnx(&lock_key, "1")? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DbError::CannotAcquireLock(format!(
                    "Timed out after {:?} waiting for lock on {}[{}]",
                    timeout,
                    entity.name(),
                    key
                )));
            }
            thread::sleep(LOCK_RETRY_INTERVAL.min(deadline - Instant::now()));
        }
    }

    fn unlock_entry(&self, _entity: &PersistentEntity, key: &Value) -> Result<()> {
        self.template.del(&self.keys.lock(key))
    }
}
