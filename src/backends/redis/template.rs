// ============================================================================
// Redis Template
// ============================================================================
//
// Command-level wrapper over a key-value store with hashes, sets and sorted
// sets. The query compiler works purely in terms of these commands; the
// in-memory implementation keeps the same semantics (including key expiry)
// so set-algebra compilation is tested against real command behavior.
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::Result;

/// Parameters of the SORT command: sort the members of a set by an external
/// hash field, optionally fetching that field instead of the member, with an
/// optional page.
#[derive(Debug, Clone, Default)]
pub struct SortParams {
    /// `prefix:*->field` pattern; the member replaces `*`. Without it the
    /// members themselves are sorted.
    pub by: Option<String>,
    /// `prefix:*->field` pattern to fetch instead of the member
    pub get: Option<String>,
    /// Lexicographic instead of numeric comparison
    pub alpha: bool,
    pub desc: bool,
    /// (offset, count)
    pub limit: Option<(usize, usize)>,
}

pub trait RedisTemplate {
    fn hmset(&self, key: &str, fields: &HashMap<String, String>) -> Result<()>;

    /// Pipelined multi-hmset, one round trip against a real server
    fn hmset_many(&self, entries: &[(String, HashMap<String, String>)]) -> Result<()>;

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    fn del(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Set if absent; returns whether the key was set
    fn setnx(&self, key: &str, value: &str) -> Result<bool>;

    fn incr(&self, key: &str) -> Result<i64>;

    fn sadd(&self, key: &str, member: &str) -> Result<()>;

    fn srem(&self, key: &str, member: &str) -> Result<()>;

    fn smembers(&self, key: &str) -> Result<Vec<String>>;

    fn scard(&self, key: &str) -> Result<usize>;

    fn sinterstore(&self, destination: &str, keys: &[String]) -> Result<()>;

    fn sunionstore(&self, destination: &str, keys: &[String]) -> Result<()>;

    fn sdiffstore(&self, destination: &str, keys: &[String]) -> Result<()>;

    fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()>;

    fn zrem(&self, key: &str, member: &str) -> Result<()>;

    /// Members with scores in the inclusive range, ordered by score
    fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>>;

    /// Glob-style key lookup; only `*` wildcards are used by the compiler
    fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    fn sort(&self, key: &str, params: &SortParams) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
struct MemoryData {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, BTreeMap<String, f64>>,
    expiries: HashMap<String, Instant>,
}

impl MemoryData {
    fn purge(&mut self, key: &str) {
        if let Some(deadline) = self.expiries.get(key) {
            if Instant::now() >= *deadline {
                self.expiries.remove(key);
                self.strings.remove(key);
                self.hashes.remove(key);
                self.sets.remove(key);
                self.zsets.remove(key);
            }
        }
    }

    fn resolve_pattern(&self, pattern: &str, member: &str) -> Option<String> {
        let substituted = pattern.replacen('*', member, 1);
        match substituted.split_once("->") {
            Some((hash_key, field)) => self.hashes.get(hash_key)?.get(field).cloned(),
            None => self.strings.get(&substituted).cloned(),
        }
    }
}

/// In-memory template with real command semantics.
#[derive(Debug, Default)]
pub struct MemoryRedisTemplate {
    data: Mutex<MemoryData>,
}

impl MemoryRedisTemplate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RedisTemplate for MemoryRedisTemplate {
    fn hmset(&self, key: &str, fields: &HashMap<String, String>) -> Result<()> {
        let mut data = self.data.lock()?;
        data.hashes
            .entry(key.to_string())
            .or_default()
            .extend(fields.clone());
        Ok(())
    }

    fn hmset_many(&self, entries: &[(String, HashMap<String, String>)]) -> Result<()> {
        let mut data = self.data.lock()?;
        for (key, fields) in entries {
            data.hashes
                .entry(key.clone())
                .or_default()
                .extend(fields.clone());
        }
        Ok(())
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut data = self.data.lock()?;
        data.purge(key);
        Ok(data.hashes.get(key).cloned().unwrap_or_default())
    }

    fn del(&self, key: &str) -> Result<()> {
        let mut data = self.data.lock()?;
        data.strings.remove(key);
        data.hashes.remove(key);
        data.sets.remove(key);
        data.zsets.remove(key);
        data.expiries.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let mut data = self.data.lock()?;
        data.purge(key);
        Ok(data.strings.contains_key(key)
            || data.hashes.contains_key(key)
            || data.sets.contains_key(key)
            || data.zsets.contains_key(key))
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut data = self.data.lock()?;
        data.expiries.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut data = self.data.lock()?;
        data.purge(key);
        Ok(data.strings.get(key).cloned())
    }

    fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut data = self.data.lock()?;
        data.strings.insert(key.to_string(), value.to_string());
        data.expiries.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    fn setnx(&self, key: &str, value: &str) -> Result<bool> {
        let mut data = self.data.lock()?;
        data.purge(key);
        if data.strings.contains_key(key) {
            return Ok(false);
        }
        data.strings.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    fn incr(&self, key: &str) -> Result<i64> {
        let mut data = self.data.lock()?;
        let next = data
            .strings
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            + 1;
        data.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut data = self.data.lock()?;
        data.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut data = self.data.lock()?;
        if let Some(set) = data.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut data = self.data.lock()?;
        data.purge(key);
        Ok(data
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn scard(&self, key: &str) -> Result<usize> {
        let mut data = self.data.lock()?;
        data.purge(key);
        Ok(data.sets.get(key).map(BTreeSet::len).unwrap_or(0))
    }

    fn sinterstore(&self, destination: &str, keys: &[String]) -> Result<()> {
        let mut data = self.data.lock()?;
        let mut result: Option<BTreeSet<String>> = None;
        for key in keys {
            data.purge(key);
            let set = data.sets.get(key).cloned().unwrap_or_default();
            result = Some(match result {
                None => set,
                Some(acc) => acc.intersection(&set).cloned().collect(),
            });
        }
        store_set(&mut data, destination, result.unwrap_or_default());
        Ok(())
    }

    fn sunionstore(&self, destination: &str, keys: &[String]) -> Result<()> {
        let mut data = self.data.lock()?;
        let mut result = BTreeSet::new();
        for key in keys {
            data.purge(key);
            if let Some(set) = data.sets.get(key) {
                result.extend(set.iter().cloned());
            }
        }
        store_set(&mut data, destination, result);
        Ok(())
    }

    fn sdiffstore(&self, destination: &str, keys: &[String]) -> Result<()> {
        let mut data = self.data.lock()?;
        let mut iter = keys.iter();
        let mut result = iter
            .next()
            .and_then(|key| data.sets.get(key).cloned())
            .unwrap_or_default();
        for key in iter {
            data.purge(key);
            if let Some(set) = data.sets.get(key) {
                result = result.difference(set).cloned().collect();
            }
        }
        store_set(&mut data, destination, result);
        Ok(())
    }

    fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut data = self.data.lock()?;
        data.zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut data = self.data.lock()?;
        if let Some(zset) = data.zsets.get_mut(key) {
            zset.remove(member);
        }
        Ok(())
    }

    fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        let data = self.data.lock()?;
        let Some(zset) = data.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(String, f64)> = zset
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(members)
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let data = self.data.lock()?;
        let mut matched: Vec<String> = data
            .strings
            .keys()
            .chain(data.hashes.keys())
            .chain(data.sets.keys())
            .chain(data.zsets.keys())
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        matched.sort();
        matched.dedup();
        Ok(matched)
    }

    fn sort(&self, key: &str, params: &SortParams) -> Result<Vec<String>> {
        let data = self.data.lock()?;
        let members: Vec<String> = data
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut keyed: Vec<(Option<String>, String)> = members
            .into_iter()
            .map(|member| {
                let sort_key = match &params.by {
                    Some(pattern) => data.resolve_pattern(pattern, &member),
                    None => Some(member.clone()),
                };
                (sort_key, member)
            })
            .collect();

        keyed.sort_by(|(a, _), (b, _)| {
            let ordering = match (a, b) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (Some(_), None) => std::cmp::Ordering::Less,
                (Some(a), Some(b)) => {
                    if params.alpha {
                        a.cmp(b)
                    } else {
                        let left: f64 = a.parse().unwrap_or(f64::MAX);
                        let right: f64 = b.parse().unwrap_or(f64::MAX);
                        left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal)
                    }
                }
            };
            if params.desc { ordering.reverse() } else { ordering }
        });

        let mut result: Vec<String> = keyed.into_iter().map(|(_, member)| member).collect();
        if let Some((offset, count)) = params.limit {
            result = result.into_iter().skip(offset).take(count).collect();
        }
        if let Some(pattern) = &params.get {
            result = result
                .into_iter()
                .map(|member| {
                    data.resolve_pattern(pattern, &member)
                        .unwrap_or_default()
                })
                .collect();
        }
        Ok(result)
    }
}

fn store_set(data: &mut MemoryData, destination: &str, set: BTreeSet<String>) {
    if set.is_empty() {
        data.sets.remove(destination);
    } else {
        data.sets.insert(destination.to_string(), set);
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut remainder = text;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match remainder.strip_prefix(part) {
                Some(rest) => remainder = rest,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return remainder.ends_with(part);
        } else {
            match remainder.find(part) {
                Some(at) => remainder = &remainder[at + part.len()..],
                None => return false,
            }
        }
    }
    true
}
