use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{DbError, Result};

/// Datastore connection configuration.
///
/// The library is consumed programmatically; connection parameters arrive as
/// a plain string-keyed map at `Datastore` construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Backend host
    pub host: String,

    /// Backend port
    pub port: u16,

    /// Logical database / keyspace name
    pub database: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Maximum number of pooled native connections
    pub pool_size: usize,

    /// Default timeout for explicit entity locks
    pub lock_timeout: Duration,

    /// Expiry applied to cached aggregate keys (min/max scores, derived
    /// range sets) in set-algebra backends
    pub aggregate_cache_expiry: Duration,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            database: "polystore".to_string(),
            username: None,
            password: None,
            pool_size: 10,
            lock_timeout: Duration::from_secs(30),
            aggregate_cache_expiry: Duration::from_millis(500),
        }
    }
}

impl DatastoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from a plain string-keyed map.
    ///
    /// Unknown keys are ignored; malformed numeric values are an error.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(host) = map.get("host") {
            config.host = host.clone();
        }
        if let Some(port) = map.get("port") {
            config.port = port
                .parse()
                .map_err(|_| DbError::IllegalArgument(format!("Invalid port: {}", port)))?;
        }
        if let Some(database) = map.get("database") {
            config.database = database.clone();
        }
        if let Some(username) = map.get("username") {
            config.username = Some(username.clone());
        }
        if let Some(password) = map.get("password") {
            config.password = Some(password.clone());
        }
        if let Some(size) = map.get("pool.size") {
            config.pool_size = size
                .parse()
                .map_err(|_| DbError::IllegalArgument(format!("Invalid pool.size: {}", size)))?;
        }
        if let Some(secs) = map.get("lock.timeout") {
            let secs: u64 = secs.parse().map_err(|_| {
                DbError::IllegalArgument(format!("Invalid lock.timeout: {}", secs))
            })?;
            config.lock_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Set the logical database name
    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Set the host
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the pool size
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the default lock timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_map() {
        let mut map = HashMap::new();
        map.insert("host".to_string(), "redis.internal".to_string());
        map.insert("port".to_string(), "6380".to_string());
        map.insert("pool.size".to_string(), "4".to_string());

        let config = DatastoreConfig::from_map(&map).unwrap();
        assert_eq!(config.host, "redis.internal");
        assert_eq!(config.port, 6380);
        assert_eq!(config.pool_size, 4);
    }

    #[test]
    fn test_from_map_rejects_bad_port() {
        let mut map = HashMap::new();
        map.insert("port".to_string(), "not-a-port".to_string());
        assert!(DatastoreConfig::from_map(&map).is_err());
    }
}
