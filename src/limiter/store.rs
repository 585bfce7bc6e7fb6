//! Client record stores.
//!
//! `Store` is the limiter's single entry point: one variant per backend,
//! selected at startup by configuration. The Redis variant is what makes
//! the limiter distributed-safe; the memory variant keeps single-instance
//! deployments and the test suite free of an external daemon.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::{RateLimitConfig, StoreBackend, StoreConfig};
use crate::limiter::bucket::{unix_now, TokenBucket};
use crate::limiter::error::LimiterError;
use crate::limiter::redis::RedisStore;
use crate::limiter::{record_key, ClientRecord};

/// Configured rate-limit store.
pub enum Store {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl Store {
    /// Build the configured backend.
    pub fn from_config(
        store: &StoreConfig,
        limits: &RateLimitConfig,
    ) -> Result<Self, LimiterError> {
        Ok(match store.backend {
            StoreBackend::Redis => Store::Redis(RedisStore::new(store, limits)?),
            StoreBackend::Memory => Store::Memory(MemoryStore::new(
                limits.default_capacity,
                limits.default_rate,
            )),
        })
    }

    /// Admission check for one request from `client_key`.
    pub async fn allow(&self, client_key: &str) -> Result<bool, LimiterError> {
        match self {
            Store::Redis(store) => store.allow(client_key).await,
            Store::Memory(store) => store.allow(client_key),
        }
    }

    pub async fn create_client(&self, record: &ClientRecord) -> Result<(), LimiterError> {
        match self {
            Store::Redis(store) => store.create_client(record).await,
            Store::Memory(store) => store.create_client(record),
        }
    }

    pub async fn read_client(&self, client_ip: &str) -> Result<ClientRecord, LimiterError> {
        match self {
            Store::Redis(store) => store.read_client(client_ip).await,
            Store::Memory(store) => store.read_client(client_ip),
        }
    }

    pub async fn update_client(&self, record: &ClientRecord) -> Result<(), LimiterError> {
        match self {
            Store::Redis(store) => store.update_client(record).await,
            Store::Memory(store) => store.update_client(record),
        }
    }

    pub async fn delete_client(&self, client_ip: &str) -> Result<(), LimiterError> {
        match self {
            Store::Redis(store) => store.delete_client(client_ip).await,
            Store::Memory(store) => store.delete_client(client_ip),
        }
    }

    /// Verify the store is reachable before serving traffic.
    pub async fn ping(&self) -> Result<(), LimiterError> {
        match self {
            Store::Redis(store) => store.ping().await,
            Store::Memory(_) => Ok(()),
        }
    }
}

/// In-process record store.
pub struct MemoryStore {
    default_capacity: i64,
    default_rate: i64,
    records: Mutex<HashMap<String, TokenBucket>>,
}

impl MemoryStore {
    pub fn new(default_capacity: i64, default_rate: i64) -> Self {
        Self {
            default_capacity,
            default_rate,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, client_key: &str) -> Result<bool, LimiterError> {
        self.allow_at(client_key, unix_now())
    }

    /// Admission check against an explicit clock, the same protocol the
    /// Redis store runs inside its transaction.
    pub(crate) fn allow_at(&self, client_key: &str, now: i64) -> Result<bool, LimiterError> {
        let key = record_key(client_key);
        let mut records = self.records.lock().expect("records lock poisoned");

        match records.get_mut(&key) {
            None => {
                records.insert(
                    key,
                    TokenBucket::fresh(self.default_capacity, self.default_rate, now),
                );
                Ok(true)
            }
            Some(bucket) => Ok(bucket.try_consume(now)),
        }
    }

    pub fn create_client(&self, record: &ClientRecord) -> Result<(), LimiterError> {
        let key = record_key(&record.client_ip);
        let mut records = self.records.lock().expect("records lock poisoned");
        if records.contains_key(&key) {
            return Err(LimiterError::UserAlreadyExists);
        }
        records.insert(key, record.bucket.clone());
        Ok(())
    }

    pub fn read_client(&self, client_ip: &str) -> Result<ClientRecord, LimiterError> {
        let records = self.records.lock().expect("records lock poisoned");
        let bucket = records
            .get(&record_key(client_ip))
            .cloned()
            .ok_or(LimiterError::UserNotFound)?;
        Ok(ClientRecord {
            client_ip: client_ip.to_string(),
            bucket,
        })
    }

    pub fn update_client(&self, record: &ClientRecord) -> Result<(), LimiterError> {
        let key = record_key(&record.client_ip);
        let mut records = self.records.lock().expect("records lock poisoned");
        match records.get_mut(&key) {
            None => Err(LimiterError::UserNotFound),
            Some(bucket) => {
                *bucket = record.bucket.clone();
                Ok(())
            }
        }
    }

    pub fn delete_client(&self, client_ip: &str) -> Result<(), LimiterError> {
        let mut records = self.records.lock().expect("records lock poisoned");
        records
            .remove(&record_key(client_ip))
            .map(|_| ())
            .ok_or(LimiterError::UserNotFound)
    }
}
