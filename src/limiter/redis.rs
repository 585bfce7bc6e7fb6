//! Redis-backed client record store.
//!
//! Records live in per-client hashes so several proxy instances can share
//! one token budget. The admission check runs as an optimistic WATCH /
//! MULTI / EXEC transaction: the bucket is read and updated on the same
//! checked-out connection, and a concurrent write to the key aborts EXEC,
//! in which case we retry against the fresh state.

use std::collections::HashMap;

use deadpool_redis::redis::{cmd, pipe, AsyncCommands};
use deadpool_redis::{Config as RedisConfig, Pool, PoolConfig, Runtime};
use tracing::debug;

use crate::config::{RateLimitConfig, StoreConfig};
use crate::limiter::bucket::{unix_now, TokenBucket};
use crate::limiter::error::LimiterError;
use crate::limiter::{record_key, ClientRecord};

/// Attempts before a contended admission check gives up.
const TX_MAX_RETRIES: u32 = 5;

pub struct RedisStore {
    pool: Pool,
    default_capacity: i64,
    default_rate: i64,
}

impl RedisStore {
    pub fn new(store: &StoreConfig, limits: &RateLimitConfig) -> Result<Self, LimiterError> {
        let mut config = RedisConfig::from_url(store.url.as_str());
        config.pool = Some(PoolConfig::new(store.pool_size));
        let pool = config.create_pool(Some(Runtime::Tokio1))?;

        Ok(Self {
            pool,
            default_capacity: limits.default_capacity,
            default_rate: limits.default_rate,
        })
    }

    pub async fn ping(&self) -> Result<(), LimiterError> {
        let mut conn = self.pool.get().await?;
        cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Admission check for one request from `client_key`.
    ///
    /// A denial writes nothing, so hammering an exhausted bucket cannot
    /// push its refill horizon further out.
    pub async fn allow(&self, client_key: &str) -> Result<bool, LimiterError> {
        let key = record_key(client_key);
        let mut conn = self.pool.get().await?;

        for attempt in 0..TX_MAX_RETRIES {
            cmd("WATCH").arg(&key).query_async::<()>(&mut conn).await?;

            match self.admission_attempt(&mut conn, &key).await {
                Ok(Some(admitted)) => return Ok(admitted),
                // Another instance wrote the key between WATCH and EXEC;
                // the aborted EXEC already cleared the watch.
                Ok(None) => {
                    debug!(key = %key, attempt, "admission transaction aborted, retrying");
                }
                Err(e) => {
                    // The connection goes back to the pool; it must not
                    // carry an armed watch into the next checkout.
                    let _ = cmd("UNWATCH").query_async::<()>(&mut conn).await;
                    return Err(e);
                }
            }
        }

        Err(LimiterError::TxConflict)
    }

    /// One WATCHed read-decide-write cycle. Returns the admission verdict,
    /// or `None` when EXEC aborted and the cycle should be retried. Every
    /// non-retry exit leaves the connection unwatched: denial sends an
    /// explicit UNWATCH, commit and abort are resolved by EXEC itself, and
    /// errors are disarmed by the caller.
    async fn admission_attempt(
        &self,
        conn: &mut deadpool_redis::Connection,
        key: &str,
    ) -> Result<Option<bool>, LimiterError> {
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        let (admitted, bucket) =
            admit(&fields, self.default_capacity, self.default_rate, unix_now())?;

        if !admitted {
            cmd("UNWATCH").query_async::<()>(conn).await?;
            return Ok(Some(false));
        }

        let exec: Option<()> = pipe()
            .atomic()
            .hset(key, "tokens", bucket.tokens)
            .ignore()
            .hset(key, "last_update", bucket.last_update)
            .ignore()
            .hset(key, "capacity", bucket.capacity)
            .ignore()
            .hset(key, "rate", bucket.rate)
            .ignore()
            .query_async(conn)
            .await?;

        Ok(exec.map(|_| true))
    }

    pub async fn create_client(&self, record: &ClientRecord) -> Result<(), LimiterError> {
        let key = record_key(&record.client_ip);
        let mut conn = self.pool.get().await?;

        let exists: bool = conn.exists(&key).await?;
        if exists {
            return Err(LimiterError::UserAlreadyExists);
        }
        write_bucket(&mut conn, &key, &record.bucket).await
    }

    pub async fn read_client(&self, client_ip: &str) -> Result<ClientRecord, LimiterError> {
        let key = record_key(client_ip);
        let mut conn = self.pool.get().await?;

        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Err(LimiterError::UserNotFound);
        }
        Ok(ClientRecord {
            client_ip: client_ip.to_string(),
            bucket: bucket_from_fields(&fields)?,
        })
    }

    pub async fn update_client(&self, record: &ClientRecord) -> Result<(), LimiterError> {
        let key = record_key(&record.client_ip);
        let mut conn = self.pool.get().await?;

        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Err(LimiterError::UserNotFound);
        }
        write_bucket(&mut conn, &key, &record.bucket).await
    }

    pub async fn delete_client(&self, client_ip: &str) -> Result<(), LimiterError> {
        let key = record_key(client_ip);
        let mut conn = self.pool.get().await?;

        let removed: u64 = conn.del(&key).await?;
        if removed == 0 {
            return Err(LimiterError::UserNotFound);
        }
        Ok(())
    }
}

async fn write_bucket(
    conn: &mut deadpool_redis::Connection,
    key: &str,
    bucket: &TokenBucket,
) -> Result<(), LimiterError> {
    conn.hset_multiple::<_, _, _, ()>(
        key,
        &[
            ("tokens", bucket.tokens),
            ("last_update", bucket.last_update),
            ("capacity", bucket.capacity),
            ("rate", bucket.rate),
        ],
    )
    .await?;
    Ok(())
}

/// Admission decision over the raw record fields. An absent record admits
/// the request against a fresh bucket, charging the admitting request.
fn admit(
    fields: &HashMap<String, String>,
    default_capacity: i64,
    default_rate: i64,
    now: i64,
) -> Result<(bool, TokenBucket), LimiterError> {
    if fields.is_empty() {
        return Ok((true, TokenBucket::fresh(default_capacity, default_rate, now)));
    }
    let mut bucket = bucket_from_fields(fields)?;
    let admitted = bucket.try_consume(now);
    Ok((admitted, bucket))
}

fn bucket_from_fields(fields: &HashMap<String, String>) -> Result<TokenBucket, LimiterError> {
    let field = |name: &str| -> Result<i64, LimiterError> {
        fields
            .get(name)
            .ok_or_else(|| LimiterError::MalformedRecord(format!("missing field {name}")))?
            .parse()
            .map_err(|_| LimiterError::MalformedRecord(format!("non-integer field {name}")))
    };

    Ok(TokenBucket {
        tokens: field("tokens")?,
        last_update: field("last_update")?,
        capacity: field("capacity")?,
        rate: field("rate")?,
    })
}
