//! Redis implementation of [`StoreBackend`] over a deadpool connection pool.
//!
//! The pool is built once at start-up and shared by every request. Atomic
//! batches are sent as a `MULTI`/`EXEC` pipeline so the sliding-window steps
//! never interleave with another process.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use lexgate_storage::{BatchOp, BatchReply, StoreBackend, StoreError, StoreResult};
use redis::{AsyncCommands, FromRedisValue, RedisError, Value};

use crate::config::RedisConfig;

/// Keys fetched per `SCAN` step during prefix deletion.
const SCAN_BATCH: usize = 500;

/// Store backend talking to a single Redis deployment.
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build the connection pool described by `config`.
    ///
    /// No connection is opened yet; call [`StoreBackend::ping`] to verify the
    /// server is reachable.
    pub fn from_config(config: &RedisConfig) -> StoreResult<Self> {
        let timeout = Some(Duration::from_millis(config.timeout_ms));
        let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = timeout;
        pool_config.timeouts.create = timeout;
        pool_config.timeouts.recycle = timeout;

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| StoreError::connection(e.to_string()))?;
        Ok(Self::new(pool))
    }

    async fn conn(&self) -> StoreResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::connection(e.to_string()))
    }
}

fn command_error(operation: &'static str, key: &str, error: RedisError) -> StoreError {
    if error.code() == Some("WRONGTYPE") {
        return StoreError::wrong_type(key, "matching type");
    }
    if error.is_connection_refusal() || error.is_connection_dropped() {
        return StoreError::connection(error.to_string());
    }
    StoreError::command(operation, error.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Escape glob metacharacters so a literal prefix can be used in `MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('*');
    escaped
}

fn score_bound(min: i64) -> String {
    if min == i64::MIN {
        "-inf".to_string()
    } else {
        min.to_string()
    }
}

fn decode<T: FromRedisValue>(op: &BatchOp, value: &Value) -> StoreResult<T> {
    redis::from_redis_value(value)
        .map_err(|e| StoreError::unexpected_reply("atomic_batch", format!("{}: {e}", op.name())))
}

#[async_trait]
impl StoreBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| command_error("get", key, e))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let result = match ttl {
            Some(ttl) => {
                conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl))
                    .await
            }
            None => conn.set::<_, _, ()>(key, value).await,
        };
        result.map_err(|e| command_error("set", key, e))
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        conn.del::<_, u64>(keys)
            .await
            .map_err(|e| command_error("delete", &keys.join(","), e))
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let pattern = escape_glob(prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| command_error("delete_prefix", prefix, e))?;

            if !keys.is_empty() {
                removed += conn
                    .del::<_, u64>(&keys)
                    .await
                    .map_err(|e| command_error("delete_prefix", prefix, e))?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(prefix = %prefix, removed, "prefix deleted");
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        conn.exists::<_, bool>(key)
            .await
            .map_err(|e| command_error("exists", key, e))
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        let Some(ttl) = ttl else {
            return conn
                .incr(key, 1)
                .await
                .map_err(|e| command_error("increment", key, e));
        };

        // `SET NX PX` seeds a new counter with its TTL in the same transaction.
        let (value,): (i64,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(0)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .arg("NX")
            .ignore()
            .cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("increment", key, e))?;
        Ok(value)
    }

    async fn run_atomic_batch(&self, key: &str, ops: &[BatchOp]) -> StoreResult<Vec<BatchReply>> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                BatchOp::RemoveRangeByScore { min, max } => {
                    pipe.cmd("ZREMRANGEBYSCORE")
                        .arg(key)
                        .arg(score_bound(*min))
                        .arg(format!("({max}"));
                }
                BatchOp::Count => {
                    pipe.cmd("ZCARD").arg(key);
                }
                BatchOp::AddScored { score, member } => {
                    pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
                }
                BatchOp::Expire { seconds } => {
                    pipe.cmd("EXPIRE").arg(key).arg(*seconds);
                }
            }
        }

        let mut conn = self.conn().await?;
        let values: Vec<Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("atomic_batch", key, e))?;

        if values.len() != ops.len() {
            return Err(StoreError::unexpected_reply(
                "atomic_batch",
                format!("sent {} commands, got {} replies", ops.len(), values.len()),
            ));
        }

        ops.iter()
            .zip(values.iter())
            .map(|(op, value)| {
                Ok(match op {
                    BatchOp::RemoveRangeByScore { .. } => BatchReply::Removed(decode(op, value)?),
                    BatchOp::Count => BatchReply::Count(decode(op, value)?),
                    BatchOp::AddScored { .. } => BatchReply::Added(decode(op, value)?),
                    BatchOp::Expire { .. } => BatchReply::ExpireSet(decode(op, value)?),
                })
            })
            .collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("ping", "", e))?;
        Ok(())
    }
}
