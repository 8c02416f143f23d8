//! Redis quota store for `quotagate` (companion crate).
//!
//! Each identity is one JSON document `{"version": n, "record": {...}}` under
//! `prefix:<key>`. Writes go through Lua scripts that compare the stored
//! version before replacing or deleting, so every process sharing the Redis
//! instance sees linearizable updates. Keys carry a TTL of the idle retention,
//! which lets Redis expire idle records on its own. Time comes from the Redis
//! `TIME` command.

use async_trait::async_trait;
use quotagate::{QuotaRecord, QuotaStore, StoreError, Versioned};
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use std::time::Duration;

const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local version = 0
if current then
    version = tonumber(cjson.decode(current)['version'])
end
if version ~= tonumber(ARGV[1]) then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return 1
"#;

const CAD_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
if tonumber(cjson.decode(current)['version']) ~= tonumber(ARGV[1]) then
    return 0
end
redis.call('DEL', KEYS[1])
return 1
"#;

const SCAN_BATCH: usize = 500;

/// Quota store backed by a shared Redis instance.
#[derive(Clone)]
pub struct RedisQuotaStore {
    prefix: String,
    retention: Duration,
    conn: MultiplexedConnection,
    cas: Script,
    cad: Script,
}

impl std::fmt::Debug for RedisQuotaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQuotaStore")
            .field("prefix", &self.prefix)
            .field("retention", &self.retention)
            .field("conn", &"<redis::aio::MultiplexedConnection>")
            .finish()
    }
}

impl RedisQuotaStore {
    /// Open a multiplexed connection to `url`.
    ///
    /// # Errors
    /// Returns `Err` if the URL is invalid, the prefix is unusable, or Redis is unreachable.
    pub async fn connect(url: &str, prefix: impl Into<String>, retention: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(StoreError::unavailable)?;
        let conn = client.get_multiplexed_async_connection().await.map_err(StoreError::unavailable)?;
        Self::with_connection(conn, prefix, retention)
    }

    /// Use an existing connection; keys will be `prefix:<key>`.
    ///
    /// # Errors
    /// Returns `Err` if the prefix is empty or contains whitespace, control
    /// characters or glob metacharacters.
    pub fn with_connection(
        conn: MultiplexedConnection,
        prefix: impl Into<String>,
        retention: Duration,
    ) -> Result<Self, StoreError> {
        let prefix = normalize_prefix(prefix.into())?;
        Ok(Self {
            prefix,
            retention,
            conn,
            cas: Script::new(CAS_SCRIPT),
            cad: Script::new(CAD_SCRIPT),
        })
    }

    /// Key prefix in use.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

fn normalize_prefix(prefix: String) -> Result<String, StoreError> {
    let p = prefix.trim().trim_end_matches(':').to_string();
    let invalid = p.is_empty()
        || p.chars().any(|c| c.is_control() || c.is_whitespace() || matches!(c, '*' | '?' | '[' | ']'));
    if invalid {
        return Err(StoreError::unavailable(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid redis key prefix {:?}", prefix),
        )));
    }
    Ok(p)
}

/// TTL for a record: retention from its latest request, stretched to cover a running block.
fn ttl_millis(record: &QuotaRecord, retention: Duration) -> u64 {
    let retention = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
    let block = record.blocked_until.map_or(0, |until| until.saturating_sub(record.last_request_at));
    retention.saturating_add(block).max(1)
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn now_millis(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let (secs, micros): (u64, u64) =
            redis::cmd("TIME").query_async(&mut conn).await.map_err(StoreError::unavailable)?;
        Ok(secs * 1_000 + micros / 1_000)
    }

    async fn load(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.redis_key(key))
            .query_async(&mut conn)
            .await
            .map_err(StoreError::unavailable)?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        record: &QuotaRecord,
    ) -> Result<bool, StoreError> {
        let next = Versioned { version: expected_version + 1, record: record.clone() };
        let json = serde_json::to_string(&next)?;
        let mut conn = self.conn.clone();
        let swapped: i64 = self
            .cas
            .key(self.redis_key(key))
            .arg(expected_version)
            .arg(json)
            .arg(ttl_millis(record, self.retention))
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(swapped == 1)
    }

    async fn compare_and_delete(&self, key: &str, expected_version: u64) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .cad
            .key(self.redis_key(key))
            .arg(expected_version)
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(deleted == 1)
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.redis_key(key))
            .query_async(&mut conn)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(removed > 0)
    }

    async fn scan(&self) -> Result<Vec<Versioned>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.prefix);
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(StoreError::unavailable)?;

            if !keys.is_empty() {
                let values: Vec<Option<String>> = redis::cmd("MGET")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(StoreError::unavailable)?;
                // Keys can expire between SCAN and MGET.
                for json in values.into_iter().flatten() {
                    match serde_json::from_str::<Versioned>(&json) {
                        Ok(v) => out.push(v),
                        Err(err) => tracing::warn!(
                            target: "quotagate::redis",
                            error = %err,
                            "skipping undecodable quota record"
                        ),
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(out)
    }
}
