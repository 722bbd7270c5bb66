use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::DispatchError;

use super::CoordinationStore;

/// Atomic compare-and-delete: only remove `key` if its value still equals
/// `expected`. Plain `GET` + `DEL` would race with a holder that reacquired
/// the key after TTL expiry; the script makes the check-then-delete atomic
/// the same way `services/redis_client.py`'s `RedisLock.release` uses
/// `WATCH`/`MULTI` to the same end.
const COMPARE_DELETE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, DispatchError> {
        let client =
            redis::Client::open(url).map_err(|e| DispatchError::Store(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn sadd(&self, key: &str, member: &str) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, member)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(key, member)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, DispatchError> {
        let mut conn = self.conn.clone();
        conn.smembers(key)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))
    }

    async fn scard(&self, key: &str) -> Result<u64, DispatchError> {
        let mut conn = self.conn.clone();
        conn.scard(key)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, DispatchError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<'_, String> = conn
            .scan_match(&pattern)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))?;
        while let Some(key) = futures_util::StreamExt::next(&mut iter).await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn set_if_absent_ex(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DispatchError> {
        let mut conn = self.conn.clone();
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::PX(ttl.as_millis() as u64));
        let result: Option<String> = conn
            .set_options(key, value, opts)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))?;
        Ok(result.is_some())
    }

    async fn compare_delete(&self, key: &str, expected: &str) -> Result<bool, DispatchError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(COMPARE_DELETE_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))?;
        Ok(deleted == 1)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, message)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))
    }

    async fn ping(&self) -> Result<(), DispatchError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| DispatchError::Store(e.to_string()))
    }
}
