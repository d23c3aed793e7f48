//! Redis-backed token storage and distributed refresh lock.
//!
//! Keys live under `<prefix>:tokens:kiro:<account>` and `<prefix>:token-lock:kiro:<account>`,
//! matching the root crate's own `<prefix>:pools:kiro` hash so an operator
//! inspecting Redis sees one consistent namespace.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::TokenStorage;
use crate::auth::lock::RefreshLock;
use crate::error::{Error, Result};
use crate::models::auth::KiroTokenInfo;

/// Lua script for a CAS-style lock release: delete the key only if its
/// value still matches the nonce that acquired it.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisTokenStorage {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisTokenStorage {
    /// Connect to `redis_url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Storage(format!("invalid redis URL: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Storage(format!("redis connection failed: {e}")))?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    fn token_key(&self, account: &str) -> String {
        format!("{}:tokens:kiro:{}", self.prefix, account)
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:token-lock:{}", self.prefix, key)
    }
}

#[async_trait]
impl TokenStorage for RedisTokenStorage {
    async fn load(&self, provider: &str) -> Result<Option<KiroTokenInfo>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.token_key(provider))
            .await
            .map_err(|e| Error::Storage(format!("redis GET failed: {e}")))?;

        match raw {
            Some(json) => {
                let token = serde_json::from_str(&json)
                    .map_err(|e| Error::StorageSerialization(e.to_string()))?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, provider: &str, token: &KiroTokenInfo) -> Result<()> {
        let json = serde_json::to_string(token)
            .map_err(|e| Error::StorageSerialization(e.to_string()))?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.token_key(provider), json)
            .await
            .map_err(|e| Error::Storage(format!("redis SET failed: {e}")))?;
        Ok(())
    }

    async fn remove(&self, provider: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.token_key(provider))
            .await
            .map_err(|e| Error::Storage(format!("redis DEL failed: {e}")))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "redis"
    }
}

#[async_trait]
impl RefreshLock for RedisTokenStorage {
    async fn try_acquire(&self, key: &str, nonce: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(self.lock_key(key))
            .arg(nonce)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Lock(format!("redis SET NX failed: {e}")))?;
        Ok(result.is_some())
    }

    async fn release(&self, key: &str, nonce: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::Script::new(RELEASE_SCRIPT)
            .key(self.lock_key(key))
            .arg(nonce)
            .invoke_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| Error::Lock(format!("redis lock release failed: {e}")))?;
        Ok(())
    }
}
