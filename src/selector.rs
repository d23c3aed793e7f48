//! Account Selector: the Redis-backed pool of Kiro accounts this gateway
//! round-robins requests across.
//!
//! The pool itself lives in Redis (`<prefix>:pools:<provider>`, a hash of
//! account UUID to JSON-encoded [`Account`]) so multiple gateway processes
//! share one view of account health. Each process keeps a short-lived,
//! mutex-guarded copy of the whole hash to avoid round-tripping to Redis on
//! every request; the copy is atomically replaced wholesale once its TTL
//! expires, never patched in place.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// An account registered in the pool.
///
/// Field names match the JSON already stored under `<prefix>:pools:<provider>`
/// so this gateway can read a hash populated by other tooling without a
/// migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    #[serde(rename = "profileARN", default, skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
    pub region: String,
    pub is_healthy: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_health_check_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recovery_time: Option<DateTime<Utc>>,
}

impl Account {
    /// A freshly provisioned account: healthy, unused, not disabled.
    pub fn new(id: Uuid, region: String, profile_arn: Option<String>) -> Self {
        Self {
            id,
            profile_arn,
            region,
            is_healthy: true,
            is_disabled: false,
            usage_count: 0,
            error_count: 0,
            last_used: None,
            last_error_time: None,
            last_health_check_time: None,
            recovery_time: None,
        }
    }

    /// Eligibility per the selection invariant: not admin-disabled, healthy
    /// (or past its recovery time, which self-heals it), and not in the
    /// caller's excluded set.
    fn eligible(&self, now: DateTime<Utc>, excluded: &HashSet<Uuid>) -> bool {
        if self.is_disabled || excluded.contains(&self.id) {
            return false;
        }
        match self.recovery_time {
            Some(recovery) => recovery <= now,
            None => self.is_healthy,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("no healthy accounts available")]
    NoHealthyAccounts,
    #[error("account pool backend error: {0}")]
    Backend(String),
}

struct CachedPool {
    loaded_at: Instant,
    accounts: Arc<Vec<Account>>,
}

const INCREMENT_USAGE_SCRIPT: &str = r#"
local raw = redis.call("HGET", KEYS[1], ARGV[1])
if not raw then return 0 end
local account = cjson.decode(raw)
account.usageCount = (account.usageCount or 0) + 1
account.lastUsed = ARGV[2]
redis.call("HSET", KEYS[1], ARGV[1], cjson.encode(account))
return 1
"#;

const MARK_UNHEALTHY_SCRIPT: &str = r#"
local raw = redis.call("HGET", KEYS[1], ARGV[1])
if not raw then return 0 end
local account = cjson.decode(raw)
account.isHealthy = false
account.errorCount = (account.errorCount or 0) + 1
account.lastErrorTime = ARGV[2]
if ARGV[3] ~= "" then
    account.recoveryTime = ARGV[3]
else
    account.recoveryTime = cjson.null
end
redis.call("HSET", KEYS[1], ARGV[1], cjson.encode(account))
return 1
"#;

/// Redis-backed account pool with an in-process round-robin cursor.
pub struct AccountSelector {
    conn: ConnectionManager,
    prefix: String,
    provider: String,
    cache: Mutex<Option<CachedPool>>,
    cache_ttl: Duration,
    cursor: AtomicUsize,
}

impl AccountSelector {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, cache_ttl: Duration) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            provider: "kiro".to_string(),
            cache: Mutex::new(None),
            cache_ttl,
            cursor: AtomicUsize::new(0),
        }
    }

    fn pools_key(&self) -> String {
        format!("{}:pools:{}", self.prefix, self.provider)
    }

    async fn fetch_pool(&self) -> Result<Vec<Account>, SelectError> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn
            .hgetall(self.pools_key())
            .await
            .map_err(|e| SelectError::Backend(format!("HGETALL failed: {e}")))?;

        let mut accounts = Vec::with_capacity(raw.len());
        for (uuid, json) in raw {
            match serde_json::from_str::<Account>(&json) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!(account = %uuid, error = %e, "skipping malformed account record"),
            }
        }
        Ok(accounts)
    }

    /// Return the cached pool, reloading it from Redis if the cache is
    /// empty or older than `cache_ttl`.
    async fn pool(&self) -> Result<Arc<Vec<Account>>, SelectError> {
        let mut guard = self.cache.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.loaded_at.elapsed() < self.cache_ttl {
                return Ok(Arc::clone(&cached.accounts));
            }
        }
        let accounts = Arc::new(self.fetch_pool().await?);
        *guard = Some(CachedPool {
            loaded_at: Instant::now(),
            accounts: Arc::clone(&accounts),
        });
        Ok(accounts)
    }

    /// Pick the next eligible account that is not in `excluded`, scanning
    /// from the shared round-robin cursor and atomically advancing it past
    /// whichever account is returned.
    pub async fn select_with_retry(
        &self,
        excluded: &HashSet<Uuid>,
    ) -> Result<Account, SelectError> {
        let pool = self.pool().await?;
        if pool.is_empty() {
            return Err(SelectError::NoHealthyAccounts);
        }

        let now = Utc::now();
        let n = pool.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;

        for offset in 0..n {
            let idx = (start + offset) % n;
            let account = &pool[idx];
            if account.eligible(now, excluded) {
                // advance the cursor past this account so the next call
                // starts beyond it, keeping the rotation moving forward
                self.cursor.store(idx + 1, Ordering::Relaxed);
                return Ok(account.clone());
            }
        }

        Err(SelectError::NoHealthyAccounts)
    }

    /// Bump usage count and last-used timestamp. Failures are logged, never
    /// propagated: a missed counter update must not fail the user's request.
    pub async fn increment_usage(&self, id: Uuid) {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = redis::Script::new(INCREMENT_USAGE_SCRIPT)
            .key(self.pools_key())
            .arg(id.to_string())
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!(account = %id, error = %e, "failed to record account usage");
        }
    }

    /// Mark an account unhealthy with no scheduled recovery (admin
    /// intervention required, or the next health check will decide).
    pub async fn mark_unhealthy(&self, id: Uuid) {
        self.mark_unhealthy_inner(id, None).await;
    }

    /// Mark an account unhealthy with a scheduled self-heal time (e.g. the
    /// first of next UTC month for a 402 quota exhaustion).
    pub async fn mark_unhealthy_with_recovery(&self, id: Uuid, recovery_time: DateTime<Utc>) {
        self.mark_unhealthy_inner(id, Some(recovery_time)).await;
    }

    async fn mark_unhealthy_inner(&self, id: Uuid, recovery_time: Option<DateTime<Utc>>) {
        let mut conn = self.conn.clone();
        let recovery_arg = recovery_time.map(|t| t.to_rfc3339()).unwrap_or_default();
        let result: redis::RedisResult<i64> = redis::Script::new(MARK_UNHEALTHY_SCRIPT)
            .key(self.pools_key())
            .arg(id.to_string())
            .arg(Utc::now().to_rfc3339())
            .arg(recovery_arg)
            .invoke_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!(account = %id, error = %e, "failed to mark account unhealthy");
        } else {
            debug!(account = %id, recovery = ?recovery_time, "account marked unhealthy");
        }
    }

    /// Register a new account in the pool, or overwrite an existing one with
    /// the same id. Used by the account-provisioning CLI path, never by
    /// request handling.
    pub async fn register(&self, account: &Account) -> Result<(), SelectError> {
        let json = serde_json::to_string(account)
            .map_err(|e| SelectError::Backend(format!("serializing account: {e}")))?;
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(self.pools_key(), account.id.to_string(), json)
            .await
            .map_err(|e| SelectError::Backend(format!("HSET failed: {e}")))?;
        Ok(())
    }

    /// `(total, healthy)` counts for `GET /health`. Uses the cached pool, so
    /// it can be stale by up to `cache_ttl`.
    pub async fn health_snapshot(&self) -> Result<(usize, usize), SelectError> {
        let pool = self.pool().await?;
        let now = Utc::now();
        let healthy = pool
            .iter()
            .filter(|a| !a.is_disabled && a.eligible(now, &HashSet::new()))
            .count();
        Ok((pool.len(), healthy))
    }
}

/// The first instant of next UTC month, used as the recovery time for a
/// quota-exhausted (402) account.
pub fn first_of_next_utc_month(now: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::{Datelike, TimeZone};
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("valid first-of-month timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: Uuid, healthy: bool, disabled: bool) -> Account {
        Account {
            id,
            profile_arn: None,
            region: "us-east-1".to_string(),
            is_healthy: healthy,
            is_disabled: disabled,
            usage_count: 0,
            error_count: 0,
            last_used: None,
            last_error_time: None,
            last_health_check_time: None,
            recovery_time: None,
        }
    }

    #[test]
    fn eligible_excludes_disabled() {
        let a = account(Uuid::new_v4(), true, true);
        assert!(!a.eligible(Utc::now(), &HashSet::new()));
    }

    #[test]
    fn eligible_excludes_unhealthy_without_recovery() {
        let a = account(Uuid::new_v4(), false, false);
        assert!(!a.eligible(Utc::now(), &HashSet::new()));
    }

    #[test]
    fn eligible_self_heals_past_recovery_time() {
        let mut a = account(Uuid::new_v4(), false, false);
        a.recovery_time = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(a.eligible(Utc::now(), &HashSet::new()));
    }

    #[test]
    fn ineligible_before_recovery_time() {
        let mut a = account(Uuid::new_v4(), false, false);
        a.recovery_time = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(!a.eligible(Utc::now(), &HashSet::new()));
    }

    #[test]
    fn eligible_respects_excluded_set() {
        let id = Uuid::new_v4();
        let a = account(id, true, false);
        let mut excluded = HashSet::new();
        excluded.insert(id);
        assert!(!a.eligible(Utc::now(), &excluded));
    }

    #[test]
    fn first_of_next_month_rolls_over_december() {
        use chrono::TimeZone;
        let dec = Utc.with_ymd_and_hms(2026, 12, 15, 10, 0, 0).single().unwrap();
        let next = first_of_next_utc_month(dec);
        assert_eq!((next.year(), next.month(), next.day()), (2027, 1, 1));
    }

    use chrono::Datelike;
}
