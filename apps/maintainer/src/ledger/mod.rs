//! Idempotency ledger — per-page processing timestamps and publish failure counts.
//!
//! Keys:
//! - `lastProcessed:<pageId>`     unix millis of the last lock/commit
//! - `failCount:<pageId>`         consecutive publish failures
//! - `priorityProcessed:<url>`    unix millis, priority pages only
//!
//! A page is eligible again once `now - lastProcessed > cooldown`. Failure
//! backoff is expressed by back-dating `lastProcessed` so that the same rule
//! yields the shorter retry window.

pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::page::Page;
use store::KvStore;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Ledger entry for {key} is not a number: {value}")]
    Corrupt { key: String, value: String },
}

/// Cooldown and backoff windows.
#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    pub cooldown: Duration,
    pub failure_window: Duration,
    pub escalated_window: Duration,
    pub escalate_after: u32,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::hours(24),
            failure_window: Duration::minutes(30),
            escalated_window: Duration::hours(24),
            escalate_after: 3,
        }
    }
}

/// Result of recording a publish failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureBackoff {
    pub fail_count: u32,
    pub retry_after: Duration,
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn KvStore>,
    policy: LedgerPolicy,
}

impl Ledger {
    pub fn new(store: Arc<dyn KvStore>, policy: LedgerPolicy) -> Self {
        Self { store, policy }
    }

    /// True while the page is inside its cooldown window (its lock is held).
    pub async fn is_locked(&self, page: &Page, now: DateTime<Utc>) -> Result<bool, LedgerError> {
        let Some(key) = lock_key(page) else {
            return Ok(false);
        };
        let last = self.read_timestamp(&key).await?;
        Ok(last
            .map(|at| now - at <= self.policy.cooldown)
            .unwrap_or(false))
    }

    /// Writes the lock before any generation work starts.
    pub async fn lock(&self, page: &Page, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if let Some(key) = lock_key(page) {
            self.write_timestamp(&key, now).await?;
            debug!(key = %key, "Ledger lock written");
        }
        Ok(())
    }

    /// Removes the lock so the page can be selected again immediately.
    pub async fn release(&self, page: &Page) -> Result<(), LedgerError> {
        if let Some(key) = lock_key(page) {
            self.store.delete(&key).await?;
            debug!(key = %key, "Ledger lock released");
        }
        Ok(())
    }

    /// Commits a successful run: full cooldown, failure counter reset.
    pub async fn record_success(&self, page: &Page, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.lock(page, now).await?;
        if let Some(id) = page.identity() {
            self.store.delete(&fail_count_key(id)).await?;
        }
        Ok(())
    }

    /// Increments the failure counter and back-dates the lock so the page
    /// becomes eligible after the escalating retry window.
    pub async fn record_failure(
        &self,
        page: &Page,
        now: DateTime<Utc>,
    ) -> Result<FailureBackoff, LedgerError> {
        let Some(id) = page.identity() else {
            return Ok(FailureBackoff {
                fail_count: 0,
                retry_after: Duration::zero(),
            });
        };
        let count_key = fail_count_key(id);
        let fail_count = match self.store.get(&count_key).await? {
            Some(raw) => parse_number(&count_key, &raw)? as u32 + 1,
            None => 1,
        };
        self.store.set(&count_key, &fail_count.to_string()).await?;

        let retry_after = if fail_count >= self.policy.escalate_after {
            self.policy.escalated_window
        } else {
            self.policy.failure_window
        };
        if let Some(key) = lock_key(page) {
            let backdated = now - self.policy.cooldown + retry_after;
            self.write_timestamp(&key, backdated).await?;
        }
        warn!(
            page = %id,
            fail_count,
            retry_after_mins = retry_after.num_minutes(),
            "Publish failure recorded"
        );
        Ok(FailureBackoff {
            fail_count,
            retry_after,
        })
    }

    #[cfg(test)]
    pub async fn fail_count(&self, page_id: &str) -> Result<u32, LedgerError> {
        let key = fail_count_key(page_id);
        match self.store.get(&key).await? {
            Some(raw) => Ok(parse_number(&key, &raw)? as u32),
            None => Ok(0),
        }
    }

    /// Raw `lastProcessed`/`priorityProcessed` timestamp for a page, if any.
    #[cfg(test)]
    pub async fn last_processed(&self, page: &Page) -> Result<Option<DateTime<Utc>>, LedgerError> {
        match lock_key(page) {
            Some(key) => self.read_timestamp(&key).await,
            None => Ok(None),
        }
    }

    async fn read_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        let millis = parse_number(key, &raw)?;
        Ok(Utc.timestamp_millis_opt(millis).single())
    }

    async fn write_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), LedgerError> {
        self.store
            .set(key, &at.timestamp_millis().to_string())
            .await
    }
}

/// Priority pages are locked under their url; everything else under its identity.
fn lock_key(page: &Page) -> Option<String> {
    if page.is_priority {
        page.url
            .as_deref()
            .or_else(|| page.identity())
            .map(|url| format!("priorityProcessed:{url}"))
    } else {
        page.identity().map(|id| format!("lastProcessed:{id}"))
    }
}

fn fail_count_key(page_id: &str) -> String {
    format!("failCount:{page_id}")
}

fn parse_number(key: &str, raw: &str) -> Result<i64, LedgerError> {
    raw.trim().parse::<i64>().map_err(|_| LedgerError::Corrupt {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::MemoryStore;

    fn page(id: &str) -> Page {
        Page {
            id: Some(id.to_string()),
            url: Some(format!("https://site.test{id}")),
            title: String::new(),
            slug: String::new(),
            last_modified: None,
            age_in_days: 10,
            is_priority: false,
        }
    }

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()), LedgerPolicy::default())
    }

    #[tokio::test]
    async fn test_lock_holds_for_cooldown_window() {
        let ledger = ledger();
        let p = page("/a");
        let now = Utc::now();
        assert!(!ledger.is_locked(&p, now).await.unwrap());

        ledger.lock(&p, now).await.unwrap();
        assert!(ledger.is_locked(&p, now + Duration::hours(23)).await.unwrap());
        assert!(!ledger
            .is_locked(&p, now + Duration::hours(24) + Duration::seconds(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_release_makes_page_eligible() {
        let ledger = ledger();
        let p = page("/a");
        let now = Utc::now();
        ledger.lock(&p, now).await.unwrap();
        ledger.release(&p).await.unwrap();
        assert!(!ledger.is_locked(&p, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_single_failure_skips_thirty_minutes() {
        let ledger = ledger();
        let p = page("/a");
        let now = Utc::now();
        let backoff = ledger.record_failure(&p, now).await.unwrap();
        assert_eq!(backoff.fail_count, 1);
        assert_eq!(backoff.retry_after, Duration::minutes(30));

        assert!(ledger.is_locked(&p, now + Duration::minutes(29)).await.unwrap());
        assert!(!ledger
            .is_locked(&p, now + Duration::minutes(30) + Duration::seconds(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_three_failures_escalate_to_a_day() {
        let ledger = ledger();
        let p = page("/a");
        let now = Utc::now();
        ledger.record_failure(&p, now).await.unwrap();
        let second = ledger.record_failure(&p, now).await.unwrap();
        assert_eq!(second.retry_after, Duration::minutes(30));
        let third = ledger.record_failure(&p, now).await.unwrap();

        assert_eq!(third.fail_count, 3);
        assert_eq!(third.retry_after, Duration::hours(24));
        assert_eq!(ledger.fail_count("/a").await.unwrap(), 3);
        assert!(ledger.is_locked(&p, now + Duration::hours(23)).await.unwrap());
        assert!(!ledger
            .is_locked(&p, now + Duration::hours(24) + Duration::seconds(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_success_resets_fail_counter() {
        let ledger = ledger();
        let p = page("/a");
        let now = Utc::now();
        ledger.record_failure(&p, now).await.unwrap();
        ledger.record_failure(&p, now).await.unwrap();
        ledger.record_success(&p, now).await.unwrap();

        assert_eq!(ledger.fail_count("/a").await.unwrap(), 0);
        let next = ledger.record_failure(&p, now).await.unwrap();
        assert_eq!(next.retry_after, Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_priority_pages_use_url_key() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), LedgerPolicy::default());
        let p = Page::priority("https://site.test/p/", None);
        let now = Utc::now();
        ledger.lock(&p, now).await.unwrap();

        let raw = store
            .get("priorityProcessed:https://site.test/p/")
            .await
            .unwrap();
        assert_eq!(raw, Some(now.timestamp_millis().to_string()));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_surfaced() {
        let store = Arc::new(MemoryStore::new());
        store.set("lastProcessed:/a", "yesterday").await.unwrap();
        let ledger = Ledger::new(store, LedgerPolicy::default());
        let err = ledger.is_locked(&page("/a"), Utc::now()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }));
    }
}
