//! Per-day download usage counting.
//!
//! The counter is the audit trail for downloads and the enforcement point
//! for daily quotas. [`UsageCounter::record_bounded`] is the only way the
//! download path consumes quota: it checks the count and appends the record
//! as one atomic step, so concurrent requests can never overshoot the
//! limit.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Client details captured alongside a download, for auditing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// One recorded download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub user_id: String,
    pub asset_id: String,
    pub downloaded_at: DateTime<Utc>,
    /// UTC calendar day of `downloaded_at`. Stored explicitly so quota
    /// queries are a plain key match.
    pub day: NaiveDate,
    #[serde(default)]
    pub meta: ClientMeta,
}

impl UsageRecord {
    /// Build a record for a download happening at `at`. The quota day is
    /// derived from the timestamp, always in UTC.
    #[must_use]
    pub fn new(user_id: &str, asset_id: &str, at: DateTime<Utc>, meta: ClientMeta) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            asset_id: asset_id.to_string(),
            downloaded_at: at,
            day: at.date_naive(),
            meta,
        }
    }
}

/// Outcome of a bounded record attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundedRecord {
    /// The record was appended. `used` is the count for the day including
    /// this download.
    Recorded { record: UsageRecord, used: u32 },
    /// The day's quota was already exhausted; nothing was written.
    LimitReached { used: u32 },
}

impl BoundedRecord {
    #[must_use]
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }
}

/// Storage for download usage.
///
/// `record_bounded` must be atomic per (user, day): a conforming backend
/// runs the count-and-append under a conditional insert, a transaction, or
/// an equivalent that serializes writers on the same key. Two independent
/// statements (count, then insert) do not conform.
#[async_trait]
pub trait UsageCounter: Send + Sync {
    /// Number of downloads the user has recorded on `day`.
    async fn count_for_day(&self, user_id: &str, day: NaiveDate) -> Result<u32>;

    /// Append a record unconditionally. Used for downloads that are
    /// audited but not quota-limited (admins).
    async fn record(&self, record: UsageRecord) -> Result<()>;

    /// Atomically append `record` if the user's count for the record's day
    /// is below `limit`.
    async fn record_bounded(&self, record: UsageRecord, limit: u32) -> Result<BoundedRecord>;

    /// All records for a user on a day, most recent last.
    async fn records_for_day(&self, user_id: &str, day: NaiveDate) -> Result<Vec<UsageRecord>>;
}

/// In-memory usage counter keyed by (user, UTC day).
///
/// The map's entry API holds a per-shard lock while the bounded check and
/// append run, which serializes writers on the same key without a global
/// lock.
#[derive(Default, Clone)]
pub struct InMemoryUsageCounter {
    records: Arc<DashMap<(String, NaiveDate), Vec<UsageRecord>>>,
}

impl InMemoryUsageCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageCounter for InMemoryUsageCounter {
    async fn count_for_day(&self, user_id: &str, day: NaiveDate) -> Result<u32> {
        let count = self
            .records
            .get(&(user_id.to_string(), day))
            .map_or(0, |entry| entry.len());
        Ok(count as u32)
    }

    async fn record(&self, record: UsageRecord) -> Result<()> {
        self.records
            .entry((record.user_id.clone(), record.day))
            .or_default()
            .push(record);
        Ok(())
    }

    async fn record_bounded(&self, record: UsageRecord, limit: u32) -> Result<BoundedRecord> {
        let mut entry = self
            .records
            .entry((record.user_id.clone(), record.day))
            .or_default();

        let used = entry.len() as u32;
        if used >= limit {
            return Ok(BoundedRecord::LimitReached { used });
        }

        entry.push(record.clone());
        Ok(BoundedRecord::Recorded {
            record,
            used: used + 1,
        })
    }

    async fn records_for_day(&self, user_id: &str, day: NaiveDate) -> Result<Vec<UsageRecord>> {
        Ok(self
            .records
            .get(&(user_id.to_string(), day))
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }
}
