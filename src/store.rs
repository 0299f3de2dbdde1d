use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::StatusRecord;

/// Last-write-wins keyed store for the current status of each job.
///
/// One writer per job id (its emitter, or the advance fallback), any number
/// of concurrent readers. Entries older than the retention window are
/// treated as gone: reads return the not-found sentinel and purges drop
/// them from the map.
pub struct StatusStore {
    retention: ChronoDuration,
    records: RwLock<HashMap<String, StatusRecord>>,
}

impl StatusStore {
    pub fn new(retention_seconds: u64) -> Self {
        Self {
            retention: ChronoDuration::seconds(retention_seconds.min(i64::MAX as u64) as i64),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Persists `record` as the current status for `job_id`, stamping a
    /// fresh timestamp and overwriting any prior record. Opportunistically
    /// purges expired entries on the way; purging never affects the caller.
    pub async fn put(&self, job_id: &str, mut record: StatusRecord) -> StatusRecord {
        let now = Utc::now();
        record.timestamp = Some(now);

        let mut records = self.records.write().await;
        if let Some(previous) = records.get(job_id) {
            if !previous.phase().can_transition_to(record.phase()) {
                debug!(
                    job_id = %job_id,
                    from = ?previous.phase(),
                    to = ?record.phase(),
                    "Out-of-order status transition, keeping last write"
                );
            }
        }
        records.insert(job_id.to_string(), record.clone());
        let purged = purge_locked(&mut records, now - self.retention);
        drop(records);

        if purged > 0 {
            debug!(purged, "Purged expired status records during put");
        }
        debug!(
            job_id = %job_id,
            kind = ?record.kind,
            progress = record.progress,
            "Status record stored"
        );
        record
    }

    /// Latest record for `job_id`, or the not-found sentinel when the job
    /// is unknown or its record has aged out. Never fails.
    pub async fn get(&self, job_id: &str) -> StatusRecord {
        let cutoff = Utc::now() - self.retention;
        let records = self.records.read().await;
        match records.get(job_id) {
            Some(record) if !is_expired(record, cutoff) => record.clone(),
            _ => StatusRecord::not_found(),
        }
    }

    /// All live entries; diagnostics only.
    pub async fn list_active(&self) -> Vec<(String, StatusRecord)> {
        let cutoff = Utc::now() - self.retention;
        let records = self.records.read().await;
        records
            .iter()
            .filter(|(_, record)| !is_expired(record, cutoff) && !record.is_not_found())
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Drops every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let mut records = self.records.write().await;
        let purged = purge_locked(&mut records, cutoff);
        drop(records);
        if purged > 0 {
            info!(purged, "Expired audit status records removed");
        }
        purged
    }

    #[cfg(test)]
    pub(crate) async fn put_with_timestamp(
        &self,
        job_id: &str,
        mut record: StatusRecord,
        timestamp: DateTime<Utc>,
    ) {
        record.timestamp = Some(timestamp);
        self.records
            .write()
            .await
            .insert(job_id.to_string(), record);
    }
}

fn is_expired(record: &StatusRecord, cutoff: DateTime<Utc>) -> bool {
    match record.timestamp {
        Some(timestamp) => timestamp < cutoff,
        None => false,
    }
}

fn purge_locked(records: &mut HashMap<String, StatusRecord>, cutoff: DateTime<Utc>) -> usize {
    let before = records.len();
    records.retain(|_, record| !is_expired(record, cutoff));
    before - records.len()
}
