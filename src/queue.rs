use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tracing::info;

use crate::emitter::{run_audit_job, EmitterSettings};
use crate::engine::MeasurementEngine;
use crate::models::AuditRequest;
use crate::store::StatusStore;

/// One background-delivery job handed from the accept handler to the worker.
pub struct QueuedAudit {
    pub job_id: String,
    pub request: AuditRequest,
}

/// Single worker draining the audit queue. Jobs run sequentially; each one
/// reports exclusively through the status store (no live sinks attached).
pub fn spawn_audit_worker(
    store: Arc<StatusStore>,
    engine: Arc<dyn MeasurementEngine>,
    settings: EmitterSettings,
    mut queue_rx: mpsc::Receiver<QueuedAudit>,
) {
    tokio::spawn(async move {
        while let Some(job) = queue_rx.recv().await {
            info!(job_id = %job.job_id, "Worker picked audit job");
            run_audit_job(
                Arc::clone(&store),
                Arc::clone(&engine),
                settings.clone(),
                Vec::new(),
                job.job_id,
                job.request,
            )
            .await;
        }
    });
}

/// Periodic retention sweep over the status store.
pub fn spawn_cleanup_worker(store: Arc<StatusStore>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            store.purge_expired().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::SimulatedEngine;
    use crate::models::{
        DeliveryMode, DeviceProfile, RecordKind, ResultDetail, ThrottleProfile,
    };

    #[tokio::test]
    async fn worker_drains_queue_and_completes_jobs() {
        let store = Arc::new(StatusStore::new(600));
        let engine = Arc::new(SimulatedEngine::new(Duration::ZERO));
        let settings = EmitterSettings {
            interim_tick: Duration::ZERO,
            inter_run_delay: Duration::ZERO,
            ..EmitterSettings::default()
        };
        let (tx, rx) = mpsc::channel(8);
        spawn_audit_worker(Arc::clone(&store), engine, settings, rx);

        tx.send(QueuedAudit {
            job_id: "audit-queued".to_string(),
            request: AuditRequest {
                url: "https://example.com".to_string(),
                device: DeviceProfile::Desktop,
                throttle: ThrottleProfile::None,
                runs: 1,
                result_detail: ResultDetail::Standard,
                delivery: DeliveryMode::Background,
            },
        })
        .await
        .unwrap();

        let mut terminal = None;
        for _ in 0..100 {
            let record = store.get("audit-queued").await;
            if record.is_terminal() {
                terminal = Some(record);
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }

        let record = terminal.expect("queued audit never reached a terminal record");
        assert_eq!(record.kind, RecordKind::Complete);
        assert_eq!(record.progress, 100);
    }
}
