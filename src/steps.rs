use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::models::{
    AuditSummaryMeta, CompletePayload, DeviceProfile, RecordKind, ResultDetail, RunResult,
    RunScores, StatusRecord, ThrottleProfile,
};
use crate::store::StatusStore;

/// Fixed step sequence for the simulated fallback. The client drives a job
/// through these via the advance endpoint when no emitter task can run.
pub struct SimStep {
    pub progress: u8,
    pub message: &'static str,
    pub kind: RecordKind,
    pub stage: &'static str,
}

pub const SIM_STEPS: &[SimStep] = &[
    SimStep {
        progress: 0,
        message: "Audit initialized, waiting for progress...",
        kind: RecordKind::Start,
        stage: "starting",
    },
    SimStep {
        progress: 10,
        message: "Preparing browser...",
        kind: RecordKind::Progress,
        stage: "running",
    },
    SimStep {
        progress: 25,
        message: "Launching browser...",
        kind: RecordKind::Progress,
        stage: "running",
    },
    SimStep {
        progress: 40,
        message: "Loading page...",
        kind: RecordKind::Progress,
        stage: "running",
    },
    SimStep {
        progress: 60,
        message: "Running performance audit...",
        kind: RecordKind::Progress,
        stage: "running",
    },
    SimStep {
        progress: 80,
        message: "Analyzing results...",
        kind: RecordKind::Progress,
        stage: "running",
    },
    SimStep {
        progress: 100,
        message: "Audit completed!",
        kind: RecordKind::Complete,
        stage: "complete",
    },
];

pub fn record_for_step(index: usize) -> StatusRecord {
    let index = index.min(SIM_STEPS.len() - 1);
    let step = &SIM_STEPS[index];
    let mut record = StatusRecord::new(step.kind, step.message, step.progress)
        .with_stage(step.stage)
        .with_step(index);
    if step.kind == RecordKind::Complete {
        record.data = Some(canned_result());
    }
    record
}

/// Advances a simulated job by one step and persists the result.
///
/// Not-found jobs are initialized at step 0; terminal records are returned
/// untouched so repeated advances are no-ops; records without a `step`
/// field belong to a live emitter and are never advanced past it.
pub async fn advance(store: &StatusStore, job_id: &str) -> StatusRecord {
    let current = store.get(job_id).await;

    if current.is_not_found() {
        debug!(job_id = %job_id, "Initializing simulated audit at step 0");
        return store.put(job_id, record_for_step(0)).await;
    }
    if current.is_terminal() {
        return current;
    }
    let Some(step) = current.step else {
        return current;
    };

    let next = (step + 1).min(SIM_STEPS.len() - 1);
    debug!(job_id = %job_id, from = step, to = next, "Advancing simulated audit");
    store.put(job_id, record_for_step(next)).await
}

fn canned_result() -> CompletePayload {
    let mut metrics = BTreeMap::new();
    metrics.insert("firstContentfulPaint".to_string(), 1200.0);
    metrics.insert("largestContentfulPaint".to_string(), 2100.0);

    CompletePayload::Single {
        run: RunResult {
            run: 1,
            scores: RunScores {
                performance: 85,
                accessibility: 92,
                best_practices: 88,
                seo: 90,
            },
            metrics,
            opportunities: json!({}),
            diagnostics: json!({}),
            url: "https://example.com".to_string(),
            timestamp: Utc::now(),
        },
        summary: AuditSummaryMeta {
            total_runs: 1,
            url: "https://example.com".to_string(),
            device: DeviceProfile::Desktop,
            throttle: ThrottleProfile::None,
            result_detail: ResultDetail::Standard,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn advance_initializes_unknown_jobs_at_step_zero() {
        let store = StatusStore::new(600);
        let record = advance(&store, "audit-sim").await;
        assert_eq!(record.kind, RecordKind::Start);
        assert_eq!(record.step, Some(0));
        assert_eq!(record.progress, 0);
    }

    #[tokio::test]
    async fn advance_walks_the_table_in_order() {
        let store = StatusStore::new(600);
        advance(&store, "audit-sim").await;

        let mut last_progress = 0;
        for expected_step in 1..SIM_STEPS.len() {
            let record = advance(&store, "audit-sim").await;
            assert_eq!(record.step, Some(expected_step));
            assert!(record.progress >= last_progress);
            last_progress = record.progress;
        }

        let terminal = store.get("audit-sim").await;
        assert_eq!(terminal.kind, RecordKind::Complete);
        assert_eq!(terminal.progress, 100);
        assert!(terminal.data.is_some());
    }

    #[tokio::test]
    async fn advance_past_terminal_is_idempotent() {
        let store = StatusStore::new(600);
        for _ in 0..SIM_STEPS.len() {
            advance(&store, "audit-sim").await;
        }
        let first = advance(&store, "audit-sim").await;
        let second = advance(&store, "audit-sim").await;

        assert_eq!(first.kind, RecordKind::Complete);
        assert_eq!(second.kind, RecordKind::Complete);
        // No re-put on terminal records, so the stamp does not move.
        assert_eq!(first.timestamp, second.timestamp);
    }

    #[tokio::test]
    async fn advance_leaves_emitter_owned_jobs_alone() {
        let store = StatusStore::new(600);
        store
            .put(
                "audit-live",
                StatusRecord::new(RecordKind::Progress, "Analyzing performance...", 45)
                    .with_run(1, 2),
            )
            .await;

        let record = advance(&store, "audit-live").await;
        assert_eq!(record.progress, 45);
        assert_eq!(record.step, None);
        assert_eq!(store.get("audit-live").await.progress, 45);
    }

    #[test]
    fn canned_complete_carries_the_fixture_scores() {
        match canned_result() {
            CompletePayload::Single { run, .. } => {
                assert_eq!(run.scores.performance, 85);
                assert_eq!(run.scores.seo, 90);
                assert_eq!(run.metrics["firstContentfulPaint"], 1200.0);
            }
            CompletePayload::Multi { .. } => panic!("canned result must be single-run"),
        }
    }
}
