use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{error, info, warn};

use crate::engine::{AuditTarget, EngineReport, EngineSession, MeasurementEngine};
use crate::models::{
    AuditRequest, AuditSummaryMeta, CompletePayload, RecordKind, RunAverages, RunResult,
    RunScores, StatusRecord,
};
use crate::store::StatusStore;

/// Live observer of one job's record stream. A closed receiver only ends
/// that observer's view; the store keeps the authoritative state.
pub type RecordSink = mpsc::UnboundedSender<StatusRecord>;

#[derive(Debug, Clone)]
pub struct EmitterSettings {
    /// Cadence of synthesized in-run progress records. Zero disables them.
    pub interim_tick: Duration,
    /// Pause between runs so downstream flushes settle.
    pub inter_run_delay: Duration,
    pub pacer_start: u8,
    pub pacer_increment: u8,
    pub pacer_ceiling: u8,
}

impl Default for EmitterSettings {
    fn default() -> Self {
        Self {
            interim_tick: Duration::from_millis(1000),
            inter_run_delay: Duration::from_millis(500),
            pacer_start: 10,
            pacer_increment: 12,
            pacer_ceiling: 90,
        }
    }
}

/// Deterministic replacement for the usual "random jitter" in-run progress:
/// climbs from `start` by `increment` per tick and saturates at `ceiling`,
/// reserving headroom for the definitive run-complete record.
struct ProgressPacer {
    current: f64,
    increment: f64,
    ceiling: f64,
}

impl ProgressPacer {
    fn new(settings: &EmitterSettings) -> Self {
        Self {
            current: f64::from(settings.pacer_start),
            increment: f64::from(settings.pacer_increment),
            ceiling: f64::from(settings.pacer_ceiling),
        }
    }

    fn next_value(&mut self) -> u8 {
        let value = self.current.min(self.ceiling);
        self.current += self.increment;
        value.round() as u8
    }
}

struct Emitter<'a> {
    store: &'a StatusStore,
    sinks: Vec<RecordSink>,
    job_id: &'a str,
}

impl Emitter<'_> {
    /// Store write first, then synchronous fan-out, so every observer sees
    /// the same ordering the store does.
    async fn emit(&self, record: StatusRecord) {
        let stored = self.store.put(self.job_id, record).await;
        for sink in &self.sinks {
            let _ = sink.send(stored.clone());
        }
        info!(
            job_id = %self.job_id,
            kind = ?stored.kind,
            progress = stored.progress,
            message = %stored.message,
            "Audit progress update"
        );
    }
}

/// Drives one audit job end to end: launches an engine session, executes
/// `runs` sequential measurements, translates their lifecycle into status
/// records, aggregates multi-run results, and never lets an engine failure
/// escape as anything but a single error record.
pub async fn run_audit_job(
    store: Arc<StatusStore>,
    engine: Arc<dyn MeasurementEngine>,
    settings: EmitterSettings,
    sinks: Vec<RecordSink>,
    job_id: String,
    request: AuditRequest,
) {
    let total_runs = request.runs.max(1);
    let started = Instant::now();
    let emitter = Emitter {
        store: &store,
        sinks,
        job_id: &job_id,
    };

    info!(
        job_id = %job_id,
        url = %request.url,
        device = ?request.device,
        throttle = ?request.throttle,
        runs = total_runs,
        "Audit job started"
    );

    emitter
        .emit(
            StatusRecord::new(RecordKind::Start, "Connection established, starting audit...", 0)
                .with_stage("connection")
                .with_total_runs(total_runs),
        )
        .await;
    emitter
        .emit(
            StatusRecord::new(RecordKind::Progress, "Preparing audit environment...", 2)
                .with_stage("preparation")
                .with_run(1, total_runs),
        )
        .await;
    emitter
        .emit(
            StatusRecord::new(RecordKind::Progress, "Configuring browser environment...", 10)
                .with_stage("browser-setup")
                .with_run(1, total_runs),
        )
        .await;

    let session = match engine.launch().await {
        Ok(session) => session,
        Err(err) => {
            emit_error(&emitter, &err, started).await;
            return;
        }
    };

    emitter
        .emit(
            StatusRecord::new(
                RecordKind::Progress,
                "Browser launched, preparing measurement engine...",
                25,
            )
            .with_stage("engine-setup")
            .with_run(1, total_runs),
        )
        .await;

    let outcome = run_all(&emitter, session.as_ref(), &settings, &request, total_runs).await;

    match outcome {
        Ok(results) => emit_complete(&emitter, &request, total_runs, results, started).await,
        Err(err) => emit_error(&emitter, &err, started).await,
    }

    if let Err(err) = session.close().await {
        warn!(job_id = %job_id, "Failed closing measurement session: {err:#}");
    }
}

async fn run_all(
    emitter: &Emitter<'_>,
    session: &dyn EngineSession,
    settings: &EmitterSettings,
    request: &AuditRequest,
    total_runs: u32,
) -> Result<Vec<RunResult>> {
    let progress_per_run = 100.0 / f64::from(total_runs);
    let target = AuditTarget {
        url: request.url.clone(),
        device: request.device,
        throttle: request.throttle,
    };

    let mut results = Vec::with_capacity(total_runs as usize);
    for index in 0..total_runs {
        let current = index + 1;
        emitter
            .emit(
                StatusRecord::new(
                    RecordKind::Progress,
                    format!("Running audit {current}/{total_runs} for {}", request.url),
                    0,
                )
                .with_stage("audit")
                .with_run(current, total_runs),
            )
            .await;

        let report =
            run_with_interim(emitter, session, settings, &target, current, total_runs).await?;

        let run_result = extract_run_result(report, current);
        let run_complete_progress = (f64::from(current) * progress_per_run).round() as u8;
        let mut record = StatusRecord::new(
            RecordKind::RunComplete,
            format!("Completed run {current}/{total_runs}"),
            run_complete_progress,
        )
        .with_stage("run-complete")
        .with_run(current, total_runs);
        record.run_result = Some(run_result.clone());
        emitter.emit(record).await;
        results.push(run_result);

        if current < total_runs && !settings.inter_run_delay.is_zero() {
            time::sleep(settings.inter_run_delay).await;
        }
    }

    Ok(results)
}

/// Runs one measurement, synthesizing interim progress records at the
/// configured cadence while the engine call is in flight. The engine
/// offers no native progress signal, so the pacer stays below its ceiling
/// until the run actually returns.
async fn run_with_interim(
    emitter: &Emitter<'_>,
    session: &dyn EngineSession,
    settings: &EmitterSettings,
    target: &AuditTarget,
    current: u32,
    total_runs: u32,
) -> Result<EngineReport> {
    let run_fut = session.run(target);
    if settings.interim_tick.is_zero() {
        return run_fut.await;
    }

    tokio::pin!(run_fut);
    let mut pacer = ProgressPacer::new(settings);
    let mut ticker = time::interval_at(
        time::Instant::now() + settings.interim_tick,
        settings.interim_tick,
    );

    loop {
        tokio::select! {
            report = &mut run_fut => return report,
            _ = ticker.tick() => {
                let sub_progress = pacer.next_value();
                emitter
                    .emit(
                        StatusRecord::new(
                            RecordKind::Progress,
                            format!("Analyzing performance... ({current}/{total_runs})"),
                            sub_progress,
                        )
                        .with_stage("audit-running")
                        .with_run(current, total_runs),
                    )
                    .await;
            }
        }
    }
}

fn extract_run_result(report: EngineReport, run: u32) -> RunResult {
    RunResult {
        run,
        scores: report.scores,
        metrics: report.metrics,
        opportunities: report.opportunities,
        diagnostics: report.diagnostics,
        url: report.final_url,
        timestamp: Utc::now(),
    }
}

async fn emit_complete(
    emitter: &Emitter<'_>,
    request: &AuditRequest,
    total_runs: u32,
    mut results: Vec<RunResult>,
    started: Instant,
) {
    emitter
        .emit(
            StatusRecord::new(RecordKind::Progress, "Processing final results...", 100)
                .with_stage("finalizing"),
        )
        .await;

    let summary = AuditSummaryMeta {
        total_runs,
        url: request.url.clone(),
        device: request.device,
        throttle: request.throttle,
        result_detail: request.result_detail,
    };

    let payload = if results.len() > 1 {
        CompletePayload::Multi {
            averages: calculate_averages(&results),
            runs: results,
            summary,
        }
    } else if let Some(run) = results.pop() {
        CompletePayload::Single { run, summary }
    } else {
        let err = anyhow::anyhow!("audit finished without producing any run results");
        emit_error(emitter, &err, started).await;
        return;
    };

    let mut record = StatusRecord::new(RecordKind::Complete, "Audit completed successfully!", 100)
        .with_stage("complete");
    record.data = Some(payload);
    emitter.emit(record).await;
}

async fn emit_error(emitter: &Emitter<'_>, err: &anyhow::Error, started: Instant) {
    error!(job_id = %emitter.job_id, "Audit failed: {err:#}");
    let mut record =
        StatusRecord::new(RecordKind::Error, format!("{err:#}"), 0).with_stage("error");
    record.execution_time_ms = Some(started.elapsed().as_millis() as u64);
    emitter.emit(record).await;
}

/// Field-wise arithmetic means across runs. Opportunities and diagnostics
/// are not averaged; the first run's values stand in as representative.
fn calculate_averages(results: &[RunResult]) -> RunAverages {
    let count = results.len().max(1) as f64;

    let mut performance = 0u32;
    let mut accessibility = 0u32;
    let mut best_practices = 0u32;
    let mut seo = 0u32;
    for result in results {
        performance += result.scores.performance;
        accessibility += result.scores.accessibility;
        best_practices += result.scores.best_practices;
        seo += result.scores.seo;
    }
    let round = |sum: u32| (f64::from(sum) / count).round() as u32;

    // Engine reports may disagree on which metrics they carry, so each
    // metric averages over the runs that actually reported it.
    let mut metric_sums: BTreeMap<String, (f64, u32)> = BTreeMap::new();
    for result in results {
        for (key, value) in &result.metrics {
            let entry = metric_sums.entry(key.clone()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    let metrics: BTreeMap<String, f64> = metric_sums
        .into_iter()
        .map(|(key, (sum, seen))| (key, (sum / f64::from(seen)).round()))
        .collect();

    RunAverages {
        scores: RunScores {
            performance: round(performance),
            accessibility: round(accessibility),
            best_practices: round(best_practices),
            seo: round(seo),
        },
        metrics,
        opportunities: results
            .first()
            .map(|result| result.opportunities.clone())
            .unwrap_or_else(|| json!({})),
        diagnostics: results
            .first()
            .map(|result| result.diagnostics.clone())
            .unwrap_or_else(|| json!({})),
    }
}
