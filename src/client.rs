use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time;
use tracing::debug;

use crate::models::{CompletePayload, RecordKind, RunResult, RunScores, StatusRecord};

/// One row of the per-run comparison table.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRow {
    pub run: u32,
    pub fcp: Option<f64>,
    pub lcp: Option<f64>,
    pub tti: Option<f64>,
    pub cls: Option<f64>,
    pub si: Option<f64>,
    pub tbt: Option<f64>,
    pub srt: Option<f64>,
}

impl RunRow {
    fn from_result(result: &RunResult) -> Self {
        let metric = |key: &str| result.metrics.get(key).copied();
        Self {
            run: result.run,
            fcp: metric("firstContentfulPaint"),
            lcp: metric("largestContentfulPaint"),
            tti: metric("timeToInteractive"),
            cls: metric("cumulativeLayoutShift"),
            si: metric("speedIndex"),
            tbt: metric("totalBlockingTime"),
            srt: metric("serverResponseTime"),
        }
    }
}

/// Folds a stream of status records, possibly reordered, duplicated or
/// coarse-grained, into stable display state. Progress only ever moves
/// forward, except for the explicit reset a new `start` forces.
#[derive(Debug)]
pub struct AuditView {
    pub progress: u8,
    pub message: String,
    pub stage: String,
    pub total_runs: u32,
    pub completed_runs: u32,
    pub scores: Option<RunScores>,
    pub metrics: BTreeMap<String, f64>,
    pub opportunities: Value,
    pub diagnostics: Value,
    pub run_rows: Vec<RunRow>,
    pub result: Option<CompletePayload>,
    pub error: Option<String>,
}

impl Default for AuditView {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditView {
    pub fn new() -> Self {
        Self {
            progress: 0,
            message: String::new(),
            stage: String::new(),
            total_runs: 1,
            completed_runs: 0,
            scores: None,
            metrics: BTreeMap::new(),
            opportunities: Value::Null,
            diagnostics: Value::Null,
            run_rows: Vec::new(),
            result: None,
            error: None,
        }
    }

    pub fn apply(&mut self, record: &StatusRecord) {
        if self.error.is_some() {
            return;
        }

        if let Some(total) = record.total_runs {
            self.total_runs = total.max(1);
        }

        let candidate = match (record.current_run, record.total_runs) {
            (Some(run), Some(total)) if total > 0 => {
                normalized_progress(record.progress, run, total)
            }
            _ => record.progress,
        };
        if candidate > self.progress {
            self.progress = candidate;
        }
        self.message = record.message.clone();
        self.stage = record.stage.clone().unwrap_or_default();

        match record.kind {
            RecordKind::Start => {
                self.progress = 0;
                self.completed_runs = 0;
                self.scores = None;
                self.metrics.clear();
                self.opportunities = Value::Null;
                self.diagnostics = Value::Null;
                self.run_rows.clear();
                self.result = None;
            }
            RecordKind::Progress | RecordKind::NotFound => {}
            RecordKind::RunComplete => {
                if let (Some(run), Some(total)) = (record.current_run, record.total_runs) {
                    self.completed_runs = run;
                    let settled = normalized_progress(100, run, total.max(1));
                    if settled > self.progress {
                        self.progress = settled;
                    }
                }
                if let Some(result) = &record.run_result {
                    // Later runs overwrite earlier ones for live display;
                    // the terminal record remains authoritative.
                    self.scores = Some(result.scores);
                    self.metrics = result.metrics.clone();
                    self.opportunities = result.opportunities.clone();
                    self.diagnostics = result.diagnostics.clone();
                    self.run_rows.push(RunRow::from_result(result));
                }
            }
            RecordKind::Complete => {
                self.progress = 100;
                if let Some(data) = &record.data {
                    self.result = Some(data.clone());
                    match data {
                        CompletePayload::Single { run, .. } => {
                            self.scores = Some(run.scores);
                            self.metrics = run.metrics.clone();
                            self.opportunities = run.opportunities.clone();
                            self.diagnostics = run.diagnostics.clone();
                        }
                        CompletePayload::Multi { averages, .. } => {
                            self.scores = Some(averages.scores);
                            self.metrics = averages.metrics.clone();
                            self.opportunities = averages.opportunities.clone();
                            self.diagnostics = averages.diagnostics.clone();
                        }
                    }
                }
            }
            RecordKind::Error => {
                self.error = Some(record.message.clone());
            }
        }
    }
}

/// Weighted multi-run progress: completed runs contribute whole windows,
/// the current run contributes its sub-progress share of one window.
fn normalized_progress(sub_progress: u8, current_run: u32, total_runs: u32) -> u8 {
    let window = 100.0 / f64::from(total_runs.max(1));
    let completed = f64::from(current_run.saturating_sub(1)) * window;
    let current = f64::from(sub_progress) / 100.0 * window;
    (completed + current).round() as u8
}

/// Transport seam for the polling client: advance the simulated state, read
/// the current record.
#[async_trait]
pub trait StatusClient: Send + Sync {
    async fn advance(&self, job_id: &str) -> Result<StatusRecord>;
    async fn status(&self, job_id: &str) -> Result<StatusRecord>;
}

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Polls a job to completion: advance first so each poll observes forward
/// motion even without a live emitter, then read, dedupe, and fold into the
/// view. Transient transport failures are retried silently until the
/// overall timeout.
pub async fn poll_until_terminal(
    client: &dyn StatusClient,
    job_id: &str,
    options: &PollOptions,
) -> Result<AuditView> {
    let mut view = AuditView::new();
    let mut last_key: Option<(RecordKind, u8, Option<DateTime<Utc>>)> = None;
    let deadline = time::Instant::now() + options.timeout;

    loop {
        let mut observed: Vec<StatusRecord> = Vec::new();
        match client.advance(job_id).await {
            Ok(record) => observed.push(record),
            Err(err) => debug!(job_id = %job_id, "Advance failed, will retry: {err:#}"),
        }
        match client.status(job_id).await {
            Ok(record) => observed.push(record),
            Err(err) => debug!(job_id = %job_id, "Status poll failed, will retry: {err:#}"),
        }

        for record in observed {
            if record.is_not_found() {
                continue;
            }
            let key = (record.kind, record.progress, record.timestamp);
            if last_key.as_ref() == Some(&key) {
                continue;
            }
            last_key = Some(key);
            view.apply(&record);
            if record.is_terminal() {
                return Ok(view);
            }
        }

        if time::Instant::now() + options.interval > deadline {
            bail!(
                "Polling for {job_id} timed out after {:?} without a terminal record",
                options.timeout
            );
        }
        time::sleep(options.interval).await;
    }
}

/// `StatusClient` over the HTTP API.
#[derive(Debug, Clone)]
pub struct HttpStatusClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpStatusClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_record(&self, request: reqwest::RequestBuilder, url: &str) -> Result<StatusRecord> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("Unexpected status {status} from {url}");
        }
        response
            .json::<StatusRecord>()
            .await
            .with_context(|| format!("Failed to decode status record from {url}"))
    }
}

#[async_trait]
impl StatusClient for HttpStatusClient {
    async fn advance(&self, job_id: &str) -> Result<StatusRecord> {
        let url = format!("{}/v1/audits/{job_id}/advance", self.base_url);
        self.fetch_record(self.http.post(&url), &url).await
    }

    async fn status(&self, job_id: &str) -> Result<StatusRecord> {
        let url = format!("{}/v1/audits/{job_id}", self.base_url);
        self.fetch_record(self.http.get(&url), &url).await
    }
}
