use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Start,
    Progress,
    RunComplete,
    Complete,
    Error,
    NotFound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProfile {
    #[default]
    Desktop,
    Mobile,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleProfile {
    #[default]
    None,
    #[serde(rename = "3g")]
    Cellular3g,
    #[serde(rename = "4g")]
    Cellular4g,
    Slow,
    Fast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultDetail {
    #[default]
    Standard,
    Full,
}

/// How status records reach the client: a live SSE stream, a background
/// worker polled via the status endpoint, or the advance-driven simulated
/// fallback for hosts that cannot keep an emitter task alive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Stream,
    Background,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub url: String,
    #[serde(default)]
    pub device: DeviceProfile,
    #[serde(default)]
    pub throttle: ThrottleProfile,
    #[serde(default = "default_runs")]
    pub runs: u32,
    #[serde(default)]
    pub result_detail: ResultDetail,
    #[serde(default)]
    pub delivery: DeliveryMode,
}

fn default_runs() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunScores {
    pub performance: u32,
    pub accessibility: u32,
    pub best_practices: u32,
    pub seo: u32,
}

/// One measurement run's extracted result. Metrics are a flat name -> value
/// map so multi-run aggregation can average field-wise without knowing the
/// engine's metric catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run: u32,
    pub scores: RunScores,
    pub metrics: BTreeMap<String, f64>,
    pub opportunities: Value,
    pub diagnostics: Value,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAverages {
    pub scores: RunScores,
    pub metrics: BTreeMap<String, f64>,
    pub opportunities: Value,
    pub diagnostics: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummaryMeta {
    pub total_runs: u32,
    pub url: String,
    pub device: DeviceProfile,
    pub throttle: ThrottleProfile,
    pub result_detail: ResultDetail,
}

/// Terminal payload shape: `{run, summary}` for a single run,
/// `{runs, averages, summary}` when the job averaged several.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletePayload {
    Multi {
        runs: Vec<RunResult>,
        averages: RunAverages,
        summary: AuditSummaryMeta,
    },
    Single {
        run: RunResult,
        summary: AuditSummaryMeta,
    },
}

/// The atomic progress message for one job. Exactly one record is current
/// per job id: the store overwrites on every write and never keeps history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    /// Mirrors `kind` for the not-found sentinel only, matching the wire
    /// shape pollers check (`status == "not-found"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub message: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_run: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_runs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_result: Option<RunResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<CompletePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Index into the simulated step table. Present only on records owned
    /// by the advance-driven fallback; its absence marks an emitter-owned
    /// job that `advance` must not touch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    /// Stamped by the store on every put.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl StatusRecord {
    pub fn new(kind: RecordKind, message: impl Into<String>, progress: u8) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            progress,
            stage: None,
            current_run: None,
            total_runs: None,
            run_result: None,
            data: None,
            execution_time_ms: None,
            step: None,
            timestamp: None,
        }
    }

    pub fn not_found() -> Self {
        let mut record = Self::new(RecordKind::NotFound, "Audit not found", 0);
        record.status = Some("not-found".to_string());
        record
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_run(mut self, current_run: u32, total_runs: u32) -> Self {
        self.current_run = Some(current_run);
        self.total_runs = Some(total_runs);
        self
    }

    pub fn with_total_runs(mut self, total_runs: u32) -> Self {
        self.total_runs = Some(total_runs);
        self
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RecordKind::NotFound
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditAcceptedResponse {
    pub job_id: String,
    pub delivery: DeliveryMode,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_kind_uses_kebab_case_tags() {
        let record = StatusRecord::new(RecordKind::RunComplete, "done", 33);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "run-complete");
        assert_eq!(value["progress"], 33);
        assert!(value.get("currentRun").is_none());
    }

    #[test]
    fn not_found_sentinel_shape() {
        let value = serde_json::to_value(StatusRecord::not_found()).unwrap();
        assert_eq!(value["type"], "not-found");
        assert_eq!(value["status"], "not-found");
        assert_eq!(value["progress"], 0);
    }

    #[test]
    fn audit_request_defaults() {
        let request: AuditRequest =
            serde_json::from_value(json!({ "url": "https://example.com" })).unwrap();
        assert_eq!(request.device, DeviceProfile::Desktop);
        assert_eq!(request.throttle, ThrottleProfile::None);
        assert_eq!(request.runs, 1);
        assert_eq!(request.delivery, DeliveryMode::Stream);
    }

    #[test]
    fn throttle_profiles_use_their_wire_names() {
        for (profile, name) in [
            (ThrottleProfile::Cellular3g, "3g"),
            (ThrottleProfile::Cellular4g, "4g"),
            (ThrottleProfile::Slow, "slow"),
        ] {
            assert_eq!(serde_json::to_value(profile).unwrap(), json!(name));
        }
    }

    #[test]
    fn complete_payload_shapes_are_distinguishable() {
        let run = RunResult {
            run: 1,
            scores: RunScores {
                performance: 85,
                accessibility: 92,
                best_practices: 88,
                seo: 90,
            },
            metrics: BTreeMap::new(),
            opportunities: json!({}),
            diagnostics: json!({}),
            url: "https://example.com".to_string(),
            timestamp: Utc::now(),
        };
        let summary = AuditSummaryMeta {
            total_runs: 1,
            url: "https://example.com".to_string(),
            device: DeviceProfile::Desktop,
            throttle: ThrottleProfile::None,
            result_detail: ResultDetail::Standard,
        };

        let single = serde_json::to_value(CompletePayload::Single {
            run: run.clone(),
            summary: summary.clone(),
        })
        .unwrap();
        assert!(single.get("run").is_some());
        assert!(single.get("runs").is_none());

        let multi = serde_json::to_value(CompletePayload::Multi {
            runs: vec![run.clone(), run],
            averages: RunAverages {
                scores: RunScores {
                    performance: 85,
                    accessibility: 92,
                    best_practices: 88,
                    seo: 90,
                },
                metrics: BTreeMap::new(),
                opportunities: json!({}),
                diagnostics: json!({}),
            },
            summary,
        })
        .unwrap();
        assert!(multi.get("runs").is_some());
        assert!(multi.get("averages").is_some());

        match serde_json::from_value::<CompletePayload>(multi).unwrap() {
            CompletePayload::Multi { runs, .. } => assert_eq!(runs.len(), 2),
            CompletePayload::Single { .. } => panic!("multi payload decoded as single"),
        }
    }
}
