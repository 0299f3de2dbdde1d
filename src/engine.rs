use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::models::{DeviceProfile, RunScores, ThrottleProfile};

#[derive(Debug, Clone)]
pub struct AuditTarget {
    pub url: String,
    pub device: DeviceProfile,
    pub throttle: ThrottleProfile,
}

/// What one engine run hands back: category scores plus raw numeric
/// metrics and the pass-through opportunity/diagnostic objects.
#[derive(Debug, Clone)]
pub struct EngineReport {
    pub scores: RunScores,
    pub metrics: BTreeMap<String, f64>,
    pub opportunities: Value,
    pub diagnostics: Value,
    pub final_url: String,
}

/// Seam to the external measurement engine. The engine is opaque to the
/// emitter: launch a session, run it once per measurement, close it.
#[async_trait]
pub trait MeasurementEngine: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn EngineSession>>;
}

/// A launched engine instance. Exclusively owned by one job's emitter and
/// closed on every exit path.
#[async_trait]
pub trait EngineSession: Send + Sync {
    async fn run(&self, target: &AuditTarget) -> Result<EngineReport>;
    async fn close(&self) -> Result<()>;
}

/// Deterministic stand-in for a real browser-driving engine. Produces the
/// fixture scores with a small per-run drift so multi-run averaging has
/// something to chew on.
pub struct SimulatedEngine {
    latency: Duration,
}

impl SimulatedEngine {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl MeasurementEngine for SimulatedEngine {
    async fn launch(&self) -> Result<Box<dyn EngineSession>> {
        debug!("Launching simulated measurement session");
        Ok(Box::new(SimulatedSession {
            latency: self.latency,
            runs_started: AtomicU32::new(0),
        }))
    }
}

struct SimulatedSession {
    latency: Duration,
    runs_started: AtomicU32,
}

#[async_trait]
impl EngineSession for SimulatedSession {
    async fn run(&self, target: &AuditTarget) -> Result<EngineReport> {
        let index = self.runs_started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        let drift = index % 3;
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "firstContentfulPaint".to_string(),
            1200.0 + f64::from(index) * 40.0,
        );
        metrics.insert(
            "largestContentfulPaint".to_string(),
            2100.0 + f64::from(index) * 80.0,
        );
        metrics.insert("speedIndex".to_string(), 3400.0 + f64::from(index) * 25.0);
        metrics.insert(
            "totalBlockingTime".to_string(),
            150.0 + f64::from(index) * 10.0,
        );
        metrics.insert("cumulativeLayoutShift".to_string(), 0.05);

        Ok(EngineReport {
            scores: RunScores {
                performance: 85 - drift,
                accessibility: 92,
                best_practices: 88 + drift,
                seo: 90,
            },
            metrics,
            opportunities: json!({
                "render-blocking-resources": {
                    "title": "Eliminate render-blocking resources",
                    "savingsMs": 450,
                    "score": 0.6
                }
            }),
            diagnostics: json!({
                "bootup-time": {
                    "title": "JavaScript execution time",
                    "numericValue": 820.0
                }
            }),
            final_url: target.url.clone(),
        })
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing simulated measurement session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> AuditTarget {
        AuditTarget {
            url: "https://example.com".to_string(),
            device: DeviceProfile::Desktop,
            throttle: ThrottleProfile::None,
        }
    }

    #[tokio::test]
    async fn simulated_runs_drift_deterministically() {
        let engine = SimulatedEngine::new(Duration::ZERO);
        let session = engine.launch().await.unwrap();

        let first = session.run(&target()).await.unwrap();
        let second = session.run(&target()).await.unwrap();

        assert_eq!(first.scores.performance, 85);
        assert_eq!(second.scores.performance, 84);
        assert_eq!(first.metrics["firstContentfulPaint"], 1200.0);
        assert_eq!(second.metrics["firstContentfulPaint"], 1240.0);
        assert_eq!(first.final_url, "https://example.com");

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn fresh_sessions_start_from_run_zero() {
        let engine = SimulatedEngine::new(Duration::ZERO);
        let a = engine.launch().await.unwrap();
        a.run(&target()).await.unwrap();
        a.run(&target()).await.unwrap();

        let b = engine.launch().await.unwrap();
        let report = b.run(&target()).await.unwrap();
        assert_eq!(report.scores.performance, 85);
    }
}
