use std::{env, net::SocketAddr, time::Duration};

use anyhow::Result;

use crate::emitter::EmitterSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// How long a job's status record stays readable after its last write.
    pub retention_seconds: u64,
    pub queue_capacity: usize,
    pub max_runs: u32,
    pub interim_tick_ms: u64,
    pub inter_run_delay_ms: u64,
    pub engine_latency_ms: u64,
    pub summary_base_url: String,
    pub summary_model: String,
    pub summary_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_raw = env::var("BEACON_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_normalized = bind_raw
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();
        let bind_addr = bind_normalized
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let retention_seconds = env::var("BEACON_RETENTION_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10 * 60);

        let queue_capacity = env::var("BEACON_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(128);

        let max_runs = env::var("BEACON_MAX_RUNS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        let interim_tick_ms = env::var("BEACON_INTERIM_TICK_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1000);

        let inter_run_delay_ms = env::var("BEACON_INTER_RUN_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(500);

        let engine_latency_ms = env::var("BEACON_ENGINE_LATENCY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3000);

        let summary_base_url = env::var("BEACON_SUMMARY_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let summary_model =
            env::var("BEACON_SUMMARY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let summary_api_key = env::var("BEACON_SUMMARY_API_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            bind_addr,
            retention_seconds,
            queue_capacity,
            max_runs,
            interim_tick_ms,
            inter_run_delay_ms,
            engine_latency_ms,
            summary_base_url,
            summary_model,
            summary_api_key,
        })
    }

    pub fn emitter_settings(&self) -> EmitterSettings {
        EmitterSettings {
            interim_tick: Duration::from_millis(self.interim_tick_ms),
            inter_run_delay: Duration::from_millis(self.inter_run_delay_ms),
            ..EmitterSettings::default()
        }
    }
}
