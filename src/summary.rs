use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::RunScores;

/// Request shape the UI already sends: either a multi-set comparison
/// (`tableComparison` with `allRunsData`) or a single result with its
/// core metrics, scores and opportunities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRequest {
    #[serde(default)]
    pub table_comparison: bool,
    #[serde(default)]
    pub all_runs_data: Vec<Value>,
    #[serde(default)]
    pub core_metrics: Vec<CoreMetrics>,
    #[serde(default)]
    pub scores: Option<RunScores>,
    #[serde(default)]
    pub opportunities: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreMetrics {
    pub fcp: Option<f64>,
    pub lcp: Option<f64>,
    pub tti: Option<f64>,
    pub cls: Option<f64>,
    pub si: Option<f64>,
    pub tbt: Option<f64>,
    pub srt: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Thin client for an OpenAI-compatible chat-completions endpoint.
/// Stateless request/response transform; audit state never flows through it.
#[derive(Debug, Clone)]
pub struct SummaryClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl SummaryClient {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    pub async fn summarize(&self, request: &SummaryRequest) -> Result<String> {
        if request.table_comparison {
            let messages = comparison_messages(&request.all_runs_data)?;
            self.chat(messages, 700).await
        } else {
            let messages =
                single_result_messages(&request.core_metrics, request.scores, &request.opportunities);
            self.chat(messages, 500).await
        }
    }

    async fn chat(&self, messages: Vec<ChatMessage>, max_tokens: u32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
                max_tokens,
                temperature: 0.7,
            })
            .send()
            .await
            .with_context(|| format!("Failed to reach summary endpoint at {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Summary API error: {status} {}", body.trim());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to decode summary response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .context("Summary response contained no choices")
    }
}

fn comparison_messages(all_runs_data: &[Value]) -> Result<Vec<ChatMessage>> {
    let json_data = serde_json::to_string_pretty(all_runs_data)
        .context("Failed to encode run data for comparison prompt")?;
    Ok(vec![
        ChatMessage {
            role: "system",
            content: "You are a senior web-performance analyst. You will compare multiple \
                      audit result sets run-by-run, where each object corresponds to tests at \
                      different times. Highlight the biggest absolute and percentage deltas \
                      for each metric."
                .to_string(),
        },
        ChatMessage {
            role: "user",
            content: format!(
                "Here are the audit result sets in JSON:\n\n```json\n{json_data}\n```\n\n\
                 Give me the deltas between the sets of results in 3-4 lines.\n\
                 Express changes strictly in percentages.\n\
                 Use user-friendly language, avoiding technical jargon."
            ),
        },
    ])
}

fn single_result_messages(
    core_metrics: &[CoreMetrics],
    scores: Option<RunScores>,
    opportunities: &Value,
) -> Vec<ChatMessage> {
    let fmt = |value: Option<f64>| match value {
        Some(v) => v.to_string(),
        None => "n/a".to_string(),
    };

    let run_lines = core_metrics
        .iter()
        .enumerate()
        .map(|(idx, m)| {
            format!(
                "Run {}:\n  - FCP: {}\n  - LCP: {}\n  - TTI: {}\n  - CLS: {}\n  - SI: {}\n  - TBT: {}\n  - SRT: {}",
                idx + 1,
                fmt(m.fcp),
                fmt(m.lcp),
                fmt(m.tti),
                fmt(m.cls),
                fmt(m.si),
                fmt(m.tbt),
                fmt(m.srt),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let score_lines = match scores {
        Some(s) => format!(
            "- Performance: {}\n- Accessibility: {}\n- Best Practices: {}\n- SEO: {}",
            s.performance, s.accessibility, s.best_practices, s.seo
        ),
        None => "Scores not provided.".to_string(),
    };

    let opportunity_lines = opportunities
        .as_object()
        .map(|entries| {
            entries
                .values()
                .filter_map(|opp| {
                    let title = opp.get("title")?.as_str()?;
                    let description = opp
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    Some(format!("- {title}: {description}"))
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|lines| !lines.is_empty())
        .unwrap_or_else(|| "None provided.".to_string());

    vec![
        ChatMessage {
            role: "system",
            content: "You are an expert web performance engineer. Summarize performance audit \
                      results clearly and concisely."
                .to_string(),
        },
        ChatMessage {
            role: "user",
            content: format!(
                "Write a concise executive summary of this performance audit:\n{score_lines}\n\n\
                 Key metrics for each run:\n{run_lines}\n\n\
                 Top improvement opportunities:\n{opportunity_lines}\n\n\
                 Respond in 2-3 short paragraphs, highlighting strengths and the most critical \
                 areas for improvement."
            ),
        },
    ]
}
