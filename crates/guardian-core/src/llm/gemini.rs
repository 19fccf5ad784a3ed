use super::{build_prompt, AnalysisClient, ContentKind};
use crate::risk::{Assessment, RiskLevel};
use crate::settings::ServiceSettings;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    url: String,
    api_key: String,
    max_retries: u32,
}

impl GeminiClient {
    pub fn new(settings: &ServiceSettings) -> Result<Self> {
        let api_key = match settings.gemini_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => bail!(
                "Gemini API key must be provided via {}",
                ServiceSettings::GEMINI_KEY_ENV
            ),
        };
        let base = settings
            .gemini_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let model = settings
            .gemini_model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            base.trim_end_matches('/'),
            model
        );
        let http = Client::builder()
            .user_agent(concat!("cyber-guardian/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout())
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            http,
            url,
            api_key,
            max_retries: settings.max_retries,
        })
    }
}

#[async_trait]
impl AnalysisClient for GeminiClient {
    #[instrument(name = "gemini_analyze", skip(self, content, kind), fields(kind = %kind, content_len = content.len()))]
    async fn analyze(&self, content: &str, kind: ContentKind) -> Result<Assessment> {
        let payload = GeminiRequest {
            contents: vec![GeminiRequestContent {
                role: "user".into(),
                parts: vec![GeminiRequestPart {
                    text: Some(build_prompt(content, kind)),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: verdict_schema(),
            },
        };

        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(200);
        loop {
            let response = self
                .http
                .post(&self.url)
                .query(&[("key", &self.api_key)])
                .json(&payload)
                .send()
                .await;

            let response = match response {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(err).context("failed to call Gemini generateContent API");
                    }
                    warn!(attempt, error = %err, "Gemini request failed; retrying");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(5));
                    attempt += 1;
                    continue;
                }
            };

            if !response.status().is_success() {
                if attempt >= self.max_retries {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    bail!("Gemini API error ({}): {}", status, body);
                }
                warn!(attempt, status = %response.status(), "Gemini returned an error status; retrying");
                sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(5));
                attempt += 1;
                continue;
            }

            let message: GeminiResponse = response
                .json()
                .await
                .context("failed to parse Gemini response")?;
            let content = message
                .candidates
                .into_iter()
                .flat_map(|candidate| candidate.content.parts)
                .filter_map(|part| part.text)
                .find(|text| !text.trim().is_empty())
                .ok_or_else(|| anyhow!("Gemini response missing message content"))?;

            let verdict = parse_verdict(&content)?;
            debug!(risk = %verdict.risk, score = verdict.score, "Gemini verdict received");
            return Ok(verdict);
        }
    }
}

/// Validate the model's JSON against the `{risk, score, reason}` schema.
fn parse_verdict(raw: &str) -> Result<Assessment> {
    let verdict: ModelVerdict =
        serde_json::from_str(raw.trim()).context("expected JSON verdict from Gemini response")?;
    let risk = RiskLevel::from_label(&verdict.risk)
        .ok_or_else(|| anyhow!("Gemini returned unexpected risk label `{}`", verdict.risk))?;
    if !verdict.score.is_finite() {
        bail!("Gemini returned a non-numeric score");
    }
    let score = verdict.score.round().clamp(0.0, 100.0) as u8;
    Ok(Assessment::new(risk, score, verdict.reason.trim()))
}

fn verdict_schema() -> Value {
    json!({
        "type": "OBJECT",
        "description": "Security analysis result",
        "properties": {
            "risk": {
                "type": "STRING",
                "description": "Risk level: LOW, MEDIUM, or HIGH",
                "nullable": false
            },
            "score": {
                "type": "NUMBER",
                "description": "Safety score from 0-100",
                "nullable": false
            },
            "reason": {
                "type": "STRING",
                "description": "Brief explanation of why this risk level was assigned",
                "nullable": false
            }
        },
        "required": ["risk", "score", "reason"]
    })
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiRequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
    #[serde(rename = "responseSchema")]
    response_schema: Value,
}

#[derive(Serialize)]
struct GeminiRequestContent {
    role: String,
    parts: Vec<GeminiRequestPart>,
}

#[derive(Serialize)]
struct GeminiRequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ModelVerdict {
    risk: String,
    score: f64,
    reason: String,
}
