use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::settings::ServiceSettings;

const DEFAULT_ENDPOINT: &str = "https://safebrowsing.googleapis.com";
const MIN_KEY_LEN: usize = 20;
const THREAT_TYPES: [&str; 4] = [
    "MALWARE",
    "SOCIAL_ENGINEERING",
    "UNWANTED_SOFTWARE",
    "POTENTIALLY_HARMFUL_APPLICATION",
];

/// A positive hit from the reputation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatMatch {
    pub threat_type: String,
    pub platform_type: String,
    pub url: String,
}

/// Result of asking the reputation service about a URL.
///
/// `Skipped` means no signal at all; it must never be read as `Clean`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ReputationOutcome {
    Clean,
    Threats(Vec<ThreatMatch>),
    Skipped(String),
}

impl ReputationOutcome {
    pub fn is_threat(&self) -> bool {
        matches!(self, Self::Threats(matches) if !matches.is_empty())
    }
}

/// Abstraction over URL reputation services.
#[async_trait]
pub trait ReputationCheck: Send + Sync {
    /// Look the URL up. Implementations fold every failure into `Skipped`.
    async fn check(&self, url: &str) -> ReputationOutcome;
}

/// Client for the Safe Browsing v4 `threatMatches:find` lookup.
#[derive(Debug, Clone)]
pub struct SafeBrowsingClient {
    http: Client,
    url: String,
    api_key: Option<String>,
}

impl SafeBrowsingClient {
    pub fn new(settings: &ServiceSettings) -> Result<Self> {
        let api_key = match settings.safe_browsing_api_key.as_deref() {
            None => {
                warn!(
                    "{} is not set; reputation checks will be skipped",
                    ServiceSettings::SAFE_BROWSING_KEY_ENV
                );
                None
            }
            Some(key) if key.len() < MIN_KEY_LEN => {
                warn!("Safe Browsing API key looks too short; reputation checks will be skipped");
                None
            }
            Some(key) => Some(key.to_string()),
        };
        let base = settings
            .safe_browsing_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let url = format!("{}/v4/threatMatches:find", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent(concat!("cyber-guardian/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout())
            .build()
            .context("failed to build Safe Browsing HTTP client")?;
        Ok(Self { http, url, api_key })
    }

    async fn lookup(&self, api_key: &str, target: &str) -> Result<LookupReply> {
        let payload = json!({
            "client": {
                "clientId": "cyber-guardian",
                "clientVersion": env!("CARGO_PKG_VERSION"),
            },
            "threatInfo": {
                "threatTypes": THREAT_TYPES,
                "platformTypes": ["ANY_PLATFORM"],
                "threatEntryTypes": ["URL"],
                "threatEntries": [ { "url": target } ],
            }
        });

        let response = self
            .http
            .post(&self.url)
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .await
            .context("failed to call Safe Browsing threatMatches API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|parsed| parsed.error)
                .and_then(|err| err.message)
                .unwrap_or(body);
            return Ok(LookupReply::Rejected { status, message });
        }

        let body: ThreatMatchesResponse = response
            .json()
            .await
            .context("failed to parse Safe Browsing response")?;
        Ok(LookupReply::Matches(body.matches))
    }
}

enum LookupReply {
    Matches(Vec<ApiThreatMatch>),
    Rejected { status: StatusCode, message: String },
}

#[async_trait]
impl ReputationCheck for SafeBrowsingClient {
    #[instrument(name = "safe_browsing_check", skip(self))]
    async fn check(&self, url: &str) -> ReputationOutcome {
        let Some(api_key) = self.api_key.as_deref() else {
            return ReputationOutcome::Skipped("reputation API key not configured".into());
        };

        match self.lookup(api_key, url).await {
            Ok(LookupReply::Matches(matches)) if matches.is_empty() => {
                debug!("no reputation matches");
                ReputationOutcome::Clean
            }
            Ok(LookupReply::Matches(matches)) => ReputationOutcome::Threats(
                matches
                    .into_iter()
                    .map(|m| ThreatMatch {
                        threat_type: m.threat_type,
                        platform_type: m.platform_type,
                        url: m.threat.url.unwrap_or_else(|| url.to_string()),
                    })
                    .collect(),
            ),
            Ok(LookupReply::Rejected { status, message })
                if status == StatusCode::BAD_REQUEST && message.contains("API key") =>
            {
                warn!(%status, "Safe Browsing rejected the API key; skipping reputation check");
                ReputationOutcome::Skipped("reputation API key rejected".into())
            }
            Ok(LookupReply::Rejected { status, message }) => {
                warn!(%status, %message, "Safe Browsing API error (non-critical)");
                ReputationOutcome::Skipped(format!("reputation service error ({status})"))
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "Safe Browsing request failed (non-critical)");
                ReputationOutcome::Skipped("reputation service unreachable".into())
            }
        }
    }
}

#[derive(Deserialize)]
struct ThreatMatchesResponse {
    #[serde(default)]
    matches: Vec<ApiThreatMatch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiThreatMatch {
    threat_type: String,
    #[serde(default)]
    platform_type: String,
    #[serde(default)]
    threat: ApiThreatEntry,
}

#[derive(Deserialize, Default)]
struct ApiThreatEntry {
    url: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}
