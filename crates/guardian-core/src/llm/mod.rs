mod gemini;
mod prompt;

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::risk::Assessment;
use crate::settings::ServiceSettings;

pub use gemini::GeminiClient;
pub use prompt::build_prompt;

/// What the submitted content is, which selects the analysis prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentKind {
    Email,
    Sms,
    Url,
    Qr,
    App,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
            Self::Url => "URL",
            Self::Qr => "QR",
            Self::App => "APP",
        };
        f.write_str(label)
    }
}

/// Client abstraction for the AI content-analysis service.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Produce a `{risk, score, reason}` verdict for the given content.
    async fn analyze(&self, content: &str, kind: ContentKind) -> Result<Assessment>;
}

/// Stand-in used when no AI provider can be built; every call fails so that
/// callers fall back to the "AI analysis unavailable" verdict.
#[derive(Debug, Clone)]
pub struct UnavailableAnalysisClient {
    reason: String,
}

impl UnavailableAnalysisClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl AnalysisClient for UnavailableAnalysisClient {
    async fn analyze(&self, _content: &str, _kind: ContentKind) -> Result<Assessment> {
        Err(anyhow!("AI analysis not available: {}", self.reason))
    }
}

/// Build the configured analysis client. Configuration problems degrade to
/// [`UnavailableAnalysisClient`] instead of failing the caller.
pub fn analysis_client_from_settings(settings: &ServiceSettings) -> Arc<dyn AnalysisClient> {
    match settings.llm_provider.as_str() {
        "noop" => Arc::new(UnavailableAnalysisClient::new("provider set to noop")),
        _ => match GeminiClient::new(settings) {
            Ok(client) => Arc::new(client),
            Err(err) => {
                warn!(error = %err, "Gemini client unavailable; AI verdicts will be UNKNOWN");
                Arc::new(UnavailableAnalysisClient::new(err.to_string()))
            }
        },
    }
}
