use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::apk::{ApkAnalyzer, ApkAnalyzerClient, ApkReport};
use crate::breach::{Breach, BreachLookup, HibpClient};
use crate::handoff::{HandoffKey, ResultCache, DEFAULT_TTL};
use crate::history::{HistoryEntry, HistoryStore, ScanStatus, ScanType};
use crate::input::{validate_email, InputError};
use crate::llm::{analysis_client_from_settings, AnalysisClient, ContentKind};
use crate::reputation::{ReputationCheck, ReputationOutcome, SafeBrowsingClient};
use crate::risk::{Assessment, RiskLevel, RiskPolicy};
use crate::settings::ServiceSettings;
use crate::url_validator::normalize_url;

/// Placeholder stored instead of the password itself.
pub const HIDDEN_PASSWORD: &str = "Password (hidden for security)";

const HISTORY_DETAILS_MAX: usize = 120;

/// Which flow produced a [`ScanResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    Url,
    Qr,
    Email,
    Sms,
    EmailBreach,
    Password,
    App,
}

impl ScanKind {
    fn history_type(self) -> ScanType {
        match self {
            Self::Url => ScanType::Url,
            Self::Qr => ScanType::Qr,
            Self::Email => ScanType::Email,
            Self::Sms => ScanType::Sms,
            Self::EmailBreach | Self::Password => ScanType::Breach,
            Self::App => ScanType::App,
        }
    }
}

/// Message channel for [`ScanService::scan_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Email,
    Sms,
}

impl MessageKind {
    fn content_kind(self) -> ContentKind {
        match self {
            Self::Email => ContentKind::Email,
            Self::Sms => ContentKind::Sms,
        }
    }

    fn scan_kind(self) -> ScanKind {
        match self {
            Self::Email => ScanKind::Email,
            Self::Sms => ScanKind::Sms,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "SMS",
        }
    }
}

/// Verdict shown to the user for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub kind: ScanKind,
    pub risk: RiskLevel,
    pub score: u8,
    pub reason: String,
    /// What was scanned, as it may be displayed. Never holds a password.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reputation: Option<ReputationOutcome>,
    /// Raw AI verdict before any reputation escalation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<Assessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reputation_note: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breaches: Vec<Breach>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<ApkReport>,
}

impl ScanResult {
    fn from_assessment(kind: ScanKind, content: impl Into<String>, assessment: Assessment) -> Self {
        Self {
            kind,
            risk: assessment.risk,
            score: assessment.score,
            reason: assessment.reason,
            content: content.into(),
            reputation: None,
            ai: None,
            reputation_note: None,
            breaches: Vec::new(),
            app: None,
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.risk.into()
    }
}

fn unavailable(what: &str) -> Assessment {
    Assessment::new(RiskLevel::Unknown, 0, format!("{what} unavailable"))
}

/// Runs every scan flow against the configured external services.
///
/// External failures never surface as errors: they degrade to an `UNKNOWN`
/// verdict or a skipped reputation check. Only invalid input is returned as
/// [`InputError`], before anything leaves the process.
pub struct ScanService {
    analysis: Arc<dyn AnalysisClient>,
    reputation: Arc<dyn ReputationCheck>,
    breaches: Arc<dyn BreachLookup>,
    apk: Arc<dyn ApkAnalyzer>,
    policy: RiskPolicy,
    history: Option<(Arc<dyn HistoryStore>, String)>,
    results: ResultCache<ScanResult>,
}

impl ScanService {
    pub fn new(
        analysis: Arc<dyn AnalysisClient>,
        reputation: Arc<dyn ReputationCheck>,
        breaches: Arc<dyn BreachLookup>,
        apk: Arc<dyn ApkAnalyzer>,
    ) -> Self {
        Self {
            analysis,
            reputation,
            breaches,
            apk,
            policy: RiskPolicy::default(),
            history: None,
            results: ResultCache::new(DEFAULT_TTL),
        }
    }

    /// Wire up the real HTTP clients from settings.
    pub fn from_settings(settings: &ServiceSettings) -> Result<Self> {
        Ok(Self::new(
            analysis_client_from_settings(settings),
            Arc::new(SafeBrowsingClient::new(settings)?),
            Arc::new(HibpClient::new(settings)?),
            Arc::new(ApkAnalyzerClient::new(settings)?),
        ))
    }

    pub fn with_policy(mut self, policy: RiskPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Record every completed scan for `user_id`.
    pub fn with_history(mut self, store: Arc<dyn HistoryStore>, user_id: impl Into<String>) -> Self {
        self.history = Some((store, user_id.into()));
        self
    }

    /// Park a result for the display step.
    pub fn hand_off(&self, result: ScanResult) -> HandoffKey {
        self.results.insert(result)
    }

    /// Claim a parked result. Returns `None` once taken or expired.
    pub fn take_result(&self, key: HandoffKey) -> Option<ScanResult> {
        self.results.take(key)
    }

    #[instrument(skip(self, input))]
    pub async fn scan_url(&self, input: &str) -> Result<ScanResult, InputError> {
        let url = normalize_url(input)?;
        Ok(self.scan_link(url, ContentKind::Url, ScanKind::Url).await)
    }

    /// Same as [`ScanService::scan_url`] but reviewed with the QR-specific prompt.
    #[instrument(skip(self, payload))]
    pub async fn scan_qr(&self, payload: &str) -> Result<ScanResult, InputError> {
        let url = normalize_url(payload)?;
        Ok(self.scan_link(url, ContentKind::Qr, ScanKind::Qr).await)
    }

    async fn scan_link(&self, url: String, prompt: ContentKind, kind: ScanKind) -> ScanResult {
        let (ai, reputation) = tokio::join!(
            self.analysis.analyze(&url, prompt),
            self.reputation.check(&url)
        );
        let ai = match ai {
            Ok(assessment) => Some(assessment),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "AI analysis failed");
                None
            }
        };

        let combined = self.policy.combine_url_verdict(ai.clone(), &reputation);
        if combined.escalated {
            info!(%url, "reputation match escalated verdict");
        }
        let mut result = ScanResult::from_assessment(kind, url, combined.assessment);
        result.ai = ai;
        result.reputation = Some(reputation);
        result.reputation_note = combined.reputation_note;
        self.record(&result).await;
        result
    }

    #[instrument(skip(self, text), fields(len = text.len()))]
    pub async fn scan_message(
        &self,
        text: &str,
        kind: MessageKind,
    ) -> Result<ScanResult, InputError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(InputError::EmptyContent {
                what: kind.label().to_string(),
            });
        }
        let ai = match self.analysis.analyze(text, kind.content_kind()).await {
            Ok(assessment) => Some(assessment),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "AI analysis failed");
                None
            }
        };
        let mut result = ScanResult::from_assessment(
            kind.scan_kind(),
            text,
            ai.clone().unwrap_or_else(Assessment::unavailable),
        );
        result.ai = ai;
        self.record(&result).await;
        Ok(result)
    }

    #[instrument(skip_all)]
    pub async fn check_email(&self, input: &str) -> Result<ScanResult, InputError> {
        let email = validate_email(input)?;
        let result = match self.breaches.breaches_for_email(&email).await {
            Ok(breaches) => {
                let names: Vec<&str> = breaches.iter().map(|b| b.name.as_str()).collect();
                let assessment = self.policy.assess_email_breaches(&names);
                debug!(count = breaches.len(), risk = %assessment.risk, "breach lookup done");
                let mut result = ScanResult::from_assessment(ScanKind::EmailBreach, email, assessment);
                result.breaches = breaches;
                result
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "breach lookup failed");
                ScanResult::from_assessment(ScanKind::EmailBreach, email, unavailable("Breach check"))
            }
        };
        self.record(&result).await;
        Ok(result)
    }

    #[instrument(skip_all)]
    pub async fn check_password(&self, password: &str) -> Result<ScanResult, InputError> {
        if password.trim().is_empty() {
            return Err(InputError::EmptyPassword);
        }
        let assessment = match self.breaches.password_exposure(password).await {
            Ok(count) => self.policy.assess_password_exposure(count),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "password range lookup failed");
                unavailable("Password check")
            }
        };
        let result = ScanResult::from_assessment(ScanKind::Password, HIDDEN_PASSWORD, assessment);
        self.record(&result).await;
        Ok(result)
    }

    /// Extract the APK's permissions through the analyzer backend, then have
    /// the AI review the summary.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn analyze_apk(&self, path: &Path) -> Result<ScanResult, InputError> {
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(InputError::MissingFile {
                path: path.display().to_string(),
            });
        }
        let report = match self.apk.extract(path).await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "APK extraction failed");
                let result = ScanResult::from_assessment(
                    ScanKind::App,
                    path.display().to_string(),
                    unavailable("APK analysis"),
                );
                self.record(&result).await;
                return Ok(result);
            }
        };

        let ai = match self.analysis.analyze(&report.summary(), ContentKind::App).await {
            Ok(assessment) => Some(assessment),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "AI review of APK failed");
                None
            }
        };
        let mut result = ScanResult::from_assessment(
            ScanKind::App,
            report.package_name.clone(),
            ai.clone().unwrap_or_else(Assessment::unavailable),
        );
        result.ai = ai;
        result.app = Some(report);
        self.record(&result).await;
        Ok(result)
    }

    /// Best effort: a failing store is logged and otherwise ignored.
    async fn record(&self, result: &ScanResult) {
        let Some((store, user_id)) = &self.history else {
            return;
        };
        let mut entry = HistoryEntry::new(
            result.kind.history_type(),
            result.status(),
            history_details(&result.content),
        )
        .with_field("risk", result.risk.as_str())
        .with_field("score", result.score);
        if let Some(app) = &result.app {
            entry = entry
                .with_field("packageName", app.package_name.as_str())
                .with_field("permissionCount", app.permissions.len());
        }
        if !result.breaches.is_empty() {
            entry = entry.with_field("breachCount", result.breaches.len());
        }

        match store.record(user_id, entry).await {
            Ok(stats) => debug!(
                scans_today = stats.scans_today,
                safety_score = stats.safety_score,
                "history updated"
            ),
            Err(err) => warn!(error = %format!("{err:#}"), "failed to record scan history"),
        }
    }
}

fn history_details(content: &str) -> String {
    if content.chars().count() <= HISTORY_DETAILS_MAX {
        return content.to_string();
    }
    let mut short: String = content.chars().take(HISTORY_DETAILS_MAX).collect();
    short.push('…');
    short
}
