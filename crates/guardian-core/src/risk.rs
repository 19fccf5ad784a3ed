use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reputation::ReputationOutcome;

/// Qualitative verdict attached to every scan result.
///
/// `Unknown` is reserved for the state where the AI analysis could not be
/// obtained; threshold tables never produce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl RiskLevel {
    /// Parse a model-provided label. Only the three verdict labels are accepted.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{risk, score, reason}` triple shared by the AI client and the threshold tables.
/// Scores run 0–100 where 100 is safest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub risk: RiskLevel,
    pub score: u8,
    pub reason: String,
}

impl Assessment {
    pub fn new(risk: RiskLevel, score: u8, reason: impl Into<String>) -> Self {
        Self {
            risk,
            score: score.min(100),
            reason: reason.into(),
        }
    }

    /// Placeholder used when the AI analysis failed or is not configured.
    pub fn unavailable() -> Self {
        Self::new(RiskLevel::Unknown, 0, "AI analysis unavailable")
    }
}

/// One row of a count → verdict table: applies to counts `>= min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountTier {
    pub min: u64,
    pub risk: RiskLevel,
    pub score: u8,
}

impl CountTier {
    const fn new(min: u64, risk: RiskLevel, score: u8) -> Self {
        Self { min, risk, score }
    }
}

/// Tunable constants for turning external signals into verdicts.
///
/// A reputation match always escalates to HIGH; only its score ceiling is tunable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskPolicy {
    /// Breach-count table for email lookups, ascending by `min`.
    pub email_tiers: Vec<CountTier>,
    /// Exposure-count table for password range lookups, ascending by `min`.
    pub password_tiers: Vec<CountTier>,
    /// Upper bound on the score of a URL verdict with a reputation match.
    pub threat_score_ceiling: u8,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            email_tiers: vec![
                CountTier::new(0, RiskLevel::Low, 100),
                CountTier::new(1, RiskLevel::Medium, 60),
                CountTier::new(3, RiskLevel::High, 40),
                CountTier::new(5, RiskLevel::High, 20),
            ],
            password_tiers: vec![
                CountTier::new(0, RiskLevel::Low, 100),
                CountTier::new(1, RiskLevel::Medium, 70),
                CountTier::new(100, RiskLevel::High, 40),
                CountTier::new(1000, RiskLevel::High, 20),
            ],
            threat_score_ceiling: 10,
        }
    }
}

/// Reasons a [`RiskPolicy`] is rejected before use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("{table} must have at least one tier")]
    EmptyTable { table: &'static str },
    #[error("{table} must start at min = 0, found {min}")]
    MissingZeroTier { table: &'static str, min: u64 },
    #[error("{table} must be strictly ascending by min ({previous} then {min})")]
    NotAscending {
        table: &'static str,
        previous: u64,
        min: u64,
    },
    #[error("{table} tier at min = {min} uses UNKNOWN, which is reserved for missing verdicts")]
    UnknownTier { table: &'static str, min: u64 },
    #[error("threat_score_ceiling must be at most 100, found {0}")]
    CeilingOutOfRange(u8),
}

/// URL/QR verdict after merging the AI baseline with the reputation signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedVerdict {
    pub assessment: Assessment,
    /// True when a reputation match overrode the AI opinion.
    pub escalated: bool,
    /// Set when the reputation check did not run.
    pub reputation_note: Option<String>,
}

impl RiskPolicy {
    /// Check that both tables cover every count and only produce real verdicts.
    pub fn validate(&self) -> Result<(), PolicyError> {
        validate_tiers("email_tiers", &self.email_tiers)?;
        validate_tiers("password_tiers", &self.password_tiers)?;
        if self.threat_score_ceiling > 100 {
            return Err(PolicyError::CeilingOutOfRange(self.threat_score_ceiling));
        }
        Ok(())
    }

    pub fn email_tier(&self, breach_count: usize) -> CountTier {
        pick_tier(&self.email_tiers, breach_count as u64)
    }

    pub fn password_tier(&self, exposure_count: u64) -> CountTier {
        pick_tier(&self.password_tiers, exposure_count)
    }

    /// Verdict for an email address given the names of the breaches it appears in.
    pub fn assess_email_breaches<S: AsRef<str>>(&self, breach_names: &[S]) -> Assessment {
        let tier = self.email_tier(breach_names.len());
        let reason = if breach_names.is_empty() {
            "No breaches found for this email.".to_string()
        } else {
            let listed: Vec<&str> = breach_names.iter().take(3).map(AsRef::as_ref).collect();
            format!(
                "Found in {} breach(es): {}",
                breach_names.len(),
                listed.join(", ")
            )
        };
        Assessment::new(tier.risk, tier.score, reason)
    }

    /// Verdict for a password given how often its hash appears in the corpus.
    pub fn assess_password_exposure(&self, exposure_count: u64) -> Assessment {
        let tier = self.password_tier(exposure_count);
        let reason = if exposure_count == 0 {
            "Password not found in Pwned Passwords.".to_string()
        } else {
            format!("Found {exposure_count} times in Pwned Passwords.")
        };
        Assessment::new(tier.risk, tier.score, reason)
    }

    /// Merge the AI verdict (`None` when the call failed) with the reputation outcome.
    ///
    /// A reputation match always dominates. A skipped reputation check leaves the
    /// AI verdict untouched and is recorded as a note, never as a clean result.
    pub fn combine_url_verdict(
        &self,
        ai: Option<Assessment>,
        reputation: &ReputationOutcome,
    ) -> CombinedVerdict {
        let mut assessment = ai.unwrap_or_else(Assessment::unavailable);
        match reputation {
            ReputationOutcome::Threats(matches) if !matches.is_empty() => {
                let mut kinds: Vec<&str> = matches.iter().map(|m| m.threat_type.as_str()).collect();
                kinds.sort_unstable();
                kinds.dedup();
                assessment.risk = RiskLevel::High;
                assessment.score = assessment.score.min(self.threat_score_ceiling);
                assessment.reason = format!(
                    "{} Reputation check flagged this URL: {}.",
                    assessment.reason,
                    kinds.join(", ")
                );
                CombinedVerdict {
                    assessment,
                    escalated: true,
                    reputation_note: None,
                }
            }
            ReputationOutcome::Threats(_) | ReputationOutcome::Clean => CombinedVerdict {
                assessment,
                escalated: false,
                reputation_note: None,
            },
            ReputationOutcome::Skipped(why) => CombinedVerdict {
                assessment,
                escalated: false,
                reputation_note: Some(format!("Reputation check skipped: {why}")),
            },
        }
    }
}

fn validate_tiers(table: &'static str, tiers: &[CountTier]) -> Result<(), PolicyError> {
    let first = tiers.first().ok_or(PolicyError::EmptyTable { table })?;
    if first.min != 0 {
        return Err(PolicyError::MissingZeroTier {
            table,
            min: first.min,
        });
    }
    for pair in tiers.windows(2) {
        if pair[1].min <= pair[0].min {
            return Err(PolicyError::NotAscending {
                table,
                previous: pair[0].min,
                min: pair[1].min,
            });
        }
    }
    match tiers.iter().find(|tier| tier.risk == RiskLevel::Unknown) {
        Some(tier) => Err(PolicyError::UnknownTier {
            table,
            min: tier.min,
        }),
        None => Ok(()),
    }
}

fn pick_tier(tiers: &[CountTier], count: u64) -> CountTier {
    tiers
        .iter()
        .rev()
        .find(|tier| count >= tier.min)
        .copied()
        .unwrap_or(CountTier::new(0, RiskLevel::Unknown, 0))
}
