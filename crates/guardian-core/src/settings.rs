use anyhow::{bail, Result};
use std::collections::HashMap;

/// Public test key accepted by the breach API for its sample accounts.
pub const HIBP_TEST_KEY: &str = "00000000000000000000000000000000";

/// Environment-driven configuration for the external services a scan talks to.
///
/// Missing credentials are not an error here: each client decides whether it
/// can run, and the scan service degrades to "unavailable"/"skipped".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub llm_provider: String,
    pub gemini_api_key: Option<String>,
    pub gemini_endpoint: Option<String>,
    pub gemini_model: Option<String>,
    pub safe_browsing_api_key: Option<String>,
    pub safe_browsing_endpoint: Option<String>,
    pub hibp_api_key: String,
    pub hibp_endpoint: Option<String>,
    pub pwned_passwords_endpoint: Option<String>,
    pub apk_analyzer_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: u32,
}

impl ServiceSettings {
    pub const PROVIDER_ENV: &'static str = "GUARDIAN_LLM_PROVIDER";
    pub const GEMINI_KEY_ENV: &'static str = "GUARDIAN_GEMINI_API_KEY";
    pub const GEMINI_ENDPOINT_ENV: &'static str = "GUARDIAN_GEMINI_ENDPOINT";
    pub const GEMINI_MODEL_ENV: &'static str = "GUARDIAN_GEMINI_MODEL";
    pub const SAFE_BROWSING_KEY_ENV: &'static str = "GUARDIAN_SAFE_BROWSING_API_KEY";
    pub const SAFE_BROWSING_ENDPOINT_ENV: &'static str = "GUARDIAN_SAFE_BROWSING_ENDPOINT";
    pub const HIBP_KEY_ENV: &'static str = "GUARDIAN_HIBP_API_KEY";
    pub const HIBP_ENDPOINT_ENV: &'static str = "GUARDIAN_HIBP_ENDPOINT";
    pub const PWNED_PASSWORDS_ENDPOINT_ENV: &'static str = "GUARDIAN_PWNED_PASSWORDS_ENDPOINT";
    pub const APK_ANALYZER_ENV: &'static str = "GUARDIAN_APK_ANALYZER_URL";
    pub const TIMEOUT_ENV: &'static str = "GUARDIAN_TIMEOUT_SECS";
    pub const RETRIES_ENV: &'static str = "GUARDIAN_MAX_RETRIES";

    /// Every variable understood by [`ServiceSettings::from_map`].
    pub const ALL_ENV: [&'static str; 12] = [
        Self::PROVIDER_ENV,
        Self::GEMINI_KEY_ENV,
        Self::GEMINI_ENDPOINT_ENV,
        Self::GEMINI_MODEL_ENV,
        Self::SAFE_BROWSING_KEY_ENV,
        Self::SAFE_BROWSING_ENDPOINT_ENV,
        Self::HIBP_KEY_ENV,
        Self::HIBP_ENDPOINT_ENV,
        Self::PWNED_PASSWORDS_ENDPOINT_ENV,
        Self::APK_ANALYZER_ENV,
        Self::TIMEOUT_ENV,
        Self::RETRIES_ENV,
    ];

    /// Load settings from environment variables.
    ///
    /// * `GUARDIAN_LLM_PROVIDER`: `gemini` (default) or `noop`.
    /// * `GUARDIAN_GEMINI_API_KEY`: AI analysis key; absent means AI is unavailable.
    /// * `GUARDIAN_SAFE_BROWSING_API_KEY`: reputation key; absent means the check is skipped.
    pub fn from_env() -> Result<Self> {
        Self::from_map(std::env::vars().collect())
    }

    /// Build settings from an explicit key/value map keyed by the `GUARDIAN_*` names.
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let llm_provider = get(Self::PROVIDER_ENV)
            .unwrap_or_else(|| "gemini".to_string())
            .to_lowercase();
        if !matches!(llm_provider.as_str(), "gemini" | "noop") {
            bail!(
                "unsupported value `{}` for {} (expected `gemini` or `noop`)",
                llm_provider,
                Self::PROVIDER_ENV
            );
        }

        let timeout_secs = get(Self::TIMEOUT_ENV).and_then(|v| v.parse::<u64>().ok());
        let max_retries = get(Self::RETRIES_ENV)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(2);

        Ok(Self {
            llm_provider,
            gemini_api_key: get(Self::GEMINI_KEY_ENV),
            gemini_endpoint: get(Self::GEMINI_ENDPOINT_ENV),
            gemini_model: get(Self::GEMINI_MODEL_ENV),
            safe_browsing_api_key: get(Self::SAFE_BROWSING_KEY_ENV),
            safe_browsing_endpoint: get(Self::SAFE_BROWSING_ENDPOINT_ENV),
            hibp_api_key: get(Self::HIBP_KEY_ENV).unwrap_or_else(|| HIBP_TEST_KEY.to_string()),
            hibp_endpoint: get(Self::HIBP_ENDPOINT_ENV),
            pwned_passwords_endpoint: get(Self::PWNED_PASSWORDS_ENDPOINT_ENV),
            apk_analyzer_url: get(Self::APK_ANALYZER_ENV),
            timeout_secs,
            max_retries,
        })
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.unwrap_or(30))
    }
}
