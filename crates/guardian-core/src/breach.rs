use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, instrument};
use unicode_normalization::UnicodeNormalization;
use url::Url;

use crate::settings::ServiceSettings;

const DEFAULT_HIBP_ENDPOINT: &str = "https://haveibeenpwned.com";
const DEFAULT_RANGE_ENDPOINT: &str = "https://api.pwnedpasswords.com";
const HIBP_ACCEPT: &str = "application/vnd.haveibeenpwned.v3+json";
const PREFIX_LEN: usize = 5;

/// A breach an email address appeared in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Breach {
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub breach_date: Option<String>,
}

/// Lookups against a breach corpus.
#[async_trait]
pub trait BreachLookup: Send + Sync {
    /// Breaches the (already validated) email address appears in.
    async fn breaches_for_email(&self, email: &str) -> Result<Vec<Breach>>;

    /// How many times the password appears in the corpus. Only a hash prefix
    /// may leave the process.
    async fn password_exposure(&self, password: &str) -> Result<u64>;
}

/// Client for the breached-account API and the k-anonymity password range API.
#[derive(Debug, Clone)]
pub struct HibpClient {
    http: Client,
    account_base: Url,
    range_base: String,
    api_key: String,
}

impl HibpClient {
    pub fn new(settings: &ServiceSettings) -> Result<Self> {
        let account_base = settings
            .hibp_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_HIBP_ENDPOINT);
        let account_base = Url::parse(account_base)
            .with_context(|| format!("invalid breach API endpoint `{account_base}`"))?;
        if account_base.cannot_be_a_base() {
            bail!("breach API endpoint `{account_base}` cannot carry a path");
        }
        let range_base = settings
            .pwned_passwords_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_RANGE_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();
        let http = Client::builder()
            .user_agent(concat!("CyberGuardian/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout())
            .build()
            .context("failed to build breach API HTTP client")?;
        Ok(Self {
            http,
            account_base,
            range_base,
            api_key: settings.hibp_api_key.clone(),
        })
    }

    fn account_url(&self, email: &str) -> Result<Url> {
        let mut url = self.account_base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("breach API endpoint cannot carry a path"))?
            .pop_if_empty()
            .extend(["api", "v3", "breachedaccount", email]);
        url.query_pairs_mut().append_pair("truncateResponse", "false");
        Ok(url)
    }
}

#[async_trait]
impl BreachLookup for HibpClient {
    #[instrument(name = "breached_account", skip_all)]
    async fn breaches_for_email(&self, email: &str) -> Result<Vec<Breach>> {
        let response = self
            .http
            .get(self.account_url(email)?)
            .header("hibp-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, HIBP_ACCEPT)
            .send()
            .await
            .context("failed to call breached-account API")?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("no breaches recorded for account");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("breach lookup failed ({}): {}", status, body);
        }

        let breaches: Option<Vec<Breach>> = response
            .json()
            .await
            .context("failed to parse breached-account response")?;
        Ok(breaches.unwrap_or_default())
    }

    #[instrument(name = "password_range", skip_all)]
    async fn password_exposure(&self, password: &str) -> Result<u64> {
        let (prefix, suffix) = password_hash_parts(password);
        let response = self
            .http
            .get(format!("{}/range/{}", self.range_base, prefix))
            .send()
            .await
            .context("failed to call password range API")?;
        if !response.status().is_success() {
            bail!("password range lookup failed ({})", response.status());
        }
        let body = response
            .text()
            .await
            .context("failed to read password range response")?;
        let count = count_in_range(&body, &suffix);
        debug!(count, "password range scanned");
        Ok(count)
    }
}

/// SHA-1 of the trimmed, NFKC-normalised password as upper-case hex, split
/// into the 5-character prefix sent to the API and the suffix kept locally.
pub fn password_hash_parts(password: &str) -> (String, String) {
    let normalized: String = password.trim().nfkc().collect();
    let digest = Sha1::digest(normalized.as_bytes());
    let hex = format!("{digest:X}");
    let (prefix, suffix) = hex.split_at(PREFIX_LEN);
    (prefix.to_string(), suffix.to_string())
}

/// Scan `SUFFIX:COUNT` lines for the given suffix. Unparsable counts read as 0.
pub fn count_in_range(body: &str, suffix: &str) -> u64 {
    body.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(candidate, _)| candidate.trim().eq_ignore_ascii_case(suffix))
        .map(|(_, count)| count.trim().parse().unwrap_or(0))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::collections::HashMap;

    // SHA-1("password") = 5BAA61E4C9B93F3F0682250B6CF8331B7EE68FD8
    const PASSWORD_SUFFIX: &str = "1E4C9B93F3F0682250B6CF8331B7EE68FD8";

    fn settings(base: &str) -> ServiceSettings {
        let mut settings = ServiceSettings::from_map(HashMap::new()).unwrap();
        settings.hibp_endpoint = Some(base.to_string());
        settings.pwned_passwords_endpoint = Some(base.to_string());
        settings.timeout_secs = Some(5);
        settings
    }

    #[test]
    fn hash_parts_split_sha1_hex() {
        let (prefix, suffix) = password_hash_parts("password");
        assert_eq!(prefix, "5BAA6");
        assert_eq!(suffix, PASSWORD_SUFFIX);
    }

    #[test]
    fn hash_parts_trim_and_normalise() {
        assert_eq!(password_hash_parts("  password\n"), password_hash_parts("password"));
        // U+FF50 FULLWIDTH LATIN SMALL LETTER P folds to `p` under NFKC.
        assert_eq!(password_hash_parts("\u{ff50}assword"), password_hash_parts("password"));
    }

    #[test]
    fn range_scan_matches_case_insensitively() {
        let body = format!(
            "003D68EB55068C33ACE09247EE4C639306B:3\r\n{}:3861493\r\n\r\n",
            PASSWORD_SUFFIX.to_lowercase()
        );
        assert_eq!(count_in_range(&body, PASSWORD_SUFFIX), 3_861_493);
    }

    #[test]
    fn range_scan_defaults_to_zero() {
        assert_eq!(count_in_range("", PASSWORD_SUFFIX), 0);
        assert_eq!(count_in_range("ABC:12\n", PASSWORD_SUFFIX), 0);
        let garbled = format!("{PASSWORD_SUFFIX}:lots\n");
        assert_eq!(count_in_range(&garbled, PASSWORD_SUFFIX), 0);
    }

    #[test]
    fn account_url_escapes_the_address() {
        let client = HibpClient::new(&settings("https://hibp.example")).unwrap();
        let url = client.account_url("a+b@example.com").unwrap();
        assert_eq!(url.path(), "/api/v3/breachedaccount/a+b@example.com");
        assert_eq!(url.query(), Some("truncateResponse=false"));
        let odd = client.account_url("x/y@example.com").unwrap();
        assert!(odd.path().ends_with("x%2Fy@example.com"));
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn only_the_prefix_is_sent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/range/5BAA6");
            then.status(200)
                .body(format!("0018A45C4D1DEF81644B54AB7F969B88D65:1\n{PASSWORD_SUFFIX}:50\n"));
        });
        let client = HibpClient::new(&settings(&server.base_url())).unwrap();
        assert_eq!(client.password_exposure("password").await.unwrap(), 50);
        mock.assert();
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn not_found_means_no_breaches() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/v3/breachedaccount/clean@example.com")
                .header("hibp-api-key", crate::settings::HIBP_TEST_KEY);
            then.status(404);
        });
        let client = HibpClient::new(&settings(&server.base_url())).unwrap();
        assert!(client
            .breaches_for_email("clean@example.com")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn breaches_are_parsed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/v3/breachedaccount/test@example.com");
            then.status(200).json_body(serde_json::json!([
                { "Name": "Adobe", "Domain": "adobe.com", "BreachDate": "2013-10-04" },
                { "Name": "LinkedIn", "Domain": "linkedin.com", "BreachDate": "2012-05-05" }
            ]));
        });
        let client = HibpClient::new(&settings(&server.base_url())).unwrap();
        let breaches = client.breaches_for_email("test@example.com").await.unwrap();
        assert_eq!(breaches.len(), 2);
        assert_eq!(breaches[0].name, "Adobe");
        assert_eq!(breaches[1].breach_date.as_deref(), Some("2012-05-05"));
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn unauthorised_lookup_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET);
            then.status(401).body("Access denied due to invalid hibp-api-key.");
        });
        let client = HibpClient::new(&settings(&server.base_url())).unwrap();
        let err = client
            .breaches_for_email("test@example.com")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
