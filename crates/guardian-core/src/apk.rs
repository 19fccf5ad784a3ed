use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::settings::ServiceSettings;

const DEFAULT_ANALYZER_URL: &str = "http://127.0.0.1:5000";
const APK_MIME: &str = "application/vnd.android.package-archive";

/// Static facts the analyzer backend extracts from an uploaded APK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApkReport {
    pub package_name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Pattern name → distinct matches (API keys, embedded URLs, ...).
    #[serde(default)]
    pub secrets: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ApkReport {
    /// Permission names without the `android.permission.` prefix.
    pub fn short_permissions(&self) -> Vec<&str> {
        self.permissions
            .iter()
            .map(|perm| perm.rsplit('.').next().unwrap_or(perm.as_str()))
            .collect()
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.values().map(Vec::len).sum()
    }

    /// Plain-text digest handed to the AI reviewer.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Package: {}", self.package_name);
        if let Some(version) = &self.version {
            let _ = writeln!(out, "Version: {version}");
        }
        let _ = writeln!(out, "Requested permissions ({}):", self.permissions.len());
        for perm in &self.permissions {
            let _ = writeln!(out, "- {perm}");
        }
        for (kind, found) in self.secrets.iter().filter(|(_, found)| !found.is_empty()) {
            let _ = writeln!(out, "Embedded {kind}: {} occurrence(s)", found.len());
        }
        out
    }
}

/// Backend that unpacks an APK and reports its manifest facts.
#[async_trait]
pub trait ApkAnalyzer: Send + Sync {
    async fn extract(&self, apk_path: &Path) -> Result<ApkReport>;
}

/// HTTP client for the APK analyzer backend (`POST /analyze`, multipart field `file`).
#[derive(Debug, Clone)]
pub struct ApkAnalyzerClient {
    http: Client,
    url: String,
}

impl ApkAnalyzerClient {
    pub fn new(settings: &ServiceSettings) -> Result<Self> {
        let base = settings
            .apk_analyzer_url
            .clone()
            .unwrap_or_else(|| DEFAULT_ANALYZER_URL.to_string());
        let http = Client::builder()
            .user_agent(concat!("cyber-guardian/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout())
            .build()
            .context("failed to build APK analyzer HTTP client")?;
        Ok(Self {
            http,
            url: format!("{}/analyze", base.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ApkAnalyzer for ApkAnalyzerClient {
    #[instrument(name = "apk_extract", skip(self), fields(path = %apk_path.display()))]
    async fn extract(&self, apk_path: &Path) -> Result<ApkReport> {
        let bytes = tokio::fs::read(apk_path)
            .await
            .with_context(|| format!("failed to read APK at {}", apk_path.display()))?;
        let file_name = apk_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.apk".to_string());
        debug!(size = bytes.len(), "uploading APK");

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(APK_MIME)
            .context("invalid APK mime type")?;
        let response = self
            .http
            .post(&self.url)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .context("failed to call APK analyzer backend")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read APK analyzer response")?;
        if !status.is_success() {
            let message = serde_json::from_str::<AnalyzerError>(&body)
                .map(|err| err.error)
                .unwrap_or(body);
            bail!("APK analyzer error ({}): {}", status, message);
        }
        serde_json::from_str(&body).context("failed to parse APK analyzer response")
    }
}

#[derive(Deserialize)]
struct AnalyzerError {
    error: String,
}
