use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::integrity::IntegrityStatus;
use crate::risk::RiskLevel;

/// Category of a recorded scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanType {
    #[serde(rename = "QR")]
    Qr,
    Email,
    #[serde(rename = "SMS")]
    Sms,
    #[serde(rename = "URL")]
    Url,
    App,
    Breach,
    System,
}

/// Outcome label stored with each history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    Safe,
    Suspicious,
    Dangerous,
    Unknown,
}

impl ScanStatus {
    pub fn is_threat(self) -> bool {
        matches!(self, Self::Suspicious | Self::Dangerous)
    }
}

impl From<RiskLevel> for ScanStatus {
    fn from(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Low => Self::Safe,
            RiskLevel::Medium => Self::Suspicious,
            RiskLevel::High => Self::Dangerous,
            RiskLevel::Unknown => Self::Unknown,
        }
    }
}

impl From<IntegrityStatus> for ScanStatus {
    fn from(status: IntegrityStatus) -> Self {
        match status {
            IntegrityStatus::Green => Self::Safe,
            IntegrityStatus::Orange => Self::Suspicious,
            IntegrityStatus::Red => Self::Dangerous,
        }
    }
}

/// Append-only record of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub status: ScanStatus,
    #[serde(default)]
    pub details: String,
    /// RFC 3339 UTC timestamp, second precision.
    pub timestamp: String,
    /// Scan-specific fields (risk, score, package name, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HistoryEntry {
    pub fn new(scan_type: ScanType, status: ScanStatus, details: impl Into<String>) -> Self {
        Self {
            scan_type,
            status,
            details: details.into(),
            timestamp: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// `YYYY-MM-DD` part of the timestamp.
    pub fn day(&self) -> &str {
        self.timestamp.get(..10).unwrap_or(&self.timestamp)
    }
}

/// Aggregate counters kept beside a user's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStats {
    pub scans_today: u32,
    pub threats_blocked: u32,
    pub apps_analyzed: u32,
    pub safety_score: u8,
    /// Day the daily counters belong to.
    pub day: String,
}

impl Default for UserStats {
    fn default() -> Self {
        Self {
            scans_today: 0,
            threats_blocked: 0,
            apps_analyzed: 0,
            safety_score: 100,
            day: String::new(),
        }
    }
}

impl UserStats {
    /// Fold one recorded scan into the counters.
    ///
    /// Daily counters restart when the entry falls on a new day; the safety
    /// score carries over. A dangerous system finding caps the score at 45.
    pub fn apply(&mut self, entry: &HistoryEntry) {
        if self.day != entry.day() {
            self.day = entry.day().to_string();
            self.scans_today = 0;
            self.threats_blocked = 0;
            self.apps_analyzed = 0;
        }
        self.scans_today += 1;
        if entry.status.is_threat() {
            self.threats_blocked += 1;
        }
        if entry.scan_type == ScanType::App {
            self.apps_analyzed += 1;
        }

        let current = i32::from(self.safety_score);
        let next = match (entry.scan_type, entry.status) {
            (ScanType::System, ScanStatus::Dangerous) => (current - 10).min(45),
            (_, ScanStatus::Dangerous) => current - 10,
            (_, ScanStatus::Suspicious) => current - 5,
            _ => current,
        };
        self.safety_score = next.clamp(0, 100) as u8;
    }
}

/// One user's stored document: counters plus history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserDocument {
    #[serde(default)]
    stats: UserStats,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

impl UserDocument {
    fn append(&mut self, entry: HistoryEntry) -> UserStats {
        self.stats.apply(&entry);
        self.history.push(entry);
        self.stats.clone()
    }
}

/// Per-user scan history with transactional counter updates.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append the entry and update the user's counters in one step.
    async fn record(&self, user_id: &str, entry: HistoryEntry) -> Result<UserStats>;

    /// Entries in the order they were recorded.
    async fn entries(&self, user_id: &str) -> Result<Vec<HistoryEntry>>;

    async fn stats(&self, user_id: &str) -> Result<UserStats>;
}

fn check_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        bail!("user id must not be empty");
    }
    if !user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("user id `{user_id}` may only contain ASCII letters, digits, `-` and `_`");
    }
    Ok(())
}

/// Volatile store, mainly for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    users: Mutex<HashMap<String, UserDocument>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn record(&self, user_id: &str, entry: HistoryEntry) -> Result<UserStats> {
        check_user_id(user_id)?;
        let mut users = self.users.lock().await;
        Ok(users.entry(user_id.to_string()).or_default().append(entry))
    }

    async fn entries(&self, user_id: &str) -> Result<Vec<HistoryEntry>> {
        check_user_id(user_id)?;
        let users = self.users.lock().await;
        Ok(users
            .get(user_id)
            .map(|doc| doc.history.clone())
            .unwrap_or_default())
    }

    async fn stats(&self, user_id: &str) -> Result<UserStats> {
        check_user_id(user_id)?;
        let users = self.users.lock().await;
        Ok(users
            .get(user_id)
            .map(|doc| doc.stats.clone())
            .unwrap_or_default())
    }
}

/// Stores one JSON document per user (`<user>.json`) under a base directory.
pub struct FileHistoryStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileHistoryStore {
    /// Create a store rooted at the given directory; it is created on first write.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn document_path(&self, user_id: &str) -> PathBuf {
        self.base_path.join(format!("{user_id}.json"))
    }

    async fn load(&self, user_id: &str) -> Result<UserDocument> {
        let path = self.document_path(user_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(UserDocument::default());
        }
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read history file at {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in history file at {}", path.display()))
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn record(&self, user_id: &str, entry: HistoryEntry) -> Result<UserStats> {
        check_user_id(user_id)?;
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load(user_id).await?;
        let stats = doc.append(entry);

        tokio::fs::create_dir_all(&self.base_path)
            .await
            .with_context(|| {
                format!(
                    "failed to create history directory {}",
                    self.base_path.display()
                )
            })?;
        let path = self.document_path(user_id);
        let tmp = path.with_extension("json.tmp");
        let serialized = serde_json::to_vec_pretty(&doc)?;
        tokio::fs::write(&tmp, serialized)
            .await
            .with_context(|| format!("failed to write history file at {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace history file at {}", path.display()))?;
        debug!(user = user_id, entries = doc.history.len(), "history recorded");
        Ok(stats)
    }

    async fn entries(&self, user_id: &str) -> Result<Vec<HistoryEntry>> {
        check_user_id(user_id)?;
        Ok(self.load(user_id).await?.history)
    }

    async fn stats(&self, user_id: &str) -> Result<UserStats> {
        check_user_id(user_id)?;
        Ok(self.load(user_id).await?.stats)
    }
}
