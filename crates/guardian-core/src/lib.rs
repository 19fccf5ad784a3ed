pub mod apk;
pub mod breach;
pub mod handoff;
pub mod history;
pub mod input;
pub mod integrity;
pub mod llm;
pub mod report;
pub mod reputation;
pub mod risk;
pub mod scan;
pub mod settings;
pub mod url_validator;

pub use apk::{ApkAnalyzer, ApkAnalyzerClient, ApkReport};
pub use breach::{Breach, BreachLookup, HibpClient};
pub use handoff::{HandoffKey, ResultCache};
pub use history::{
    FileHistoryStore, HistoryEntry, HistoryStore, MemoryHistoryStore, ScanStatus, ScanType,
    UserStats,
};
pub use input::{validate_email, InputError};
pub use integrity::{IntegritySignal, IntegrityState, IntegrityStatus};
pub use llm::{analysis_client_from_settings, AnalysisClient, ContentKind};
pub use report::{render_history, render_integrity, render_scan, OutputFormat};
pub use reputation::{ReputationCheck, ReputationOutcome, SafeBrowsingClient, ThreatMatch};
pub use risk::{Assessment, CountTier, PolicyError, RiskLevel, RiskPolicy};
pub use scan::{MessageKind, ScanKind, ScanResult, ScanService};
pub use settings::ServiceSettings;
pub use url_validator::{is_valid_url, normalize_url, validate_and_normalize, ValidationResult};
