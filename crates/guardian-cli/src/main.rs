use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use guardian_core::integrity::spawn_monitor;
use guardian_core::{
    normalize_url, render_history, render_integrity, render_scan, FileHistoryStore, HistoryStore,
    InputError, IntegritySignal, MessageKind, OutputFormat, RiskPolicy, ScanResult, ScanService,
    ServiceSettings, ValidationResult,
};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_HISTORY_DIR: &str = ".guardian/history";
const INPUT_ERROR_EXIT: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "guardian",
    author,
    version,
    about = "Check links, messages, apps and credentials for scams and leaks"
)]
struct Cli {
    /// Config file (TOML/YAML/JSON) with [services], [policy] and [history] tables
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Record scans in this user's history
    #[arg(long, value_name = "ID", global = true)]
    user: Option<String>,

    /// Directory holding per-user history files
    #[arg(long = "history-dir", value_name = "DIR", global = true)]
    history_dir: Option<PathBuf>,

    /// Emit JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a URL, then run AI analysis and the reputation check
    Url { input: String },
    /// Same as `url`, reviewed as a scanned QR payload
    Qr { payload: String },
    /// Analyze an email or SMS body read from stdin
    Message {
        #[arg(long, value_enum)]
        kind: MessageArg,
    },
    /// Look an email address up in the breach corpus
    Email { address: String },
    /// Check a password read from stdin against Pwned Passwords
    Password,
    /// Extract an APK's permissions and have them reviewed
    Apk { path: PathBuf },
    /// Fold device integrity signals into a status
    Device {
        #[arg(long = "signal", value_name = "SIGNAL", required = true)]
        signals: Vec<IntegritySignal>,
    },
    /// Show recorded scans and counters for --user
    History,
    /// Normalize a URL without contacting any service
    Validate { input: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MessageArg {
    Email,
    Sms,
}

impl From<MessageArg> for MessageKind {
    fn from(arg: MessageArg) -> Self {
        match arg {
            MessageArg::Email => MessageKind::Email,
            MessageArg::Sms => MessageKind::Sms,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    services: HashMap<String, String>,
    policy: Option<RiskPolicy>,
    history: HistorySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HistorySection {
    dir: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match run(&cli, format).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => match err.downcast_ref::<InputError>() {
            Some(input) => {
                eprintln!("error: {input}");
                Ok(ExitCode::from(INPUT_ERROR_EXIT))
            }
            None => Err(err),
        },
    }
}

async fn run(cli: &Cli, format: OutputFormat) -> Result<()> {
    let file_config = match &cli.config {
        Some(path) => load_file_config(path)?,
        None => FileConfig::default(),
    };

    match &cli.command {
        Commands::Validate { input } => {
            let outcome = normalize_url(input);
            match format {
                OutputFormat::Json => {
                    let report = ValidationResult::from(outcome.clone());
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                OutputFormat::Human => {
                    if let Ok(url) = &outcome {
                        println!("{url}");
                    }
                }
            }
            outcome.map_err(InputError::from)?;
            Ok(())
        }
        Commands::Device { signals } => {
            let monitor = spawn_monitor(signals.len());
            for signal in signals {
                monitor
                    .sender
                    .send(*signal)
                    .await
                    .context("integrity reducer stopped early")?;
            }
            drop(monitor.sender);
            let state = monitor.task.await.context("integrity reducer panicked")?;
            if let Some(user) = &cli.user {
                let store = FileHistoryStore::new(history_dir(cli, &file_config));
                if let Err(err) = store.record(user, state.history_entry()).await {
                    warn!(error = %err, "failed to record device check in history");
                }
            }
            emit(&render_integrity(&state, format)?);
            Ok(())
        }
        Commands::History => {
            let user = cli
                .user
                .as_deref()
                .context("`history` needs --user to know whose scans to show")?;
            let store = FileHistoryStore::new(history_dir(cli, &file_config));
            let entries = store.entries(user).await?;
            let stats = store.stats(user).await?;
            emit(&render_history(&entries, &stats, format)?);
            Ok(())
        }
        command => {
            let service = build_service(cli, file_config)?;
            let result = run_scan(&service, command).await?;
            let key = service.hand_off(result);
            let result = service
                .take_result(key)
                .context("scan result expired before it could be shown")?;
            emit(&render_scan(&result, format)?);
            Ok(())
        }
    }
}

async fn run_scan(service: &ScanService, command: &Commands) -> Result<ScanResult> {
    let result = match command {
        Commands::Url { input } => service.scan_url(input).await?,
        Commands::Qr { payload } => service.scan_qr(payload).await?,
        Commands::Message { kind } => {
            let text = read_stdin().await?;
            service.scan_message(&text, (*kind).into()).await?
        }
        Commands::Email { address } => service.check_email(address).await?,
        Commands::Password => {
            let password = read_stdin().await?;
            service.check_password(&password).await?
        }
        Commands::Apk { path } => service.analyze_apk(path).await?,
        Commands::Device { .. } | Commands::History | Commands::Validate { .. } => {
            bail!("{command:?} does not run a scan")
        }
    };
    Ok(result)
}

fn build_service(cli: &Cli, file_config: FileConfig) -> Result<ScanService> {
    let settings = if cli.config.is_some() {
        ServiceSettings::from_map(merge_service_vars(
            &file_config.services,
            std::env::vars(),
        ))?
    } else {
        ServiceSettings::from_env()?
    };
    let mut service = ScanService::from_settings(&settings)?;
    if let Some(policy) = file_config.policy.clone() {
        debug!("using risk policy from config file");
        service = service.with_policy(policy);
    }
    if let Some(user) = &cli.user {
        let store: Arc<dyn HistoryStore> =
            Arc::new(FileHistoryStore::new(history_dir(cli, &file_config)));
        service = service.with_history(store, user.clone());
    }
    Ok(service)
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let file_config: FileConfig = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .and_then(|cfg| cfg.try_deserialize())
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    if let Some(policy) = &file_config.policy {
        policy
            .validate()
            .with_context(|| format!("invalid [policy] in {}", path.display()))?;
    }
    Ok(file_config)
}

/// `[services]` keys map onto `GUARDIAN_<KEY>`; environment variables win.
fn merge_service_vars(
    file_services: &HashMap<String, String>,
    env: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = file_services
        .iter()
        .filter_map(|(key, value)| {
            let name = format!("GUARDIAN_{}", key.to_ascii_uppercase());
            if ServiceSettings::ALL_ENV.contains(&name.as_str()) {
                Some((name, value.clone()))
            } else {
                warn!(key = %key, "ignoring unknown [services] key");
                None
            }
        })
        .collect();
    vars.extend(env.into_iter().filter(|(key, _)| key.starts_with("GUARDIAN_")));
    vars
}

fn history_dir(cli: &Cli, file_config: &FileConfig) -> PathBuf {
    cli.history_dir
        .clone()
        .or_else(|| file_config.history.dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_DIR))
}

fn emit(rendered: &str) {
    if rendered.ends_with('\n') {
        print!("{rendered}");
    } else {
        println!("{rendered}");
    }
}

async fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buf)
        .await
        .context("failed to read stdin")?;
    Ok(buf)
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
