use std::fmt::Write;

use colored::*;

use crate::history::{HistoryEntry, UserStats};
use crate::integrity::{IntegrityState, IntegrityStatus};
use crate::reputation::ReputationOutcome;
use crate::risk::RiskLevel;
use crate::scan::ScanResult;

/// Format styles supported by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Produce a printable verdict for one scan.
pub fn render_scan(result: &ScanResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_human(result),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
    }
}

fn risk_label(risk: RiskLevel) -> ColoredString {
    let label = risk.as_str();
    match risk {
        RiskLevel::High => label.bright_red().bold(),
        RiskLevel::Medium => label.truecolor(255, 140, 0).bold(),
        RiskLevel::Low => label.bright_green().bold(),
        RiskLevel::Unknown => label.dimmed(),
    }
}

fn render_human(result: &ScanResult) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(
        out,
        "Risk: {} (score {}/100)",
        risk_label(result.risk),
        result.score
    )?;
    writeln!(out, "Scanned: {}", single_line(&result.content))?;
    writeln!(out, "Reason: {}", result.reason)?;

    match &result.reputation {
        Some(ReputationOutcome::Clean) => writeln!(out, "Reputation: no threat matches")?,
        Some(ReputationOutcome::Threats(matches)) => {
            writeln!(out, "Reputation: {} threat match(es)", matches.len())?;
            for threat in matches {
                writeln!(out, "  - {} ({})", threat.threat_type, threat.platform_type)?;
            }
        }
        Some(ReputationOutcome::Skipped(_)) | None => {}
    }
    if let Some(note) = &result.reputation_note {
        writeln!(out, "Note: {note}")?;
    }
    if let Some(ai) = &result.ai {
        if ai.risk != result.risk || ai.score != result.score {
            writeln!(out, "AI verdict: {} ({}/100)", ai.risk, ai.score)?;
        }
    }

    if !result.breaches.is_empty() {
        writeln!(out)?;
        writeln!(out, "Breaches:")?;
        for breach in &result.breaches {
            let date = breach.breach_date.as_deref().unwrap_or("date unknown");
            writeln!(out, "  - {} ({date})", breach.name)?;
        }
    }

    if let Some(app) = &result.app {
        writeln!(out)?;
        writeln!(out, "Package: {}", app.package_name)?;
        if let Some(version) = &app.version {
            writeln!(out, "Version: {version}")?;
        }
        writeln!(out, "Permissions ({}):", app.permissions.len())?;
        for perm in app.short_permissions() {
            writeln!(out, "  - {perm}")?;
        }
        if app.secret_count() > 0 {
            writeln!(out, "Embedded secrets: {}", app.secret_count())?;
        }
    }

    Ok(out)
}

/// Render a user's history and counters.
pub fn render_history(
    entries: &[HistoryEntry],
    stats: &UserStats,
    format: OutputFormat,
) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(&serde_json::json!({
            "stats": stats,
            "history": entries,
        }))?);
    }

    let mut out = String::new();
    writeln!(
        out,
        "Safety score: {} • scans today: {} • threats blocked: {} • apps analyzed: {}",
        stats.safety_score, stats.scans_today, stats.threats_blocked, stats.apps_analyzed
    )?;
    if entries.is_empty() {
        writeln!(out, "No scans recorded yet.")?;
        return Ok(out);
    }
    writeln!(out)?;
    for entry in entries.iter().rev() {
        writeln!(
            out,
            "{ts}  {kind:<6} {status:<10} {details}",
            ts = entry.timestamp,
            kind = serde_plain(&entry.scan_type),
            status = serde_plain(&entry.status),
            details = single_line(&entry.details),
        )?;
    }
    Ok(out)
}

/// Render the folded device-integrity state.
pub fn render_integrity(state: &IntegrityState, format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(state)?);
    }
    let status = state.status.to_string();
    let status = match state.status {
        IntegrityStatus::Red => status.bright_red().bold(),
        IntegrityStatus::Orange => status.truecolor(255, 140, 0).bold(),
        IntegrityStatus::Green => status.bright_green().bold(),
    };
    let mut out = String::new();
    writeln!(out, "Device status: {status}")?;
    let flags = [
        ("rooted", state.rooted),
        ("emulator", state.emulator),
        ("tampered", state.tampered),
        ("hooked", state.hooked),
        ("debugger", state.debugger),
        ("unofficial store", state.unofficial_store),
    ];
    for (name, raised) in flags {
        writeln!(out, "  {name:<17}{}", if raised { "detected" } else { "-" })?;
    }
    Ok(out)
}

fn serde_plain<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

fn single_line(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            _ => c,
        })
        .collect()
}
