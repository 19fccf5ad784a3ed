use assert_cmd::Command;
use once_cell::sync::Lazy;
use predicates::prelude::*;
use predicates::str::contains;
use std::env;
use std::fs::write;
use std::sync::Mutex;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const SERVICE_VARS: [&str; 12] = [
    "GUARDIAN_LLM_PROVIDER",
    "GUARDIAN_GEMINI_API_KEY",
    "GUARDIAN_GEMINI_ENDPOINT",
    "GUARDIAN_GEMINI_MODEL",
    "GUARDIAN_SAFE_BROWSING_API_KEY",
    "GUARDIAN_SAFE_BROWSING_ENDPOINT",
    "GUARDIAN_HIBP_API_KEY",
    "GUARDIAN_HIBP_ENDPOINT",
    "GUARDIAN_PWNED_PASSWORDS_ENDPOINT",
    "GUARDIAN_APK_ANALYZER_URL",
    "GUARDIAN_TIMEOUT_SECS",
    "GUARDIAN_MAX_RETRIES",
];

fn reset_env() {
    for var in SERVICE_VARS {
        env::remove_var(var);
    }
}

fn guardian() -> Command {
    let mut cmd = Command::cargo_bin("guardian-cli").unwrap();
    cmd.env("NO_COLOR", "1").env("RUST_LOG", "warn");
    cmd
}

#[test]
fn validate_prints_normalized_url() {
    guardian()
        .args(["validate", "  example.com/path "])
        .assert()
        .success()
        .stdout("https://example.com/path\n");
}

#[test]
fn validate_rejects_script_protocol() {
    guardian()
        .args(["validate", "javascript:alert(1)"])
        .assert()
        .code(2)
        .stdout("")
        .stderr(contains("javascript:"));
}

#[test]
fn validate_json_reports_failure() {
    guardian()
        .args(["--json", "validate", "   "])
        .assert()
        .code(2)
        .stdout(contains("\"is_valid\": false"))
        .stdout(contains("URL cannot be empty"));
}

#[test]
fn device_signals_fold_to_status() {
    guardian()
        .args(["device", "--signal", "emulator", "--signal", "rooted"])
        .assert()
        .success()
        .stdout(contains("Device status: RED"))
        .stdout(contains("rooted"));

    guardian()
        .args(["device", "--signal", "debugger"])
        .assert()
        .success()
        .stdout(contains("Device status: ORANGE"));

    guardian()
        .args(["--json", "device", "--signal", "unofficial-store"])
        .assert()
        .success()
        .stdout(contains("\"unofficial_store\": true"));
}

#[test]
fn device_check_is_recorded_for_user() {
    let history = tempfile::tempdir().unwrap();
    let dir = history.path().to_str().unwrap();

    guardian()
        .args(["device", "--signal", "rooted", "--user", "u", "--history-dir", dir])
        .assert()
        .success()
        .stdout(contains("Device status: RED"));

    guardian()
        .args(["history", "--user", "u", "--history-dir", dir])
        .assert()
        .success()
        .stdout(contains("Safety score: 45"))
        .stdout(contains("threats blocked: 1"))
        .stdout(contains("Device integrity: RED"));
}

#[test]
fn device_check_without_user_writes_nothing() {
    let history = tempfile::tempdir().unwrap();

    guardian()
        .args(["device", "--signal", "debugger"])
        .args(["--history-dir", history.path().to_str().unwrap()])
        .assert()
        .success();
    assert_eq!(std::fs::read_dir(history.path()).unwrap().count(), 0);
}

#[test]
fn unknown_device_signal_is_a_usage_error() {
    guardian()
        .args(["device", "--signal", "jailbroken"])
        .assert()
        .failure()
        .stderr(contains("unknown integrity signal"));
}

#[test]
fn malformed_email_is_rejected_before_lookup() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();

    guardian()
        .args(["email", "not-an-email"])
        .assert()
        .code(2)
        .stderr(contains("Please enter a valid email address"));
}

#[test]
fn empty_password_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();

    guardian()
        .arg("password")
        .write_stdin("\n")
        .assert()
        .code(2)
        .stderr(contains("Password is required"));
}

#[test]
fn url_scan_with_noop_provider_is_unknown_not_low() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();

    guardian()
        .env("GUARDIAN_LLM_PROVIDER", "noop")
        .args(["url", "example.com"])
        .assert()
        .success()
        .stdout(contains("Risk: UNKNOWN (score 0/100)"))
        .stdout(contains("Scanned: https://example.com"))
        .stdout(contains("Reputation check skipped"))
        .stdout(contains("Risk: LOW").not());
}

#[test]
fn message_scan_reads_stdin() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();

    guardian()
        .env("GUARDIAN_LLM_PROVIDER", "noop")
        .args(["--json", "message", "--kind", "sms"])
        .write_stdin("Your parcel is held. Pay Rs 25 at http://indiapost-fee.in")
        .assert()
        .success()
        .stdout(contains("\"kind\": \"sms\""))
        .stdout(contains("\"risk\": \"UNKNOWN\""));
}

#[test]
fn config_file_drives_services_and_history() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();

    let history = tempfile::tempdir().unwrap();
    let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write(
        file.path(),
        format!(
            "[services]\nllm_provider = \"noop\"\ntimeout_secs = 5\n\n[history]\ndir = \"{}\"\n",
            history.path().display()
        ),
    )
    .unwrap();
    let config = file.path().to_str().unwrap();

    guardian()
        .args(["--config", config, "--user", "alice", "--json", "qr", "upi.example.in/pay"])
        .assert()
        .success()
        .stdout(contains("\"kind\": \"qr\""));
    assert!(history.path().join("alice.json").exists());

    guardian()
        .args(["--config", config, "--user", "alice", "history"])
        .assert()
        .success()
        .stdout(contains("scans today: 1"))
        .stdout(contains("QR"))
        .stdout(contains("https://upi.example.in/pay"));
}

#[test]
fn environment_overrides_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();

    let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write(file.path(), "[services]\nllm_provider = \"noop\"\n").unwrap();

    guardian()
        .env("GUARDIAN_LLM_PROVIDER", "openai")
        .args(["--config", file.path().to_str().unwrap(), "url", "example.com"])
        .assert()
        .failure()
        .stderr(contains("GUARDIAN_LLM_PROVIDER"));
}

#[test]
fn invalid_policy_in_config_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();

    let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write(
        file.path(),
        "[services]\nllm_provider = \"noop\"\n\n[policy]\nthreat_risk = \"LOW\"\n",
    )
    .unwrap();

    guardian()
        .args(["--config", file.path().to_str().unwrap(), "url", "example.com"])
        .assert()
        .failure()
        .stderr(contains("failed to load config"));
}

#[test]
fn history_requires_user() {
    guardian()
        .arg("history")
        .assert()
        .failure()
        .stderr(contains("--user"));
}
