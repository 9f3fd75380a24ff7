use std::time::Duration;

use campaign_client::{config::EngineConfig, AppError};

fn sample_toml() -> &'static str {
    r#"
[server]
address = "127.0.0.1:9000"
reply_timeout_seconds = 12
max_attempts = 5

[resetter]
start = "./server &"
stop = "kill %1"
phase_timeout_seconds = 30
env = ["HOME", "API_TOKEN"]

[checks]
step_budget = 500
call_budget_millis = 2000
check_timeout_millis = 250

[tags]
include = ["auth"]
exclude = ["slow"]
"#
}

#[test]
fn parses_full_config() {
    let config = EngineConfig::from_toml_str(sample_toml()).expect("valid config");

    assert_eq!(config.server.address, "127.0.0.1:9000");
    assert_eq!(config.server.max_attempts, 5);
    assert_eq!(config.resetter.env, vec!["HOME", "API_TOKEN"]);
    assert_eq!(config.tags.include, vec!["auth"]);

    let options = config.session_options();
    assert_eq!(options.reply_timeout, Duration::from_secs(12));
    assert_eq!(options.call_budget, Duration::from_millis(2000));

    let limits = config.check_limits();
    assert_eq!(limits.step_budget, 500);
    assert_eq!(limits.check_timeout, Duration::from_millis(250));

    assert_eq!(config.phase_timeout(), Duration::from_secs(30));
}

#[test]
fn empty_config_uses_defaults() {
    let config = EngineConfig::from_toml_str("").expect("empty config is valid");

    assert_eq!(config.server.reply_timeout_seconds, 30);
    assert_eq!(config.server.max_attempts, 1000);
    assert_eq!(config.resetter.phase_timeout_seconds, 120);
    assert_eq!(config.checks.step_budget, 100_000);
    assert!(config.shell_scripts().is_empty());
}

#[test]
fn rejects_zero_max_attempts() {
    let err = EngineConfig::from_toml_str("[server]\nmax_attempts = 0\n")
        .expect_err("zero attempts must be rejected");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("max_attempts")));
}

#[test]
fn rejects_zero_reply_timeout() {
    let err = EngineConfig::from_toml_str("[server]\nreply_timeout_seconds = 0\n")
        .expect_err("zero timeout must be rejected");
    assert!(matches!(err, AppError::Config(_)));
}

/// A start script without a stop script is not a supported lifecycle.
#[test]
fn rejects_unsupported_script_combination() {
    let err = EngineConfig::from_toml_str("[resetter]\nstart = \"./up\"\n")
        .expect_err("start alone must be rejected");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("unsupported combination")));
}

#[test]
fn rejects_tag_both_included_and_excluded() {
    let err = EngineConfig::from_toml_str("[tags]\ninclude = [\"a\"]\nexclude = [\"a\"]\n")
        .expect_err("overlapping tags must be rejected");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("both included and excluded")));
}

#[test]
fn rejects_malformed_toml() {
    let err = EngineConfig::from_toml_str("[server\naddress = 1").expect_err("invalid toml");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    std::io::Write::write_all(&mut file, sample_toml().as_bytes()).expect("write config");

    let config = EngineConfig::load_from_path(file.path()).expect("load config");
    assert_eq!(config.resetter.start, "./server &");
}

#[test]
fn missing_file_is_config_error() {
    let err = EngineConfig::load_from_path("/nonexistent/campaign.toml")
        .expect_err("missing file must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("failed to read config")));
}

/// Only variables that are set end up in the snapshot.
#[test]
#[serial_test::serial]
fn capture_env_skips_unset_variables() {
    std::env::set_var("CAMPAIGN_CONFIG_TEST_SET", "present");
    std::env::remove_var("CAMPAIGN_CONFIG_TEST_UNSET");
    let config = EngineConfig::from_toml_str(
        "[resetter]\nenv = [\"CAMPAIGN_CONFIG_TEST_SET\", \"CAMPAIGN_CONFIG_TEST_UNSET\"]\n",
    )
    .expect("valid config");

    let env = config.capture_env();
    assert_eq!(env.len(), 1);
    assert_eq!(env.get("CAMPAIGN_CONFIG_TEST_SET").map(String::as_str), Some("present"));
    std::env::remove_var("CAMPAIGN_CONFIG_TEST_SET");
}
