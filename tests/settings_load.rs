// tests/settings_load.rs
use std::{env, fs};

use standup_digest::config::settings::{resolve_secret, ENV_CONFIG_PATH};
use standup_digest::Settings;

const SAMPLE: &str = r##"
timezone = "America/New_York"
digest_schedule = "15 16 * * 1-5"

[digest]
sinks = ["slack"]
slack_channel = "#team-digest"
email_recipients = ["lead@example.com"]

[slack]
token = "ENV"
channels = ["C0123"]

[discord]
webhook_url = "https://discord.test/hook"
"##;

fn clear_env() {
    for k in [ENV_CONFIG_PATH, "DIGEST_SCHEDULE", "TIMEZONE", "LOG_LEVEL"] {
        env::remove_var(k);
    }
}

#[test]
fn parse_full_file() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("digest.toml");
    fs::write(&p, SAMPLE).unwrap();

    let s = Settings::from_path(&p).unwrap();
    assert_eq!(s.tz().unwrap(), chrono_tz::America::New_York);
    assert_eq!(s.digest_schedule, "15 16 * * 1-5");
    assert_eq!(s.digest.sinks, vec!["slack".to_string()]);
    assert_eq!(s.digest.slack_channel, "#team-digest");
    assert_eq!(s.digest.subject_prefix, "Project Digest");
    assert_eq!(s.slack.as_ref().unwrap().channels, vec!["C0123".to_string()]);
    assert_eq!(s.discord.as_ref().unwrap().max_retries, 3);
    assert!(s.jira.is_none());
}

#[serial_test::serial]
#[test]
fn load_uses_env_path_then_default_then_builtin() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    // 1) Nothing on disk: built-in defaults.
    let s = Settings::load().unwrap();
    assert_eq!(s.timezone, "UTC");
    assert_eq!(s.digest_schedule, "0 17 * * 1-5");

    // 2) ./config/digest.toml
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(tmp.path().join("config/digest.toml"), SAMPLE).unwrap();
    let s = Settings::load().unwrap();
    assert_eq!(s.timezone, "America/New_York");

    // 3) Env path wins.
    let other = tmp.path().join("other.toml");
    fs::write(&other, r#"timezone = "Europe/Prague""#).unwrap();
    env::set_var(ENV_CONFIG_PATH, &other);
    let s = Settings::load().unwrap();
    assert_eq!(s.timezone, "Europe/Prague");

    // 4) Env path pointing nowhere is an error.
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml"));
    assert!(Settings::load().is_err());

    clear_env();
    env::set_current_dir(old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_overrides_apply_and_are_validated() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    env::set_var("DIGEST_SCHEDULE", "0 9 * * *");
    env::set_var("TIMEZONE", "Asia/Tokyo");
    env::set_var("LOG_LEVEL", "debug");
    let s = Settings::load().unwrap();
    assert_eq!(s.digest_schedule, "0 9 * * *");
    assert_eq!(s.timezone, "Asia/Tokyo");
    assert_eq!(s.log_level, "debug");

    env::set_var("DIGEST_SCHEDULE", "0 9 * *");
    assert!(Settings::load().is_err());

    clear_env();
    env::set_current_dir(old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_literal_secret_reads_named_variable() {
    env::set_var("DIGEST_TEST_TOKEN", "xoxb-from-env");
    assert_eq!(resolve_secret("ENV", "DIGEST_TEST_TOKEN").unwrap(), "xoxb-from-env");
    assert_eq!(resolve_secret("env", "DIGEST_TEST_TOKEN").unwrap(), "xoxb-from-env");

    env::remove_var("DIGEST_TEST_TOKEN");
    assert!(resolve_secret("ENV", "DIGEST_TEST_TOKEN").is_err());
}
