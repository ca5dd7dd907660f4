use site_pulse::config::{ConfigError, ConfigLoader, DEV_NONCE_SECRET, WebhookAuthMode};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const KEYS: [&str; 8] = [
    "PULSE_PROFILE",
    "PULSE_API_BIND_ADDR",
    "PULSE_LOG_LEVEL",
    "PULSE_OPERATOR_TOKEN",
    "PULSE_NONCE_SECRET",
    "PULSE_WEBHOOK_AUTH",
    "PULSE_WEBHOOK_TOKEN",
    "PULSE_RETENTION_MAX_AGE_DAYS",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        for key in KEYS {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_only_operator_token_is_set() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("PULSE_OPERATOR_TOKEN", "operator-token");
    }

    let cfg = loader(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.operator_tokens, vec!["operator-token".to_string()]);
    assert_eq!(cfg.webhooks.auth, WebhookAuthMode::Open);
    assert!(cfg.webhooks.record_events);
    assert_eq!(cfg.retention.max_age_days, 90);
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "PULSE_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "PULSE_API_BIND_ADDR=192.168.0.10:5000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "PULSE_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "PULSE_PROFILE=test\nPULSE_API_BIND_ADDR=127.0.0.1:4000\nPULSE_OPERATOR_TOKEN=test-token-for-layered-test\n",
    );

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "PULSE_API_BIND_ADDR=127.0.0.1:3000\nPULSE_OPERATOR_TOKEN=test-token-for-env-override\n",
    );

    unsafe {
        env::set_var("PULSE_API_BIND_ADDR", "0.0.0.0:9090");
    }

    let cfg = loader(&temp_dir)
        .load()
        .expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");

    clear_env();
}

#[test]
fn missing_operator_token_is_rejected() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    let err = loader(&temp_dir).load().expect_err("operator token required");

    assert!(matches!(err, ConfigError::MissingOperatorTokens));
    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("PULSE_OPERATOR_TOKEN", "operator-token");
        env::set_var("PULSE_API_BIND_ADDR", "not-an-address");
    }

    let err = loader(&temp_dir).load().expect_err("bind address must parse");

    assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));
    clear_env();
}

#[test]
fn token_webhook_mode_requires_token() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "PULSE_OPERATOR_TOKEN=operator-token\nPULSE_WEBHOOK_AUTH=token\n",
    );

    let err = loader(&temp_dir).load().expect_err("webhook token required");
    assert!(matches!(err, ConfigError::MissingWebhookToken));

    unsafe {
        env::set_var("PULSE_WEBHOOK_TOKEN", "hook-secret");
    }
    let cfg = loader(&temp_dir).load().expect("token mode with token loads");
    assert_eq!(cfg.webhooks.auth, WebhookAuthMode::Token);
    clear_env();
}

#[test]
fn production_profile_rejects_short_nonce_secret() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "PULSE_PROFILE=prod\nPULSE_OPERATOR_TOKEN=operator-token\nPULSE_NONCE_SECRET=short\n",
    );

    let err = loader(&temp_dir).load().expect_err("short secret rejected");
    assert!(matches!(err, ConfigError::WeakNonceSecret { length: 5 }));
    clear_env();
}

#[test]
fn production_profile_requires_private_nonce_secret() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "PULSE_PROFILE=prod\nPULSE_OPERATOR_TOKEN=operator-token\n",
    );

    let err = loader(&temp_dir).load().expect_err("secret required in prod");
    assert!(matches!(err, ConfigError::MissingNonceSecret));

    unsafe {
        env::set_var("PULSE_NONCE_SECRET", DEV_NONCE_SECRET);
    }
    let err = loader(&temp_dir)
        .load()
        .expect_err("built-in secret rejected in prod");
    assert!(matches!(err, ConfigError::PublicNonceSecret));

    unsafe {
        env::set_var("PULSE_NONCE_SECRET", "a-private-production-nonce-key");
    }
    let cfg = loader(&temp_dir).load().expect("private secret loads");
    assert_eq!(cfg.nonce_key(), "a-private-production-nonce-key");
    clear_env();
}

#[test]
fn redacted_json_hides_secrets() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "PULSE_OPERATOR_TOKEN=operator-token\nPULSE_NONCE_SECRET=super-secret-nonce-key\n",
    );

    let cfg = loader(&temp_dir).load().expect("config loads");
    let redacted = cfg.redacted_json().expect("config serializes");

    assert!(!redacted.contains("operator-token"));
    assert!(!redacted.contains("super-secret-nonce-key"));
    assert!(redacted.contains("[REDACTED]"));
    clear_env();
}
