//! Configuration loading for the site-pulse service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `PULSE_`, producing a typed [`AppConfig`] that is handed to every component
//! at construction.

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, str::FromStr};

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix for every setting.
pub const ENV_PREFIX: &str = "PULSE_";

/// Nonce key used by `local` and `test` profiles when none is configured.
/// Public, so never accepted anywhere else.
pub const DEV_NONCE_SECRET: &str = "local-dev-nonce-secret";

/// Application configuration derived from `PULSE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Bearer tokens accepted on admin routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    /// Key used to derive per-purpose nonces; required outside `local`/`test`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce_secret: Option<String>,
    #[serde(default = "default_nonce_lifetime_seconds")]
    pub nonce_lifetime_seconds: u64,
    /// Site timezone used for "today" and daily buckets, in minutes east of UTC
    #[serde(default)]
    pub report_utc_offset_minutes: i32,
    #[serde(default = "default_chatbot_name")]
    pub chatbot_name: String,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// How `POST /webhook/{id}` authenticates callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WebhookAuthMode {
    /// Any caller may post. Compatible with the legacy relay, which never
    /// checked credentials.
    #[default]
    Open,
    /// Callers must present the shared `WEBHOOK_TOKEN`.
    Token,
}

impl FromStr for WebhookAuthMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "token" => Ok(Self::Token),
            other => Err(ConfigError::InvalidWebhookAuthMode {
                value: other.to_string(),
            }),
        }
    }
}

/// Webhook relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WebhookConfig {
    /// Environment variable: `PULSE_WEBHOOK_AUTH` (`open` | `token`)
    #[serde(default)]
    pub auth: WebhookAuthMode,

    /// Environment variable: `PULSE_WEBHOOK_TOKEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Record every relayed webhook as an analytics event (default: true)
    ///
    /// Environment variable: `PULSE_WEBHOOK_RECORD_EVENTS`
    #[serde(default = "default_true")]
    pub record_events: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            auth: WebhookAuthMode::default(),
            token: None,
            record_events: true,
        }
    }
}

/// Retention (log trim) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetentionConfig {
    /// Interval between prune passes in seconds (default: one week)
    ///
    /// Environment variable: `PULSE_RETENTION_TICK_SECONDS`
    #[serde(default = "default_retention_tick_seconds")]
    pub tick_seconds: u64,

    /// Rows older than this many days are deleted (default: 90)
    ///
    /// Environment variable: `PULSE_RETENTION_MAX_AGE_DAYS`
    #[serde(default = "default_retention_max_age_days")]
    pub max_age_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_retention_tick_seconds(),
            max_age_days: default_retention_max_age_days(),
        }
    }
}

impl RetentionConfig {
    /// Validate retention bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_seconds < 60 {
            return Err(ConfigError::InvalidRetentionTick {
                value: self.tick_seconds,
            });
        }
        if self.max_age_days == 0 {
            return Err(ConfigError::InvalidRetentionMaxAge {
                value: self.max_age_days,
            });
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            nonce_secret: None,
            nonce_lifetime_seconds: default_nonce_lifetime_seconds(),
            report_utc_offset_minutes: 0,
            chatbot_name: default_chatbot_name(),
            webhooks: WebhookConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Site timezone as a fixed offset. Falls back to UTC when out of range.
    pub fn report_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.report_utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Nonce key in effect: the configured secret, or the development key.
    pub fn nonce_key(&self) -> &str {
        self.nonce_secret.as_deref().unwrap_or(DEV_NONCE_SECRET)
    }

    fn is_dev_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        if config.nonce_secret.is_some() {
            config.nonce_secret = Some("[REDACTED]".to_string());
        }
        if config.webhooks.token.is_some() {
            config.webhooks.token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        match self.nonce_secret.as_deref() {
            Some("") => return Err(ConfigError::MissingNonceSecret),
            None if !self.is_dev_profile() => return Err(ConfigError::MissingNonceSecret),
            Some(DEV_NONCE_SECRET) if !self.is_dev_profile() => {
                return Err(ConfigError::PublicNonceSecret);
            }
            Some(secret) if !self.is_dev_profile() && secret.len() < 16 => {
                return Err(ConfigError::WeakNonceSecret {
                    length: secret.len(),
                });
            }
            _ => {}
        }

        if self.nonce_lifetime_seconds < 120 {
            return Err(ConfigError::InvalidNonceLifetime {
                value: self.nonce_lifetime_seconds,
            });
        }

        if self.report_utc_offset_minutes.abs() > 14 * 60 {
            return Err(ConfigError::InvalidReportOffset {
                value: self.report_utc_offset_minutes,
            });
        }

        if self.webhooks.auth == WebhookAuthMode::Token
            && self.webhooks.token.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::MissingWebhookToken);
        }

        self.retention.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://site-pulse.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_nonce_lifetime_seconds() -> u64 {
    86_400
}

fn default_chatbot_name() -> String {
    "Nova".to_string()
}

fn default_retention_tick_seconds() -> u64 {
    604_800
}

fn default_retention_max_age_days() -> u32 {
    90
}

fn default_true() -> bool {
    true
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("no operator tokens configured; set PULSE_OPERATOR_TOKEN or PULSE_OPERATOR_TOKENS")]
    MissingOperatorTokens,
    #[error("nonce secret is missing; set PULSE_NONCE_SECRET")]
    MissingNonceSecret,
    #[error("nonce secret is the built-in development key; set a private PULSE_NONCE_SECRET")]
    PublicNonceSecret,
    #[error("nonce secret must be at least 16 bytes outside local/test profiles, got {length}")]
    WeakNonceSecret { length: usize },
    #[error("nonce lifetime must be at least 120 seconds, got {value}")]
    InvalidNonceLifetime { value: u64 },
    #[error("report utc offset must be within +/-840 minutes, got {value}")]
    InvalidReportOffset { value: i32 },
    #[error("invalid webhook auth mode '{value}'; expected 'open' or 'token'")]
    InvalidWebhookAuthMode { value: String },
    #[error("webhook auth mode 'token' requires PULSE_WEBHOOK_TOKEN")]
    MissingWebhookToken,
    #[error("retention tick interval must be at least 60 seconds, got {value}")]
    InvalidRetentionTick { value: u64 },
    #[error("retention max age must be at least 1 day, got {value}")]
    InvalidRetentionMaxAge { value: u32 },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// Loads configuration using layered `.env` files and `PULSE_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads, validates and returns the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_non_empty(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_non_empty(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_non_empty(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_non_empty(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_non_empty(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);

        // Support both a single token and a comma-separated list
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(token) = take_non_empty(&mut layered, "OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let nonce_secret = take_non_empty(&mut layered, "NONCE_SECRET");
        let nonce_lifetime_seconds = take_parsed(&mut layered, "NONCE_LIFETIME_SECONDS")?
            .unwrap_or_else(default_nonce_lifetime_seconds);
        let report_utc_offset_minutes =
            take_parsed(&mut layered, "REPORT_UTC_OFFSET_MINUTES")?.unwrap_or(0);
        let chatbot_name =
            take_non_empty(&mut layered, "CHATBOT_NAME").unwrap_or_else(default_chatbot_name);

        let webhooks = WebhookConfig {
            auth: match take_non_empty(&mut layered, "WEBHOOK_AUTH") {
                Some(raw) => raw.parse()?,
                None => WebhookAuthMode::default(),
            },
            token: take_non_empty(&mut layered, "WEBHOOK_TOKEN"),
            record_events: take_flag(&mut layered, "WEBHOOK_RECORD_EVENTS")?.unwrap_or(true),
        };

        let retention = RetentionConfig {
            tick_seconds: take_parsed(&mut layered, "RETENTION_TICK_SECONDS")?
                .unwrap_or_else(default_retention_tick_seconds),
            max_age_days: take_parsed(&mut layered, "RETENTION_MAX_AGE_DAYS")?
                .unwrap_or_else(default_retention_max_age_days),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            nonce_secret,
            nonce_lifetime_seconds,
            report_utc_offset_minutes,
            chatbot_name,
            webhooks,
            retention,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_non_empty(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: FromStr>(
    values: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_non_empty(values, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                value: raw,
            }),
        None => Ok(None),
    }
}

fn take_flag(values: &mut BTreeMap<String, String>, key: &str) -> Result<Option<bool>, ConfigError> {
    match take_non_empty(values, key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                value: raw,
            }),
        },
        None => Ok(None),
    }
}
