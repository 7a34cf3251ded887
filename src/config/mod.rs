//! Configuration loading for the billing sync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `BILLSYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connectors::fetch::RetryPolicy;
use crate::crypto::{CryptoError, CryptoKey};

const ENV_PREFIX: &str = "BILLSYNC_";

/// Application configuration derived from `BILLSYNC_*` environment variables.
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
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default = "default_exchange_rates_api_base")]
    pub exchange_rates_api_base: String,
    #[serde(default = "default_bank_feed_api_base")]
    pub bank_feed_api_base: String,
    #[serde(default)]
    pub sync: SyncRunConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// Sync run bookkeeping parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncRunConfig {
    /// Age after which an unfinished run is considered orphaned (default: 3600)
    ///
    /// Environment variable: `BILLSYNC_ORPHAN_THRESHOLD_SECONDS`
    #[serde(default = "default_orphan_threshold_seconds")]
    pub orphan_threshold_seconds: u64,

    /// How often `serve` runs the orphan sweep (default: 300)
    ///
    /// Environment variable: `BILLSYNC_ORPHAN_SWEEP_INTERVAL_SECONDS`
    #[serde(default = "default_orphan_sweep_interval_seconds")]
    pub orphan_sweep_interval_seconds: u64,
}

/// Transport parameters shared by the shipped connectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FetchConfig {
    /// Attempts per request including the first one (default: 3)
    #[serde(default = "default_fetch_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, doubled on each further retry (default: 1000)
    #[serde(default = "default_fetch_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay (default: 30000)
    #[serde(default = "default_fetch_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-request timeout (default: 30)
    #[serde(default = "default_fetch_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Fetch window used when `since_date` is absent or malformed (default: 7)
    #[serde(default = "default_fetch_default_lookback_days")]
    pub default_lookback_days: u32,
}

impl Default for SyncRunConfig {
    fn default() -> Self {
        Self {
            orphan_threshold_seconds: default_orphan_threshold_seconds(),
            orphan_sweep_interval_seconds: default_orphan_sweep_interval_seconds(),
        }
    }
}

impl SyncRunConfig {
    pub fn orphan_threshold(&self) -> Duration {
        Duration::from_secs(self.orphan_threshold_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.orphan_sweep_interval_seconds)
    }

    /// Validate sweep configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orphan_threshold_seconds < 60 {
            return Err(ConfigError::InvalidOrphanThreshold {
                value: self.orphan_threshold_seconds,
            });
        }
        if self.orphan_sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidSweepInterval);
        }
        Ok(())
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_fetch_max_attempts(),
            base_delay_ms: default_fetch_base_delay_ms(),
            max_delay_ms: default_fetch_max_delay_ms(),
            timeout_seconds: default_fetch_timeout_seconds(),
            default_lookback_days: default_fetch_default_lookback_days(),
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Validate fetch configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidFetchAttempts);
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidFetchBackoffBounds {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::InvalidFetchTimeout);
        }
        if self.default_lookback_days == 0 {
            return Err(ConfigError::InvalidLookback);
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
            crypto_key: None,
            exchange_rates_api_base: default_exchange_rates_api_base(),
            bank_feed_api_base: default_bank_feed_api_base(),
            sync: SyncRunConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Wraps the configured key bytes in a zeroizing [`CryptoKey`].
    pub fn crypto_key(&self) -> Result<CryptoKey, ConfigError> {
        let bytes = self.crypto_key.clone().ok_or(ConfigError::MissingCryptoKey)?;
        CryptoKey::new(bytes).map_err(|err| match err {
            CryptoError::InvalidKeyLength(length) => ConfigError::InvalidCryptoKeyLength { length },
            other => ConfigError::InvalidCryptoKeyBase64 {
                error: other.to_string(),
            },
        })
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        self.sync.validate()?;
        self.fetch.validate()?;

        Ok(())
    }

    /// The HTTP surface refuses to start without at least one operator token.
    pub fn require_operator_tokens(&self) -> Result<(), ConfigError> {
        if self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }
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
    "sqlite://billing-sync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_exchange_rates_api_base() -> String {
    "https://www.cnb.cz/en/financial-markets/foreign-exchange-market/central-bank-exchange-rate-fixing/central-bank-exchange-rate-fixing/daily.txt".to_string()
}

fn default_bank_feed_api_base() -> String {
    "https://fioapi.fio.cz/v1/rest".to_string()
}

fn default_orphan_threshold_seconds() -> u64 {
    3600
}

fn default_orphan_sweep_interval_seconds() -> u64 {
    300
}

fn default_fetch_max_attempts() -> u32 {
    3
}

fn default_fetch_base_delay_ms() -> u64 {
    1000
}

fn default_fetch_max_delay_ms() -> u64 {
    30_000
}

fn default_fetch_timeout_seconds() -> u64 {
    30
}

fn default_fetch_default_lookback_days() -> u32 {
    7
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
    #[error(
        "no operator tokens configured; set BILLSYNC_OPERATOR_TOKEN or BILLSYNC_OPERATOR_TOKENS"
    )]
    MissingOperatorTokens,
    #[error("crypto key is missing; set BILLSYNC_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("orphan threshold must be at least 60 seconds, got {value}")]
    InvalidOrphanThreshold { value: u64 },
    #[error("orphan sweep interval must be positive")]
    InvalidSweepInterval,
    #[error("fetch max attempts must be at least 1")]
    InvalidFetchAttempts,
    #[error("fetch base delay ({base} ms) cannot be greater than max delay ({max} ms)")]
    InvalidFetchBackoffBounds { base: u64, max: u64 },
    #[error("fetch timeout must be positive")]
    InvalidFetchTimeout,
    #[error("default lookback must be at least one day")]
    InvalidLookback,
}

/// Loads configuration using layered `.env` files and `BILLSYNC_*` env vars.
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

    /// Loads `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`
    /// and then the process environment, later layers winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        // Support both a single token and a comma-separated list
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(token) = layered.remove("OPERATOR_TOKEN").filter(|t| !t.is_empty()) {
            vec![token]
        } else {
            Vec::new()
        };

        let crypto_key = match layered.remove("CRYPTO_KEY").filter(|v| !v.is_empty()) {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(key_str.trim()).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let exchange_rates_api_base = layered
            .remove("EXCHANGE_RATES_API_BASE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_exchange_rates_api_base);
        let bank_feed_api_base = layered
            .remove("BANK_FEED_API_BASE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_bank_feed_api_base);

        let sync = SyncRunConfig {
            orphan_threshold_seconds: layered
                .remove("ORPHAN_THRESHOLD_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_orphan_threshold_seconds),
            orphan_sweep_interval_seconds: layered
                .remove("ORPHAN_SWEEP_INTERVAL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_orphan_sweep_interval_seconds),
        };

        let fetch = FetchConfig {
            max_attempts: layered
                .remove("FETCH_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_fetch_max_attempts),
            base_delay_ms: layered
                .remove("FETCH_BASE_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_fetch_base_delay_ms),
            max_delay_ms: layered
                .remove("FETCH_MAX_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_fetch_max_delay_ms),
            timeout_seconds: layered
                .remove("FETCH_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_fetch_timeout_seconds),
            default_lookback_days: layered
                .remove("FETCH_DEFAULT_LOOKBACK_DAYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_fetch_default_lookback_days),
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
            crypto_key,
            exchange_rates_api_base,
            bank_feed_api_base,
            sync,
            fetch,
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

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            crypto_key: Some(vec![1u8; 32]),
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_defaults_validate_with_key() {
        assert!(valid_config().validate().is_ok());
        assert!(matches!(
            AppConfig::default().validate(),
            Err(ConfigError::MissingCryptoKey)
        ));
    }

    #[test]
    fn test_orphan_threshold_lower_bound() {
        let mut config = valid_config();
        config.sync.orphan_threshold_seconds = 59;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidOrphanThreshold { value: 59 })
        ));
    }

    #[test]
    fn test_fetch_backoff_bounds() {
        let mut config = valid_config();
        config.fetch.base_delay_ms = 5_000;
        config.fetch.max_delay_ms = 1_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFetchBackoffBounds { .. })
        ));

        let mut config = valid_config();
        config.fetch.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFetchAttempts)
        ));
    }

    #[test]
    fn test_retry_policy_from_fetch_config() {
        let policy = FetchConfig::default().retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_redacted_json_hides_secrets() {
        let mut config = valid_config();
        config.operator_tokens = vec!["super-secret".to_string()];
        let json = config.redacted_json().expect("serializes");
        assert!(!json.contains("super-secret"));
        assert!(json.contains("[REDACTED]"));
    }

    #[test]
    fn test_crypto_key_wrapping() {
        assert!(valid_config().crypto_key().is_ok());
        let mut config = valid_config();
        config.crypto_key = Some(vec![0u8; 8]);
        assert!(matches!(
            config.crypto_key(),
            Err(ConfigError::InvalidCryptoKeyLength { length: 8 })
        ));
    }
}
