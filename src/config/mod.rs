//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Sensitive values wrapped in secrecy::SecretString to prevent
//! log leaks.

pub mod secrets;

use crate::engine::{DEFAULT_BATCH_SIZE, ReconcileConfig};
use crate::error::{Error, Result};
use crate::services::flags::AccountSet;
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

/// Which rebroadcast assignment strategy the manager runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentMode {
    /// Release soft pre-assignments after the first broadcast.
    #[default]
    Legacy,
    /// Rotate pre-assignment through capable delegates.
    Capability,
    /// Capability for accounts with the feature flag on, legacy otherwise.
    PerAccount,
}

impl AssignmentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentMode::Legacy => "legacy",
            AssignmentMode::Capability => "capability",
            AssignmentMode::PerAccount => "per-account",
        }
    }
}

impl std::fmt::Display for AssignmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(AssignmentMode::Legacy),
            "capability" => Ok(AssignmentMode::Capability),
            "per-account" | "per_account" => Ok(AssignmentMode::PerAccount),
            other => Err(Error::Config(format!(
                "ASSIGNMENT_MODE must be legacy, capability or per-account, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Build version stamped on tasks; only matching tasks are rebroadcast.
    pub manager_version: String,
    pub tick_interval: Duration,
    pub batch_size: usize,
    pub assignment_mode: AssignmentMode,
    /// Accounts with capability assignment switched on in per-account mode.
    pub capability_accounts: AccountSet,
    /// Whether this replica runs the expiry sweeps.
    pub primary: bool,
    /// Delegates silent for longer than this are considered gone.
    pub heartbeat_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            manager_version: std::env::var("MANAGER_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            tick_interval: Duration::from_secs(parsed_var("TICK_INTERVAL_SECS", 5)?),
            batch_size: parsed_var("TICK_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            assignment_mode: parsed_var("ASSIGNMENT_MODE", AssignmentMode::Legacy)?,
            capability_accounts: AccountSet::parse(
                &std::env::var("CAPABILITY_ASSIGNMENT_ACCOUNTS").unwrap_or_default(),
            ),
            primary: parsed_var("MANAGER_PRIMARY", true)?,
            heartbeat_timeout: Duration::from_secs(parsed_var("DELEGATE_HEARTBEAT_TIMEOUT_SECS", 300)?),
        })
    }

    /// Engine tunables derived from this configuration.
    pub fn reconcile(&self) -> ReconcileConfig {
        ReconcileConfig {
            batch_size: self.batch_size,
            version: self.manager_version.clone(),
            tick_interval: self.tick_interval,
            initial_jitter: self.tick_interval,
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {name}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}
