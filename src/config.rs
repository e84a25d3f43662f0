use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

use crate::limits::*;

pub const DEFAULT_EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.\w+$";

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue { key: &'static str, value: String },
    BadPattern(String),
    AdminOutsideDomain(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { key, value } => write!(f, "invalid value for {key}: {value:?}"),
            ConfigError::BadPattern(e) => write!(f, "email pattern does not compile: {e}"),
            ConfigError::AdminOutsideDomain(email) => {
                write!(f, "admin {email} does not match the email pattern")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Who may register and who is an admin.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    email_pattern: Regex,
    admins: HashSet<String>,
}

impl AccessPolicy {
    pub fn new(pattern: &str, admins: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let email_pattern = Regex::new(pattern).map_err(|e| ConfigError::BadPattern(e.to_string()))?;
        let admins: HashSet<String> = admins.into_iter().collect();
        if let Some(bad) = admins.iter().find(|a| !email_pattern.is_match(a)) {
            return Err(ConfigError::AdminOutsideDomain(bad.clone()));
        }
        Ok(Self { email_pattern, admins })
    }

    pub fn is_valid_email(&self, email: &str) -> bool {
        email.len() <= MAX_EMAIL_LEN && self.email_pattern.is_match(email)
    }

    pub fn is_configured_admin(&self, email: &str) -> bool {
        self.admins.contains(email)
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            email_pattern: Regex::new(DEFAULT_EMAIL_PATTERN).expect("default pattern compiles"),
            admins: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub expiring_days: i64,
    pub compact_threshold: u64,
    pub policy: AccessPolicy,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; missing keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = lookup("STAGEBOOK_DATA_DIR").unwrap_or_else(|| "./data".into());

        let metrics_port = match lookup("STAGEBOOK_METRICS_PORT") {
            Some(v) => Some(parse("STAGEBOOK_METRICS_PORT", &v)?),
            None => None,
        };

        let sweep_secs: u64 = match lookup("STAGEBOOK_SWEEP_INTERVAL_SECS") {
            Some(v) => parse("STAGEBOOK_SWEEP_INTERVAL_SECS", &v)?,
            None => 86_400,
        };
        if sweep_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STAGEBOOK_SWEEP_INTERVAL_SECS",
                value: "0".into(),
            });
        }

        let expiring_days: i64 = match lookup("STAGEBOOK_EXPIRING_DAYS") {
            Some(v) => parse("STAGEBOOK_EXPIRING_DAYS", &v)?,
            None => DEFAULT_EXPIRING_DAYS,
        };
        if !(0..=MAX_EXPIRING_DAYS).contains(&expiring_days) {
            return Err(ConfigError::InvalidValue {
                key: "STAGEBOOK_EXPIRING_DAYS",
                value: expiring_days.to_string(),
            });
        }

        let compact_threshold: u64 = match lookup("STAGEBOOK_COMPACT_THRESHOLD") {
            Some(v) => parse("STAGEBOOK_COMPACT_THRESHOLD", &v)?,
            None => 1000,
        };

        let pattern = lookup("STAGEBOOK_EMAIL_PATTERN").unwrap_or_else(|| DEFAULT_EMAIL_PATTERN.into());
        let admins = lookup("STAGEBOOK_ADMINS")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let policy = AccessPolicy::new(&pattern, admins)?;

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            metrics_port,
            sweep_interval: Duration::from_secs(sweep_secs),
            expiring_days,
            compact_threshold,
            policy,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("stagebook.wal")
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
