// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup. Missing
//! required values and unparsable numbers are errors, never silent defaults.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ENCRYPTION_KEY` | Operator secret for the credential vault | Required |
//! | `DATA_DIR` | Directory of the redb database file | `./data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `FRONTEND_URL` | Landing-page base for redirect callbacks | `http://localhost:3001` |
//! | `PARTNER_TIMEOUT_SECS` | Timeout of every partner API call | `15` |
//! | `PARTNER_KEY_CACHE_TTL_SECS` | Lifetime of a cached partner public key | `300` |
//! | `SYNC_INTERVAL_SECS` | Enables the in-process sync scheduler | Unset |
//! | `SYNC_CLAIM_TTL_SECS` | Expiry of a provider sync claim | `900` |
//! | `SYNC_STALL_AFTER_SECS` | Age at which a running job is reported stalled | `1800` |
//! | `JOB_LOG_RETENTION_DAYS` | Retention of finished sync job logs | `7` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::scheduler::SchedulerSettings;

pub const ENCRYPTION_KEY_ENV: &str = "ENCRYPTION_KEY";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const FRONTEND_URL_ENV: &str = "FRONTEND_URL";
pub const PARTNER_TIMEOUT_ENV: &str = "PARTNER_TIMEOUT_SECS";
pub const PARTNER_KEY_CACHE_TTL_ENV: &str = "PARTNER_KEY_CACHE_TTL_SECS";
pub const SYNC_INTERVAL_ENV: &str = "SYNC_INTERVAL_SECS";
pub const SYNC_CLAIM_TTL_ENV: &str = "SYNC_CLAIM_TTL_SECS";
pub const SYNC_STALL_AFTER_ENV: &str = "SYNC_STALL_AFTER_SECS";
pub const JOB_LOG_RETENTION_ENV: &str = "JOB_LOG_RETENTION_DAYS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Partner public keys cached at most.
pub const PARTNER_KEY_CACHE_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Service configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub encryption_key: SecretString,
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    pub partner_timeout: Duration,
    pub partner_key_cache_ttl: Duration,
    /// `None` leaves sync to an external trigger.
    pub sync_interval: Option<Duration>,
    pub sync_claim_ttl: chrono::Duration,
    pub sync_stall_after: chrono::Duration,
    pub job_log_retention: chrono::Duration,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let encryption_key = get(ENCRYPTION_KEY_ENV)
            .map(SecretString::new)
            .ok_or(ConfigError::Missing(ENCRYPTION_KEY_ENV))?;

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: LOG_FORMAT_ENV,
                    value: other.to_string(),
                    reason: "expected json or pretty".to_string(),
                })
            }
        };

        let sync_interval = match get(SYNC_INTERVAL_ENV) {
            None => None,
            Some(raw) => Some(Duration::from_secs(positive(SYNC_INTERVAL_ENV, &raw)?)),
        };

        Ok(Self {
            encryption_key,
            data_dir: PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| "./data".to_string())),
            host: get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get(PORT_ENV), PORT_ENV, 8080)?,
            frontend_url: get(FRONTEND_URL_ENV)
                .unwrap_or_else(|| "http://localhost:3001".to_string())
                .trim_end_matches('/')
                .to_string(),
            partner_timeout: Duration::from_secs(positive_or(
                get(PARTNER_TIMEOUT_ENV),
                PARTNER_TIMEOUT_ENV,
                15,
            )?),
            partner_key_cache_ttl: Duration::from_secs(parse_or(
                get(PARTNER_KEY_CACHE_TTL_ENV),
                PARTNER_KEY_CACHE_TTL_ENV,
                300,
            )?),
            sync_interval,
            sync_claim_ttl: time_delta_or(
                get(SYNC_CLAIM_TTL_ENV),
                SYNC_CLAIM_TTL_ENV,
                900,
                chrono::Duration::try_seconds,
            )?,
            sync_stall_after: time_delta_or(
                get(SYNC_STALL_AFTER_ENV),
                SYNC_STALL_AFTER_ENV,
                1800,
                chrono::Duration::try_seconds,
            )?,
            job_log_retention: time_delta_or(
                get(JOB_LOG_RETENTION_ENV),
                JOB_LOG_RETENTION_ENV,
                7,
                chrono::Duration::try_days,
            )?,
            log_format,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Scheduler settings, if the in-process scheduler is enabled.
    pub fn scheduler_settings(&self) -> Option<SchedulerSettings> {
        self.sync_interval.map(|interval| SchedulerSettings {
            interval,
            stall_after: self.sync_stall_after,
            job_retention: self.job_log_retention,
        })
    }
}

fn parse_or<T>(raw: Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match parse_or(Some(raw.to_string()), var, 0u64)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        value => Ok(value),
    }
}

fn positive_or(raw: Option<String>, var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => positive(var, &raw),
    }
}

/// Positive count converted with `unit`. Counts chrono cannot represent are errors.
fn time_delta_or(
    raw: Option<String>,
    var: &'static str,
    default: u64,
    unit: fn(i64) -> Option<chrono::Duration>,
) -> Result<chrono::Duration, ConfigError> {
    let value = positive_or(raw, var, default)?;
    i64::try_from(value)
        .ok()
        .and_then(unit)
        .ok_or_else(|| ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "out of range".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn encryption_key_is_required() {
        let err = config(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENCRYPTION_KEY_ENV)));

        let err = config(&[(ENCRYPTION_KEY_ENV, "   ")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[(ENCRYPTION_KEY_ENV, "secret")]).unwrap();
        assert_eq!(cfg.encryption_key.expose_secret(), "secret");
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
        assert_eq!(cfg.frontend_url, "http://localhost:3001");
        assert_eq!(cfg.partner_timeout, Duration::from_secs(15));
        assert_eq!(cfg.partner_key_cache_ttl, Duration::from_secs(300));
        assert_eq!(cfg.sync_interval, None);
        assert!(cfg.scheduler_settings().is_none());
        assert_eq!(cfg.sync_claim_ttl, chrono::Duration::seconds(900));
        assert_eq!(cfg.sync_stall_after, chrono::Duration::seconds(1800));
        assert_eq!(cfg.job_log_retention, chrono::Duration::days(7));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let cfg = config(&[
            (ENCRYPTION_KEY_ENV, "secret"),
            (DATA_DIR_ENV, "/var/lib/partner"),
            (PORT_ENV, "9000"),
            (FRONTEND_URL_ENV, "https://app.example.com/"),
            (SYNC_INTERVAL_ENV, "600"),
            (JOB_LOG_RETENTION_ENV, "3"),
            (LOG_FORMAT_ENV, "json"),
        ])
        .unwrap();

        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/partner"));
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.frontend_url, "https://app.example.com");
        assert_eq!(cfg.log_format, LogFormat::Json);

        let settings = cfg.scheduler_settings().unwrap();
        assert_eq!(settings.interval, Duration::from_secs(600));
        assert_eq!(settings.job_retention, chrono::Duration::days(3));
    }

    #[test]
    fn invalid_numbers_are_errors() {
        let err = config(&[(ENCRYPTION_KEY_ENV, "s"), (PORT_ENV, "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: PORT_ENV, .. }));

        let err = config(&[(ENCRYPTION_KEY_ENV, "s"), (SYNC_INTERVAL_ENV, "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: SYNC_INTERVAL_ENV, .. }));

        let err = config(&[(ENCRYPTION_KEY_ENV, "s"), (LOG_FORMAT_ENV, "xml")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: LOG_FORMAT_ENV, .. }));
    }

    #[test]
    fn oversized_durations_are_errors() {
        let err = config(&[(ENCRYPTION_KEY_ENV, "s"), (SYNC_CLAIM_TTL_ENV, "9223372036854775807")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: SYNC_CLAIM_TTL_ENV, .. }));

        let err = config(&[
            (ENCRYPTION_KEY_ENV, "s"),
            (SYNC_STALL_AFTER_ENV, "18446744073709551615"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: SYNC_STALL_AFTER_ENV, .. }));

        let err = config(&[(ENCRYPTION_KEY_ENV, "s"), (JOB_LOG_RETENTION_ENV, "1000000000000")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: JOB_LOG_RETENTION_ENV, .. }));
    }
}
