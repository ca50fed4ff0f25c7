//! Configuration management.
//!
//! Loads configuration from environment variables (and a `.env` file, if
//! present) with sensible defaults.

use crate::codes::DEFAULT_CODE_ATTEMPTS;
use crate::parties::CascadePolicy;
use crate::redemption::WritePolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Backend URL used when `GUESTPASS_BACKEND_URL` is unset.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8090";

/// Request timeout used when `GUESTPASS_REQUEST_TIMEOUT_SECS` is unset.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Audit-write retries used when `GUESTPASS_AUDIT_RETRIES` is unset.
pub const DEFAULT_AUDIT_RETRIES: usize = 3;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable holds a value outside its accepted set.
    #[error("invalid value '{value}' for {variable}")]
    InvalidValue {
        /// Variable name
        variable: &'static str,
        /// Offending value
        value: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Record store base URL
    pub backend_url: String,
    /// Bound applied to every backend call
    pub request_timeout: Duration,
    /// Write ordering used by redemption.
    ///
    /// Against PocketBase, claim-first is only race-free once the attendees
    /// update rule from `pb_migrations/` is installed.
    pub write_policy: WritePolicy,
    /// What deleting a party does to its invitations
    pub cascade_policy: CascadePolicy,
    /// Attempts at drawing a code that is not yet taken
    pub code_attempts: usize,
    /// Retries of the audit write once a redemption is claimed
    pub audit_retries: usize,
    /// Base URL of share links; sharing is disabled when unset
    pub share_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            write_policy: WritePolicy::default(),
            cascade_policy: CascadePolicy::default(),
            code_attempts: DEFAULT_CODE_ATTEMPTS,
            audit_retries: DEFAULT_AUDIT_RETRIES,
            share_base_url: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is read first if present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unknown policy name.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Numeric variables that fail to parse fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unknown policy name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let number = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());

        let write_policy = match lookup("GUESTPASS_WRITE_POLICY") {
            Some(raw) => raw.parse().map_err(|()| ConfigError::InvalidValue {
                variable: "GUESTPASS_WRITE_POLICY",
                value: raw,
            })?,
            None => defaults.write_policy,
        };
        let cascade_policy = match lookup("GUESTPASS_CASCADE_POLICY") {
            Some(raw) => raw.parse().map_err(|()| ConfigError::InvalidValue {
                variable: "GUESTPASS_CASCADE_POLICY",
                value: raw,
            })?,
            None => defaults.cascade_policy,
        };

        Ok(Self {
            backend_url: lookup("GUESTPASS_BACKEND_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.backend_url),
            request_timeout: number("GUESTPASS_REQUEST_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map_or(defaults.request_timeout, Duration::from_secs),
            write_policy,
            cascade_policy,
            code_attempts: number("GUESTPASS_CODE_ATTEMPTS")
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.code_attempts),
            audit_retries: number("GUESTPASS_AUDIT_RETRIES")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.audit_retries),
            share_base_url: lookup("GUESTPASS_SHARE_BASE_URL").filter(|url| !url.trim().is_empty()),
        })
    }

    /// Override the backend URL.
    #[must_use]
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    /// Override the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the redemption write policy.
    #[must_use]
    pub const fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Override the party deletion policy.
    #[must_use]
    pub const fn with_cascade_policy(mut self, policy: CascadePolicy) -> Self {
        self.cascade_policy = policy;
        self
    }

    /// Override the number of code allocation attempts.
    #[must_use]
    pub const fn with_code_attempts(mut self, attempts: usize) -> Self {
        self.code_attempts = attempts;
        self
    }

    /// Override the number of audit-write retries.
    #[must_use]
    pub const fn with_audit_retries(mut self, retries: usize) -> Self {
        self.audit_retries = retries;
        self
    }

    /// Enable share links under `base_url`.
    #[must_use]
    pub fn with_share_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.share_base_url = Some(base_url.into());
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.write_policy, WritePolicy::ClaimFirst);
        assert_eq!(config.cascade_policy, CascadePolicy::Orphan);
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("GUESTPASS_BACKEND_URL", "https://pb.example"),
            ("GUESTPASS_REQUEST_TIMEOUT_SECS", "10"),
            ("GUESTPASS_WRITE_POLICY", "audit-first"),
            ("GUESTPASS_CASCADE_POLICY", "cascade"),
            ("GUESTPASS_CODE_ATTEMPTS", "8"),
            ("GUESTPASS_AUDIT_RETRIES", "0"),
            ("GUESTPASS_SHARE_BASE_URL", "https://guestpass.example"),
        ]))
        .unwrap();

        assert_eq!(config.backend_url, "https://pb.example");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.write_policy, WritePolicy::AuditFirst);
        assert_eq!(config.cascade_policy, CascadePolicy::Cascade);
        assert_eq!(config.code_attempts, 8);
        assert_eq!(config.audit_retries, 0);
        assert_eq!(config.share_base_url.as_deref(), Some("https://guestpass.example"));
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("GUESTPASS_REQUEST_TIMEOUT_SECS", "soon"),
            ("GUESTPASS_CODE_ATTEMPTS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.code_attempts, DEFAULT_CODE_ATTEMPTS);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = Config::from_lookup(lookup(&[("GUESTPASS_WRITE_POLICY", "yolo")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                variable: "GUESTPASS_WRITE_POLICY",
                value: "yolo".to_string()
            }
        );
    }
}
