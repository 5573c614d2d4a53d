// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    DEFAULT_ENDPOINT, DEFAULT_EXCLUDE_ENVS, DEFAULT_FILTER_KEYS, DEFAULT_FLUSH_TIMEOUT_MS,
    DEFAULT_MAX_QUEUE_SIZE, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use crate::error::ConfigError;
use crate::sanitizer::KeyFilter;
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collector API key, sent as `X-API-Key`
    pub api_key: Option<String>,
    /// Collector base URL
    pub endpoint: String,
    /// Deployment environment reported with every notice
    pub environment_name: String,
    pub app_name: String,
    pub revision: String,
    /// Path prefix replaced by `[PROJECT_ROOT]` in backtraces
    pub project_root: Option<String>,
    /// Substrings marking a key as sensitive, matched case-insensitively
    pub filter_keys: Vec<String>,
    /// Environments in which nothing is reported
    pub exclude_envs: Vec<String>,
    /// Error classes which are never reported
    pub exclude_errors: Vec<String>,
    pub max_queue_size: usize,
    pub flush_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub send_request_data: bool,
    pub filter_session: bool,
    pub send_user_data: bool,
    pub send_environment: bool,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            environment_name: "production".to_string(),
            app_name: String::new(),
            revision: String::new(),
            project_root: None,
            filter_keys: DEFAULT_FILTER_KEYS.iter().map(ToString::to_string).collect(),
            exclude_envs: DEFAULT_EXCLUDE_ENVS.iter().map(ToString::to_string).collect(),
            exclude_errors: Vec::new(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            send_request_data: true,
            filter_session: false,
            send_user_data: true,
            send_environment: false,
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from `FAULTLINE_*` environment variables. Unset or unparsable
    /// variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            api_key: env::var("FAULTLINE_API_KEY").ok().filter(|k| !k.is_empty()),
            endpoint: env::var("FAULTLINE_ENDPOINT").unwrap_or(defaults.endpoint),
            environment_name: env::var("FAULTLINE_ENV").unwrap_or(defaults.environment_name),
            app_name: env::var("FAULTLINE_APP_NAME").unwrap_or(defaults.app_name),
            revision: env::var("FAULTLINE_REVISION").unwrap_or(defaults.revision),
            project_root: env::var("FAULTLINE_PROJECT_ROOT")
                .ok()
                .filter(|root| !root.is_empty()),
            filter_keys: env_list("FAULTLINE_FILTER_KEYS").unwrap_or(defaults.filter_keys),
            exclude_envs: env_list("FAULTLINE_EXCLUDE_ENVS").unwrap_or(defaults.exclude_envs),
            exclude_errors: env_list("FAULTLINE_EXCLUDE_ERRORS")
                .unwrap_or(defaults.exclude_errors),
            max_queue_size: env_parse("FAULTLINE_MAX_QUEUE_SIZE")
                .unwrap_or(defaults.max_queue_size),
            flush_timeout_ms: env_parse("FAULTLINE_FLUSH_TIMEOUT_MS")
                .unwrap_or(defaults.flush_timeout_ms),
            shutdown_timeout_ms: env_parse("FAULTLINE_SHUTDOWN_TIMEOUT_MS")
                .unwrap_or(defaults.shutdown_timeout_ms),
            request_timeout_ms: env_parse("FAULTLINE_REQUEST_TIMEOUT_MS")
                .unwrap_or(defaults.request_timeout_ms),
            send_request_data: env_bool("FAULTLINE_SEND_REQUEST_DATA")
                .unwrap_or(defaults.send_request_data),
            filter_session: env_bool("FAULTLINE_FILTER_SESSION")
                .unwrap_or(defaults.filter_session),
            send_user_data: env_bool("FAULTLINE_SEND_USER_DATA")
                .unwrap_or(defaults.send_user_data),
            send_environment: env_bool("FAULTLINE_SEND_ENVIRONMENT")
                .unwrap_or(defaults.send_environment),
            https_proxy: env::var("FAULTLINE_PROXY_HTTPS")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok()
                .filter(|proxy| !proxy.is_empty()),
            log_level: env::var("FAULTLINE_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "max_queue_size must be greater than 0".to_string(),
            ));
        }

        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "FAULTLINE_ENDPOINT cannot be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("flush_timeout_ms", self.flush_timeout_ms),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error, off",
                self.log_level
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn key_filter(&self) -> KeyFilter {
        KeyFilter::new(&self.filter_keys)
    }

    /// Whether the configured environment is excluded from reporting
    #[must_use]
    pub fn is_excluded_env(&self) -> bool {
        self.exclude_envs
            .iter()
            .any(|env| env == &self.environment_name)
    }

    #[must_use]
    pub fn is_excluded_error(&self, class: &str) -> bool {
        self.exclude_errors.iter().any(|excluded| excluded == class)
    }
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|val| {
        val.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToString::to_string)
            .collect()
    })
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse::<T>().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|val| parse_bool(&val))
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
