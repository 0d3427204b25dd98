//! Client configuration.
//!
//! `ClientConfig` selects the remote backend and tunes the sync engine. Values
//! come from a JSON file, overridden by `LOAM_*` environment variables.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_FORM_PATH: &str = "/legacy/sync";
const DEFAULT_GRACE_PERIOD_DAYS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_UPLOAD_BATCH_SIZE: usize = 50;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const SECONDS_PER_DAY: u64 = 86_400;

/// Which wire protocol the remote adapter speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// JSON over `/v1/sync/{entity}` routes
    #[default]
    Rest,
    /// Legacy single-endpoint form post
    Form,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" | "json" => Ok(Self::Rest),
            "form" | "legacy" => Ok(Self::Form),
            other => Err(Error::Config(format!(
                "LOAM_BACKEND must be 'rest' or 'form', got '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_form_path")]
    pub form_endpoint_path: String,
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_upload_batch_size")]
    pub upload_batch_size: usize,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

fn default_form_path() -> String {
    DEFAULT_FORM_PATH.to_string()
}

const fn default_grace_period_days() -> u64 {
    DEFAULT_GRACE_PERIOD_DAYS
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_upload_batch_size() -> usize {
    DEFAULT_UPLOAD_BATCH_SIZE
}

const fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            api_base_url: None,
            api_token: None,
            form_endpoint_path: default_form_path(),
            grace_period_days: DEFAULT_GRACE_PERIOD_DAYS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            upload_batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("backend", &self.backend)
            .field("api_base_url", &self.api_base_url)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("form_endpoint_path", &self.form_endpoint_path)
            .field("grace_period_days", &self.grace_period_days)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("upload_batch_size", &self.upload_batch_size)
            .field("sync_interval_secs", &self.sync_interval_secs)
            .finish()
    }
}

/// Default location of the client config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("loam").join(CONFIG_FILE_NAME))
}

impl ClientConfig {
    /// Load the config file (if any) and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::load_from_path(path)?,
            None => match default_config_path() {
                Some(path) => Self::load_from_path(&path)?,
                None => Self::default(),
            },
        };

        let values: HashMap<String, String> = std::env::vars().collect();
        base.with_overrides(|name| values.get(name).cloned())
    }

    /// Build purely from `LOAM_*` variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Self::default().with_overrides(lookup)
    }

    /// Missing file yields defaults; unknown fields are rejected
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::Config(format!(
                "failed to parse config at {}: {error}",
                path.display()
            ))
        })?;
        config.normalize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(backend) = optional_trimmed(&lookup, "LOAM_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(url) = optional_trimmed(&lookup, "LOAM_API_URL") {
            self.api_base_url = Some(url);
        }
        if let Some(token) = optional_trimmed(&lookup, "LOAM_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(path) = optional_trimmed(&lookup, "LOAM_FORM_PATH") {
            self.form_endpoint_path = path;
        }
        if let Some(days) = parse_number(&lookup, "LOAM_GRACE_PERIOD_DAYS")? {
            self.grace_period_days = days;
        }
        if let Some(secs) = parse_number(&lookup, "LOAM_TIMEOUT_SECS")? {
            self.request_timeout_secs = secs;
        }
        if let Some(size) = parse_number(&lookup, "LOAM_UPLOAD_BATCH_SIZE")? {
            self.upload_batch_size = size;
        }
        if let Some(secs) = parse_number(&lookup, "LOAM_SYNC_INTERVAL_SECS")? {
            self.sync_interval_secs = secs;
        }

        self.normalize();
        Ok(self)
    }

    /// Reject configurations that cannot reach a backend
    pub fn validate(&self) -> Result<()> {
        let Some(url) = self.api_base_url.as_deref() else {
            return Err(Error::Config(
                "no backend configured; set LOAM_API_URL or api_base_url".to_string(),
            ));
        };
        if !is_http_url(url) {
            return Err(Error::Config(
                "api_base_url must start with http:// or https://".to_string(),
            ));
        }
        if self.backend == BackendKind::Form && !self.form_endpoint_path.starts_with('/') {
            return Err(Error::Config(
                "form_endpoint_path must start with '/'".to_string(),
            ));
        }
        if self.upload_batch_size == 0 {
            return Err(Error::Config(
                "upload_batch_size must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.api_token.is_none() {
            return Err(Error::NotAuthenticated);
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_days.saturating_mul(SECONDS_PER_DAY))
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.api_token = normalize_text_option(self.api_token.take());
        self.form_endpoint_path = normalize_text_option(Some(self.form_endpoint_path.clone()))
            .unwrap_or_else(default_form_path);
    }
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

fn parse_number<T: FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    optional_trimmed(lookup, name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| Error::Config(format!("{name} must be a non-negative integer")))
        })
        .transpose()
}
