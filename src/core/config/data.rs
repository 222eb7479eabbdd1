use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::notifications::MAX_TOAST_DURATION;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_TOAST_DURATION_SECS: u64 = 5;
pub const DEFAULT_TOAST_CAPACITY: usize = 5;

/// Environment variable that overrides `base_url`.
pub const BASE_URL_ENV: &str = "PARLOR_BASE_URL";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Root of the chat backend, e.g. `http://localhost:8000/api`
    pub base_url: String,
    /// Deadline for a single chat exchange
    pub request_timeout_secs: u64,
    /// How long a notification stays visible
    pub toast_duration_secs: u64,
    /// Maximum number of notifications shown at once
    pub toast_capacity: usize,
    pub default_provider: Option<String>,
    /// Provider -> model used when the backend declares no default
    pub default_models: HashMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            toast_duration_secs: DEFAULT_TOAST_DURATION_SECS,
            toast_capacity: DEFAULT_TOAST_CAPACITY,
            default_provider: None,
            default_models: HashMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_secs(self.toast_duration_secs).min(MAX_TOAST_DURATION)
    }

    /// Replace `base_url` when `value` is set and not blank.
    pub fn with_base_url_override(mut self, value: Option<String>) -> Self {
        if let Some(url) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            self.base_url = url;
        }
        self
    }

    /// Model overrides keyed by normalized provider name.
    pub fn model_overrides(&self) -> HashMap<String, String> {
        self.default_models
            .iter()
            .map(|(provider, model)| {
                (
                    crate::core::providers::normalize_provider(provider),
                    model.trim().to_string(),
                )
            })
            .filter(|(provider, model)| !provider.is_empty() && !model.is_empty())
            .collect()
    }
}

pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
