//! Per-provider API keys.
//!
//! The whole map is persisted as one JSON blob under
//! [`CREDENTIALS_STORAGE_KEY`]. Missing or corrupt data loads as an all-empty
//! map. A recoverable write failure is reported and retried on the next
//! update; any other failure switches the store to memory-only mode for the
//! rest of its lifetime and is reported exactly once.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::builtin_providers::load_builtin_providers;
use crate::core::notifications::{Notification, NotificationSink};
use crate::core::providers::normalize_provider;
use crate::core::storage::{KeyValueStore, StorageError};

pub const CREDENTIALS_STORAGE_KEY: &str = "api_keys";

/// Provider name → secret. An absent key reads as the empty string.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    /// Every built-in provider mapped to an empty key.
    pub fn empty() -> Self {
        Self(
            load_builtin_providers()
                .iter()
                .map(|provider| (provider.id.clone(), String::new()))
                .collect(),
        )
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut credentials = Self::default();
        for (provider, key) in pairs {
            credentials.set(provider.as_ref(), key);
        }
        credentials
    }

    pub fn get(&self, provider: &str) -> &str {
        self.0
            .get(&normalize_provider(provider))
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn set(&mut self, provider: &str, key: impl Into<String>) {
        let provider = normalize_provider(provider);
        if provider.is_empty() {
            return;
        }
        self.0.insert(provider, key.into().trim().to_string());
    }

    pub fn has_key(&self, provider: &str) -> bool {
        !self.get(provider).is_empty()
    }

    /// Providers holding a non-empty key.
    pub fn configured_providers(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, key)| !key.is_empty())
            .map(|(provider, _)| provider.as_str())
    }

    /// Overlay `partial` on top of `self`. Empty values clear a key.
    pub fn merge(&mut self, partial: &Credentials) {
        for (provider, key) in &partial.0 {
            self.set(provider, key.clone());
        }
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }

    /// Parse a persisted blob. `null` values read as empty keys; anything
    /// else that is not a string map is rejected.
    fn from_blob(blob: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, Option<String>> = serde_json::from_str(blob)?;
        Ok(Self::from_pairs(
            raw.into_iter()
                .map(|(provider, key)| (provider, key.unwrap_or_default())),
        ))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(provider, key)| {
                (provider, if key.is_empty() { "<empty>" } else { "<redacted>" })
            }))
            .finish()
    }
}

/// Whether an update reached persistent storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialUpdate {
    Persisted,
    /// Storage was temporarily unreachable; the next update writes again.
    Unsaved,
    MemoryOnly,
}

pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
    credentials: Credentials,
    memory_only: bool,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            credentials: Credentials::empty(),
            memory_only: false,
        }
    }

    /// Read the persisted map. Never fails: unreadable or corrupt data is
    /// replaced by an all-empty map.
    pub fn load(&mut self) -> &Credentials {
        let mut credentials = Credentials::empty();
        match self.store.load(CREDENTIALS_STORAGE_KEY) {
            Ok(Some(blob)) => match Credentials::from_blob(&blob) {
                Ok(stored) => credentials.merge(&stored),
                Err(err) => warn!(error = %err, "Stored credentials are corrupt; starting empty"),
            },
            Ok(None) => debug!("No stored credentials"),
            Err(err) => warn!(error = %err, "Could not read stored credentials; starting empty"),
        }
        debug!(
            configured = ?credentials.configured_providers().collect::<Vec<_>>(),
            "Credentials loaded"
        );
        self.credentials = credentials;
        &self.credentials
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Full copy of the current map, for building requests.
    pub fn snapshot(&self) -> Credentials {
        self.credentials.clone()
    }

    pub fn is_memory_only(&self) -> bool {
        self.memory_only
    }

    /// Merge `partial` into the current map and re-persist the whole map.
    ///
    /// The in-memory map is updated even when persisting fails. Recoverable
    /// failures leave persistence on; others degrade the store to
    /// memory-only mode and are reported once.
    pub fn update(
        &mut self,
        partial: &Credentials,
        sink: &dyn NotificationSink,
    ) -> CredentialUpdate {
        let mut merged = self.credentials.clone();
        merged.merge(partial);

        let outcome = if self.memory_only {
            sink.notify(Notification::info(
                "API keys updated",
                "Keys are kept for this session only.",
            ));
            CredentialUpdate::MemoryOnly
        } else {
            match self.persist(&merged) {
                Ok(()) => {
                    sink.notify(Notification::success("API keys saved", ""));
                    CredentialUpdate::Persisted
                }
                Err(err) if err.is_recoverable() => {
                    warn!(error = %err, "Persisting credentials failed; will retry on next update");
                    sink.notify(Notification::error(
                        "API keys not saved",
                        format!("Keys are kept for now and saved with the next change: {err}"),
                    ));
                    CredentialUpdate::Unsaved
                }
                Err(err) => {
                    warn!(error = %err, "Persisting credentials failed; switching to memory-only");
                    self.memory_only = true;
                    sink.notify(Notification::error(
                        "API keys not saved",
                        format!("Keys are kept for this session only: {err}"),
                    ));
                    CredentialUpdate::MemoryOnly
                }
            }
        };

        self.credentials = merged;
        outcome
    }

    fn persist(&self, credentials: &Credentials) -> Result<(), StorageError> {
        let blob = serde_json::to_string(credentials).map_err(StorageError::Encode)?;
        self.store.save(CREDENTIALS_STORAGE_KEY, &blob)
    }
}
