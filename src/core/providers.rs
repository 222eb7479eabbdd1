//! Provider and model resolution.
//!
//! Availability is never stored: it is recomputed from the latest backend
//! capability snapshot and the current credential snapshot on every read.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::core::builtin_providers::{find_builtin_provider, load_builtin_providers};
use crate::core::credentials::Credentials;

pub const DEFAULT_PROVIDER: &str = "openai";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderCapability {
    pub available: bool,
    pub models: Vec<String>,
    pub default_model: Option<String>,
}

/// Provider name → capability, ordered by name.
pub type CapabilityMap = BTreeMap<String, ProviderCapability>;

pub fn normalize_provider(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Merge backend-declared capabilities with locally held credentials.
///
/// A provider is available when the backend says so or when a non-empty key
/// is held for it. Built-in providers the backend does not mention are listed
/// with their static model table so callers can offer them once a key exists.
pub fn merge_availability(backend: &CapabilityMap, credentials: &Credentials) -> CapabilityMap {
    let mut merged = backend.clone();

    for builtin in load_builtin_providers() {
        merged
            .entry(builtin.id.clone())
            .or_insert_with(|| ProviderCapability {
                available: false,
                models: builtin.models.clone(),
                default_model: Some(builtin.default_model.clone()),
            });
    }

    for provider in credentials.configured_providers() {
        merged.entry(provider.to_string()).or_default();
    }

    for (name, capability) in merged.iter_mut() {
        capability.available = capability.available || credentials.has_key(name);
    }

    merged
}

/// Tracks the active provider/model pair.
#[derive(Debug, Clone)]
pub struct ProviderResolver {
    active_provider: String,
    active_model: Option<String>,
    backend: CapabilityMap,
    model_overrides: HashMap<String, String>,
}

impl ProviderResolver {
    /// `model_overrides` are configured per-provider defaults, consulted after
    /// backend-declared defaults and before the built-in table.
    pub fn new(initial_provider: &str, model_overrides: HashMap<String, String>) -> Self {
        let model_overrides = model_overrides
            .into_iter()
            .map(|(provider, model)| (normalize_provider(&provider), model))
            .collect();
        let mut resolver = Self {
            active_provider: normalize_provider(initial_provider),
            active_model: None,
            backend: CapabilityMap::new(),
            model_overrides,
        };
        if resolver.active_provider.is_empty() {
            resolver.active_provider = DEFAULT_PROVIDER.to_string();
        }
        resolver.reconcile_model();
        resolver
    }

    pub fn active_provider(&self) -> &str {
        &self.active_provider
    }

    pub fn active_model(&self) -> Option<&str> {
        self.active_model.as_deref()
    }

    pub fn backend_capabilities(&self) -> &CapabilityMap {
        &self.backend
    }

    /// Replace the backend capability snapshot wholesale.
    pub fn replace_capabilities(&mut self, capabilities: CapabilityMap) {
        self.backend = capabilities;
        self.reconcile_model();
    }

    /// Models offered for `provider`: the backend list when it declares one,
    /// the built-in list otherwise.
    pub fn models_for(&self, provider: &str) -> Vec<String> {
        let provider = normalize_provider(provider);
        if let Some(capability) = self.backend.get(&provider) {
            if !capability.models.is_empty() {
                return capability.models.clone();
            }
        }
        find_builtin_provider(&provider)
            .map(|builtin| builtin.models.clone())
            .unwrap_or_default()
    }

    /// Backend default, then configured override, then the built-in table,
    /// then the first listed model. Fallbacks the provider does not list are
    /// skipped.
    pub fn default_model_for(&self, provider: &str) -> Option<String> {
        let provider = normalize_provider(provider);
        let models = self.models_for(&provider);
        let offered = |model: &String| models.is_empty() || models.contains(model);

        self.backend
            .get(&provider)
            .and_then(|capability| capability.default_model.clone())
            .or_else(|| self.model_overrides.get(&provider).cloned().filter(offered))
            .or_else(|| {
                find_builtin_provider(&provider)
                    .map(|b| b.default_model.clone())
                    .filter(offered)
            })
            .or_else(|| models.first().cloned())
    }

    /// Switch provider. The active model is kept only when the new provider
    /// lists it; otherwise it is reset to the provider's default.
    pub fn set_provider(&mut self, name: &str) -> bool {
        let provider = normalize_provider(name);
        if provider.is_empty() {
            return false;
        }
        let changed = provider != self.active_provider;
        self.active_provider = provider;
        self.reconcile_model();
        debug!(
            provider = %self.active_provider,
            model = ?self.active_model,
            changed,
            "Provider selected"
        );
        changed
    }

    /// Select a model for the active provider. Rejected when the provider
    /// publishes a model list that does not contain it.
    pub fn set_model(&mut self, model: &str) -> bool {
        let model = model.trim();
        if model.is_empty() {
            return false;
        }
        let models = self.models_for(&self.active_provider);
        if !models.is_empty() && !models.iter().any(|m| m == model) {
            debug!(provider = %self.active_provider, model, "Model not offered by provider");
            return false;
        }
        self.active_model = Some(model.to_string());
        true
    }

    pub fn availability(&self, credentials: &Credentials) -> CapabilityMap {
        merge_availability(&self.backend, credentials)
    }

    pub fn is_available(&self, provider: &str, credentials: &Credentials) -> bool {
        let provider = normalize_provider(provider);
        self.backend
            .get(&provider)
            .is_some_and(|capability| capability.available)
            || credentials.has_key(&provider)
    }

    fn reconcile_model(&mut self) {
        let models = self.models_for(&self.active_provider);
        let keep = self
            .active_model
            .as_deref()
            .is_some_and(|current| models.iter().any(|m| m == current));
        if !keep {
            self.active_model = self.default_model_for(&self.active_provider);
        }
    }
}
