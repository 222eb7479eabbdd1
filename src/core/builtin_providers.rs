//! Built-in provider table
//!
//! The table is embedded from `builtin_providers.toml` at build time and is
//! the last resort when the backend declares neither a model list nor a
//! default model for a provider.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinProvider {
    pub id: String,
    pub display_name: String,
    pub default_model: String,
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BuiltinProvidersConfig {
    providers: Vec<BuiltinProvider>,
}

impl BuiltinProvider {
    pub fn offers_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

/// Load built-in providers from the embedded configuration
pub fn load_builtin_providers() -> &'static [BuiltinProvider] {
    static PROVIDERS: OnceLock<Vec<BuiltinProvider>> = OnceLock::new();
    PROVIDERS.get_or_init(|| {
        const CONFIG_CONTENT: &str = include_str!("../builtin_providers.toml");

        let config: BuiltinProvidersConfig =
            toml::from_str(CONFIG_CONTENT).expect("Failed to parse builtin_providers.toml");

        config.providers
    })
}

/// Find a built-in provider by ID (case-insensitive)
pub fn find_builtin_provider(id: &str) -> Option<&'static BuiltinProvider> {
    let id = id.trim();
    load_builtin_providers()
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(id))
}

pub fn builtin_default_model(id: &str) -> Option<&'static str> {
    find_builtin_provider(id).map(|p| p.default_model.as_str())
}
