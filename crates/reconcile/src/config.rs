//! Adapter configuration.

use std::time::Duration;

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_CREATE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_DELETE_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Namespace used when a namespaced document declares none.
    pub default_namespace: String,
    pub create_timeout: Duration,
    pub delete_timeout: Duration,
    /// Field manager sent with create/update requests.
    pub field_manager: Option<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            create_timeout: Duration::from_secs(DEFAULT_CREATE_TIMEOUT_SECS),
            delete_timeout: Duration::from_secs(DEFAULT_DELETE_TIMEOUT_SECS),
            field_manager: None,
        }
    }
}

impl AdapterConfig {
    /// Defaults overridden by `KCR_DEFAULT_NAMESPACE`, `KCR_CREATE_TIMEOUT_SECS`,
    /// `KCR_DELETE_TIMEOUT_SECS` and `KCR_FIELD_MANAGER`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |k: &str, default: u64| get(k).and_then(|s| s.parse::<u64>().ok()).unwrap_or(default);
        Self {
            default_namespace: get("KCR_DEFAULT_NAMESPACE")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            create_timeout: Duration::from_secs(secs("KCR_CREATE_TIMEOUT_SECS", DEFAULT_CREATE_TIMEOUT_SECS)),
            delete_timeout: Duration::from_secs(secs("KCR_DELETE_TIMEOUT_SECS", DEFAULT_DELETE_TIMEOUT_SECS)),
            field_manager: get("KCR_FIELD_MANAGER").filter(|s| !s.is_empty()),
        }
    }

    pub fn with_default_namespace(mut self, namespace: &str) -> Self {
        self.default_namespace = namespace.to_string();
        self
    }
}
