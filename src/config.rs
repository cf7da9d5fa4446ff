use std::env;
use crate::core::{ContextError, Result};

pub const DEFAULT_MAX_CACHED_TYPES: usize = 500;
pub const DEFAULT_COMPUTE_PREFIX: &str = "compute";
pub const DEFAULT_DYNAMIC_ATTRIBUTES_KEY: &str = "attrs";

/// Proxy factory configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Maximum number of entity types whose proxy types are cached at once
    pub max_cached_types: usize,

    /// Name prefix of the protected methods routed to the handler's compute dispatch
    pub compute_prefix: String,

    /// Property whose JSON kind turns on the map view
    pub dynamic_attributes_key: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_cached_types: DEFAULT_MAX_CACHED_TYPES,
            compute_prefix: DEFAULT_COMPUTE_PREFIX.to_string(),
            dynamic_attributes_key: DEFAULT_DYNAMIC_ATTRIBUTES_KEY.to_string(),
        }
    }
}

impl ProxyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache capacity
    pub fn max_cached_types(mut self, max: usize) -> Self {
        self.max_cached_types = max;
        self
    }

    /// Set the compute method prefix
    pub fn compute_prefix(mut self, prefix: &str) -> Self {
        self.compute_prefix = prefix.to_string();
        self
    }

    /// Set the dynamic-attributes property name
    pub fn dynamic_attributes_key(mut self, key: &str) -> Self {
        self.dynamic_attributes_key = key.to_string();
        self
    }

    /// Defaults overridden by `ENTITY_CONTEXT_MAX_CACHED_TYPES`,
    /// `ENTITY_CONTEXT_COMPUTE_PREFIX` and `ENTITY_CONTEXT_ATTRS_KEY`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = env::var("ENTITY_CONTEXT_MAX_CACHED_TYPES") {
            config.max_cached_types = raw.trim().parse().map_err(|_| {
                ContextError::ConfigError(format!(
                    "ENTITY_CONTEXT_MAX_CACHED_TYPES must be a positive integer, got '{}'",
                    raw
                ))
            })?;
        }
        if let Ok(prefix) = env::var("ENTITY_CONTEXT_COMPUTE_PREFIX") {
            config.compute_prefix = prefix;
        }
        if let Ok(key) = env::var("ENTITY_CONTEXT_ATTRS_KEY") {
            config.dynamic_attributes_key = key;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cached_types == 0 {
            return Err(ContextError::ConfigError(
                "max_cached_types must be greater than zero".to_string(),
            ));
        }
        if self.compute_prefix.is_empty() {
            return Err(ContextError::ConfigError(
                "compute_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
