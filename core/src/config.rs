//! Per-resource configuration
//!
//! A [`ConfigSource`] hands out the breaker and retry settings for a resource
//! name. [`StaticConfig`] is the in-process implementation: defaults plus
//! per-resource overrides, built in code or read from TOML:
//!
//! ```toml
//! [defaults.breaker]
//! failure_rate_threshold = 50.0
//! wait_duration_in_open_state_ms = 10000
//!
//! [defaults.retry]
//! max_attempts = 3
//! backoff = { kind = "exponential", base_delay_ms = 100, max_delay_ms = 2000 }
//!
//! [resources.payments.breaker]
//! window_size = 10
//! minimum_number_of_calls = 5
//! ```
//!
//! Resource tables are merged key by key over the defaults, so an override only
//! names the keys it changes.

use crate::{circuit::BreakerConfig, errors::ConfigError, retry::RetryConfig};
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Resolves configuration by resource name
pub trait ConfigSource: Send + Sync {
    fn resolve_config(&self, resource: &str) -> Result<(BreakerConfig, RetryConfig), ConfigError>;
}

/// Breaker and retry settings of one resource
#[derive(Debug, Clone, Default)]
pub struct ResourceConfig {
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
}

impl ResourceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.breaker.validate()?;
        self.retry.validate()
    }
}

/// Fixed set of resource configurations
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    defaults: ResourceConfig,
    resources: HashMap<String, ResourceConfig>,
    strict: bool,
}

impl StaticConfig {
    pub fn new(defaults: ResourceConfig) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    /// Override the settings of one resource
    pub fn with_resource(mut self, name: impl Into<String>, config: ResourceConfig) -> Self {
        self.resources.insert(name.into(), config);
        self
    }

    /// Refuse resources without an explicit entry instead of using defaults
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn defaults(&self) -> &ResourceConfig {
        &self.defaults
    }

    /// Load and validate configuration from a TOML file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let document: toml::Table = source.parse()?;

        let defaults = subtable(&document, "defaults")?;
        let default_breaker = defaults.map(|t| subtable(t, "breaker")).transpose()?.flatten();
        let default_retry = defaults.map(|t| subtable(t, "retry")).transpose()?.flatten();

        let config = StaticConfig::new(ResourceConfig {
            breaker: merged(default_breaker, None)?,
            retry: merged(default_retry, None)?,
        });
        config.defaults.validate()?;

        let mut resources = HashMap::new();
        if let Some(entries) = subtable(&document, "resources")? {
            for (name, entry) in entries {
                let toml::Value::Table(entry) = entry else {
                    return Err(ConfigError::invalid(
                        "resources",
                        format!("entry '{name}' must be a table"),
                    ));
                };
                let resource = ResourceConfig {
                    breaker: merged(default_breaker, subtable(entry, "breaker")?)?,
                    retry: merged(default_retry, subtable(entry, "retry")?)?,
                };
                resource.validate()?;
                resources.insert(name.clone(), resource);
            }
        }

        tracing::debug!(resources = resources.len(), "loaded resilience configuration");
        Ok(Self { resources, ..config })
    }
}

impl ConfigSource for StaticConfig {
    fn resolve_config(&self, resource: &str) -> Result<(BreakerConfig, RetryConfig), ConfigError> {
        let config = match self.resources.get(resource) {
            Some(config) => config,
            None if self.strict => return Err(ConfigError::UnknownResource(resource.to_string())),
            None => &self.defaults,
        };
        config.validate()?;
        Ok((config.breaker.clone(), config.retry.clone()))
    }
}

fn subtable<'a>(
    table: &'a toml::Table,
    key: &'static str,
) -> Result<Option<&'a toml::Table>, ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(toml::Value::Table(inner)) => Ok(Some(inner)),
        Some(_) => Err(ConfigError::invalid(key, "must be a table")),
    }
}

fn merged<T: DeserializeOwned>(
    base: Option<&toml::Table>,
    overrides: Option<&toml::Table>,
) -> Result<T, ConfigError> {
    let mut table = base.cloned().unwrap_or_default();
    if let Some(overrides) = overrides {
        table.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Ok(toml::Value::Table(table).try_into()?)
}

/// Deserialize an integer millisecond count into a `Duration`
pub(crate) fn duration_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;

    const CONFIG: &str = r#"
        [defaults.breaker]
        failure_rate_threshold = 40.0
        wait_duration_in_open_state_ms = 10000

        [defaults.retry]
        max_attempts = 4
        backoff = { kind = "exponential", base_delay_ms = 100, max_delay_ms = 2000 }

        [resources.payments.breaker]
        window_size = 10
        minimum_number_of_calls = 5

        [resources.payments.retry]
        backoff = { kind = "fixed", delay_ms = 250 }
    "#;

    #[test]
    fn test_resource_overrides_merge_over_defaults() {
        let config = StaticConfig::from_toml_str(CONFIG).unwrap();
        let (breaker, retry) = config.resolve_config("payments").unwrap();

        assert_eq!(breaker.window_size, 10);
        assert_eq!(breaker.minimum_number_of_calls, 5);
        assert_eq!(breaker.failure_rate_threshold, 40.0);
        assert_eq!(breaker.wait_duration_in_open_state, Duration::from_secs(10));
        assert_eq!(breaker.permitted_calls_in_half_open_state, 10);

        assert_eq!(retry.max_attempts, 4);
        assert_eq!(
            retry.backoff,
            Backoff::Fixed {
                delay: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_unknown_resource_uses_defaults() {
        let config = StaticConfig::from_toml_str(CONFIG).unwrap();
        let (breaker, retry) = config.resolve_config("inventory").unwrap();

        assert_eq!(breaker.window_size, 100);
        assert_eq!(breaker.failure_rate_threshold, 40.0);
        assert_eq!(
            retry.backoff,
            Backoff::Exponential {
                base_delay: Duration::from_millis(100),
                multiplier: 2.0,
                max_delay: Duration::from_millis(2000),
            }
        );
    }

    #[test]
    fn test_strict_config_rejects_unknown_resource() {
        let config = StaticConfig::from_toml_str(CONFIG).unwrap().strict();

        assert!(config.resolve_config("payments").is_ok());
        assert!(matches!(
            config.resolve_config("inventory"),
            Err(ConfigError::UnknownResource(name)) if name == "inventory"
        ));
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = StaticConfig::from_toml_str("").unwrap();
        let (breaker, retry) = config.resolve_config("anything").unwrap();

        assert_eq!(breaker, BreakerConfig::default());
        assert_eq!(retry.max_attempts, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = StaticConfig::from_toml_str(
            r#"
            [resources.broken.breaker]
            failure_rate_threshold = 150.0
            "#,
        );

        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "failure_rate_threshold",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_errors_surface() {
        assert!(matches!(
            StaticConfig::from_toml_str("[defaults.breaker\nwindow_size = 1"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            StaticConfig::from_toml_str("[defaults.breaker]\nwindow_size = \"ten\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            StaticConfig::from_toml_str("resources = 3"),
            Err(ConfigError::Invalid { field: "resources", .. })
        ));
    }

    #[test]
    fn test_programmatic_config() {
        let payments = ResourceConfig {
            breaker: BreakerConfig {
                window_size: 5,
                minimum_number_of_calls: 5,
                ..Default::default()
            },
            retry: RetryConfig::default(),
        };
        let config = StaticConfig::default().with_resource("payments", payments);

        let (breaker, _) = config.resolve_config("payments").unwrap();
        assert_eq!(breaker.window_size, 5);
        assert_eq!(config.defaults().breaker, BreakerConfig::default());
    }
}
