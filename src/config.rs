//! Target configuration for the exporter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Upstream endpoint used for targets that do not set their own base URL.
pub const DEFAULT_BASE_URL: &str = "https://eu1.cloud.thethings.network";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// The set of gateways to monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL applied to targets that do not carry their own.
    #[serde(default = "default_base_url")]
    pub default_base_url: String,

    /// Monitored gateways.
    #[serde(default)]
    pub targets: Vec<Target>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// One gateway to monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Stable gateway identifier, unique across all targets.
    pub gateway_id: String,

    /// TTN API key, sent as a bearer token.
    pub api_key: String,

    /// Per-target base URL override.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Target {
    /// The base URL this target is scraped through.
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }
}

impl TargetConfig {
    /// Load the target configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse the target configuration from a YAML string.
    ///
    /// Decode errors are fatal; a config that cannot be parsed must not
    /// silently turn into an empty target list. Targets without a base URL
    /// inherit `default_base_url`.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: TargetConfig = serde_yaml::from_str(content)?;

        for target in &mut config.targets {
            if target.base_url.is_none() {
                target.base_url = Some(config.default_base_url.clone());
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for target in &self.targets {
            if target.gateway_id.is_empty() {
                return Err(ConfigError::Validation(
                    "target with empty gateway_id".to_string(),
                ));
            }
            if target.api_key.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "target {} has an empty api_key",
                    target.gateway_id
                )));
            }
        }
        Ok(())
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            default_base_url: default_base_url(),
            targets: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let config = TargetConfig::parse("targets: []").unwrap();

        assert_eq!(config.default_base_url, DEFAULT_BASE_URL);
        assert!(config.targets.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
default_base_url: https://nam1.cloud.thethings.network
targets:
  - gateway_id: my-gateway
    api_key: NNSXS.KEY1
  - gateway_id: other-gateway
    api_key: NNSXS.KEY2
    base_url: https://au1.cloud.thethings.network
"#;

        let config = TargetConfig::parse(yaml).unwrap();

        assert_eq!(
            config.default_base_url,
            "https://nam1.cloud.thethings.network"
        );
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].gateway_id, "my-gateway");
        assert_eq!(
            config.targets[0].base_url(),
            "https://nam1.cloud.thethings.network"
        );
        assert_eq!(
            config.targets[1].base_url(),
            "https://au1.cloud.thethings.network"
        );
    }

    #[test]
    fn test_default_base_url_inherited() {
        let yaml = r#"
targets:
  - gateway_id: gw
    api_key: key
"#;

        let config = TargetConfig::parse(yaml).unwrap();
        assert_eq!(config.targets[0].base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_parse_error_is_fatal() {
        let result = TargetConfig::parse("targets: {not: [a, list");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_empty_gateway_id() {
        let yaml = r#"
targets:
  - gateway_id: ""
    api_key: key
"#;

        let result = TargetConfig::parse(yaml);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_empty_api_key() {
        let yaml = r#"
targets:
  - gateway_id: gw
    api_key: ""
"#;

        let result = TargetConfig::parse(yaml);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("empty api_key")
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "targets:").unwrap();
        writeln!(file, "  - gateway_id: gw").unwrap();
        writeln!(file, "    api_key: key").unwrap();

        let config = TargetConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.targets.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let result = TargetConfig::load_from_file("/nonexistent/targets.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
