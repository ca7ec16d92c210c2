use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::params::Params;
use crate::types::DEFAULT_ADDRESS_PREFIX;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub chain_id: String,
    /// Region code embedded in money order reference numbers
    pub region_code: String,
    pub address_prefix: String,
    /// The only account allowed to update params or verify villages
    pub governance_authority: String,
    pub logging: LoggingConfig,
    pub params: Params,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain_id: "deshchain".to_string(),
            region_code: "IN".to_string(),
            address_prefix: DEFAULT_ADDRESS_PREFIX.to_string(),
            governance_authority: "gov".to_string(),
            logging: LoggingConfig::default(),
            params: Params::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Read, parse and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.params.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = EngineConfig::from_yaml(
            r#"
chain_id: testnet
params:
  trading_fee_rate: "0.002"
"#,
        )
        .unwrap();
        assert_eq!(config.chain_id, "testnet");
        assert_eq!(config.region_code, "IN");
        assert_eq!(config.params.trading_fee_rate, dec!(0.002));
        assert_eq!(config.params.min_order_amount, 10_000_000);
    }

    #[test]
    fn test_invalid_shares_fail_load() {
        let err = EngineConfig::from_yaml(
            r#"
params:
  fee_shares:
    validator: "0.50"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::load("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_shipped_default_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.yaml");
        let config = EngineConfig::load(path).unwrap();
        assert_eq!(config.params, Params::default());
    }
}
