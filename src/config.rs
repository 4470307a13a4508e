use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::course::Tier;

/// Engine configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Log directory; stdout when unset.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub log_dir: Option<PathBuf>,
    /// Portal-wide default price per tier (minor currency units), used to
    /// stamp the price on submitted requests when the item carries no
    /// standalone pricing.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub plan_prices: BTreeMap<Tier, u32>,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_price(&self, tier: Tier) -> Option<u32> {
        self.plan_prices.get(&tier).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config() {
        let config: EngineConfig = toml::from_str(
            r#"
            log_dir = "./logs"

            [plan_prices]
            "1" = 900
            "3" = 2400
            "10" = 6900
            lifetime = 9900
            "#,
        )
        .unwrap();
        assert_eq!(config.log_dir.as_deref(), Some(Path::new("./logs")));
        assert_eq!(config.default_price(Tier::Lifetime), Some(9900));
        assert_eq!(config.default_price(Tier::ThreeMonths), Some(2400));
    }

    #[test]
    fn empty_config_is_valid() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert!(config.plan_prices.is_empty());
        assert_eq!(config.default_price(Tier::OneMonth), None);
    }
}
