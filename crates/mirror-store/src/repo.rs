use serde::{Deserialize, Serialize};

use crate::layout::StoreLayout;
use crate::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub version: u32,
    pub name: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            version: 1,
            name: None,
        }
    }
}

pub fn write_default_config(layout: &StoreLayout) -> Result<(), StoreError> {
    let config = StoreConfig::default();
    let toml_str =
        toml::to_string_pretty(&config).map_err(|e| StoreError::Config(e.to_string()))?;
    std::fs::write(layout.config_file(), toml_str)?;
    Ok(())
}

pub fn read_config(layout: &StoreLayout) -> Result<StoreConfig, StoreError> {
    let content = std::fs::read_to_string(layout.config_file())?;
    let config: StoreConfig =
        toml::from_str(&content).map_err(|e| StoreError::Config(e.to_string()))?;
    if config.version != 1 {
        return Err(StoreError::Config(format!(
            "unsupported store version {}",
            config.version
        )));
    }
    Ok(config)
}
