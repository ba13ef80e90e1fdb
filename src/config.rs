use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::{LibError, Result};
use crate::models::{Delay, Position};

/// Tunables for an editing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// Window in which position writes for the same step are coalesced.
    pub debounce_ms: u64,
    /// Maximum box gap for a proximity suggestion, in layout units.
    pub proximity_threshold: f64,
    /// Allow at most one outgoing transition per source handle.
    pub single_connection: bool,
    pub duplicate_offset: Position,
    /// Delay given to transitions promoted from a suggestion.
    pub default_delay: Delay,
    pub layout: LayoutConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LayoutConfig {
    pub horizontal_spacing: f64,
    pub vertical_spacing: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            proximity_threshold: 400.0,
            single_connection: false,
            duplicate_offset: Position::new(40.0, 40.0),
            default_delay: Delay::default(),
            layout: LayoutConfig::default(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            horizontal_spacing: 320.0,
            vertical_spacing: 200.0,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(raw).map_err(|err| {
            LibError::invalid_with_code(
                "invalid_config",
                "Engine configuration could not be parsed",
                anyhow!(err),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.proximity_threshold.is_finite() || self.proximity_threshold <= 0.0 {
            return Err(LibError::invalid_with_code(
                "invalid_config",
                "Proximity threshold must be positive",
                anyhow!("proximity_threshold = {}", self.proximity_threshold),
            ));
        }
        let spacing = [self.layout.horizontal_spacing, self.layout.vertical_spacing];
        if spacing.iter().any(|value| !value.is_finite() || *value <= 0.0) {
            return Err(LibError::invalid_with_code(
                "invalid_config",
                "Layout spacing must be positive",
                anyhow!("layout spacing = {:?}", spacing),
            ));
        }
        self.default_delay.validate()
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
