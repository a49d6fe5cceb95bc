use std::path::Path;

use serde::Deserialize;

use crate::error::Result;
use crate::filter::FilterOptions;
use crate::policy::ScorePolicy;
use crate::reliability::{default_categories, WeightedCategory};
use crate::schema::FlowByFacility;
use crate::validation::ValidationOptions;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Settings for one standardization run. Every section is optional.
///
/// ```toml
/// [validation]
/// group_by = "facility"
/// tolerance = 2.5
///
/// [filter]
/// marker = "x"
///
/// [[reliability.categories]]
/// flow_name = "Heat"
/// amount_column = "Unit unadjusted annual heat input (MMBtu)"
/// source_column = "Unit unadjusted annual heat input source"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub validation: ValidationOptions,
    pub filter: FilterOptions,
    pub reliability: ReliabilityConfig,
    pub policy: ScorePolicy,
    pub schema: FlowByFacility,
}

// ---------------------------------------------------------------------------
// Reliability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    pub categories: Vec<WeightedCategory>,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
        }
    }
}

impl QaConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.validation.validate()?;
        self.policy.validate()
    }
}
