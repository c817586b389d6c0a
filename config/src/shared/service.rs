use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{IndexConfig, ValidationError};

/// Top-level configuration of a process hosting the index engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    #[serde(default)]
    pub index: IndexConfig,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.index.validate()
    }
}

impl Config for ServiceConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["index.excluded_tables"];
}
