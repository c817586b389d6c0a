use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Legacy catalog table, matched case-insensitively by [`IndexConfig::is_excluded`].
const LEGACY_META_TABLE: &str = ".META.";

/// Settings for the in-memory secondary index engine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IndexConfig {
    /// Tables whose partitions are never indexed, typically the store's system catalog.
    #[serde(default = "default_excluded_tables")]
    pub excluded_tables: Vec<String>,
    /// Whether a newly created index is immediately built by scanning its partition.
    #[serde(default = "default_build_on_create")]
    pub build_on_create: bool,
    /// Number of indexed pairs between two progress logs during a rebuild.
    #[serde(default = "default_rebuild_log_interval")]
    pub rebuild_log_interval: u64,
}

impl IndexConfig {
    /// Default system tables excluded from indexing.
    pub const DEFAULT_EXCLUDED_TABLES: &'static [&'static str] = &[
        "hbase:meta",
        "hbase:namespace",
        "-ROOT-",
        ".META.",
        "__index_master__",
    ];

    /// Default progress log cadence during rebuilds.
    pub const DEFAULT_REBUILD_LOG_INTERVAL: u64 = 100_000;

    /// Validates index configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self
            .excluded_tables
            .iter()
            .any(|table| table.trim().is_empty())
        {
            return Err(ValidationError::EmptyExcludedTable);
        }

        if self.rebuild_log_interval == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "index.rebuild_log_interval".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Returns true if partitions of `table` must not be indexed.
    ///
    /// Names match exactly, except the legacy `.META.` catalog which matches in any case.
    pub fn is_excluded(&self, table: &str) -> bool {
        self.excluded_tables.iter().any(|excluded| {
            if excluded.eq_ignore_ascii_case(LEGACY_META_TABLE) {
                table.eq_ignore_ascii_case(LEGACY_META_TABLE)
            } else {
                excluded == table
            }
        })
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            excluded_tables: default_excluded_tables(),
            build_on_create: default_build_on_create(),
            rebuild_log_interval: default_rebuild_log_interval(),
        }
    }
}

fn default_excluded_tables() -> Vec<String> {
    IndexConfig::DEFAULT_EXCLUDED_TABLES
        .iter()
        .map(|table| table.to_string())
        .collect()
}

const fn default_build_on_create() -> bool {
    true
}

const fn default_rebuild_log_interval() -> u64 {
    IndexConfig::DEFAULT_REBUILD_LOG_INTERVAL
}
