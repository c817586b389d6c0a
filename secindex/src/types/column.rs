use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, IndexResult};
use crate::types::ByteKey;

/// Identity of an indexed column: a column family and a qualifier within it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexedColumn {
    family: ByteKey,
    qualifier: ByteKey,
}

impl IndexedColumn {
    /// Creates a column identity, rejecting an empty family or qualifier.
    pub fn new(family: impl Into<ByteKey>, qualifier: impl Into<ByteKey>) -> IndexResult<Self> {
        let family = family.into();
        let qualifier = qualifier.into();

        if family.is_empty() {
            bail!(
                ErrorKind::ConfigurationError,
                "Column family is not specified",
                format!("qualifier `{qualifier}` was given without a family")
            );
        }

        if qualifier.is_empty() {
            bail!(
                ErrorKind::ConfigurationError,
                "Column qualifier is not specified",
                format!("family `{family}` was given without a qualifier")
            );
        }

        Ok(Self { family, qualifier })
    }

    pub fn family(&self) -> &ByteKey {
        &self.family
    }

    pub fn qualifier(&self) -> &ByteKey {
        &self.qualifier
    }
}

impl fmt::Display for IndexedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.qualifier)
    }
}

/// Identifies one partition of the underlying store.
///
/// The table name decides whether the partition may be indexed at all; the full identity keys
/// the [`crate::registry::IndexRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId {
    table: String,
    name: String,
}

impl PartitionId {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.name)
    }
}
