use std::fmt;

use crate::types::{ByteKey, IndexedColumn};

/// Comparison applied to the values of one indexed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Values equal to the operand.
    Equal(ByteKey),
    /// Values strictly greater than the operand.
    Greater(ByteKey),
    /// Values strictly less than the operand.
    Less(ByteKey),
    /// Values between both operands, both ends included.
    Range { lower: ByteKey, upper: ByteKey },
}

impl Predicate {
    pub fn equal(value: impl Into<ByteKey>) -> Self {
        Predicate::Equal(value.into())
    }

    pub fn greater(value: impl Into<ByteKey>) -> Self {
        Predicate::Greater(value.into())
    }

    pub fn less(value: impl Into<ByteKey>) -> Self {
        Predicate::Less(value.into())
    }

    pub fn range(lower: impl Into<ByteKey>, upper: impl Into<ByteKey>) -> Self {
        Predicate::Range {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    /// Evaluates the predicate against a single stored value.
    ///
    /// Used to re-check rows against criteria that no index can answer.
    pub fn matches(&self, value: &[u8]) -> bool {
        match self {
            Predicate::Equal(operand) => value == operand.as_bytes(),
            Predicate::Greater(operand) => value > operand.as_bytes(),
            Predicate::Less(operand) => value < operand.as_bytes(),
            Predicate::Range { lower, upper } => {
                value >= lower.as_bytes() && value <= upper.as_bytes()
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Equal(value) => write!(f, "= {value}"),
            Predicate::Greater(value) => write!(f, "> {value}"),
            Predicate::Less(value) => write!(f, "< {value}"),
            Predicate::Range { lower, upper } => write!(f, "in [{lower}, {upper}]"),
        }
    }
}

/// A predicate bound to the column it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criterion {
    pub column: IndexedColumn,
    pub predicate: Predicate,
}

impl Criterion {
    pub fn new(column: IndexedColumn, predicate: Predicate) -> Self {
        Self { column, predicate }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.column, self.predicate)
    }
}

/// Conjunction of criteria evaluated against one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedQuery {
    criteria: Vec<Criterion>,
}

impl IndexedQuery {
    pub fn new(criteria: Vec<Criterion>) -> Self {
        Self { criteria }
    }

    /// Appends a criterion.
    pub fn with(mut self, column: IndexedColumn, predicate: Predicate) -> Self {
        self.criteria.push(Criterion::new(column, predicate));
        self
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}
