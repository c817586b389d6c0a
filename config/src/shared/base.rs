use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A table name in `excluded_tables` is empty.
    #[error("`excluded_tables` cannot contain an empty table name")]
    EmptyExcludedTable,
    /// A field holds a value outside its accepted range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
