//! Error types for engine operations
//!
//! Validation errors are raised before any storage access. Failures coming
//! out of a storage executor are wrapped exactly once, by the transaction
//! scope, into [`EngineError::StorageOperation`].

use thiserror::Error;

/// Errors that can occur while compiling or running an engine operation
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid sort: {0}")]
    InvalidSort(String),

    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("Conflicting join specification: {0}")]
    ConflictingJoinSpec(String),

    #[error("Missing join specification: {0}")]
    MissingJoinSpec(String),

    #[error("Unsupported join type: {0}")]
    UnsupportedJoinType(String),

    #[error("Expected exactly one row to {operation}, found {found}")]
    ExpectedSingleRow { operation: String, found: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unknown field(s) for '{entity}': {fields:?}")]
    UnknownField { entity: String, fields: Vec<String> },

    #[error("Invalid value for column '{column}': {message}")]
    InvalidValue { column: String, message: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Output validation error: {0}")]
    OutputValidation(#[from] serde_json::Error),

    #[error("Storage operation '{operation}' on '{entity}' failed: {source}")]
    StorageOperation {
        entity: String,
        operation: String,
        arguments: String,
        #[source]
        source: BackendError,
    },
}

impl EngineError {
    pub fn invalid_filter(msg: impl Into<String>) -> Self {
        Self::InvalidFilter(msg.into())
    }

    pub fn invalid_sort(msg: impl Into<String>) -> Self {
        Self::InvalidSort(msg.into())
    }

    pub fn invalid_pagination(msg: impl Into<String>) -> Self {
        Self::InvalidPagination(msg.into())
    }

    pub fn conflicting_join(msg: impl Into<String>) -> Self {
        Self::ConflictingJoinSpec(msg.into())
    }

    pub fn missing_join(msg: impl Into<String>) -> Self {
        Self::MissingJoinSpec(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Self::InvalidSchema(msg.into())
    }

    /// True for the kinds raised before storage is touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidFilter(_)
                | Self::InvalidSort(_)
                | Self::InvalidPagination(_)
                | Self::ConflictingJoinSpec(_)
                | Self::MissingJoinSpec(_)
                | Self::UnsupportedJoinType(_)
                | Self::UnknownField { .. }
                | Self::InvalidValue { .. }
                | Self::InvalidSchema(_)
        )
    }
}

/// Errors surfaced by a storage executor
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unsupported statement: {0}")]
    Unsupported(String),

    #[error("Injected failure: {0}")]
    Injected(String),
}

impl BackendError {
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
