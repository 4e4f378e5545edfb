//! Configuration for the engine
//!
//! Provides a builder pattern for configuring column conventions and defaults.

/// Names of the columns the engine manages on behalf of callers
#[derive(Debug, Clone)]
pub struct ManagedColumns {
    /// Soft-delete flag column (default: `is_deleted`)
    pub is_deleted: String,
    /// Soft-delete timestamp column (default: `deleted_at`)
    pub deleted_at: String,
    /// Audit timestamp refreshed on every update (default: `updated_at`)
    pub updated_at: String,
}

impl Default for ManagedColumns {
    fn default() -> Self {
        Self {
            is_deleted: "is_deleted".to_string(),
            deleted_at: "deleted_at".to_string(),
            updated_at: "updated_at".to_string(),
        }
    }
}

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// PostgreSQL database URL, used by [`crate::backend::postgres::PgBackend::connect`]
    pub database_url: Option<String>,
    /// Managed column names
    pub managed_columns: ManagedColumns,
    /// Marker prepended to joined column labels when nested output is requested
    pub join_marker: String,
    /// Page size of queries started with `Crud::query` (None = unbounded)
    pub default_limit: Option<i64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfigBuilder::new().build()
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

/// Builder for EngineConfig
#[derive(Debug)]
pub struct EngineConfigBuilder {
    database_url: Option<String>,
    managed_columns: ManagedColumns,
    join_marker: String,
    default_limit: Option<i64>,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            database_url: None,
            managed_columns: ManagedColumns::default(),
            join_marker: "joined__".to_string(),
            default_limit: Some(100),
        }
    }

    /// Set the PostgreSQL database URL
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Set the soft-delete flag column name (default: "is_deleted")
    pub fn is_deleted_column(mut self, name: impl Into<String>) -> Self {
        self.managed_columns.is_deleted = name.into();
        self
    }

    /// Set the soft-delete timestamp column name (default: "deleted_at")
    pub fn deleted_at_column(mut self, name: impl Into<String>) -> Self {
        self.managed_columns.deleted_at = name.into();
        self
    }

    /// Set the audit column name (default: "updated_at")
    pub fn updated_at_column(mut self, name: impl Into<String>) -> Self {
        self.managed_columns.updated_at = name.into();
        self
    }

    /// Set the temporary marker for joined column labels (default: "joined__")
    pub fn join_marker(mut self, marker: impl Into<String>) -> Self {
        self.join_marker = marker.into();
        self
    }

    /// Set the default page size (default: 100)
    pub fn default_limit(mut self, limit: Option<i64>) -> Self {
        self.default_limit = limit;
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        EngineConfig {
            database_url: self.database_url,
            managed_columns: self.managed_columns,
            join_marker: self.join_marker,
            default_limit: self.default_limit,
        }
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();

        assert!(config.database_url.is_none());
        assert_eq!(config.managed_columns.is_deleted, "is_deleted");
        assert_eq!(config.managed_columns.deleted_at, "deleted_at");
        assert_eq!(config.managed_columns.updated_at, "updated_at");
        assert_eq!(config.join_marker, "joined__");
        assert_eq!(config.default_limit, Some(100));
    }

    #[test]
    fn test_database_url() {
        let config = EngineConfig::builder()
            .database_url("postgres://localhost/test")
            .build();
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/test")
        );
    }

    #[test]
    fn test_custom_managed_columns() {
        let config = EngineConfig::builder()
            .is_deleted_column("removed")
            .deleted_at_column("removed_at")
            .updated_at_column("modified_at")
            .build();

        assert_eq!(config.managed_columns.is_deleted, "removed");
        assert_eq!(config.managed_columns.deleted_at, "removed_at");
        assert_eq!(config.managed_columns.updated_at, "modified_at");
    }

    #[test]
    fn test_join_marker_and_limit() {
        let config = EngineConfig::builder()
            .join_marker("tmp__")
            .default_limit(None)
            .build();

        assert_eq!(config.join_marker, "tmp__");
        assert!(config.default_limit.is_none());
    }

    #[test]
    fn test_builder_order_independence() {
        let config1 = EngineConfig::builder()
            .join_marker("j__")
            .default_limit(Some(10))
            .build();
        let config2 = EngineConfig::builder()
            .default_limit(Some(10))
            .join_marker("j__")
            .build();

        assert_eq!(config1.join_marker, config2.join_marker);
        assert_eq!(config1.default_limit, config2.default_limit);
    }
}
