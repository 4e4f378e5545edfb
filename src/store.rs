//! Store - main entry point of the engine
//!
//! A [`Store`] owns a storage executor, the engine configuration and the
//! descriptor catalog. Operations on one entity go through the [`Crud`] handle
//! it hands out.

use std::sync::Arc;

use crate::backend::{Backend, PgBackend};
use crate::config::EngineConfig;
use crate::crud::Crud;
use crate::error::Result;
use crate::schema::{Catalog, EntityDescriptor, EntityDescriptorBuilder};
use crate::session::OpContext;

/// Schema-driven data-access engine over a storage executor
#[derive(Debug)]
pub struct Store<B: Backend> {
    backend: B,
    config: EngineConfig,
    catalog: Catalog,
}

impl<B: Backend> Store<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            catalog: Catalog::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Start declaring an entity with this store's managed column names
    pub fn entity(&self, table: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptor::builder(table).managed_columns(self.config.managed_columns.clone())
    }

    /// Register a declared entity; an entity already known under the same
    /// table name is kept and returned instead
    pub fn register(&self, descriptor: EntityDescriptor) -> Arc<EntityDescriptor> {
        self.catalog.register(descriptor)
    }

    /// Operations on a known entity
    pub fn crud(&self, entity: Arc<EntityDescriptor>) -> Crud<'_, B> {
        Crud::new(self, entity)
    }

    /// Operations on `table`, introspecting storage the first time it is seen
    pub async fn crud_for(&self, table: &str) -> Result<Crud<'_, B>> {
        let entity = self
            .catalog
            .resolve(&self.backend, table, &self.config.managed_columns)
            .await?;
        Ok(Crud::new(self, entity))
    }

    /// Open a session for the caller to thread through several operations.
    ///
    /// Operations joined to it never commit; the caller commits or drops it.
    /// With [`crate::MemoryBackend`] the session excludes every other
    /// session until it ends, so operations started meanwhile must be given it.
    pub async fn begin(&self) -> Result<B::Session> {
        let ctx = OpContext::new("*", "begin", "");
        let session = ctx.storage(self.backend.begin().await)?;
        tracing::debug!("caller session opened");
        Ok(session)
    }
}

impl Store<PgBackend> {
    /// Connect to PostgreSQL using `config.database_url`
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        let ctx = OpContext::new("*", "connect", "");
        let backend = ctx.storage(PgBackend::connect(&config).await)?;
        Ok(Self::new(backend, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::EngineError;
    use crate::schema::tests::users;
    use crate::types::{ColumnDefinition, ColumnType};

    #[tokio::test]
    async fn test_crud_for_introspects_once() {
        let backend = MemoryBackend::new();
        backend.create_table(&users()).await;
        let store = Store::new(backend, EngineConfig::default());

        let first = store.crud_for("users").await.unwrap();
        let second = store.crud_for("users").await.unwrap();
        assert!(Arc::ptr_eq(first.entity(), second.entity()));
        assert_eq!(store.catalog().len(), 1);
    }

    #[tokio::test]
    async fn test_crud_for_unknown_table() {
        let store = Store::new(MemoryBackend::new(), EngineConfig::default());
        let result = store.crud_for("ghosts").await;
        assert!(matches!(result, Err(EngineError::UnknownEntity(t)) if t == "ghosts"));
    }

    #[test]
    fn test_entity_uses_configured_managed_columns() {
        let config = EngineConfig::builder().updated_at_column("modified_at").build();
        let store = Store::new(MemoryBackend::new(), config);
        let entity = store
            .entity("notes")
            .column(ColumnDefinition::new("id", ColumnType::Integer))
            .column(ColumnDefinition::new("modified_at", ColumnType::Timestamp))
            .build()
            .unwrap();
        assert_eq!(entity.updated_at(), Some("modified_at"));
    }

    #[test]
    fn test_register_keeps_first_descriptor() {
        let store = Store::new(MemoryBackend::new(), EngineConfig::default());
        let first = store.register(users());
        let second = store.register(users());
        assert!(Arc::ptr_eq(&first, &second));
    }
}
