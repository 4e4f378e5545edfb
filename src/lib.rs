//! # dynacrud
//!
//! A schema-driven generic data-access engine.
//!
//! Entities are described once by an [`EntityDescriptor`] (declared, or
//! introspected from storage) and then queried, joined, paginated and mutated
//! through one uniform [`Crud`] API, without per-entity query code.
//!
//! ## Features
//!
//! - **Keyword Filters**: `field__operator` filters with comparison, membership,
//!   pattern, full-text and grouped OR operators, or the same through a fluent builder
//! - **Projection, Sort and Pagination**: driven by declared output schemas
//! - **Joins**: several joins per read, each with its own projection, filters,
//!   prefix, alias and cardinality
//! - **Nesting**: flat joined rows folded back into nested records, with outer
//!   join misses collapsed to `null` or `[]`
//! - **Transactions**: every operation runs in exactly one session, its own or
//!   the caller's
//! - **Guarded Mutations**: single-row guard on update/delete, soft delete,
//!   composite-key upsert
//! - **Executors**: PostgreSQL via `sqlx`, plus an in-memory executor
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dynacrud::{ColumnDefinition, ColumnType, EngineConfig, Filters, QuerySpec, Store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::builder()
//!         .database_url("postgres://localhost/mydb")
//!         .build();
//!     let store = Store::connect(config).await?;
//!
//!     let products = store.register(
//!         store
//!             .entity("products")
//!             .column(ColumnDefinition::new("id", ColumnType::Integer).not_null())
//!             .column(ColumnDefinition::new("name", ColumnType::String).not_null())
//!             .column(ColumnDefinition::new("price", ColumnType::decimal(10, 2)))
//!             .build()?,
//!     );
//!     store.backend().create_table(&products).await?;
//!
//!     let crud = store.crud(products);
//!     let created = crud
//!         .create(
//!             serde_json::json!({"name": "Blue Widget", "price": 29.99})
//!                 .as_object()
//!                 .cloned()
//!                 .unwrap_or_default(),
//!             None,
//!         )
//!         .await?;
//!
//!     let filters = Filters::from_kwargs([("price__lt", serde_json::json!(50))])?;
//!     let page = crud
//!         .get_multi(&crud.query().filters(filters), true, None)
//!         .await?;
//!     println!("{} of {:?}: {:?}", page.data.len(), page.total_count, created);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Sessions
//!
//! Pass `None` to let an operation open, commit or roll back its own session.
//! Pass `Some(&mut session)` from [`Store::begin`] to run several operations in
//! one transaction; the engine never commits a session it did not open.

pub mod backend;
pub mod config;
pub mod crud;
pub mod error;
pub mod filter;
pub mod join;
pub mod nest;
pub mod query;
pub mod schema;
pub mod session;
pub mod sql;
pub mod statement;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use backend::{Backend, MemoryBackend, PgBackend, Session};
pub use config::{EngineConfig, EngineConfigBuilder, ManagedColumns};
pub use crud::{Crud, Page, UpdateOptions};
pub use error::{BackendError, EngineError, Result};
pub use filter::{FilterClause, FilterOp, Filters};
pub use join::{Cardinality, JoinConfig, JoinSpec, JoinedSelect};
pub use nest::{Nested, NestedResult};
pub use query::{QuerySpec, Sort, SortDirection};
pub use schema::{Catalog, EntityDescriptor, OutputSchema, Projection};
pub use store::Store;
pub use types::{ColumnDefinition, ColumnType, Record};
