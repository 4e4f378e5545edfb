//! Entity descriptors and the descriptor catalog
//!
//! An [`EntityDescriptor`] is the engine's view of one storage entity: its
//! ordered columns, primary key and the managed columns it declares. It is
//! built once, validated, and shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;

use crate::backend::Backend;
use crate::config::ManagedColumns;
use crate::error::{EngineError, Result};
use crate::session::OpContext;
use crate::sql::sanitize::validate_identifier;
use crate::types::{ColumnDefinition, Record};

/// Soft-delete columns declared by an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDeleteColumns {
    pub is_deleted: String,
    pub deleted_at: String,
}

/// Immutable description of a storage entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    table: String,
    columns: Vec<ColumnDefinition>,
    primary_key: Vec<String>,
    soft_delete: Option<SoftDeleteColumns>,
    updated_at: Option<String>,
}

impl EntityDescriptor {
    pub fn builder(table: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder::new(table)
    }

    /// Table name; also the default nested key when the entity is joined
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn soft_delete(&self) -> Option<&SoftDeleteColumns> {
        self.soft_delete.as_ref()
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    /// Primary-key values carried by `record`, or None when any key column is
    /// missing or null.
    pub fn primary_key_values(&self, record: &Record) -> Option<Record> {
        let mut keys = Record::new();
        for pk in &self.primary_key {
            match record.get(pk) {
                Some(value) if !value.is_null() => {
                    keys.insert(pk.clone(), value.clone());
                }
                _ => return None,
            }
        }
        Some(keys)
    }
}

/// Builder for EntityDescriptor
#[derive(Debug)]
pub struct EntityDescriptorBuilder {
    table: String,
    columns: Vec<ColumnDefinition>,
    primary_key: Vec<String>,
    managed: ManagedColumns,
}

impl EntityDescriptorBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            managed: ManagedColumns::default(),
        }
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = ColumnDefinition>) -> Self {
        self.columns.extend(columns);
        self
    }

    /// Set the primary-key column(s). Defaults to `id` when that column exists.
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Use non-default managed column names when detecting soft-delete and audit columns
    pub fn managed_columns(mut self, managed: ManagedColumns) -> Self {
        self.managed = managed;
        self
    }

    pub fn build(self) -> Result<EntityDescriptor> {
        validate_identifier(&self.table, &[]).map_err(EngineError::InvalidSchema)?;

        if self.columns.is_empty() {
            return Err(EngineError::invalid_schema(format!(
                "Entity '{}' declares no columns",
                self.table
            )));
        }

        for (i, col) in self.columns.iter().enumerate() {
            validate_identifier(&col.name, &[]).map_err(EngineError::InvalidSchema)?;
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(EngineError::invalid_schema(format!(
                    "Entity '{}' declares column '{}' twice",
                    self.table, col.name
                )));
            }
        }

        let has = |name: &str| self.columns.iter().any(|c| c.name == name);

        let primary_key = if self.primary_key.is_empty() {
            if !has("id") {
                return Err(EngineError::invalid_schema(format!(
                    "Entity '{}' has no primary key and no 'id' column",
                    self.table
                )));
            }
            vec!["id".to_string()]
        } else {
            if let Some(missing) = self.primary_key.iter().find(|pk| !has(pk)) {
                return Err(EngineError::invalid_schema(format!(
                    "Primary key column '{}' is not a column of '{}'",
                    missing, self.table
                )));
            }
            self.primary_key.clone()
        };

        let soft_delete = (has(&self.managed.is_deleted) && has(&self.managed.deleted_at))
            .then(|| SoftDeleteColumns {
                is_deleted: self.managed.is_deleted.clone(),
                deleted_at: self.managed.deleted_at.clone(),
            });
        let updated_at = has(&self.managed.updated_at).then(|| self.managed.updated_at.clone());

        Ok(EntityDescriptor {
            table: self.table,
            columns: self.columns,
            primary_key,
            soft_delete,
            updated_at,
        })
    }
}

/// Column set and primary key reported by a storage executor for one table
#[derive(Debug, Clone, PartialEq)]
pub struct IntrospectedTable {
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
}

/// Process-wide cache of entity descriptors, keyed by table name.
///
/// Entries are immutable once inserted. Concurrent misses may both introspect;
/// the first insert wins and later builds are discarded.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: RwLock<HashMap<String, Arc<EntityDescriptor>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declared descriptor. Returns the cached one if the table is
    /// already known.
    pub fn register(&self, descriptor: EntityDescriptor) -> Arc<EntityDescriptor> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(descriptor.table().to_string())
            .or_insert_with(|| Arc::new(descriptor))
            .clone()
    }

    pub fn get(&self, table: &str) -> Option<Arc<EntityDescriptor>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a descriptor, introspecting storage on a miss.
    pub async fn resolve<B: Backend>(
        &self,
        backend: &B,
        table: &str,
        managed: &ManagedColumns,
    ) -> Result<Arc<EntityDescriptor>> {
        if let Some(found) = self.get(table) {
            return Ok(found);
        }

        let ctx = OpContext::new(table, "introspect", format!("table={table}"));
        let shape = backend
            .introspect(table)
            .await
            .map_err(|e| ctx.storage_error(e))?
            .ok_or_else(|| EngineError::UnknownEntity(table.to_string()))?;

        let descriptor = EntityDescriptor::builder(table)
            .columns(shape.columns)
            .primary_key(shape.primary_key)
            .managed_columns(managed.clone())
            .build()?;

        tracing::debug!(table, "introspected entity descriptor");
        Ok(self.register(descriptor))
    }
}

/// A declared output schema: the field names a typed result carries.
///
/// Projections built from an output schema keep only the fields that are
/// real columns of the queried entity.
pub trait OutputSchema: DeserializeOwned {
    const FIELDS: &'static [&'static str];
}

/// Requested output columns of an entity (None = every column)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection(Option<Vec<String>>);

impl Projection {
    pub fn all() -> Self {
        Self(None)
    }

    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Some(fields.into_iter().map(Into::into).collect()))
    }

    pub fn of<T: OutputSchema>() -> Self {
        Self::fields(T::FIELDS.iter().copied())
    }

    pub fn is_all(&self) -> bool {
        self.0.is_none()
    }

    /// Resolve against an entity: declared fields that are entity columns, in
    /// declaration order, or every column when nothing was declared.
    pub fn resolve(&self, entity: &EntityDescriptor) -> Vec<String> {
        match &self.0 {
            None => entity.column_names().map(str::to_string).collect(),
            Some(fields) => {
                let mut out: Vec<String> = Vec::with_capacity(fields.len());
                for field in fields {
                    if entity.has_column(field) && !out.contains(field) {
                        out.push(field.clone());
                    }
                }
                out
            }
        }
    }
}
