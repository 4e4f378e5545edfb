//! Projection, sort and pagination
//!
//! A [`QuerySpec`] collects what a read needs besides joins and compiles into
//! a [`Select`] against one entity.

use std::str::FromStr;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::filter::Filters;
use crate::schema::{EntityDescriptor, Projection};
use crate::statement::{ColumnRef, OrderBy, Select, SelectColumn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(EngineError::invalid_sort(format!(
                "Invalid sort order: {}. Only 'asc' or 'desc' are allowed.",
                other
            ))),
        }
    }
}

/// Sort columns and their direction tokens, validated on compile.
///
/// With no directions every column sorts ascending; otherwise there must be
/// exactly one direction per column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort {
    columns: Vec<String>,
    directions: Vec<String>,
}

impl Sort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            directions: Vec::new(),
        }
    }

    pub fn directions<I, S>(mut self, directions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directions = directions.into_iter().map(Into::into).collect();
        self
    }

    pub fn asc(self, column: impl Into<String>) -> Self {
        self.then(column, "asc")
    }

    pub fn desc(self, column: impl Into<String>) -> Self {
        self.then(column, "desc")
    }

    fn then(mut self, column: impl Into<String>, direction: &str) -> Self {
        if self.directions.is_empty() {
            self.directions = vec!["asc".to_string(); self.columns.len()];
        }
        self.columns.push(column.into());
        self.directions.push(direction.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.directions.is_empty()
    }

    pub fn compile(&self, entity: &EntityDescriptor, source: &str) -> Result<Vec<OrderBy>> {
        if self.columns.is_empty() {
            if !self.directions.is_empty() {
                return Err(EngineError::invalid_sort(
                    "Sort orders provided without corresponding sort columns.",
                ));
            }
            return Ok(Vec::new());
        }

        if !self.directions.is_empty() && self.directions.len() != self.columns.len() {
            return Err(EngineError::invalid_sort(format!(
                "The length of sort columns ({}) and sort orders ({}) must match.",
                self.columns.len(),
                self.directions.len()
            )));
        }

        let directions = self
            .directions
            .iter()
            .map(|d| d.parse::<SortDirection>())
            .collect::<Result<Vec<_>>>()?;

        self.columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let column = entity.column(name).ok_or_else(|| {
                    EngineError::invalid_sort(format!("Invalid column name: {}", name))
                })?;
                let direction = directions.get(i).copied().unwrap_or_default();
                Ok(OrderBy {
                    column: ColumnRef::new(source, name, column.column_type.clone()),
                    descending: direction == SortDirection::Desc,
                })
            })
            .collect()
    }
}

pub(crate) fn check_pagination(offset: i64, limit: Option<i64>) -> Result<()> {
    if offset < 0 {
        return Err(EngineError::invalid_pagination(format!(
            "offset must be non-negative, got {}",
            offset
        )));
    }
    match limit {
        Some(limit) if limit < 0 => Err(EngineError::invalid_pagination(format!(
            "limit must be non-negative, got {}",
            limit
        ))),
        _ => Ok(()),
    }
}

/// Project `fields` of `entity` addressed as `source`; labels are
/// `{label_prefix}{field}`.
pub(crate) fn project(
    entity: &EntityDescriptor,
    source: &str,
    fields: &[String],
    label_prefix: &str,
) -> Vec<SelectColumn> {
    fields
        .iter()
        .filter_map(|field| {
            entity.column(field).map(|col| SelectColumn {
                column: ColumnRef::new(source, field, col.column_type.clone()),
                label: format!("{}{}", label_prefix, field),
            })
        })
        .collect()
}

/// Caller-facing read shape: projection, filters, sort and pagination
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub projection: Projection,
    pub filters: Filters,
    pub sort: Sort,
    pub offset: i64,
    pub limit: Option<i64>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    /// Compile a single-entity select. Validation order: pagination, filters, sort.
    pub fn compile(&self, entity: &Arc<EntityDescriptor>) -> Result<Select> {
        check_pagination(self.offset, self.limit)?;

        let source = entity.table();
        let filter = self.filters.compile(entity, source)?;
        let order = self.sort.compile(entity, source)?;
        let fields = self.projection.resolve(entity);

        Ok(Select {
            from: Arc::clone(entity),
            columns: project(entity, source, &fields, ""),
            joins: Vec::new(),
            filter,
            order,
            offset: self.offset,
            limit: self.limit,
        })
    }
}
