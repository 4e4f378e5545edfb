//! Entity-bound read and mutation operations
//!
//! Every operation compiles and validates its statements first, then runs
//! inside one session scope: the caller's when one is passed, otherwise a
//! session of its own that is committed on success.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{Backend, Session};
use crate::error::{EngineError, Result};
use crate::filter::Filters;
use crate::join::{JoinSpec, JoinedSelect, compile_joined};
use crate::nest::{NestedResult, parent_key_of, reconcile, reconcile_many};
use crate::query::{QuerySpec, project};
use crate::schema::{EntityDescriptor, OutputSchema, Projection};
use crate::session::{OpContext, Scope};
use crate::statement::{Count, Delete, Insert, Predicate, Select, Update};
use crate::store::Store;
use crate::types::{Record, timestamp_now};

/// One page of results, with the total match count when it was requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl<T> Page<T> {
    fn try_map<U>(self, f: impl FnMut(T) -> Result<U>) -> Result<Page<U>> {
        Ok(Page {
            data: self.data.into_iter().map(f).collect::<Result<_>>()?,
            total_count: self.total_count,
        })
    }
}

/// Guard and output options of [`Crud::update`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    allow_multiple: bool,
    returning: Option<Projection>,
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow the update to touch more than one row
    pub fn allow_multiple(mut self) -> Self {
        self.allow_multiple = true;
        self
    }

    /// Return the updated rows with these columns
    pub fn returning(mut self, projection: Projection) -> Self {
        self.returning = Some(projection);
        self
    }
}

fn deserialize<T: OutputSchema>(record: Record) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// Project the output schema's fields unless the query already projects
fn typed_query<T: OutputSchema>(query: &QuerySpec) -> QuerySpec {
    let query = query.clone();
    if query.projection.is_all() {
        query.projection(Projection::of::<T>())
    } else {
        query
    }
}

fn single(rows: Vec<Record>, operation: &str) -> Result<Option<Record>> {
    if rows.len() > 1 {
        return Err(EngineError::ExpectedSingleRow {
            operation: operation.to_string(),
            found: rows.len() as u64,
        });
    }
    Ok(rows.into_iter().next())
}

/// Operations on one entity of a [`Store`]
#[derive(Debug)]
pub struct Crud<'s, B: Backend> {
    store: &'s Store<B>,
    entity: Arc<EntityDescriptor>,
}

impl<'s, B: Backend> Crud<'s, B> {
    pub(crate) fn new(store: &'s Store<B>, entity: Arc<EntityDescriptor>) -> Self {
        Self { store, entity }
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    /// A query with the store's default page size
    pub fn query(&self) -> QuerySpec {
        QuerySpec::new().limit(self.store.config().default_limit)
    }

    fn context(&self, operation: &str, arguments: &dyn std::fmt::Debug) -> OpContext {
        OpContext::new(self.entity.table(), operation, format!("{:?}", arguments))
    }

    fn marker(&self) -> &str {
        &self.store.config().join_marker
    }

    /// Reject non-columns, then values their column cannot hold
    fn check_payload(&self, values: &Record) -> Result<()> {
        let unknown: Vec<String> = values
            .keys()
            .filter(|name| !self.entity.has_column(name))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(EngineError::UnknownField {
                entity: self.entity.table().to_string(),
                fields: unknown,
            });
        }

        for (name, value) in values {
            let Some(column) = self.entity.column(name) else {
                continue;
            };
            if value.is_null() && !column.nullable {
                return Err(EngineError::InvalidValue {
                    column: name.clone(),
                    message: "column is not nullable".to_string(),
                });
            }
            column
                .column_type
                .validate_value(value)
                .map_err(|message| EngineError::InvalidValue {
                    column: name.clone(),
                    message,
                })?;
        }
        Ok(())
    }

    fn count_statement(&self, filters: &Filters) -> Result<Count> {
        Ok(Count {
            from: Arc::clone(&self.entity),
            joins: Vec::new(),
            filter: filters.compile(&self.entity, self.entity.table())?,
            distinct: Vec::new(),
        })
    }

    fn insert_statement(&self, payload: Record, extra: Record) -> Result<Insert> {
        let mut values = payload;
        values.extend(extra);
        // null keys are left for storage to generate
        let primary_key = self.entity.primary_key();
        values.retain(|name, value| !(value.is_null() && primary_key.contains(name)));
        self.check_payload(&values)?;
        Ok(Insert {
            into: Arc::clone(&self.entity),
            values,
        })
    }

    fn key_filters(keys: &Record) -> Filters {
        keys.iter()
            .fold(Filters::new(), |filters, (name, value)| {
                filters.eq(name.as_str(), value.clone())
            })
    }

    fn guard(&self, operation: &str, matched: u64, allow_multiple: bool) -> Result<()> {
        if matched == 0 {
            return Err(EngineError::not_found(format!(
                "No '{}' row matches the filters to {}",
                self.entity.table(),
                operation
            )));
        }
        if matched > 1 && !allow_multiple {
            return Err(EngineError::ExpectedSingleRow {
                operation: operation.to_string(),
                found: matched,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Compile only
    // =========================================================================

    /// The select `query` compiles to, without running it
    pub fn select(&self, query: &QuerySpec) -> Result<Select> {
        query.compile(&self.entity)
    }

    /// The joined select `query` and `joins` compile to, without running it
    pub fn select_joined(&self, query: &QuerySpec, joins: &JoinSpec) -> Result<JoinedSelect> {
        compile_joined(query, &self.entity, joins, self.marker())
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Insert `payload` and return the stored row
    pub async fn create(&self, payload: Record, session: Option<&mut B::Session>) -> Result<Record> {
        self.create_with(payload, Record::new(), session).await
    }

    /// Insert `payload` plus `extra` attributes such as audit fields; `extra`
    /// wins where both name a column
    pub async fn create_with(
        &self,
        payload: Record,
        extra: Record,
        session: Option<&mut B::Session>,
    ) -> Result<Record> {
        let insert = self.insert_statement(payload, extra)?;
        let ctx = self.context("create", &insert.values);
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = ctx.storage(scope.session().insert(&insert).await);
        scope.finish(result, &ctx).await
    }

    pub async fn create_as<T: OutputSchema>(
        &self,
        payload: Record,
        session: Option<&mut B::Session>,
    ) -> Result<T> {
        deserialize(self.create(payload, session).await?)
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// First row matching `query`
    pub async fn get(&self, query: &QuerySpec, session: Option<&mut B::Session>) -> Result<Option<Record>> {
        let select = query.compile(&self.entity)?;
        let ctx = self.context("get", query);
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = ctx.storage(scope.session().fetch_optional(&select).await);
        scope.finish(result, &ctx).await
    }

    /// The row matching `query`; more than one match is an error
    pub async fn get_one_or_none(
        &self,
        query: &QuerySpec,
        session: Option<&mut B::Session>,
    ) -> Result<Option<Record>> {
        let select = query.compile(&self.entity)?;
        let ctx = self.context("get", query);
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = ctx
            .storage(scope.session().fetch_all(&select).await)
            .and_then(|rows| single(rows, "get"));
        scope.finish(result, &ctx).await
    }

    pub async fn get_as<T: OutputSchema>(
        &self,
        query: &QuerySpec,
        session: Option<&mut B::Session>,
    ) -> Result<Option<T>> {
        self.get(&typed_query::<T>(query), session)
            .await?
            .map(deserialize)
            .transpose()
    }

    async fn fetch_page(
        session: &mut B::Session,
        select: &Select,
        count: Option<&Count>,
        ctx: &OpContext,
    ) -> Result<Page<Record>> {
        let data = ctx.storage(session.fetch_all(select).await)?;
        let total_count = match count {
            Some(count) => Some(ctx.storage(session.count(count).await)?),
            None => None,
        };
        Ok(Page { data, total_count })
    }

    /// Rows matching `query`, plus the count of every match when asked
    pub async fn get_multi(
        &self,
        query: &QuerySpec,
        return_total_count: bool,
        session: Option<&mut B::Session>,
    ) -> Result<Page<Record>> {
        let select = query.compile(&self.entity)?;
        let count = if return_total_count {
            Some(self.count_statement(&query.filters)?)
        } else {
            None
        };

        let ctx = self.context("get_multi", query);
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = Self::fetch_page(scope.session(), &select, count.as_ref(), &ctx).await;
        scope.finish(result, &ctx).await
    }

    pub async fn get_multi_as<T: OutputSchema>(
        &self,
        query: &QuerySpec,
        return_total_count: bool,
        session: Option<&mut B::Session>,
    ) -> Result<Page<T>> {
        self.get_multi(&typed_query::<T>(query), return_total_count, session)
            .await?
            .try_map(deserialize)
    }

    /// Flat rows of the parents on the requested page of a nested
    /// one-to-many read, with every matched child of each.
    ///
    /// Offset and limit count distinct parents: the parent keys are read in
    /// sort order first, then all rows of the paged parents.
    async fn fetch_parent_page(
        session: &mut B::Session,
        joined: &JoinedSelect,
        ctx: &OpContext,
    ) -> Result<Vec<Record>> {
        let labels = joined.parent_key_labels();
        let keys = Select {
            columns: joined.parent_key.clone(),
            offset: 0,
            limit: None,
            ..joined.select.clone()
        };

        let mut seen = HashSet::new();
        let skip = usize::try_from(joined.select.offset).unwrap_or(0);
        let take = joined
            .select
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(0));
        let page: Vec<Record> = ctx
            .storage(session.fetch_all(&keys).await)?
            .into_iter()
            .filter(|row| seen.insert(parent_key_of(row, &labels)))
            .skip(skip)
            .take(take)
            .collect();
        if page.is_empty() {
            return Ok(Vec::new());
        }

        let mut select = Select {
            offset: 0,
            limit: None,
            ..joined.select.clone()
        };
        for column in &joined.parent_key {
            select.filter.push(Predicate::In {
                column: column.column.clone(),
                values: page
                    .iter()
                    .map(|row| row.get(&column.label).cloned().unwrap_or(Value::Null))
                    .collect(),
                negated: false,
            });
        }

        // a composite key's IN lists admit key combinations off the page
        let position: HashMap<String, usize> = page
            .iter()
            .enumerate()
            .map(|(i, row)| (parent_key_of(row, &labels), i))
            .collect();
        let mut rows: Vec<(usize, Record)> = ctx
            .storage(session.fetch_all(&select).await)?
            .into_iter()
            .filter_map(|row| {
                position
                    .get(&parent_key_of(&row, &labels))
                    .map(|&i| (i, row))
            })
            .collect();
        rows.sort_by_key(|(i, _)| *i);
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn fetch_joined_page(
        session: &mut B::Session,
        joined: &JoinedSelect,
        count: Option<&Count>,
        ctx: &OpContext,
    ) -> Result<Page<Record>> {
        if joined.parent_key.is_empty() {
            return Self::fetch_page(session, &joined.select, count, ctx).await;
        }
        let data = Self::fetch_parent_page(session, joined, ctx).await?;
        let total_count = match count {
            Some(count) => Some(ctx.storage(session.count(count).await)?),
            None => None,
        };
        Ok(Page { data, total_count })
    }

    fn nest_rows(&self, rows: &[Record], joined: &JoinedSelect) -> Vec<Record> {
        reconcile_many(rows, &joined.targets, self.marker(), &joined.parent_key_labels())
            .into_iter()
            .map(NestedResult::into_record)
            .collect()
    }

    async fn fetch_joined_one(
        &self,
        session: &mut B::Session,
        joined: &JoinedSelect,
        ctx: &OpContext,
    ) -> Result<Option<Record>> {
        if !joined.parent_key.is_empty() {
            let first = JoinedSelect {
                select: Select {
                    limit: Some(1),
                    ..joined.select.clone()
                },
                ..joined.clone()
            };
            let rows = Self::fetch_parent_page(session, &first, ctx).await?;
            return Ok(self.nest_rows(&rows, joined).into_iter().next());
        }

        let row = ctx.storage(session.fetch_optional(&joined.select).await)?;
        Ok(match row {
            Some(row) if joined.nest => {
                reconcile(std::slice::from_ref(&row), &joined.targets, self.marker())
                    .map(NestedResult::into_record)
            }
            other => other,
        })
    }

    /// First result of a joined read. With nesting, the rows of the first
    /// parent are folded into one nested record.
    pub async fn get_joined(
        &self,
        query: &QuerySpec,
        joins: &JoinSpec,
        session: Option<&mut B::Session>,
    ) -> Result<Option<Record>> {
        let joined = self.select_joined(query, joins)?;
        let ctx = self.context("get_joined", &(query, joins));
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = self.fetch_joined_one(scope.session(), &joined, &ctx).await;
        scope.finish(result, &ctx).await
    }

    pub async fn get_joined_as<T: OutputSchema>(
        &self,
        query: &QuerySpec,
        joins: &JoinSpec,
        session: Option<&mut B::Session>,
    ) -> Result<Option<T>> {
        self.get_joined(&typed_query::<T>(query), joins, session)
            .await?
            .map(deserialize)
            .transpose()
    }

    /// Joined read of several rows.
    ///
    /// Pagination counts parent rows when a one-to-many join is nested, and
    /// joined rows otherwise. The total count is the number of distinct
    /// primary rows matched.
    pub async fn get_multi_joined(
        &self,
        query: &QuerySpec,
        joins: &JoinSpec,
        return_total_count: bool,
        session: Option<&mut B::Session>,
    ) -> Result<Page<Record>> {
        let joined = self.select_joined(query, joins)?;
        let count = return_total_count.then(|| joined.count());

        let ctx = self.context("get_multi_joined", &(query, joins));
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = Self::fetch_joined_page(scope.session(), &joined, count.as_ref(), &ctx).await;
        let result = scope.finish(result, &ctx).await?;

        if !joined.nest {
            return Ok(result);
        }
        Ok(Page {
            data: self.nest_rows(&result.data, &joined),
            total_count: result.total_count,
        })
    }

    pub async fn get_multi_joined_as<T: OutputSchema>(
        &self,
        query: &QuerySpec,
        joins: &JoinSpec,
        return_total_count: bool,
        session: Option<&mut B::Session>,
    ) -> Result<Page<T>> {
        self.get_multi_joined(&typed_query::<T>(query), joins, return_total_count, session)
            .await?
            .try_map(deserialize)
    }

    pub async fn exists(&self, filters: &Filters, session: Option<&mut B::Session>) -> Result<bool> {
        let select = QuerySpec::new()
            .projection(Projection::fields(self.entity.primary_key().iter().cloned()))
            .filters(filters.clone())
            .limit(Some(1))
            .compile(&self.entity)?;

        let ctx = self.context("exists", filters);
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = ctx
            .storage(scope.session().fetch_optional(&select).await)
            .map(|row| row.is_some());
        scope.finish(result, &ctx).await
    }

    pub async fn count(&self, filters: &Filters, session: Option<&mut B::Session>) -> Result<u64> {
        let count = self.count_statement(filters)?;
        let ctx = self.context("count", filters);
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = ctx.storage(scope.session().count(&count).await);
        scope.finish(result, &ctx).await
    }

    // =========================================================================
    // Update
    // =========================================================================

    async fn update_in(
        &self,
        session: &mut B::Session,
        mut values: Record,
        count: Count,
        options: &UpdateOptions,
        ctx: &OpContext,
    ) -> Result<Vec<Record>> {
        let matched = ctx.storage(session.count(&count).await)?;
        self.guard("update", matched, options.allow_multiple)?;

        if let Some(column) = self.entity.updated_at() {
            values.insert(column.to_string(), timestamp_now());
        }
        let returning = options
            .returning
            .as_ref()
            .map(|p| p.resolve(&self.entity))
            .unwrap_or_default();

        // nothing to write: the matched rows are returned as they stand
        if values.is_empty() {
            if returning.is_empty() {
                return Ok(Vec::new());
            }
            let select = Select {
                from: Arc::clone(&self.entity),
                columns: project(&self.entity, self.entity.table(), &returning, ""),
                joins: Vec::new(),
                filter: count.filter,
                order: Vec::new(),
                offset: 0,
                limit: None,
            };
            return ctx.storage(session.fetch_all(&select).await);
        }

        let update = Update {
            table: Arc::clone(&self.entity),
            assignments: values,
            filter: count.filter,
            returning,
        };
        tracing::debug!(entity = self.entity.table(), rows = matched, "updating rows");
        let (_, rows) = ctx.storage(session.update(&update).await)?;
        Ok(rows)
    }

    /// Set `values` on the rows matching `filters`.
    ///
    /// Fails with `NotFound` when nothing matches and with
    /// `ExpectedSingleRow` when several rows match without
    /// [`UpdateOptions::allow_multiple`]; nothing is written in either case.
    /// Returns the updated rows when [`UpdateOptions::returning`] is set.
    pub async fn update(
        &self,
        values: Record,
        filters: &Filters,
        options: UpdateOptions,
        session: Option<&mut B::Session>,
    ) -> Result<Vec<Record>> {
        self.check_payload(&values)?;
        let count = self.count_statement(filters)?;

        let ctx = self.context("update", &(&values, filters));
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = self
            .update_in(scope.session(), values, count, &options, &ctx)
            .await;
        scope.finish(result, &ctx).await
    }

    /// [`Crud::update`] returning the updated rows as `T`
    pub async fn update_as<T: OutputSchema>(
        &self,
        values: Record,
        filters: &Filters,
        options: UpdateOptions,
        session: Option<&mut B::Session>,
    ) -> Result<Vec<T>> {
        let options = match options.returning {
            Some(_) => options,
            None => options.returning(Projection::of::<T>()),
        };
        self.update(values, filters, options, session)
            .await?
            .into_iter()
            .map(deserialize)
            .collect()
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Mark matching rows deleted when `soft` and the entity supports it,
    /// otherwise remove them
    async fn remove(
        &self,
        session: &mut B::Session,
        filter: Vec<Predicate>,
        soft: bool,
        ctx: &OpContext,
    ) -> Result<u64> {
        match self.entity.soft_delete() {
            Some(columns) if soft => {
                let mut assignments = Record::new();
                assignments.insert(columns.is_deleted.clone(), Value::Bool(true));
                assignments.insert(columns.deleted_at.clone(), timestamp_now());
                let update = Update {
                    table: Arc::clone(&self.entity),
                    assignments,
                    filter,
                    returning: Vec::new(),
                };
                let (affected, _) = ctx.storage(session.update(&update).await)?;
                Ok(affected)
            }
            _ => {
                let delete = Delete {
                    from: Arc::clone(&self.entity),
                    filter,
                };
                ctx.storage(session.delete(&delete).await)
            }
        }
    }

    async fn delete_in(
        &self,
        session: &mut B::Session,
        count: Count,
        allow_multiple: bool,
        ctx: &OpContext,
    ) -> Result<u64> {
        let matched = ctx.storage(session.count(&count).await)?;
        self.guard("delete", matched, allow_multiple)?;
        tracing::debug!(
            entity = self.entity.table(),
            rows = matched,
            soft = self.entity.soft_delete().is_some(),
            "deleting rows"
        );
        self.remove(session, count.filter, true, ctx).await
    }

    /// Delete the rows matching `filters`: soft when the entity has
    /// soft-delete columns, hard otherwise. Returns the rows affected.
    pub async fn delete(
        &self,
        filters: &Filters,
        allow_multiple: bool,
        session: Option<&mut B::Session>,
    ) -> Result<u64> {
        let count = self.count_statement(filters)?;
        let ctx = self.context("delete", filters);
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = self
            .delete_in(scope.session(), count, allow_multiple, &ctx)
            .await;
        scope.finish(result, &ctx).await
    }

    /// Delete an already-loaded row by its primary key. The row is soft
    /// deleted when it carries both soft-delete columns.
    pub async fn delete_row(&self, row: &Record, session: Option<&mut B::Session>) -> Result<u64> {
        let keys = self
            .entity
            .primary_key_values(row)
            .ok_or_else(|| EngineError::InvalidValue {
                column: self.entity.primary_key().join(", "),
                message: "row carries no primary key value".to_string(),
            })?;
        let filter = Self::key_filters(&keys).compile(&self.entity, self.entity.table())?;
        let soft = self
            .entity
            .soft_delete()
            .is_some_and(|c| row.contains_key(&c.is_deleted) && row.contains_key(&c.deleted_at));

        let ctx = self.context("delete_row", &keys);
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = match self.remove(scope.session(), filter, soft, &ctx).await {
            Ok(0) => Err(EngineError::not_found(format!(
                "No '{}' row with key {:?}",
                self.entity.table(),
                keys
            ))),
            other => other,
        };
        scope.finish(result, &ctx).await
    }

    async fn hard_delete_in(
        &self,
        session: &mut B::Session,
        count: Count,
        allow_multiple: bool,
        ctx: &OpContext,
    ) -> Result<u64> {
        let matched = ctx.storage(session.count(&count).await)?;
        if matched > 1 && !allow_multiple {
            return Err(EngineError::ExpectedSingleRow {
                operation: "delete".to_string(),
                found: matched,
            });
        }
        self.remove(session, count.filter, false, ctx).await
    }

    /// Remove matching rows even when the entity supports soft delete.
    /// Matching nothing is not an error.
    pub async fn hard_delete(
        &self,
        filters: &Filters,
        allow_multiple: bool,
        session: Option<&mut B::Session>,
    ) -> Result<u64> {
        let count = self.count_statement(filters)?;
        let ctx = self.context("hard_delete", filters);
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = self
            .hard_delete_in(scope.session(), count, allow_multiple, &ctx)
            .await;
        scope.finish(result, &ctx).await
    }

    // =========================================================================
    // Upsert
    // =========================================================================

    async fn upsert_in(
        &self,
        session: &mut B::Session,
        lookup: &Select,
        insert: Insert,
        mut values: Record,
        ctx: &OpContext,
    ) -> Result<Record> {
        if ctx.storage(session.fetch_optional(lookup).await)?.is_none() {
            tracing::debug!(entity = self.entity.table(), "upsert creating row");
            ctx.storage(session.insert(&insert).await)?;
        } else {
            tracing::debug!(entity = self.entity.table(), "upsert updating row");
            if let Some(column) = self.entity.updated_at() {
                values.insert(column.to_string(), timestamp_now());
            }
            if !values.is_empty() {
                let update = Update {
                    table: Arc::clone(&self.entity),
                    assignments: values,
                    filter: lookup.filter.clone(),
                    returning: Vec::new(),
                };
                ctx.storage(session.update(&update).await)?;
            }
        }

        ctx.storage(session.fetch_optional(lookup).await)?
            .ok_or_else(|| EngineError::not_found(format!("Upserted '{}' row vanished", self.entity.table())))
    }

    /// Create the row keyed by the primary key in `payload`, or update it
    /// when it exists. Returns the stored row either way.
    pub async fn upsert(&self, payload: Record, session: Option<&mut B::Session>) -> Result<Record> {
        self.check_payload(&payload)?;
        let keys = self
            .entity
            .primary_key_values(&payload)
            .ok_or_else(|| EngineError::InvalidValue {
                column: self.entity.primary_key().join(", "),
                message: "upsert requires every primary key value".to_string(),
            })?;
        let lookup = QuerySpec::new()
            .filters(Self::key_filters(&keys))
            .compile(&self.entity)?;

        let mut values = payload.clone();
        values.retain(|name, _| !keys.contains_key(name));
        let insert = self.insert_statement(payload, Record::new())?;

        let ctx = self.context("upsert", &keys);
        let mut scope = Scope::enter(self.store.backend(), session, &ctx).await?;
        let result = self
            .upsert_in(scope.session(), &lookup, insert, values, &ctx)
            .await;
        scope.finish(result, &ctx).await
    }

    pub async fn upsert_as<T: OutputSchema>(
        &self,
        payload: Record,
        session: Option<&mut B::Session>,
    ) -> Result<T> {
        deserialize(self.upsert(payload, session).await?)
    }
}
