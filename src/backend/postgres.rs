//! PostgreSQL storage executor
//!
//! Statements are rendered by [`crate::sql::render`] and executed inside one
//! transaction per session.

use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{Backend, BackendResult, Session};
use crate::config::EngineConfig;
use crate::error::BackendError;
use crate::schema::{EntityDescriptor, IntrospectedTable};
use crate::sql::ddl::DdlGenerator;
use crate::sql::render::{
    Bind, Rendered, render_count, render_delete, render_insert, render_select, render_update,
};
use crate::statement::{Count, Delete, Insert, Select, Update};
use crate::types::{ColumnDefinition, ColumnType, Record};

/// PostgreSQL-backed [`Backend`]
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Connect using `config.database_url`
    pub async fn connect(config: &EngineConfig) -> BackendResult<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| BackendError::unsupported("no database_url configured"))?;
        let pool = PgPool::connect(url).await?;
        tracing::info!("connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Use an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the table described by `entity` if it does not exist
    pub async fn create_table(&self, entity: &EntityDescriptor) -> BackendResult<()> {
        let sql = DdlGenerator::generate_create_table(entity);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn drop_table(&self, table: &str) -> BackendResult<()> {
        let sql = DdlGenerator::generate_drop_table(table);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

/// Map an `information_schema` data type onto a column type
fn column_type_of(data_type: &str, precision: Option<i32>, scale: Option<i32>) -> Option<ColumnType> {
    match data_type {
        "smallint" | "integer" | "bigint" => Some(ColumnType::Integer),
        "numeric" => Some(match (precision, scale) {
            (Some(p), Some(s)) => ColumnType::decimal(
                u8::try_from(p).unwrap_or(u8::MAX),
                u8::try_from(s).unwrap_or(0),
            ),
            _ => ColumnType::decimal(19, 4),
        }),
        "real" | "double precision" => Some(ColumnType::decimal(19, 4)),
        "text" | "character varying" | "character" => Some(ColumnType::String),
        "boolean" => Some(ColumnType::Boolean),
        "timestamp with time zone" | "timestamp without time zone" | "date" => {
            Some(ColumnType::Timestamp)
        }
        "json" | "jsonb" => Some(ColumnType::Json),
        _ => None,
    }
}

impl Backend for PgBackend {
    type Session = PgSession;

    async fn begin(&self) -> BackendResult<PgSession> {
        let tx = self.pool.begin().await?;
        Ok(PgSession { tx })
    }

    async fn introspect(&self, table: &str) -> BackendResult<Option<IntrospectedTable>> {
        let rows = sqlx::query(
            "SELECT column_name::text, data_type::text, is_nullable::text, \
                    column_default::text, numeric_precision::int4, numeric_scale::int4 \
             FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0)?;
            let data_type: String = row.try_get(1)?;
            let Some(column_type) = column_type_of(&data_type, row.try_get(4)?, row.try_get(5)?)
            else {
                tracing::warn!(
                    table,
                    column = %name,
                    data_type = %data_type,
                    "skipping column of unsupported type"
                );
                continue;
            };
            let nullable: String = row.try_get(2)?;
            columns.push(ColumnDefinition {
                name,
                column_type,
                nullable: nullable == "YES",
                unique: false,
                default_value: row.try_get(3)?,
            });
        }

        let primary_key: Vec<String> = sqlx::query_scalar(
            "SELECT kcu.column_name::text \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
              AND tc.table_name = kcu.table_name \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = current_schema() AND tc.table_name = $1 \
             ORDER BY kcu.ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(table, columns = columns.len(), "introspected table");
        Ok(Some(IntrospectedTable {
            columns,
            primary_key,
        }))
    }
}

/// Session of a [`PgBackend`]: one open transaction
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession").finish_non_exhaustive()
    }
}

fn bind_all(sql: &str, binds: Vec<Bind>) -> Query<'_, Postgres, PgArguments> {
    binds.into_iter().fold(sqlx::query(sql), |query, bind| match bind {
        Bind::Text(v) => query.bind(v),
        Bind::Integer(v) => query.bind(v),
        Bind::Decimal(v) => query.bind(v),
        Bind::Boolean(v) => query.bind(v),
        Bind::Timestamp(v) => query.bind(v),
        Bind::Json(v) => query.bind(v),
        Bind::TextList(v) => query.bind(v),
        Bind::IntegerList(v) => query.bind(v),
        Bind::DecimalList(v) => query.bind(v),
        Bind::BooleanList(v) => query.bind(v),
        Bind::TimestampList(v) => query.bind(v),
    })
}

/// Read one labelled column of `row` as JSON
fn extract_value(row: &PgRow, label: &str, column_type: &ColumnType) -> BackendResult<Value> {
    Ok(match column_type {
        ColumnType::String | ColumnType::Enum { .. } => row
            .try_get::<Option<String>, _>(label)?
            .map(Value::String)
            .unwrap_or(Value::Null),
        ColumnType::Integer => row
            .try_get::<Option<i64>, _>(label)?
            .map(Value::from)
            .unwrap_or(Value::Null),
        ColumnType::Decimal { .. } => match row.try_get::<Option<rust_decimal::Decimal>, _>(label)? {
            Some(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| {
                    BackendError::decode(format!("Column '{}' holds non-finite decimal {}", label, d))
                })?,
            None => Value::Null,
        },
        ColumnType::Boolean => row
            .try_get::<Option<bool>, _>(label)?
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        ColumnType::Timestamp => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(label)?
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),
        ColumnType::Json => row
            .try_get::<Option<Value>, _>(label)?
            .unwrap_or(Value::Null),
    })
}

fn decode_row(row: &PgRow, outputs: &[(String, ColumnType)]) -> BackendResult<Record> {
    outputs
        .iter()
        .map(|(label, column_type)| Ok((label.clone(), extract_value(row, label, column_type)?)))
        .collect()
}

/// Constraint violations surface as [`BackendError::Constraint`]
fn classify(err: sqlx::Error) -> BackendError {
    match &err {
        sqlx::Error::Database(db)
            if db.is_unique_violation()
                || db.is_foreign_key_violation()
                || db.is_check_violation() =>
        {
            BackendError::constraint(db.message().to_string())
        }
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23502") => {
            BackendError::constraint(db.message().to_string())
        }
        _ => BackendError::Sql(err),
    }
}

impl PgSession {
    async fn rows(&mut self, rendered: Rendered) -> BackendResult<Vec<Record>> {
        tracing::trace!(sql = %rendered.sql, binds = rendered.binds.len(), "executing");
        let Rendered {
            sql,
            binds,
            outputs,
        } = rendered;
        let rows = bind_all(&sql, binds)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(classify)?;
        rows.iter().map(|row| decode_row(row, &outputs)).collect()
    }

    async fn execute(&mut self, rendered: Rendered) -> BackendResult<u64> {
        tracing::trace!(sql = %rendered.sql, binds = rendered.binds.len(), "executing");
        let result = bind_all(&rendered.sql, rendered.binds)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }
}

impl Session for PgSession {
    async fn fetch_all(&mut self, select: &Select) -> BackendResult<Vec<Record>> {
        let rendered = render_select(select)?;
        self.rows(rendered).await
    }

    async fn count(&mut self, count: &Count) -> BackendResult<u64> {
        let rendered = render_count(count)?;
        tracing::trace!(sql = %rendered.sql, binds = rendered.binds.len(), "executing");
        let row = bind_all(&rendered.sql, rendered.binds)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(classify)?;
        let total: i64 = row.try_get(0)?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn insert(&mut self, insert: &Insert) -> BackendResult<Record> {
        let rendered = render_insert(insert)?;
        self.rows(rendered)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::decode("INSERT returned no row"))
    }

    async fn update(&mut self, update: &Update) -> BackendResult<(u64, Vec<Record>)> {
        let rendered = render_update(update)?;
        if update.returning.is_empty() {
            let affected = self.execute(rendered).await?;
            return Ok((affected, Vec::new()));
        }
        let rows = self.rows(rendered).await?;
        Ok((rows.len() as u64, rows))
    }

    async fn delete(&mut self, delete: &Delete) -> BackendResult<u64> {
        let rendered = render_delete(delete)?;
        self.execute(rendered).await
    }

    async fn commit(self) -> BackendResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> BackendResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
