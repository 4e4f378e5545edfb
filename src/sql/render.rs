//! PostgreSQL rendering of compiled statements
//!
//! Each statement becomes SQL text with `$n` placeholders, the typed values to
//! bind to them, and the label/type pairs of the columns it returns.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::BackendError;
use crate::schema::EntityDescriptor;
use crate::sql::sanitize::{quote_identifier, quote_qualified};
use crate::statement::{
    ColumnRef, Count, Delete, Insert, JoinClause, JoinKind, OrderBy, Predicate, Select, Update,
};
use crate::types::ColumnType;

type RenderResult<T> = std::result::Result<T, BackendError>;

/// A value converted to the Rust type its column binds as
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Text(Option<String>),
    Integer(Option<i64>),
    Decimal(Option<Decimal>),
    Boolean(Option<bool>),
    Timestamp(Option<DateTime<Utc>>),
    Json(Value),
    TextList(Vec<String>),
    IntegerList(Vec<i64>),
    DecimalList(Vec<Decimal>),
    BooleanList(Vec<bool>),
    TimestampList(Vec<DateTime<Utc>>),
}

/// SQL text plus everything needed to execute it and decode its rows
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub sql: String,
    pub binds: Vec<Bind>,
    /// Label and type of each returned column, in order
    pub outputs: Vec<(String, ColumnType)>,
}

/// Placeholder accumulator
#[derive(Debug, Default)]
struct Params {
    binds: Vec<Bind>,
}

impl Params {
    fn push(&mut self, bind: Bind) -> String {
        self.binds.push(bind);
        format!("${}", self.binds.len())
    }

    fn typed(&mut self, value: &Value, column: &str, column_type: &ColumnType) -> RenderResult<String> {
        let bind = scalar_bind(value, column, column_type)?;
        Ok(self.push(bind))
    }
}

fn mismatch(column: &str, expected: &str, value: &Value) -> BackendError {
    BackendError::decode(format!(
        "Column '{}' expected {}, got {}",
        column, expected, value
    ))
}

fn parse_decimal(value: &Value, column: &str) -> RenderResult<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(mismatch(column, "decimal", other)),
    };
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| mismatch(column, "decimal", value))
}

fn parse_timestamp(value: &Value, column: &str) -> RenderResult<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| mismatch(column, "RFC 3339 timestamp", value))
}

fn parse_integer(value: &Value, column: &str) -> RenderResult<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse::<i64>().ok()))
        .ok_or_else(|| mismatch(column, "integer", value))
}

fn parse_bool(value: &Value, column: &str) -> RenderResult<bool> {
    value
        .as_bool()
        .or_else(|| {
            value.as_str().and_then(|s| match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Some(true),
                "false" | "f" | "0" => Some(false),
                _ => None,
            })
        })
        .ok_or_else(|| mismatch(column, "boolean", value))
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert one value for binding against a column of `column_type`
pub fn scalar_bind(value: &Value, column: &str, column_type: &ColumnType) -> RenderResult<Bind> {
    let null = value.is_null();
    Ok(match column_type {
        ColumnType::Json => Bind::Json(value.clone()),
        ColumnType::String | ColumnType::Enum { .. } => {
            Bind::Text((!null).then(|| text_of(value)))
        }
        ColumnType::Integer if null => Bind::Integer(None),
        ColumnType::Integer => Bind::Integer(Some(parse_integer(value, column)?)),
        ColumnType::Decimal { .. } if null => Bind::Decimal(None),
        ColumnType::Decimal { .. } => Bind::Decimal(Some(parse_decimal(value, column)?)),
        ColumnType::Boolean if null => Bind::Boolean(None),
        ColumnType::Boolean => Bind::Boolean(Some(parse_bool(value, column)?)),
        ColumnType::Timestamp if null => Bind::Timestamp(None),
        ColumnType::Timestamp => Bind::Timestamp(Some(parse_timestamp(value, column)?)),
    })
}

/// Convert an IN list into one array bind; nulls never match and are dropped
fn list_bind(values: &[Value], column: &str, column_type: &ColumnType) -> RenderResult<Bind> {
    let present = values.iter().filter(|v| !v.is_null());
    Ok(match column_type {
        ColumnType::Json => Bind::Json(Value::Array(present.cloned().collect())),
        ColumnType::String | ColumnType::Enum { .. } => {
            Bind::TextList(present.map(text_of).collect())
        }
        ColumnType::Integer => Bind::IntegerList(
            present
                .map(|v| parse_integer(v, column))
                .collect::<RenderResult<_>>()?,
        ),
        ColumnType::Decimal { .. } => Bind::DecimalList(
            present
                .map(|v| parse_decimal(v, column))
                .collect::<RenderResult<_>>()?,
        ),
        ColumnType::Boolean => Bind::BooleanList(
            present
                .map(|v| parse_bool(v, column))
                .collect::<RenderResult<_>>()?,
        ),
        ColumnType::Timestamp => Bind::TimestampList(
            present
                .map(|v| parse_timestamp(v, column))
                .collect::<RenderResult<_>>()?,
        ),
    })
}

/// Select expression reading `expr` as the type rows are decoded with
fn cast(expr: &str, column_type: &ColumnType) -> String {
    match column_type {
        ColumnType::String | ColumnType::Enum { .. } => format!("{}::text", expr),
        ColumnType::Integer => format!("{}::bigint", expr),
        ColumnType::Decimal { .. } => format!("{}::numeric", expr),
        ColumnType::Boolean => expr.to_string(),
        ColumnType::Timestamp => format!("{}::timestamptz", expr),
        ColumnType::Json => format!("{}::jsonb", expr),
    }
}

fn column_sql(column: &ColumnRef) -> String {
    quote_qualified(&column.source, &column.column)
}

fn render_predicate(predicate: &Predicate, params: &mut Params) -> RenderResult<String> {
    Ok(match predicate {
        Predicate::Compare { column, cmp, value } => {
            let placeholder = params.typed(value, &column.column, &column.column_type)?;
            format!("{} {} {}", column_sql(column), cmp.sql(), placeholder)
        }
        Predicate::IsNull { column, negated } => format!(
            "{} IS {}NULL",
            column_sql(column),
            if *negated { "NOT " } else { "" }
        ),
        Predicate::IsBool {
            column,
            value,
            negated,
        } => format!(
            "{} IS {}{}",
            column_sql(column),
            if *negated { "NOT " } else { "" },
            if *value { "TRUE" } else { "FALSE" }
        ),
        Predicate::Like {
            column,
            pattern,
            case_insensitive,
            negated,
        } => {
            let placeholder = params.push(Bind::Text(Some(pattern.clone())));
            format!(
                "{}::text {}{} {}",
                column_sql(column),
                if *negated { "NOT " } else { "" },
                if *case_insensitive { "ILIKE" } else { "LIKE" },
                placeholder
            )
        }
        Predicate::TextMatch { column, query } => {
            let placeholder = params.push(Bind::Text(Some(query.clone())));
            format!(
                "to_tsvector('simple', {}::text) @@ plainto_tsquery('simple', {})",
                column_sql(column),
                placeholder
            )
        }
        Predicate::Between { column, low, high } => {
            let low = params.typed(low, &column.column, &column.column_type)?;
            let high = params.typed(high, &column.column, &column.column_type)?;
            format!("{} BETWEEN {} AND {}", column_sql(column), low, high)
        }
        Predicate::In {
            column,
            values,
            negated,
        } => {
            let placeholder = params.push(list_bind(values, &column.column, &column.column_type)?);
            let membership = match column.column_type {
                ColumnType::Json => format!(
                    "{} IN (SELECT jsonb_array_elements({}::jsonb))",
                    column_sql(column),
                    placeholder
                ),
                _ => format!("{} = ANY({})", column_sql(column), placeholder),
            };
            if *negated {
                format!("NOT ({})", membership)
            } else {
                membership
            }
        }
        Predicate::Any(branches) if branches.is_empty() => "FALSE".to_string(),
        Predicate::Any(branches) => {
            let parts = branches
                .iter()
                .map(|b| render_predicate(b, params).map(|sql| format!("({})", sql)))
                .collect::<RenderResult<Vec<_>>>()?;
            format!("({})", parts.join(" OR "))
        }
    })
}

fn where_clause(filter: &[Predicate], params: &mut Params) -> RenderResult<String> {
    if filter.is_empty() {
        return Ok(String::new());
    }
    let parts = filter
        .iter()
        .map(|p| render_predicate(p, params))
        .collect::<RenderResult<Vec<_>>>()?;
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

fn from_clause(from: &EntityDescriptor, joins: &[JoinClause]) -> String {
    let mut sql = format!(" FROM {}", quote_identifier(from.table()));
    for join in joins {
        let kind = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        let target = if join.is_aliased() {
            format!(
                "{} AS {}",
                quote_identifier(join.entity.table()),
                quote_identifier(&join.alias)
            )
        } else {
            quote_identifier(join.entity.table())
        };
        let on: Vec<String> = join
            .on
            .iter()
            .map(|c| format!("{} = {}", column_sql(&c.left), column_sql(&c.right)))
            .collect();
        sql.push_str(&format!(" {} {} ON {}", kind, target, on.join(" AND ")));
    }
    sql
}

fn order_clause(order: &[OrderBy]) -> String {
    if order.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = order
        .iter()
        .map(|o| {
            format!(
                "{} {}",
                column_sql(&o.column),
                if o.descending { "DESC" } else { "ASC" }
            )
        })
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

/// Every column of `entity`, cast and labelled by name
fn all_columns(entity: &EntityDescriptor) -> (String, Vec<(String, ColumnType)>) {
    let exprs: Vec<String> = entity
        .columns()
        .iter()
        .map(|c| {
            format!(
                "{} AS {}",
                cast(&quote_identifier(&c.name), &c.column_type),
                quote_identifier(&c.name)
            )
        })
        .collect();
    let outputs = entity
        .columns()
        .iter()
        .map(|c| (c.name.clone(), c.column_type.clone()))
        .collect();
    (exprs.join(", "), outputs)
}

pub fn render_select(select: &Select) -> RenderResult<Rendered> {
    let mut params = Params::default();

    let exprs: Vec<String> = select
        .columns
        .iter()
        .map(|c| {
            format!(
                "{} AS {}",
                cast(&column_sql(&c.column), &c.column.column_type),
                quote_identifier(&c.label)
            )
        })
        .collect();
    let outputs = select
        .columns
        .iter()
        .map(|c| (c.label.clone(), c.column.column_type.clone()))
        .collect();

    let mut sql = format!("SELECT {}", exprs.join(", "));
    sql.push_str(&from_clause(&select.from, &select.joins));
    sql.push_str(&where_clause(&select.filter, &mut params)?);
    sql.push_str(&order_clause(&select.order));

    if let Some(limit) = select.limit {
        let placeholder = params.push(Bind::Integer(Some(limit)));
        sql.push_str(&format!(" LIMIT {}", placeholder));
    }
    if select.offset > 0 {
        let placeholder = params.push(Bind::Integer(Some(select.offset)));
        sql.push_str(&format!(" OFFSET {}", placeholder));
    }

    Ok(Rendered {
        sql,
        binds: params.binds,
        outputs,
    })
}

pub fn render_count(count: &Count) -> RenderResult<Rendered> {
    let mut params = Params::default();
    let target = match count.distinct.as_slice() {
        [] => "*".to_string(),
        [column] => format!("DISTINCT {}", column_sql(column)),
        columns => format!(
            "DISTINCT ({})",
            columns.iter().map(column_sql).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut sql = format!("SELECT COUNT({})", target);
    sql.push_str(&from_clause(&count.from, &count.joins));
    sql.push_str(&where_clause(&count.filter, &mut params)?);

    Ok(Rendered {
        sql,
        binds: params.binds,
        outputs: Vec::new(),
    })
}

pub fn render_insert(insert: &Insert) -> RenderResult<Rendered> {
    let entity = &insert.into;
    let mut params = Params::default();
    let mut names = Vec::with_capacity(insert.values.len());
    let mut placeholders = Vec::with_capacity(insert.values.len());

    for (name, value) in &insert.values {
        let column = entity
            .column(name)
            .ok_or_else(|| BackendError::unsupported(format!("unknown column '{}'", name)))?;
        names.push(quote_identifier(name));
        placeholders.push(params.typed(value, name, &column.column_type)?);
    }

    let (returning, outputs) = all_columns(entity);
    let sql = if names.is_empty() {
        format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            quote_identifier(entity.table()),
            returning
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            quote_identifier(entity.table()),
            names.join(", "),
            placeholders.join(", "),
            returning
        )
    };

    Ok(Rendered {
        sql,
        binds: params.binds,
        outputs,
    })
}

pub fn render_update(update: &Update) -> RenderResult<Rendered> {
    let entity = &update.table;
    let mut params = Params::default();

    let mut assignments = Vec::with_capacity(update.assignments.len());
    for (name, value) in &update.assignments {
        let column = entity
            .column(name)
            .ok_or_else(|| BackendError::unsupported(format!("unknown column '{}'", name)))?;
        let placeholder = params.typed(value, name, &column.column_type)?;
        assignments.push(format!("{} = {}", quote_identifier(name), placeholder));
    }
    if assignments.is_empty() {
        return Err(BackendError::unsupported("update without assignments"));
    }

    let mut sql = format!(
        "UPDATE {} SET {}",
        quote_identifier(entity.table()),
        assignments.join(", ")
    );
    sql.push_str(&where_clause(&update.filter, &mut params)?);

    let mut outputs = Vec::with_capacity(update.returning.len());
    let mut returning = Vec::with_capacity(update.returning.len());
    for name in &update.returning {
        let column = entity
            .column(name)
            .ok_or_else(|| BackendError::unsupported(format!("unknown column '{}'", name)))?;
        returning.push(format!(
            "{} AS {}",
            cast(&quote_identifier(name), &column.column_type),
            quote_identifier(name)
        ));
        outputs.push((name.clone(), column.column_type.clone()));
    }
    if !returning.is_empty() {
        sql.push_str(&format!(" RETURNING {}", returning.join(", ")));
    }

    Ok(Rendered {
        sql,
        binds: params.binds,
        outputs,
    })
}

pub fn render_delete(delete: &Delete) -> RenderResult<Rendered> {
    let mut params = Params::default();
    let mut sql = format!("DELETE FROM {}", quote_identifier(delete.from.table()));
    sql.push_str(&where_clause(&delete.filter, &mut params)?);

    Ok(Rendered {
        sql,
        binds: params.binds,
        outputs: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filters;
    use crate::join::{JoinConfig, JoinSpec, compile_joined};
    use crate::query::{QuerySpec, Sort};
    use crate::schema::tests::{projects, users};
    use crate::statement::Comparison;
    use serde_json::json;
    use std::sync::Arc;

    fn int_col(name: &str) -> ColumnRef {
        ColumnRef::new("users", name, ColumnType::Integer)
    }

    #[test]
    fn test_render_simple_select() {
        let users = Arc::new(users());
        let select = QuerySpec::new()
            .filters(Filters::new().eq("name", "Ada"))
            .sort(Sort::by(["id"]))
            .limit(Some(10))
            .offset(20)
            .compile(&users)
            .unwrap();

        let rendered = render_select(&select).unwrap();
        assert_eq!(
            rendered.sql,
            "SELECT \"users\".\"id\"::bigint AS \"id\", \
             \"users\".\"name\"::text AS \"name\", \
             \"users\".\"email\"::text AS \"email\" \
             FROM \"users\" WHERE \"users\".\"name\" = $1 \
             ORDER BY \"users\".\"id\" ASC LIMIT $2 OFFSET $3"
        );
        assert_eq!(
            rendered.binds,
            vec![
                Bind::Text(Some("Ada".to_string())),
                Bind::Integer(Some(10)),
                Bind::Integer(Some(20)),
            ]
        );
        assert_eq!(rendered.outputs.len(), 3);
        assert_eq!(rendered.outputs[0], ("id".to_string(), ColumnType::Integer));
    }

    #[test]
    fn test_render_predicates() {
        let mut params = Params::default();
        let name = ColumnRef::new("users", "name", ColumnType::String);

        let like = Predicate::Like {
            column: name.clone(),
            pattern: "a%".to_string(),
            case_insensitive: true,
            negated: true,
        };
        assert_eq!(
            render_predicate(&like, &mut params).unwrap(),
            "\"users\".\"name\"::text NOT ILIKE $1"
        );

        let between = Predicate::Between {
            column: int_col("id"),
            low: json!(1),
            high: json!("5"),
        };
        assert_eq!(
            render_predicate(&between, &mut params).unwrap(),
            "\"users\".\"id\" BETWEEN $2 AND $3"
        );
        assert_eq!(params.binds[2], Bind::Integer(Some(5)));

        let is_false = Predicate::IsBool {
            column: ColumnRef::new("users", "active", ColumnType::Boolean),
            value: false,
            negated: true,
        };
        assert_eq!(
            render_predicate(&is_false, &mut params).unwrap(),
            "\"users\".\"active\" IS NOT FALSE"
        );

        let text = Predicate::TextMatch {
            column: name,
            query: "quick fox".to_string(),
        };
        assert_eq!(
            render_predicate(&text, &mut params).unwrap(),
            "to_tsvector('simple', \"users\".\"name\"::text) @@ plainto_tsquery('simple', $4)"
        );
    }

    #[test]
    fn test_render_in_drops_nulls() {
        let mut params = Params::default();
        let not_in = Predicate::In {
            column: int_col("id"),
            values: vec![json!(1), json!(null), json!(3)],
            negated: true,
        };
        assert_eq!(
            render_predicate(&not_in, &mut params).unwrap(),
            "NOT (\"users\".\"id\" = ANY($1))"
        );
        assert_eq!(params.binds, vec![Bind::IntegerList(vec![1, 3])]);
    }

    #[test]
    fn test_render_or_group() {
        let mut params = Params::default();
        let any = Predicate::Any(vec![
            Predicate::Compare {
                column: int_col("id"),
                cmp: Comparison::Lt,
                value: json!(2),
            },
            Predicate::IsNull {
                column: int_col("id"),
                negated: false,
            },
        ]);
        assert_eq!(
            render_predicate(&any, &mut params).unwrap(),
            "((\"users\".\"id\" < $1) OR (\"users\".\"id\" IS NULL))"
        );
        assert_eq!(
            render_predicate(&Predicate::Any(Vec::new()), &mut params).unwrap(),
            "FALSE"
        );
    }

    #[test]
    fn test_render_mismatched_value_is_error() {
        let mut params = Params::default();
        let compare = Predicate::Compare {
            column: int_col("id"),
            cmp: Comparison::Eq,
            value: json!("abc"),
        };
        assert!(matches!(
            render_predicate(&compare, &mut params),
            Err(BackendError::Decode(_))
        ));
    }

    #[test]
    fn test_render_joined_select_and_count() {
        let projects = Arc::new(projects());
        let spec = JoinSpec::new().join(
            JoinConfig::new(Arc::new(users()))
                .on("created_by", "id")
                .prefix("creator_")
                .alias("creator"),
        );
        let joined = compile_joined(&QuerySpec::new(), &projects, &spec, "joined__").unwrap();

        let rendered = render_select(&joined.select).unwrap();
        assert!(rendered.sql.contains(
            "FROM \"projects\" LEFT JOIN \"users\" AS \"creator\" \
             ON \"projects\".\"created_by\" = \"creator\".\"id\""
        ));
        assert!(rendered.sql.contains("\"creator\".\"name\"::text AS \"creator_name\""));

        let count = render_count(&joined.count()).unwrap();
        assert!(count.sql.starts_with("SELECT COUNT(DISTINCT \"projects\".\"id\") FROM \"projects\""));
    }

    #[test]
    fn test_render_insert() {
        let users = Arc::new(users());
        let insert = Insert {
            into: users.clone(),
            values: json!({"name": "Ada", "email": null}).as_object().unwrap().clone(),
        };
        let rendered = render_insert(&insert).unwrap();
        assert!(rendered.sql.starts_with(
            "INSERT INTO \"users\" (\"name\", \"email\") VALUES ($1, $2) RETURNING \"id\"::bigint AS \"id\""
        ));
        assert_eq!(rendered.binds[1], Bind::Text(None));

        let empty = Insert {
            into: users,
            values: Default::default(),
        };
        assert!(render_insert(&empty).unwrap().sql.contains("DEFAULT VALUES"));
    }

    #[test]
    fn test_render_update_and_delete() {
        let users = Arc::new(users());
        let update = Update {
            table: users.clone(),
            assignments: json!({"name": "Grace"}).as_object().unwrap().clone(),
            filter: vec![Predicate::eq(int_col("id"), json!(7))],
            returning: vec!["id".to_string()],
        };
        let rendered = render_update(&update).unwrap();
        assert_eq!(
            rendered.sql,
            "UPDATE \"users\" SET \"name\" = $1 WHERE \"users\".\"id\" = $2 \
             RETURNING \"id\"::bigint AS \"id\""
        );

        let delete = Delete {
            from: users,
            filter: Vec::new(),
        };
        assert_eq!(render_delete(&delete).unwrap().sql, "DELETE FROM \"users\"");
    }

    #[test]
    fn test_scalar_bind_conversions() {
        let ts = scalar_bind(&json!("2024-01-15T10:30:00+02:00"), "at", &ColumnType::Timestamp).unwrap();
        match ts {
            Bind::Timestamp(Some(dt)) => assert_eq!(dt.to_rfc3339(), "2024-01-15T08:30:00+00:00"),
            other => panic!("unexpected bind {other:?}"),
        }
        assert_eq!(
            scalar_bind(&json!(12.5), "price", &ColumnType::decimal(10, 2)).unwrap(),
            Bind::Decimal(Some(Decimal::new(125, 1)))
        );
        assert_eq!(
            scalar_bind(&json!(3), "code", &ColumnType::String).unwrap(),
            Bind::Text(Some("3".to_string()))
        );
    }
}
