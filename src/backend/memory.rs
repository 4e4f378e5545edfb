//! In-memory storage executor
//!
//! Tables are vectors of JSON records behind one async mutex. A session holds
//! the mutex for its whole life and works on a copy of every table; commit
//! writes the copy back, drop discards it. Sessions are therefore serialised,
//! which is enough for tests and embedded use.
//!
//! Predicates follow SQL three-valued logic: a comparison with NULL is
//! unknown, and unknown rows are filtered out.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};

use regex::RegexBuilder;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Backend, BackendResult, Session};
use crate::error::BackendError;
use crate::schema::{EntityDescriptor, IntrospectedTable};
use crate::statement::{
    ColumnRef, Comparison, Count, Delete, Insert, JoinClause, JoinKind, Predicate, Select, Update,
};
use crate::types::{ColumnType, Record};

static NULL: Value = Value::Null;

#[derive(Debug, Clone)]
struct Table {
    shape: IntrospectedTable,
    rows: Vec<Record>,
}

type Tables = HashMap<String, Table>;

#[derive(Debug, Default)]
struct Counters {
    statements: AtomicU64,
    sessions: AtomicU64,
    /// Statements left before the injected failure fires
    fail_after: StdMutex<Option<u64>>,
}

impl Counters {
    fn tick(&self, what: &str) -> BackendResult<()> {
        self.statements.fetch_add(1, AtomicOrdering::SeqCst);
        let mut fail_after = self
            .fail_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *fail_after {
            Some(0) => {
                *fail_after = None;
                Err(BackendError::Injected(format!("{} failed", what)))
            }
            Some(n) => {
                *fail_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-memory [`Backend`]; clones share the same tables.
///
/// A session holds the table lock from `begin` until it is committed, rolled
/// back or dropped, so sessions run one at a time. While a caller session is
/// open, pass it to every operation: an operation given `None` would wait
/// for the lock forever.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
    shapes: Arc<RwLock<HashMap<String, IntrospectedTable>>>,
    counters: Arc<Counters>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table shaped like `entity`; an existing table is kept
    pub async fn create_table(&self, entity: &EntityDescriptor) {
        let shape = IntrospectedTable {
            columns: entity.columns().to_vec(),
            primary_key: entity.primary_key().to_vec(),
        };
        self.shapes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entity.table().to_string())
            .or_insert_with(|| shape.clone());
        self.tables
            .lock()
            .await
            .entry(entity.table().to_string())
            .or_insert_with(|| Table {
                shape,
                rows: Vec::new(),
            });
    }

    /// Committed rows of `table`
    pub async fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .lock()
            .await
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Fail the statement that follows the next `n` statements, once
    pub fn fail_after(&self, n: u64) {
        *self
            .counters
            .fail_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(n);
    }

    /// Statements executed so far, across all sessions
    pub fn statements(&self) -> u64 {
        self.counters.statements.load(AtomicOrdering::SeqCst)
    }

    /// Sessions opened so far
    pub fn sessions(&self) -> u64 {
        self.counters.sessions.load(AtomicOrdering::SeqCst)
    }
}

impl Backend for MemoryBackend {
    type Session = MemorySession;

    async fn begin(&self) -> BackendResult<MemorySession> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        self.counters.sessions.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(MemorySession {
            guard,
            working,
            counters: Arc::clone(&self.counters),
        })
    }

    async fn introspect(&self, table: &str) -> BackendResult<Option<IntrospectedTable>> {
        Ok(self
            .shapes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned())
    }
}

/// Session of a [`MemoryBackend`]
#[derive(Debug)]
pub struct MemorySession {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    counters: Arc<Counters>,
}

impl MemorySession {
    fn table(&self, name: &str) -> BackendResult<&Table> {
        self.working
            .get(name)
            .ok_or_else(|| BackendError::unsupported(format!("relation \"{}\" does not exist", name)))
    }

    fn table_mut(&mut self, name: &str) -> BackendResult<&mut Table> {
        self.working
            .get_mut(name)
            .ok_or_else(|| BackendError::unsupported(format!("relation \"{}\" does not exist", name)))
    }

    /// Every combination of source rows that survives the joins and filter
    fn tuples<'a>(
        &'a self,
        from: &'a EntityDescriptor,
        joins: &'a [JoinClause],
        filter: &[Predicate],
    ) -> BackendResult<Vec<Tuple<'a>>> {
        let base = self.table(from.table())?;
        let mut tuples: Vec<Tuple<'a>> = base
            .rows
            .iter()
            .map(|row| vec![(from.table(), Some(row))])
            .collect();

        for join in joins {
            let joined = self.table(join.entity.table())?;
            let mut next = Vec::with_capacity(tuples.len());
            for tuple in tuples {
                let matches: Vec<&Record> = joined
                    .rows
                    .iter()
                    .filter(|row| {
                        join.on.iter().all(|cond| {
                            let left = lookup(&tuple, &cond.left);
                            let right = row.get(&cond.right.column).unwrap_or(&NULL);
                            compare(left, right, &cond.left.column_type) == Some(Ordering::Equal)
                        })
                    })
                    .collect();

                if matches.is_empty() {
                    if join.kind == JoinKind::Left {
                        let mut extended = tuple.clone();
                        extended.push((join.alias.as_str(), None));
                        next.push(extended);
                    }
                    continue;
                }
                for row in matches {
                    let mut extended = tuple.clone();
                    extended.push((join.alias.as_str(), Some(row)));
                    next.push(extended);
                }
            }
            tuples = next;
        }

        let mut kept = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            if all_true(filter, &tuple)? {
                kept.push(tuple);
            }
        }
        Ok(kept)
    }

    fn matching_rows(&self, table: &EntityDescriptor, filter: &[Predicate]) -> BackendResult<Vec<usize>> {
        let rows = &self.table(table.table())?.rows;
        let mut indices = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let tuple: Tuple<'_> = vec![(table.table(), Some(row))];
            if all_true(filter, &tuple)? {
                indices.push(i);
            }
        }
        Ok(indices)
    }
}

type Tuple<'a> = Vec<(&'a str, Option<&'a Record>)>;

fn lookup<'a>(tuple: &Tuple<'a>, column: &ColumnRef) -> &'a Value {
    tuple
        .iter()
        .find(|(source, _)| *source == column.source)
        .and_then(|(_, row)| *row)
        .and_then(|row| row.get(&column.column))
        .unwrap_or(&NULL)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// SQL comparison of two values of a column; None when either side is NULL
/// or the values are not comparable.
fn compare(a: &Value, b: &Value, column_type: &ColumnType) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match column_type {
        ColumnType::Integer | ColumnType::Decimal { .. } => as_f64(a)?.partial_cmp(&as_f64(b)?),
        ColumnType::Timestamp => {
            let a = chrono::DateTime::parse_from_rfc3339(a.as_str()?).ok()?;
            let b = chrono::DateTime::parse_from_rfc3339(b.as_str()?).ok()?;
            Some(a.cmp(&b))
        }
        ColumnType::Boolean => a.as_bool()?.partial_cmp(&b.as_bool()?),
        ColumnType::Json => (a == b).then_some(Ordering::Equal),
        ColumnType::String | ColumnType::Enum { .. } => match (a, b) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Number(_), _) | (_, Value::Number(_)) => as_f64(a)?.partial_cmp(&as_f64(b)?),
            _ => None,
        },
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn like_regex(pattern: &str, case_insensitive: bool) -> BackendResult<regex::Regex> {
    let mut translated = String::with_capacity(pattern.len() + 2);
    translated.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => translated.push_str(".*"),
            '_' => translated.push('.'),
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    translated.push('$');
    RegexBuilder::new(&translated)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| BackendError::unsupported(format!("bad LIKE pattern '{}': {}", pattern, e)))
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn all_true(filter: &[Predicate], tuple: &Tuple<'_>) -> BackendResult<bool> {
    for predicate in filter {
        if eval(predicate, tuple)? != Some(true) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval(predicate: &Predicate, tuple: &Tuple<'_>) -> BackendResult<Option<bool>> {
    Ok(match predicate {
        Predicate::Compare { column, cmp, value } => {
            compare(lookup(tuple, column), value, &column.column_type).map(|ord| match cmp {
                Comparison::Eq => ord == Ordering::Equal,
                Comparison::Ne => ord != Ordering::Equal,
                Comparison::Gt => ord == Ordering::Greater,
                Comparison::Lt => ord == Ordering::Less,
                Comparison::Gte => ord != Ordering::Less,
                Comparison::Lte => ord != Ordering::Greater,
            })
        }
        Predicate::IsNull { column, negated } => Some(lookup(tuple, column).is_null() != *negated),
        Predicate::IsBool {
            column,
            value,
            negated,
        } => Some((lookup(tuple, column).as_bool() == Some(*value)) != *negated),
        Predicate::Like {
            column,
            pattern,
            case_insensitive,
            negated,
        } => match text_of(lookup(tuple, column)) {
            Some(text) => Some(like_regex(pattern, *case_insensitive)?.is_match(&text) != *negated),
            None => None,
        },
        Predicate::TextMatch { column, query } => text_of(lookup(tuple, column)).map(|text| {
            let have = words(&text);
            words(query).iter().all(|w| have.contains(w))
        }),
        Predicate::Between { column, low, high } => {
            let value = lookup(tuple, column);
            let ty = &column.column_type;
            match (compare(value, low, ty), compare(value, high, ty)) {
                (Some(lo), Some(hi)) => Some(lo != Ordering::Less && hi != Ordering::Greater),
                _ => None,
            }
        }
        Predicate::In {
            column,
            values,
            negated,
        } => {
            let value = lookup(tuple, column);
            if value.is_null() {
                None
            } else {
                let found = values
                    .iter()
                    .any(|v| compare(value, v, &column.column_type) == Some(Ordering::Equal));
                Some(found != *negated)
            }
        }
        Predicate::Any(branches) => {
            let mut unknown = false;
            for branch in branches {
                match eval(branch, tuple)? {
                    Some(true) => return Ok(Some(true)),
                    Some(false) => {}
                    None => unknown = true,
                }
            }
            if unknown { None } else { Some(false) }
        }
    })
}

/// NULLs sort last ascending and first descending, as PostgreSQL does
fn order_tuples(tuples: &mut [Tuple<'_>], select: &Select) {
    tuples.sort_by(|a, b| {
        for key in &select.order {
            let (x, y) = (lookup(a, &key.column), lookup(b, &key.column));
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare(x, y, &key.column.column_type).unwrap_or(Ordering::Equal),
            };
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Store numeric strings of numeric columns as numbers
fn normalize(value: Value, column_type: &ColumnType) -> Value {
    match (column_type, &value) {
        (ColumnType::Integer, Value::String(s)) => s.parse::<i64>().map(Value::from).unwrap_or(value),
        (ColumnType::Decimal { .. }, Value::String(s)) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(value),
        _ => value,
    }
}

fn check_constraints(table_name: &str, table: &Table, row: &Record, skip: Option<usize>) -> BackendResult<()> {
    for col in &table.shape.columns {
        let value = row.get(&col.name).unwrap_or(&NULL);
        if value.is_null() && (!col.nullable || table.shape.primary_key.contains(&col.name)) {
            return Err(BackendError::constraint(format!(
                "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                col.name, table_name
            )));
        }
    }

    let others = table
        .rows
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != skip)
        .map(|(_, r)| r);
    for other in others {
        let same_key = table
            .shape
            .primary_key
            .iter()
            .all(|pk| other.get(pk) == row.get(pk));
        if same_key {
            return Err(BackendError::constraint(format!(
                "duplicate key value violates primary key of \"{}\"",
                table_name
            )));
        }
        for col in table.shape.columns.iter().filter(|c| c.unique) {
            let value = row.get(&col.name).unwrap_or(&NULL);
            if !value.is_null() && other.get(&col.name) == Some(value) {
                return Err(BackendError::constraint(format!(
                    "duplicate key value violates unique constraint on \"{}\".\"{}\"",
                    table_name, col.name
                )));
            }
        }
    }
    Ok(())
}

/// Fill a missing single-column key: max + 1 for integers, a UUID for text
fn generate_key(table: &Table, row: &mut Record) {
    let [pk] = table.shape.primary_key.as_slice() else {
        return;
    };
    if !row.get(pk).is_none_or(Value::is_null) {
        return;
    }
    let Some(col) = table.shape.columns.iter().find(|c| &c.name == pk) else {
        return;
    };
    let generated = match col.column_type {
        ColumnType::Integer => {
            let max = table
                .rows
                .iter()
                .filter_map(|r| r.get(pk).and_then(Value::as_i64))
                .max()
                .unwrap_or(0);
            Value::from(max + 1)
        }
        ColumnType::String => Value::String(uuid::Uuid::new_v4().to_string()),
        _ => return,
    };
    row.insert(pk.clone(), generated);
}

impl Session for MemorySession {
    async fn fetch_all(&mut self, select: &Select) -> BackendResult<Vec<Record>> {
        self.counters.tick("select")?;
        let mut tuples = self.tuples(&select.from, &select.joins, &select.filter)?;
        order_tuples(&mut tuples, select);

        let offset = usize::try_from(select.offset).unwrap_or(0);
        let limit = select
            .limit
            .map(|l| usize::try_from(l).unwrap_or(0))
            .unwrap_or(usize::MAX);

        Ok(tuples
            .iter()
            .skip(offset)
            .take(limit)
            .map(|tuple| {
                select
                    .columns
                    .iter()
                    .map(|c| (c.label.clone(), lookup(tuple, &c.column).clone()))
                    .collect()
            })
            .collect())
    }

    async fn count(&mut self, count: &Count) -> BackendResult<u64> {
        self.counters.tick("count")?;
        let tuples = self.tuples(&count.from, &count.joins, &count.filter)?;
        if count.distinct.is_empty() {
            return Ok(tuples.len() as u64);
        }
        let distinct: HashSet<String> = tuples
            .iter()
            .map(|t| {
                count
                    .distinct
                    .iter()
                    .map(|c| lookup(t, c).clone())
                    .collect::<Vec<_>>()
            })
            .filter(|key| !key.iter().all(Value::is_null))
            .map(|key| Value::Array(key).to_string())
            .collect();
        Ok(distinct.len() as u64)
    }

    async fn insert(&mut self, insert: &Insert) -> BackendResult<Record> {
        self.counters.tick("insert")?;
        let name = insert.into.table().to_string();
        let table = self.table_mut(&name)?;

        let mut row = Record::new();
        for col in &table.shape.columns {
            let value = insert.values.get(&col.name).cloned().unwrap_or(Value::Null);
            row.insert(col.name.clone(), normalize(value, &col.column_type));
        }
        if let Some(unknown) = insert.values.keys().find(|k| !row.contains_key(*k)) {
            return Err(BackendError::unsupported(format!(
                "column \"{}\" of relation \"{}\" does not exist",
                unknown, name
            )));
        }

        generate_key(table, &mut row);
        check_constraints(&name, table, &row, None)?;
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn update(&mut self, update: &Update) -> BackendResult<(u64, Vec<Record>)> {
        self.counters.tick("update")?;
        let name = update.table.table().to_string();
        let indices = self.matching_rows(&update.table, &update.filter)?;
        let table = self.table_mut(&name)?;

        let mut returned = Vec::new();
        for &i in &indices {
            let mut row = table.rows[i].clone();
            for (column, value) in &update.assignments {
                let col = table
                    .shape
                    .columns
                    .iter()
                    .find(|c| &c.name == column)
                    .ok_or_else(|| {
                        BackendError::unsupported(format!(
                            "column \"{}\" of relation \"{}\" does not exist",
                            column, name
                        ))
                    })?;
                row.insert(column.clone(), normalize(value.clone(), &col.column_type));
            }
            check_constraints(&name, table, &row, Some(i))?;
            if !update.returning.is_empty() {
                returned.push(
                    update
                        .returning
                        .iter()
                        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                        .collect(),
                );
            }
            table.rows[i] = row;
        }
        Ok((indices.len() as u64, returned))
    }

    async fn delete(&mut self, delete: &Delete) -> BackendResult<u64> {
        self.counters.tick("delete")?;
        let name = delete.from.table().to_string();
        let doomed: HashSet<usize> = self
            .matching_rows(&delete.from, &delete.filter)?
            .into_iter()
            .collect();
        let table = self.table_mut(&name)?;
        let mut i = 0;
        table.rows.retain(|_| {
            let keep = !doomed.contains(&i);
            i += 1;
            keep
        });
        Ok(doomed.len() as u64)
    }

    async fn commit(mut self) -> BackendResult<()> {
        *self.guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(self) -> BackendResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filters;
    use crate::query::{QuerySpec, Sort};
    use crate::schema::tests::{projects, users};
    use crate::statement::{JoinCondition, SelectColumn};
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    async fn seeded() -> (MemoryBackend, Arc<EntityDescriptor>, Arc<EntityDescriptor>) {
        let backend = MemoryBackend::new();
        let users = Arc::new(users());
        let projects = Arc::new(projects());
        backend.create_table(&users).await;
        backend.create_table(&projects).await;

        let mut s = backend.begin().await.unwrap();
        for (id, name, email) in [(1, "ann", "ann@example.com"), (2, "bob", "bob@test.org"), (3, "cy", "")] {
            s.insert(&Insert {
                into: Arc::clone(&users),
                values: record(json!({"id": id, "name": name, "email": email})),
            })
            .await
            .unwrap();
        }
        for (id, name, owner) in [(10, "alpha", json!(1)), (11, "beta", json!(1)), (12, "gamma", json!(null))] {
            s.insert(&Insert {
                into: Arc::clone(&projects),
                values: record(json!({"id": id, "name": name, "created_by": owner, "is_deleted": false})),
            })
            .await
            .unwrap();
        }
        s.commit().await.unwrap();
        (backend, users, projects)
    }

    #[tokio::test]
    async fn test_filters_sort_and_page() {
        let (backend, users, _) = seeded().await;
        let select = QuerySpec::new()
            .filters(Filters::new().ilike("email", "%EXAMPLE%").and(Filters::new().gte("id", 1)))
            .compile(&users)
            .unwrap();
        let mut s = backend.begin().await.unwrap();
        let rows = s.fetch_all(&select).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "ann");

        let select = QuerySpec::new()
            .sort(Sort::by(["id"]).directions(["desc"]))
            .offset(1)
            .limit(Some(1))
            .compile(&users)
            .unwrap();
        let rows = s.fetch_all(&select).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], 2);
    }

    #[tokio::test]
    async fn test_null_comparisons_are_unknown() {
        let (backend, _, projects) = seeded().await;
        let mut s = backend.begin().await.unwrap();

        let ne = QuerySpec::new()
            .filters(Filters::new().ne("created_by", 1))
            .compile(&projects)
            .unwrap();
        assert!(s.fetch_all(&ne).await.unwrap().is_empty());

        let null = QuerySpec::new()
            .filters(Filters::new().is("created_by", None))
            .compile(&projects)
            .unwrap();
        assert_eq!(s.fetch_all(&null).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_left_join_keeps_unmatched() {
        let (backend, users, projects) = seeded().await;
        let select = Select {
            from: Arc::clone(&users),
            columns: vec![
                SelectColumn {
                    column: ColumnRef::new("users", "id", ColumnType::Integer),
                    label: "id".to_string(),
                },
                SelectColumn {
                    column: ColumnRef::new("projects", "id", ColumnType::Integer),
                    label: "p_id".to_string(),
                },
            ],
            joins: vec![JoinClause {
                kind: JoinKind::Left,
                entity: Arc::clone(&projects),
                alias: "projects".to_string(),
                on: vec![JoinCondition {
                    left: ColumnRef::new("users", "id", ColumnType::Integer),
                    right: ColumnRef::new("projects", "created_by", ColumnType::Integer),
                }],
            }],
            filter: vec![],
            order: vec![],
            offset: 0,
            limit: None,
        };
        let mut s = backend.begin().await.unwrap();
        let rows = s.fetch_all(&select).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2], record(json!({"id": 2, "p_id": null})));

        let mut inner = select.clone();
        inner.joins[0].kind = JoinKind::Inner;
        assert_eq!(s.fetch_all(&inner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_insert_generates_key_and_checks_uniqueness() {
        let (backend, users, _) = seeded().await;
        let mut s = backend.begin().await.unwrap();
        let row = s
            .insert(&Insert {
                into: Arc::clone(&users),
                values: record(json!({"name": "dee"})),
            })
            .await
            .unwrap();
        assert_eq!(row["id"], 4);
        assert_eq!(row["email"], Value::Null);

        let dup = s
            .insert(&Insert {
                into: Arc::clone(&users),
                values: record(json!({"id": 1, "name": "again"})),
            })
            .await;
        assert!(matches!(dup, Err(BackendError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_uncommitted_session_is_discarded() {
        let (backend, users, _) = seeded().await;
        {
            let mut s = backend.begin().await.unwrap();
            let removed = s
                .delete(&Delete {
                    from: Arc::clone(&users),
                    filter: vec![],
                })
                .await
                .unwrap();
            assert_eq!(removed, 3);
        }
        assert_eq!(backend.rows("users").await.len(), 3);
    }

    #[tokio::test]
    async fn test_update_returning() {
        let (backend, _, projects) = seeded().await;
        let mut s = backend.begin().await.unwrap();
        let filter = Filters::new()
            .eq("created_by", 1)
            .compile(&projects, "projects")
            .unwrap();
        let (n, rows) = s
            .update(&Update {
                table: Arc::clone(&projects),
                assignments: record(json!({"name": "renamed"})),
                filter,
                returning: vec!["id".to_string(), "name".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(rows[1], record(json!({"id": 11, "name": "renamed"})));
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let (backend, users, _) = seeded().await;
        let count = Count {
            from: users,
            joins: vec![],
            filter: vec![],
            distinct: vec![],
        };
        let mut s = backend.begin().await.unwrap();
        backend.fail_after(1);
        assert_eq!(s.count(&count).await.unwrap(), 3);
        assert!(matches!(s.count(&count).await, Err(BackendError::Injected(_))));
        assert_eq!(s.count(&count).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_text_match_and_patterns() {
        let (backend, users, _) = seeded().await;
        let mut s = backend.begin().await.unwrap();
        let select = QuerySpec::new()
            .filters(Filters::new().matches("email", "EXAMPLE ann"))
            .compile(&users)
            .unwrap();
        assert_eq!(s.fetch_all(&select).await.unwrap().len(), 1);

        let select = QuerySpec::new()
            .filters(Filters::new().like("name", "_o_"))
            .compile(&users)
            .unwrap();
        let rows = s.fetch_all(&select).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "bob");
    }
}
