//! Reassembly of flat joined rows into nested results
//!
//! A joined select labels each joined column `{marker}{prefix}{field}`. The
//! reconciler routes every labelled value to its join's nested value, starts a
//! new child of a one-to-many join whenever a field repeats, and finally
//! collapses children produced by outer-join misses.

use std::collections::HashMap;

use serde_json::Value;

use crate::join::Cardinality;
use crate::types::Record;

/// How the reconciler recognises and shapes one join's columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestTarget {
    /// Label prefix of the join's columns (`{marker}{prefix}`)
    pub label_prefix: String,
    /// Key the nested value is stored under
    pub key: String,
    pub cardinality: Cardinality,
    /// Primary-key columns of the joined entity
    pub primary_key: Vec<String>,
}

/// Nested value of one join
#[derive(Debug, Clone, PartialEq)]
pub enum Nested {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl From<Nested> for Value {
    fn from(nested: Nested) -> Self {
        match nested {
            Nested::One(Some(record)) => Value::Object(record),
            Nested::One(None) => Value::Null,
            Nested::Many(records) => Value::Array(records.into_iter().map(Value::Object).collect()),
        }
    }
}

/// Top-level fields plus one nested value per join, in join order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NestedResult {
    pub fields: Record,
    pub nested: Vec<(String, Nested)>,
}

impl NestedResult {
    pub fn get(&self, key: &str) -> Option<&Nested> {
        self.nested.iter().find(|(k, _)| k == key).map(|(_, n)| n)
    }

    /// Plain mapping with nested values stored under their keys
    pub fn into_record(self) -> Record {
        let mut record = self.fields;
        for (key, nested) in self.nested {
            record.insert(key, nested.into());
        }
        record
    }
}

impl From<NestedResult> for Value {
    fn from(result: NestedResult) -> Self {
        Value::Object(result.into_record())
    }
}

/// Longest label prefix wins so that `owner_` and `owner_team_` can coexist
fn route<'t>(label: &str, targets: &'t [NestTarget]) -> Option<(usize, &'t NestTarget)> {
    targets
        .iter()
        .enumerate()
        .filter(|(_, t)| label.starts_with(&t.label_prefix))
        .max_by_key(|(_, t)| t.label_prefix.len())
}

fn fold_row(result: &mut NestedResult, row: &Record, targets: &[NestTarget], marker: &str) {
    for (label, value) in row {
        let Some((index, target)) = route(label, targets) else {
            let key = label.strip_prefix(marker).unwrap_or(label);
            result.fields.insert(key.to_string(), value.clone());
            continue;
        };

        let field = label[target.label_prefix.len()..].to_string();
        match &mut result.nested[index].1 {
            Nested::Many(children) => match children.last_mut() {
                Some(last) if !last.contains_key(&field) => {
                    last.insert(field, value.clone());
                }
                _ => {
                    let mut child = Record::new();
                    child.insert(field, value.clone());
                    children.push(child);
                }
            },
            Nested::One(object) => {
                object
                    .get_or_insert_with(Record::new)
                    .insert(field, value.clone());
            }
        }
    }
}

/// A child is an outer-join miss when its primary key is null, or, with the
/// key not projected, when every field is null.
fn is_miss(child: &Record, primary_key: &[String]) -> bool {
    let projected: Vec<&Value> = primary_key.iter().filter_map(|pk| child.get(pk)).collect();
    if projected.is_empty() {
        child.values().all(Value::is_null)
    } else {
        projected.iter().any(|v| v.is_null())
    }
}

fn primary_key_of(child: &Record, primary_key: &[String]) -> Option<Vec<Value>> {
    primary_key
        .iter()
        .map(|pk| child.get(pk).filter(|v| !v.is_null()).cloned())
        .collect()
}

fn collapse(result: &mut NestedResult, targets: &[NestTarget]) {
    for ((_, nested), target) in result.nested.iter_mut().zip(targets) {
        match nested {
            Nested::Many(children) => {
                children.retain(|child| !is_miss(child, &target.primary_key));
                // Several one-to-many joins multiply rows; keep the first copy of each child
                let mut seen: Vec<Vec<Value>> = Vec::new();
                children.retain(|child| match primary_key_of(child, &target.primary_key) {
                    Some(key) if seen.contains(&key) => false,
                    Some(key) => {
                        seen.push(key);
                        true
                    }
                    None => true,
                });
            }
            Nested::One(object) => {
                if object
                    .as_ref()
                    .is_some_and(|o| is_miss(o, &target.primary_key))
                {
                    *object = None;
                }
            }
        }
    }
}

fn empty_result(targets: &[NestTarget]) -> NestedResult {
    NestedResult {
        fields: Record::new(),
        nested: targets
            .iter()
            .map(|t| {
                let nested = match t.cardinality {
                    Cardinality::OneToOne => Nested::One(None),
                    Cardinality::OneToMany => Nested::Many(Vec::new()),
                };
                (t.key.clone(), nested)
            })
            .collect(),
    }
}

/// Fold the rows of one parent into a single nested result.
///
/// Returns None when there are no rows.
pub fn reconcile(rows: &[Record], targets: &[NestTarget], marker: &str) -> Option<NestedResult> {
    if rows.is_empty() {
        return None;
    }
    let mut result = empty_result(targets);
    for row in rows {
        fold_row(&mut result, row, targets, marker);
    }
    collapse(&mut result, targets);
    Some(result)
}

/// Grouping key of a row: its values under `parent_key`, in order
pub fn parent_key_of(row: &Record, parent_key: &[String]) -> String {
    let values = parent_key
        .iter()
        .map(|label| row.get(label).cloned().unwrap_or(Value::Null))
        .collect();
    Value::Array(values).to_string()
}

/// Reconcile rows of several parents.
///
/// With a one-to-many join, rows are grouped by the values under the hidden
/// `parent_key` labels (by every top-level value when none are given) in
/// order of first appearance; otherwise every row is its own parent. The
/// hidden labels never reach the results.
pub fn reconcile_many(
    rows: &[Record],
    targets: &[NestTarget],
    marker: &str,
    parent_key: &[String],
) -> Vec<NestedResult> {
    let visible = |row: &Record| -> Record {
        row.iter()
            .filter(|(label, _)| !parent_key.contains(label))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };

    let grouped = targets
        .iter()
        .any(|t| t.cardinality == Cardinality::OneToMany);
    if !grouped {
        return rows
            .iter()
            .filter_map(|row| reconcile(&[visible(row)], targets, marker))
            .collect();
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<Record>> = Vec::new();
    for row in rows {
        let key = if parent_key.is_empty() {
            let parent: Record = row
                .iter()
                .filter(|(label, _)| route(label, targets).is_none())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(parent).to_string()
        } else {
            parent_key_of(row, parent_key)
        };
        match index.get(&key) {
            Some(&i) => groups[i].push(visible(row)),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![visible(row)]);
            }
        }
    }

    groups
        .iter()
        .filter_map(|group| reconcile(group, targets, marker))
        .collect()
}
