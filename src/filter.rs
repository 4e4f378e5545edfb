//! Filter clauses and their compilation into predicates
//!
//! Filters are an ordered list of `(field, operator, value)` clauses plus
//! per-field OR groups. They are built either fluently:
//!
//! ```
//! use dynacrud::Filters;
//! use serde_json::json;
//!
//! let filters = Filters::new()
//!     .eq("status", "active")
//!     .gte("age", 18)
//!     .is_in("role", ["admin", "owner"]);
//! assert_eq!(filters.len(), 3);
//! ```
//!
//! or from keyword pairs (`age__gte`, `name__or`, bare `status`) with
//! [`Filters::from_kwargs`]. Value shapes are checked when a clause is built;
//! field names are resolved when the filters are compiled against an entity.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::schema::EntityDescriptor;
use crate::statement::{ColumnRef, Comparison, Predicate};

/// Supported filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
    Ne,
    Is,
    IsNot,
    Like,
    ILike,
    NotLike,
    NotILike,
    StartsWith,
    EndsWith,
    Contains,
    Match,
    Between,
    In,
    NotIn,
}

impl FilterOp {
    pub const ALL: [FilterOp; 19] = [
        FilterOp::Eq,
        FilterOp::Gt,
        FilterOp::Lt,
        FilterOp::Gte,
        FilterOp::Lte,
        FilterOp::Ne,
        FilterOp::Is,
        FilterOp::IsNot,
        FilterOp::Like,
        FilterOp::ILike,
        FilterOp::NotLike,
        FilterOp::NotILike,
        FilterOp::StartsWith,
        FilterOp::EndsWith,
        FilterOp::Contains,
        FilterOp::Match,
        FilterOp::Between,
        FilterOp::In,
        FilterOp::NotIn,
    ];

    /// Keyword suffix used in `field__op` keys
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
            FilterOp::Ne => "ne",
            FilterOp::Is => "is",
            FilterOp::IsNot => "is_not",
            FilterOp::Like => "like",
            FilterOp::ILike => "ilike",
            FilterOp::NotLike => "notlike",
            FilterOp::NotILike => "notilike",
            FilterOp::StartsWith => "startswith",
            FilterOp::EndsWith => "endswith",
            FilterOp::Contains => "contains",
            FilterOp::Match => "match",
            FilterOp::Between => "between",
            FilterOp::In => "in",
            FilterOp::NotIn => "not_in",
        }
    }

    /// Operators whose value must be a sequence
    pub fn is_multi_valued(self) -> bool {
        matches!(self, FilterOp::Between | FilterOp::In | FilterOp::NotIn)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        FilterOp::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| EngineError::invalid_filter(format!("Unsupported operator '{}'", s)))
    }
}

/// A single shape-checked `(field, operator, value)` triple
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    field: String,
    op: FilterOp,
    value: Value,
}

impl FilterClause {
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Result<Self> {
        let field = field.into();
        check_shape(&field, op, &value)?;
        Ok(Self { field, op, value })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn op(&self) -> FilterOp {
        self.op
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

fn check_shape(field: &str, op: FilterOp, value: &Value) -> Result<()> {
    let bad = |what: &str| {
        Err(EngineError::invalid_filter(format!(
            "<{}> filter on '{}' {}",
            op, field, what
        )))
    };

    match op {
        FilterOp::In | FilterOp::NotIn if !value.is_array() => bad("must be a list"),
        FilterOp::Between => match value.as_array() {
            Some(bounds) if bounds.len() == 2 => Ok(()),
            Some(_) => bad("must have exactly two bounds"),
            None => bad("must be a list"),
        },
        FilterOp::Is | FilterOp::IsNot if !(value.is_null() || value.is_boolean()) => {
            bad("must be null, true or false")
        }
        FilterOp::Like
        | FilterOp::ILike
        | FilterOp::NotLike
        | FilterOp::NotILike
        | FilterOp::StartsWith
        | FilterOp::EndsWith
        | FilterOp::Contains
        | FilterOp::Match
            if !value.is_string() =>
        {
            bad("must be a string")
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FilterEntry {
    Clause(FilterClause),
    AnyOf {
        field: String,
        clauses: Vec<FilterClause>,
    },
}

/// Ordered filter list, conjoined with AND when compiled
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    entries: Vec<FilterEntry>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse keyword filters.
    ///
    /// - `field__op`: the operator must be supported and the value well shaped
    /// - bare `field`: equality, skipped when the value is null
    /// - `field__or`: the value is a mapping `{op: value}`; malformed entries
    ///   are dropped and the rest combine with OR
    pub fn from_kwargs<I, K>(kwargs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut filters = Self::new();
        for (key, value) in kwargs {
            let key = key.as_ref();
            match key.rsplit_once("__") {
                Some((field, "or")) => {
                    let Value::Object(branches) = value else {
                        return Err(EngineError::invalid_filter(format!(
                            "<or> filter on '{}' must be a mapping of operator to value",
                            field
                        )));
                    };
                    let branches = branches
                        .into_iter()
                        .filter_map(|(op, v)| op.parse::<FilterOp>().ok().map(|op| (op, v)));
                    filters = filters.any_of(field, branches);
                }
                Some((field, op)) => {
                    filters = filters.add(field, op.parse()?, value)?;
                }
                None if value.is_null() => {}
                None => filters = filters.add(key, FilterOp::Eq, value)?,
            }
        }
        Ok(filters)
    }

    /// Append a clause with a dynamically chosen operator
    pub fn add(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Result<Self> {
        self.entries
            .push(FilterEntry::Clause(FilterClause::new(field, op, value)?));
        Ok(self)
    }

    fn push(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.entries.push(FilterEntry::Clause(FilterClause {
            field: field.into(),
            op,
            value,
        }));
        self
    }

    /// `field = value`; a null value means `IS NULL`
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, FilterOp::Eq, value.into())
    }

    /// `field <> value`
    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, FilterOp::Ne, value.into())
    }

    /// `field > value`
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, FilterOp::Gt, value.into())
    }

    /// `field >= value`
    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, FilterOp::Gte, value.into())
    }

    /// `field < value`
    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, FilterOp::Lt, value.into())
    }

    /// `field <= value`
    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, FilterOp::Lte, value.into())
    }

    /// `IS NULL` for None, `IS TRUE|FALSE` otherwise
    pub fn is(self, field: impl Into<String>, value: Option<bool>) -> Self {
        self.push(field, FilterOp::Is, value.map_or(Value::Null, Value::Bool))
    }

    /// `IS NOT NULL` for None, `IS NOT TRUE|FALSE` otherwise
    pub fn is_not(self, field: impl Into<String>, value: Option<bool>) -> Self {
        self.push(field, FilterOp::IsNot, value.map_or(Value::Null, Value::Bool))
    }

    /// Case-sensitive LIKE pattern
    pub fn like(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push(field, FilterOp::Like, Value::String(pattern.into()))
    }

    /// Case-insensitive LIKE pattern
    pub fn ilike(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push(field, FilterOp::ILike, Value::String(pattern.into()))
    }

    /// Negated LIKE
    pub fn not_like(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push(field, FilterOp::NotLike, Value::String(pattern.into()))
    }

    /// Negated ILIKE
    pub fn not_ilike(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push(field, FilterOp::NotILike, Value::String(pattern.into()))
    }

    /// Text starting with `prefix`
    pub fn starts_with(self, field: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.push(field, FilterOp::StartsWith, Value::String(prefix.into()))
    }

    /// Text ending with `suffix`
    pub fn ends_with(self, field: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.push(field, FilterOp::EndsWith, Value::String(suffix.into()))
    }

    /// Text containing `needle`
    pub fn contains(self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        self.push(field, FilterOp::Contains, Value::String(needle.into()))
    }

    /// Full-text match of every word of `query`
    pub fn matches(self, field: impl Into<String>, query: impl Into<String>) -> Self {
        self.push(field, FilterOp::Match, Value::String(query.into()))
    }

    /// Inclusive range `low..=high`
    pub fn between(
        self,
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push(
            field,
            FilterOp::Between,
            Value::Array(vec![low.into(), high.into()]),
        )
    }

    /// Value in `values`; nulls in the list never match
    pub fn is_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push(field, FilterOp::In, Value::Array(values))
    }

    /// Value not in `values`
    pub fn not_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push(field, FilterOp::NotIn, Value::Array(values))
    }

    /// OR group on one field. Branches with a malformed value are dropped.
    pub fn any_of(
        mut self,
        field: impl Into<String>,
        branches: impl IntoIterator<Item = (FilterOp, Value)>,
    ) -> Self {
        let field = field.into();
        let clauses = branches
            .into_iter()
            .filter_map(|(op, value)| FilterClause::new(field.clone(), op, value).ok())
            .collect();
        self.entries.push(FilterEntry::AnyOf { field, clauses });
        self
    }

    /// Append every entry of `other`
    pub fn and(mut self, other: Filters) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compile against `entity`, addressed in statements as `source`.
    ///
    /// Every referenced field must be a column of the entity.
    pub fn compile(&self, entity: &EntityDescriptor, source: &str) -> Result<Vec<Predicate>> {
        let mut predicates = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            match entry {
                FilterEntry::Clause(clause) => {
                    let column = resolve(entity, source, &clause.field)?;
                    predicates.push(to_predicate(column, clause.op, &clause.value)?);
                }
                FilterEntry::AnyOf { field, clauses } => {
                    let column = resolve(entity, source, field)?;
                    let branches: Vec<Predicate> = clauses
                        .iter()
                        .filter_map(|c| to_predicate(column.clone(), c.op, &c.value).ok())
                        .collect();
                    if !branches.is_empty() {
                        predicates.push(Predicate::Any(branches));
                    }
                }
            }
        }
        Ok(predicates)
    }
}

fn resolve(entity: &EntityDescriptor, source: &str, field: &str) -> Result<ColumnRef> {
    let column = entity.column(field).ok_or_else(|| {
        EngineError::invalid_filter(format!(
            "Invalid filter column '{}' for '{}'",
            field,
            entity.table()
        ))
    })?;
    Ok(ColumnRef::new(source, field, column.column_type.clone()))
}

fn as_text(op: FilterOp, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| EngineError::invalid_filter(format!("<{}> filter must be a string", op)))
}

fn to_predicate(column: ColumnRef, op: FilterOp, value: &Value) -> Result<Predicate> {
    check_shape(&column.column, op, value)?;

    let compare = |cmp| Predicate::Compare {
        column: column.clone(),
        cmp,
        value: value.clone(),
    };
    let like = |pattern: String, case_insensitive, negated| Predicate::Like {
        column: column.clone(),
        pattern,
        case_insensitive,
        negated,
    };

    Ok(match op {
        FilterOp::Eq => Predicate::eq(column.clone(), value.clone()),
        FilterOp::Ne if value.is_null() => Predicate::IsNull {
            column: column.clone(),
            negated: true,
        },
        FilterOp::Ne => compare(Comparison::Ne),
        FilterOp::Gt => compare(Comparison::Gt),
        FilterOp::Lt => compare(Comparison::Lt),
        FilterOp::Gte => compare(Comparison::Gte),
        FilterOp::Lte => compare(Comparison::Lte),
        FilterOp::Is | FilterOp::IsNot => {
            let negated = op == FilterOp::IsNot;
            match value.as_bool() {
                Some(b) => Predicate::IsBool {
                    column: column.clone(),
                    value: b,
                    negated,
                },
                None => Predicate::IsNull {
                    column: column.clone(),
                    negated,
                },
            }
        }
        FilterOp::Like => like(as_text(op, value)?, false, false),
        FilterOp::ILike => like(as_text(op, value)?, true, false),
        FilterOp::NotLike => like(as_text(op, value)?, false, true),
        FilterOp::NotILike => like(as_text(op, value)?, true, true),
        FilterOp::StartsWith => like(format!("{}%", as_text(op, value)?), false, false),
        FilterOp::EndsWith => like(format!("%{}", as_text(op, value)?), false, false),
        FilterOp::Contains => like(format!("%{}%", as_text(op, value)?), false, false),
        FilterOp::Match => Predicate::TextMatch {
            column: column.clone(),
            query: as_text(op, value)?,
        },
        FilterOp::Between => match value.as_array().map(Vec::as_slice) {
            Some([low, high]) => Predicate::Between {
                column: column.clone(),
                low: low.clone(),
                high: high.clone(),
            },
            _ => {
                return Err(EngineError::invalid_filter(
                    "<between> filter must have exactly two bounds",
                ));
            }
        },
        FilterOp::In | FilterOp::NotIn => Predicate::In {
            column: column.clone(),
            values: value.as_array().cloned().unwrap_or_default(),
            negated: op == FilterOp::NotIn,
        },
    })
}
