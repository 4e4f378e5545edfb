//! Compiled statements handed to a storage executor
//!
//! Everything here is already validated against entity descriptors. A
//! [`Backend`](crate::backend::Backend) only has to execute these values; it
//! never sees caller filter syntax.

use std::sync::Arc;

use serde_json::Value;

use crate::schema::EntityDescriptor;
use crate::types::{ColumnType, Record};

/// A column of a statement source (the primary entity or a join alias)
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub source: String,
    pub column: String,
    pub column_type: ColumnType,
}

impl ColumnRef {
    pub fn new(source: impl Into<String>, column: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            source: source.into(),
            column: column.into(),
            column_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl Comparison {
    pub fn sql(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Gt => ">",
            Comparison::Lt => "<",
            Comparison::Gte => ">=",
            Comparison::Lte => "<=",
        }
    }
}

/// One WHERE conjunct
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        cmp: Comparison,
        value: Value,
    },
    /// `IS [NOT] NULL`
    IsNull { column: ColumnRef, negated: bool },
    /// `IS [NOT] TRUE|FALSE`
    IsBool {
        column: ColumnRef,
        value: bool,
        negated: bool,
    },
    /// SQL LIKE pattern (`%` and `_` wildcards)
    Like {
        column: ColumnRef,
        pattern: String,
        case_insensitive: bool,
        negated: bool,
    },
    /// Full-text match: every word of `query` occurs in the column
    TextMatch { column: ColumnRef, query: String },
    Between {
        column: ColumnRef,
        low: Value,
        high: Value,
    },
    In {
        column: ColumnRef,
        values: Vec<Value>,
        negated: bool,
    },
    /// Disjunction of its members
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: ColumnRef, value: Value) -> Self {
        if value.is_null() {
            Predicate::IsNull {
                column,
                negated: false,
            }
        } else {
            Predicate::Compare {
                column,
                cmp: Comparison::Eq,
                value,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// Column equality pair of a join condition: `left = right`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinCondition {
    pub left: ColumnRef,
    pub right: ColumnRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub entity: Arc<EntityDescriptor>,
    /// Source name the joined entity is addressed by
    pub alias: String,
    pub on: Vec<JoinCondition>,
}

impl JoinClause {
    /// True when the joined entity is addressed by a name other than its table
    pub fn is_aliased(&self) -> bool {
        self.alias != self.entity.table()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub column: ColumnRef,
    /// Output label in the returned row
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub from: Arc<EntityDescriptor>,
    pub columns: Vec<SelectColumn>,
    pub joins: Vec<JoinClause>,
    pub filter: Vec<Predicate>,
    pub order: Vec<OrderBy>,
    pub offset: i64,
    pub limit: Option<i64>,
}

impl Select {
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.label.as_str())
    }
}

/// `COUNT(*)`, or `COUNT(DISTINCT ..)` over `distinct` when it is not empty
#[derive(Debug, Clone, PartialEq)]
pub struct Count {
    pub from: Arc<EntityDescriptor>,
    pub joins: Vec<JoinClause>,
    pub filter: Vec<Predicate>,
    pub distinct: Vec<ColumnRef>,
}

/// Single-row insert; the stored row is returned with every column
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub into: Arc<EntityDescriptor>,
    pub values: Record,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: Arc<EntityDescriptor>,
    pub assignments: Record,
    pub filter: Vec<Predicate>,
    /// Columns of each updated row to return (empty = none)
    pub returning: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub from: Arc<EntityDescriptor>,
    pub filter: Vec<Predicate>,
}
