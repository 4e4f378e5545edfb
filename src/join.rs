//! Join configuration and joined-select compilation

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::filter::Filters;
use crate::nest::NestTarget;
use crate::query::{QuerySpec, project};
use crate::schema::{EntityDescriptor, Projection};
use crate::statement::{
    ColumnRef, Count, JoinClause, JoinCondition, JoinKind, Select, SelectColumn,
};

impl FromStr for JoinKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inner" => Ok(JoinKind::Inner),
            "left" => Ok(JoinKind::Left),
            other => Err(EngineError::UnsupportedJoinType(other.to_string())),
        }
    }
}

/// Declared relationship shape of a join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    #[default]
    OneToOne,
    OneToMany,
}

impl FromStr for Cardinality {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "one-to-one" => Ok(Cardinality::OneToOne),
            "one-to-many" => Ok(Cardinality::OneToMany),
            other => Err(EngineError::conflicting_join(format!(
                "Unknown relationship type '{}'",
                other
            ))),
        }
    }
}

/// `source.left = target.right`; `source` None is the primary entity
#[derive(Debug, Clone, PartialEq, Eq)]
struct OnPair {
    source: Option<String>,
    left: String,
    right: String,
}

/// One join of a joined read
#[derive(Debug, Clone, PartialEq)]
pub struct JoinConfig {
    target: Arc<EntityDescriptor>,
    on: Vec<OnPair>,
    join_type: String,
    prefix: Option<String>,
    projection: Projection,
    filters: Filters,
    cardinality: Cardinality,
    alias: Option<String>,
}

impl JoinConfig {
    /// Left join on `target`, one-to-one, every column
    pub fn new(target: Arc<EntityDescriptor>) -> Self {
        Self {
            target,
            on: Vec::new(),
            join_type: "left".to_string(),
            prefix: None,
            projection: Projection::all(),
            filters: Filters::new(),
            cardinality: Cardinality::OneToOne,
            alias: None,
        }
    }

    /// Add `primary.left = target.right` to the join condition
    pub fn on(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.on.push(OnPair {
            source: None,
            left: left.into(),
            right: right.into(),
        });
        self
    }

    /// Add `source.left = target.right`, where `source` is an earlier join's alias or table
    pub fn on_source(
        mut self,
        source: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        self.on.push(OnPair {
            source: Some(source.into()),
            left: left.into(),
            right: right.into(),
        });
        self
    }

    /// `"inner"` or `"left"`; anything else fails when the join is compiled
    pub fn join_type(mut self, join_type: impl Into<String>) -> Self {
        self.join_type = join_type.into();
        self
    }

    /// Inner join: rows without a match are dropped
    pub fn inner(self) -> Self {
        self.join_type("inner")
    }

    /// Label prefix of the joined columns; also names the nested value
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Columns of the target to select
    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Filters on the target's columns, added to the overall WHERE
    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    /// Declared relationship shape
    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Every primary row may match several target rows
    pub fn one_to_many(self) -> Self {
        self.cardinality(Cardinality::OneToMany)
    }

    /// Address the joined entity under another name, e.g. for self joins
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Joined entity
    pub fn target(&self) -> &Arc<EntityDescriptor> {
        &self.target
    }

    /// Declared relationship shape
    pub fn relationship(&self) -> Cardinality {
        self.cardinality
    }

    /// Name the joined entity is addressed by in statements
    pub fn source(&self) -> &str {
        self.alias.as_deref().unwrap_or(self.target.table())
    }

    /// Key of this join's nested value: the prefix without trailing
    /// underscores, else the target's table name
    pub fn nested_key(&self) -> String {
        match self.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => prefix.trim_end_matches('_').to_string(),
            _ => self.target.table().to_string(),
        }
    }
}

/// Join shape of a call: either single-join convenience parameters or a list
/// of [`JoinConfig`], never both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinSpec {
    target: Option<Arc<EntityDescriptor>>,
    on: Vec<(String, String)>,
    prefix: Option<String>,
    projection: Option<Projection>,
    join_type: Option<String>,
    alias: Option<String>,
    filters: Option<Filters>,
    cardinality: Option<Cardinality>,
    joins: Vec<JoinConfig>,
    nest: bool,
}

impl JoinSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join list form
    pub fn joins(mut self, joins: impl IntoIterator<Item = JoinConfig>) -> Self {
        self.joins.extend(joins);
        self
    }

    /// Append a join to the joins list
    pub fn join(mut self, join: JoinConfig) -> Self {
        self.joins.push(join);
        self
    }

    /// Single-join form: the entity to join
    pub fn join_target(mut self, target: Arc<EntityDescriptor>) -> Self {
        self.target = Some(target);
        self
    }

    /// Single-join form: add `left = right` to the condition
    pub fn join_on(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.on.push((left.into(), right.into()));
        self
    }

    /// Single-join form: label prefix
    pub fn join_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Single-join form: columns of the target
    pub fn join_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Single-join form: `"inner"` or `"left"`
    pub fn join_type(mut self, join_type: impl Into<String>) -> Self {
        self.join_type = Some(join_type.into());
        self
    }

    /// Single-join form: alias of the target
    pub fn join_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Single-join form: filters on the target
    pub fn join_filters(mut self, filters: Filters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Declared relationship shape
    pub fn relationship(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = Some(cardinality);
        self
    }

    /// Reassemble joined columns into nested values
    pub fn nest(mut self, nest: bool) -> Self {
        self.nest = nest;
        self
    }

    /// True when joined rows are folded into nested records
    pub fn is_nested(&self) -> bool {
        self.nest
    }

    fn has_single_params(&self) -> bool {
        self.target.is_some()
            || !self.on.is_empty()
            || self.prefix.is_some()
            || self.projection.is_some()
            || self.join_type.is_some()
            || self.alias.is_some()
            || self.filters.is_some()
            || self.cardinality.is_some()
    }

    /// The effective join list
    pub fn resolve(&self) -> Result<Vec<JoinConfig>> {
        if !self.joins.is_empty() {
            if self.has_single_params() {
                return Err(EngineError::conflicting_join(
                    "Cannot use both single join parameters and a joins list simultaneously.",
                ));
            }
            return Ok(self.joins.clone());
        }

        let Some(target) = &self.target else {
            return Err(EngineError::missing_join(
                "A join target or a joins list is required.",
            ));
        };

        let mut config = JoinConfig::new(Arc::clone(target));
        for (left, right) in &self.on {
            config = config.on(left.clone(), right.clone());
        }
        if let Some(prefix) = &self.prefix {
            config = config.prefix(prefix.clone());
        }
        if let Some(projection) = &self.projection {
            config = config.projection(projection.clone());
        }
        if let Some(join_type) = &self.join_type {
            config = config.join_type(join_type.clone());
        }
        if let Some(alias) = &self.alias {
            config = config.alias(alias.clone());
        }
        if let Some(filters) = &self.filters {
            config = config.filters(filters.clone());
        }
        if let Some(cardinality) = self.cardinality {
            config = config.cardinality(cardinality);
        }
        Ok(vec![config])
    }
}

/// A compiled joined read plus what the reconciler needs to nest its rows
#[derive(Debug, Clone)]
pub struct JoinedSelect {
    pub select: Select,
    pub targets: Vec<NestTarget>,
    pub nest: bool,
    /// Primary-key columns of the primary entity under hidden labels; set
    /// when nesting a one-to-many join, empty otherwise
    pub parent_key: Vec<SelectColumn>,
}

impl JoinedSelect {
    /// Hidden labels the reconciler groups parents by
    pub fn parent_key_labels(&self) -> Vec<String> {
        self.parent_key.iter().map(|c| c.label.clone()).collect()
    }

    /// True when some join may match several rows per primary row
    pub fn has_one_to_many(&self) -> bool {
        self.targets
            .iter()
            .any(|t| t.cardinality == Cardinality::OneToMany)
    }

    /// Count of distinct primary rows matched by the joined select
    pub fn count(&self) -> Count {
        let from = &self.select.from;
        Count {
            from: Arc::clone(from),
            joins: self.select.joins.clone(),
            filter: self.select.filter.clone(),
            distinct: from
                .primary_key()
                .iter()
                .filter_map(|pk| {
                    from.column(pk)
                        .map(|c| ColumnRef::new(from.table(), pk, c.column_type.clone()))
                })
                .collect(),
        }
    }
}

/// Label infix of the hidden primary-key columns: `{marker}__pk_{column}`
const PARENT_KEY: &str = "__pk_";

fn unknown_join_column(entity: &EntityDescriptor, column: &str) -> EngineError {
    EngineError::UnknownField {
        entity: entity.table().to_string(),
        fields: vec![column.to_string()],
    }
}

/// Compile `query` on `entity` extended with the joins of `spec`.
///
/// Join labels are `{marker}{prefix}{field}`, with the marker only when
/// nesting. Join filters become conjuncts of the overall WHERE.
pub fn compile_joined(
    query: &QuerySpec,
    entity: &Arc<EntityDescriptor>,
    spec: &JoinSpec,
    marker: &str,
) -> Result<JoinedSelect> {
    let joins = spec.resolve()?;
    let mut select = query.compile(entity)?;

    let nest = spec.is_nested();
    if let Some(join) = joins
        .iter()
        .find(|j| !nest && j.cardinality == Cardinality::OneToMany)
    {
        return Err(EngineError::conflicting_join(format!(
            "Cannot use one-to-many join on '{}' without nesting",
            join.target.table()
        )));
    }

    let mut sources: Vec<(String, Arc<EntityDescriptor>)> =
        vec![(entity.table().to_string(), Arc::clone(entity))];
    let mut labels: HashSet<String> = select.labels().map(str::to_string).collect();
    let mut nested_keys = HashSet::new();
    let mut label_prefixes = HashSet::new();
    let mut targets = Vec::with_capacity(joins.len());

    for join in &joins {
        let kind: JoinKind = join.join_type.parse()?;
        let source = join.source().to_string();
        let target = &join.target;

        if sources.iter().any(|(name, _)| *name == source) {
            return Err(EngineError::conflicting_join(format!(
                "Source '{}' is joined twice; give one an alias",
                source
            )));
        }
        if join.on.is_empty() {
            return Err(EngineError::missing_join(format!(
                "Join on '{}' has no join condition",
                source
            )));
        }

        let mut on = Vec::with_capacity(join.on.len());
        for pair in &join.on {
            let left_source = pair.source.as_deref().unwrap_or(entity.table());
            let (_, left_entity) = sources
                .iter()
                .find(|(name, _)| name == left_source)
                .ok_or_else(|| {
                    EngineError::conflicting_join(format!(
                        "Join condition references unknown source '{}'",
                        left_source
                    ))
                })?;
            let left_col = left_entity
                .column(&pair.left)
                .ok_or_else(|| unknown_join_column(left_entity, &pair.left))?;
            let right_col = target
                .column(&pair.right)
                .ok_or_else(|| unknown_join_column(target, &pair.right))?;
            on.push(JoinCondition {
                left: ColumnRef::new(left_source, &pair.left, left_col.column_type.clone()),
                right: ColumnRef::new(&source, &pair.right, right_col.column_type.clone()),
            });
        }

        let label_prefix = format!(
            "{}{}",
            if nest { marker } else { "" },
            join.prefix.as_deref().unwrap_or("")
        );
        if nest {
            let key = join.nested_key();
            if !nested_keys.insert(key.clone()) {
                return Err(EngineError::conflicting_join(format!(
                    "Two joins nest under '{}'",
                    key
                )));
            }
            if !label_prefixes.insert(label_prefix.clone()) {
                return Err(EngineError::conflicting_join(format!(
                    "Two joins share the output prefix '{}'",
                    label_prefix
                )));
            }
        }

        let fields = join.projection.resolve(target);
        let columns = project(target, &source, &fields, &label_prefix);
        for column in &columns {
            if !labels.insert(column.label.clone()) {
                return Err(EngineError::conflicting_join(format!(
                    "Output column '{}' is produced twice; set a join prefix",
                    column.label
                )));
            }
        }

        let filter = join.filters.compile(target, &source)?;

        select.columns.extend(columns);
        select.filter.extend(filter);
        select.joins.push(JoinClause {
            kind,
            entity: Arc::clone(target),
            alias: source.clone(),
            on,
        });
        targets.push(NestTarget {
            label_prefix,
            key: join.nested_key(),
            cardinality: join.cardinality,
            primary_key: target.primary_key().to_vec(),
        });
        sources.push((source, Arc::clone(target)));
    }

    let mut parent_key = Vec::new();
    if nest && targets.iter().any(|t| t.cardinality == Cardinality::OneToMany) {
        let fields = entity.primary_key().to_vec();
        parent_key = project(entity, entity.table(), &fields, &format!("{}{}", marker, PARENT_KEY));
        for column in &parent_key {
            if !labels.insert(column.label.clone()) {
                return Err(EngineError::conflicting_join(format!(
                    "Output column '{}' is reserved for grouping nested rows",
                    column.label
                )));
            }
        }
        select.columns.extend(parent_key.iter().cloned());
    }

    tracing::debug!(
        table = entity.table(),
        joins = select.joins.len(),
        nest,
        "compiled joined select"
    );

    Ok(JoinedSelect {
        select,
        targets,
        nest,
        parent_key,
    })
}
