use super::{
    binder::{
        BoundDimension, BoundFactColumn, BoundFilter, BoundHaving, BoundMeasure, BoundOrderByItem,
        ExpandNode,
    },
    error::EngineError,
    expr::ast::{AggregateFunction, CompareOp, Literal},
    metadata::{EntityModel, EntityTypeMetadata, ID_PROPERTY},
    result::ScalarValue,
};

/// The alias of the root table in every compiled statement.
pub const ORIGIN_ALIAS: &str = "_origin";

/// Resource caps, enforced during compilation rather than after execution.
#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    /// Hard ceiling on `top` for flat and fact queries
    pub max_page_size: u64,
    /// Hard ceiling on the number of aggregate result rows
    pub max_aggregate_result_size: u64,
    /// Ceiling on exact counting; beyond it the count is reported unknown
    pub max_count_size: u64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_page_size: 500,
            max_aggregate_result_size: 10_000,
            max_count_size: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table_alias: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table_alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table_alias: table_alias.into(),
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanTarget {
    Column(ColumnRef),
    Aggregate {
        function: AggregateFunction,
        column: ColumnRef,
    },
}

/// One projected output column; `name` is the column's name in the result.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanColumn {
    pub name: String,
    pub target: PlanTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Compare {
        target: PlanTarget,
        op: CompareOp,
        value: ScalarValue,
    },
    In {
        target: PlanTarget,
        values: Vec<ScalarValue>,
    },
    IsNull(PlanTarget),
    IsNotNull(PlanTarget),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }
}

/// A LEFT join of one navigation target, keyed by the parent's foreign key.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanJoin {
    pub table: String,
    pub alias: String,
    pub parent_alias: String,
    pub parent_column: String,
    pub child_column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanOrderBy {
    pub target: PlanTarget,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    Flat,
    Fact,
    Aggregate,
}

/// A grouping column whose entity type is hierarchical; the executor fetches
/// ancestor rows for the distinct leaf values under this column name.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeDimension {
    pub column_name: String,
    pub tree_type: String,
}

/// Compiled, immutable, backend-agnostic description of one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub shape: QueryShape,
    pub source_table: String,
    pub joins: Vec<PlanJoin>,
    pub columns: Vec<PlanColumn>,
    pub predicate: Option<Predicate>,
    pub group_by: Vec<ColumnRef>,
    pub having: Option<Predicate>,
    pub order_by: Vec<PlanOrderBy>,
    pub skip: u64,
    /// The page the caller receives; None fetches everything (internal plans)
    pub page_size: Option<u64>,
    /// `page_size + 1`; the extra row detects truncation or overflow
    pub fetch_limit: Option<u64>,
    pub tree_dimensions: Vec<TreeDimension>,
}

/// A count-only statement over the same joins and predicate, capped so an
/// exact count is never computed past `cap`.
#[derive(Debug, Clone, PartialEq)]
pub struct CountPlan {
    pub source_table: String,
    pub joins: Vec<PlanJoin>,
    pub predicate: Option<Predicate>,
    pub cap: u64,
}

pub fn join_alias(path: &[String]) -> String {
    format!("_nav.{}", path.join("."))
}

fn alias_of(path: &[String]) -> String {
    if path.is_empty() {
        ORIGIN_ALIAS.to_owned()
    } else {
        join_alias(path)
    }
}

/// Expands every prefix of every join path, parents first, deduplicated, and
/// resolves each against the metadata into a LEFT join.
fn build_joins(
    paths: &[Vec<String>],
    root: &EntityTypeMetadata,
    model: &EntityModel,
) -> Result<Vec<PlanJoin>, EngineError> {
    let mut prefixes: Vec<Vec<String>> = vec![];
    for path in paths {
        for len in 1..=path.len() {
            let prefix = path[..len].to_vec();
            if !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        }
    }
    prefixes.sort_by_key(|prefix| prefix.len());

    prefixes
        .iter()
        .map(|prefix| {
            let mut current = root;
            for segment in &prefix[..prefix.len() - 1] {
                let navigation = current.navigation(segment).ok_or_else(|| {
                    EngineError::Internal(format!(
                        "join path segment \"{}\" vanished after binding",
                        segment
                    ))
                })?;
                current = model.entity_type(&navigation.target_type)?;
            }
            let last = &prefix[prefix.len() - 1];
            let navigation = current.navigation(last).ok_or_else(|| {
                EngineError::Internal(format!(
                    "join path segment \"{}\" vanished after binding",
                    last
                ))
            })?;
            let target = model.entity_type(&navigation.target_type)?;
            Ok(PlanJoin {
                table: target.table_name.clone(),
                alias: join_alias(prefix),
                parent_alias: alias_of(&prefix[..prefix.len() - 1]),
                parent_column: navigation.foreign_key_property.clone(),
                child_column: ID_PROPERTY.to_owned(),
            })
        })
        .collect()
}

fn lower_filter(filter: &BoundFilter) -> Predicate {
    match filter {
        BoundFilter::And(left, right) => lower_filter(left).and(lower_filter(right)),
        BoundFilter::Or(left, right) => {
            Predicate::Or(Box::new(lower_filter(left)), Box::new(lower_filter(right)))
        }
        BoundFilter::Not(inner) => Predicate::Not(Box::new(lower_filter(inner))),
        BoundFilter::Comparison(comparison) => {
            let target = PlanTarget::Column(ColumnRef::new(
                alias_of(&comparison.join_path),
                comparison.column.clone(),
            ));
            match (&comparison.literal, comparison.op) {
                (Literal::Null, CompareOp::Eq) => Predicate::IsNull(target),
                (Literal::Null, CompareOp::Ne) => Predicate::IsNotNull(target),
                (literal, op) => Predicate::Compare {
                    target,
                    op,
                    value: literal.clone().into(),
                },
            }
        }
    }
}

fn lower_having(having: &BoundHaving) -> Predicate {
    match having {
        BoundHaving::And(left, right) => lower_having(left).and(lower_having(right)),
        BoundHaving::Or(left, right) => {
            Predicate::Or(Box::new(lower_having(left)), Box::new(lower_having(right)))
        }
        BoundHaving::Not(inner) => Predicate::Not(Box::new(lower_having(inner))),
        BoundHaving::Comparison {
            measure,
            op,
            literal,
        } => Predicate::Compare {
            target: measure_target(measure),
            op: *op,
            value: literal.clone().into(),
        },
    }
}

fn measure_target(measure: &BoundMeasure) -> PlanTarget {
    PlanTarget::Aggregate {
        function: measure.function,
        column: ColumnRef::new(alias_of(&measure.join_path), measure.column.clone()),
    }
}

/// Row access is always `permission AND request`: the request's filter can
/// narrow the permitted rows, never widen them.
fn combine_predicates(
    permission: Option<&BoundFilter>,
    filter: Option<&BoundFilter>,
) -> Option<Predicate> {
    match (permission, filter) {
        (Some(permission), Some(filter)) => {
            Some(lower_filter(permission).and(lower_filter(filter)))
        }
        (Some(permission), None) => Some(lower_filter(permission)),
        (None, Some(filter)) => Some(lower_filter(filter)),
        (None, None) => None,
    }
}

/// Appends the entity key so paging stays reproducible when the explicit sort
/// keys carry duplicates.
fn with_stable_tiebreak(mut order_by: Vec<PlanOrderBy>) -> Vec<PlanOrderBy> {
    let has_root_id = order_by.iter().any(|item| match &item.target {
        PlanTarget::Column(column) => {
            column.table_alias == ORIGIN_ALIAS && column.column == ID_PROPERTY
        }
        PlanTarget::Aggregate { .. } => false,
    });
    if !has_root_id {
        order_by.push(PlanOrderBy {
            target: PlanTarget::Column(ColumnRef::new(ORIGIN_ALIAS, ID_PROPERTY)),
            descending: false,
        });
    }
    order_by
}

fn lower_order_by(order_by: &[BoundOrderByItem]) -> Vec<PlanOrderBy> {
    order_by
        .iter()
        .map(|item| PlanOrderBy {
            target: PlanTarget::Column(ColumnRef::new(
                alias_of(&item.join_path),
                item.column.clone(),
            )),
            descending: item.descending,
        })
        .collect()
}

/// The simple properties one expansion level projects: the entity key, then
/// the selected (or all) properties, then the foreign keys of expanded
/// navigations so materialized entities keep their scalar references after
/// flattening.
pub fn projected_properties(
    node: &ExpandNode,
    model: &EntityModel,
) -> Result<Vec<String>, EngineError> {
    let node_type = model.entity_type(&node.type_name)?;

    let mut names: Vec<String> = vec![ID_PROPERTY.to_owned()];
    match &node.properties {
        None => {
            for property in &node_type.properties {
                if !names.contains(&property.name) {
                    names.push(property.name.clone());
                }
            }
        }
        Some(selected) => {
            for name in selected {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
    }
    for navigation_name in node.navigations.keys() {
        let navigation = node_type.navigation(navigation_name).ok_or_else(|| {
            EngineError::Internal(format!(
                "navigation \"{}\" vanished after binding",
                navigation_name
            ))
        })?;
        if !names.contains(&navigation.foreign_key_property) {
            names.push(navigation.foreign_key_property.clone());
        }
    }
    Ok(names)
}

/// Walks the navigation part of the expansion tree, projecting each level's
/// simple properties under its dotted prefix.
fn project_expansion(
    node: &ExpandNode,
    prefix: &[String],
    model: &EntityModel,
    out: &mut Vec<PlanColumn>,
) -> Result<(), EngineError> {
    let alias = alias_of(prefix);

    for name in projected_properties(node, model)? {
        let output = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix.join("."), name)
        };
        out.push(PlanColumn {
            name: output,
            target: PlanTarget::Column(ColumnRef::new(alias.clone(), name)),
        });
    }

    for (navigation_name, child) in &node.navigations {
        let child_prefix = [prefix, &[navigation_name.clone()]].concat();
        project_expansion(child, &child_prefix, model, out)?;
    }
    Ok(())
}

fn clamp_page(top: Option<u64>, cap: u64) -> (u64, u64) {
    let page_size = top.map_or(cap, |top| top.min(cap));
    (page_size, page_size.saturating_add(1))
}

#[allow(clippy::too_many_arguments)]
pub fn compile_flat(
    root: &EntityTypeMetadata,
    model: &EntityModel,
    permission: Option<&BoundFilter>,
    filter: Option<&BoundFilter>,
    order_by: &[BoundOrderByItem],
    expansion: &ExpandNode,
    skip: u64,
    top: Option<u64>,
    limits: &QueryLimits,
) -> Result<QueryPlan, EngineError> {
    let mut join_paths: Vec<Vec<String>> = vec![];
    expansion.navigation_join_paths(&[], &mut join_paths);
    collect_filter_paths(permission, filter, &mut join_paths);
    for item in order_by {
        if !item.join_path.is_empty() && !join_paths.contains(&item.join_path) {
            join_paths.push(item.join_path.clone());
        }
    }

    let mut columns = vec![];
    project_expansion(expansion, &[], model, &mut columns)?;

    let (page_size, fetch_limit) = clamp_page(top, limits.max_page_size);

    Ok(QueryPlan {
        shape: QueryShape::Flat,
        source_table: root.table_name.clone(),
        joins: build_joins(&join_paths, root, model)?,
        columns,
        predicate: combine_predicates(permission, filter),
        group_by: vec![],
        having: None,
        order_by: with_stable_tiebreak(lower_order_by(order_by)),
        skip,
        page_size: Some(page_size),
        fetch_limit: Some(fetch_limit),
        tree_dimensions: vec![],
    })
}

#[allow(clippy::too_many_arguments)]
pub fn compile_fact(
    root: &EntityTypeMetadata,
    model: &EntityModel,
    permission: Option<&BoundFilter>,
    filter: Option<&BoundFilter>,
    order_by: &[BoundOrderByItem],
    select: &[BoundFactColumn],
    skip: u64,
    top: Option<u64>,
    limits: &QueryLimits,
) -> Result<QueryPlan, EngineError> {
    let mut join_paths: Vec<Vec<String>> = vec![];
    for column in select {
        if !column.join_path.is_empty() && !join_paths.contains(&column.join_path) {
            join_paths.push(column.join_path.clone());
        }
    }
    collect_filter_paths(permission, filter, &mut join_paths);
    for item in order_by {
        if !item.join_path.is_empty() && !join_paths.contains(&item.join_path) {
            join_paths.push(item.join_path.clone());
        }
    }

    let columns = select
        .iter()
        .map(|column| PlanColumn {
            name: column.name.clone(),
            target: PlanTarget::Column(ColumnRef::new(
                alias_of(&column.join_path),
                column.column.clone(),
            )),
        })
        .collect();

    let (page_size, fetch_limit) = clamp_page(top, limits.max_page_size);

    Ok(QueryPlan {
        shape: QueryShape::Fact,
        source_table: root.table_name.clone(),
        joins: build_joins(&join_paths, root, model)?,
        columns,
        predicate: combine_predicates(permission, filter),
        group_by: vec![],
        having: None,
        order_by: with_stable_tiebreak(lower_order_by(order_by)),
        skip,
        page_size: Some(page_size),
        fetch_limit: Some(fetch_limit),
        tree_dimensions: vec![],
    })
}

#[allow(clippy::too_many_arguments)]
pub fn compile_aggregate(
    root: &EntityTypeMetadata,
    model: &EntityModel,
    permission: Option<&BoundFilter>,
    filter: Option<&BoundFilter>,
    dimensions: &[BoundDimension],
    measures: &[BoundMeasure],
    having: Option<&BoundHaving>,
    top: Option<u64>,
    limits: &QueryLimits,
) -> Result<QueryPlan, EngineError> {
    let mut join_paths: Vec<Vec<String>> = vec![];
    for dimension in dimensions {
        if !dimension.join_path.is_empty() && !join_paths.contains(&dimension.join_path) {
            join_paths.push(dimension.join_path.clone());
        }
    }
    for measure in measures {
        if !measure.join_path.is_empty() && !join_paths.contains(&measure.join_path) {
            join_paths.push(measure.join_path.clone());
        }
    }
    collect_filter_paths(permission, filter, &mut join_paths);
    if let Some(having) = having {
        having.join_paths(&mut join_paths);
    }

    let group_by: Vec<ColumnRef> = dimensions
        .iter()
        .map(|dimension| ColumnRef::new(alias_of(&dimension.join_path), dimension.column.clone()))
        .collect();

    let mut columns: Vec<PlanColumn> = dimensions
        .iter()
        .zip(&group_by)
        .map(|(dimension, column)| PlanColumn {
            name: dimension.name.clone(),
            target: PlanTarget::Column(column.clone()),
        })
        .collect();
    for measure in measures {
        columns.push(PlanColumn {
            name: measure.name.clone(),
            target: measure_target(measure),
        });
    }

    // deterministic output: aggregate rows order by their grouping columns
    let order_by = group_by
        .iter()
        .map(|column| PlanOrderBy {
            target: PlanTarget::Column(column.clone()),
            descending: false,
        })
        .collect();

    let tree_dimensions = dimensions
        .iter()
        .filter_map(|dimension| {
            dimension.tree_type.as_ref().map(|tree_type| TreeDimension {
                column_name: dimension.name.clone(),
                tree_type: tree_type.clone(),
            })
        })
        .collect();

    let (page_size, fetch_limit) = clamp_page(top, limits.max_aggregate_result_size);

    Ok(QueryPlan {
        shape: QueryShape::Aggregate,
        source_table: root.table_name.clone(),
        joins: build_joins(&join_paths, root, model)?,
        columns,
        predicate: combine_predicates(permission, filter),
        group_by,
        having: having.map(lower_having),
        order_by,
        skip: 0,
        page_size: Some(page_size),
        fetch_limit: Some(fetch_limit),
        tree_dimensions,
    })
}

pub fn compile_count(plan: &QueryPlan, limits: &QueryLimits) -> CountPlan {
    CountPlan {
        source_table: plan.source_table.clone(),
        joins: plan.joins.clone(),
        predicate: plan.predicate.clone(),
        cap: limits.max_count_size,
    }
}

/// An internal flat plan fetching the rows of `entity_type` whose `column`
/// falls in `ids`, projected per `node`. Used for collection loading and for
/// tree ancestor resolution; not paged.
pub fn compile_members(
    entity_type: &EntityTypeMetadata,
    model: &EntityModel,
    node: &ExpandNode,
    column: &str,
    ids: &[i64],
) -> Result<QueryPlan, EngineError> {
    let mut join_paths: Vec<Vec<String>> = vec![];
    node.navigation_join_paths(&[], &mut join_paths);

    let mut columns = vec![];
    project_expansion(node, &[], model, &mut columns)?;
    // the key column always rides along; callers group the rows by it
    if !columns
        .iter()
        .any(|plan_column| plan_column.name == column)
    {
        columns.push(PlanColumn {
            name: column.to_owned(),
            target: PlanTarget::Column(ColumnRef::new(ORIGIN_ALIAS, column)),
        });
    }

    let predicate = Predicate::In {
        target: PlanTarget::Column(ColumnRef::new(ORIGIN_ALIAS, column)),
        values: ids.iter().map(|id| ScalarValue::Int(*id)).collect(),
    };

    Ok(QueryPlan {
        shape: QueryShape::Flat,
        source_table: entity_type.table_name.clone(),
        joins: build_joins(&join_paths, entity_type, model)?,
        columns,
        predicate: Some(predicate),
        group_by: vec![],
        having: None,
        order_by: vec![PlanOrderBy {
            target: PlanTarget::Column(ColumnRef::new(ORIGIN_ALIAS, ID_PROPERTY)),
            descending: false,
        }],
        skip: 0,
        page_size: None,
        fetch_limit: None,
        tree_dimensions: vec![],
    })
}

fn collect_filter_paths(
    permission: Option<&BoundFilter>,
    filter: Option<&BoundFilter>,
    out: &mut Vec<Vec<String>>,
) {
    if let Some(permission) = permission {
        permission.join_paths(out);
    }
    if let Some(filter) = filter {
        filter.join_paths(out);
    }
}
