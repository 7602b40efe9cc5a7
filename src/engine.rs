//! The generic entity query engine: textual query arguments in, flattened
//! typed results out. Each request flows through permissions, parsing,
//! binding, compilation, execution and flattening; nothing here is mutated
//! after construction, so a dropped (canceled) request leaves no trace.

pub mod binder;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod expr;
pub mod flatten;
pub mod metadata;
pub mod permissions;
pub mod result;

#[cfg(test)]
pub(crate) mod fixtures;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use self::{
    binder::{bind_aggregate_select, bind_expansion, bind_fact_select, bind_filter, bind_having,
        bind_order_by, BoundFilter},
    compiler::QueryLimits,
    error::EngineError,
    executor::Backend,
    expr::ast::{CompareOp, FilterExpr, Literal, PathExpr},
    expr::parser,
    metadata::{EntityModel, EntityTypeMetadata},
    permissions::{build_permission_filter, Action, Permission},
    result::{DynamicRow, Entity, FlattenedResult},
};

#[derive(
    Debug, Serialize, Deserialize, Hash, Eq, PartialEq, Clone, Copy, Default, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InactiveRows {
    #[default]
    Exclude,
    Include,
}

/// The textual query arguments, as bound from the request surface.
#[derive(Debug, Clone, Default)]
pub struct QueryArguments {
    pub filter: Option<String>,
    pub order_by: Option<String>,
    /// Applies to order-by clauses that carry no direction of their own
    pub descending: bool,
    pub select: Option<String>,
    pub expand: Option<String>,
    pub search: Option<String>,
    pub inactive: InactiveRows,
    pub skip: u64,
    pub top: Option<u64>,
    pub count_entities: bool,
}

#[derive(Debug)]
pub struct EntitiesResult {
    pub flattened: FlattenedResult,
    pub total_count: Option<u64>,
    pub is_partial: bool,
    pub skip: u64,
    pub top: u64,
    /// The effective ordering, echoed for the caller's next page request
    pub order_by: String,
}

#[derive(Debug)]
pub struct FactResult {
    pub rows: Vec<DynamicRow>,
    pub total_count: Option<u64>,
    pub is_partial: bool,
    pub skip: u64,
    pub top: u64,
    pub order_by: String,
}

#[derive(Debug)]
pub struct AggregateResult {
    pub rows: Vec<DynamicRow>,
    pub dimension_ancestors: Vec<Entity>,
    pub is_partial: bool,
}

fn non_blank(text: &Option<String>) -> Option<&str> {
    text.as_deref().map(str::trim).filter(|t| !t.is_empty())
}

/// The free-text `search` argument is shorthand for an OR of contains
/// comparisons over the type's designated text properties.
fn search_filter(text: &str, root: &EntityTypeMetadata) -> Option<FilterExpr> {
    root.search_properties
        .iter()
        .filter(|name| {
            root.property(name)
                .is_some_and(|p| p.data_type == metadata::DataType::String)
        })
        .map(|name| FilterExpr::Comparison {
            path: PathExpr::root(name.clone()),
            op: CompareOp::Contains,
            literal: Literal::String(text.to_owned()),
        })
        .reduce(FilterExpr::or)
}

fn inactive_filter(inactive: InactiveRows, root: &EntityTypeMetadata) -> Option<FilterExpr> {
    match (inactive, &root.is_active_property) {
        (InactiveRows::Exclude, Some(property)) => Some(FilterExpr::Comparison {
            path: PathExpr::root(property.clone()),
            op: CompareOp::Eq,
            literal: Literal::Bool(true),
        }),
        _ => None,
    }
}

/// Parses and binds the request filter together with its ambient companions
/// (search expansion, soft-deactivation exclusion).
fn bind_request_filter(
    args: &QueryArguments,
    root: &EntityTypeMetadata,
    model: &EntityModel,
) -> Result<Option<BoundFilter>, EngineError> {
    let mut filter: Option<FilterExpr> = match non_blank(&args.filter) {
        Some(text) => Some(parser::parse_filter(text)?),
        None => None,
    };
    if let Some(text) = non_blank(&args.search) {
        if let Some(search) = search_filter(text, root) {
            filter = Some(match filter {
                Some(filter) => filter.and(search),
                None => search,
            });
        }
    }
    if let Some(active) = inactive_filter(args.inactive, root) {
        filter = Some(match filter {
            Some(filter) => filter.and(active),
            None => active,
        });
    }
    filter
        .map(|filter| bind_filter(&filter, root, model))
        .transpose()
}

fn bind_caller_permissions(
    permissions: &[Permission],
    view: &str,
    action: Action,
    root: &EntityTypeMetadata,
    model: &EntityModel,
) -> Result<Option<BoundFilter>, EngineError> {
    build_permission_filter(permissions, view, action)?
        .map(|filter| bind_filter(&filter, root, model))
        .transpose()
}

fn bound_order_by(
    args: &QueryArguments,
    root: &EntityTypeMetadata,
    model: &EntityModel,
) -> Result<(Vec<binder::BoundOrderByItem>, String), EngineError> {
    match non_blank(&args.order_by) {
        Some(text) => {
            let expr = parser::parse_order_by(text)?;
            let bound = bind_order_by(&expr, args.descending, root, model)?;
            Ok((bound, expr.to_string()))
        }
        None => Ok((vec![], metadata::ID_PROPERTY.to_owned())),
    }
}

/// The compiled form of a flat entity query, ready for execution (or for
/// rendering without execution, when the caller only wants the statement).
#[derive(Debug)]
pub struct EntitiesPlan {
    pub plan: compiler::QueryPlan,
    pub expansion: binder::ExpandNode,
    pub order_by: String,
}

pub fn plan_entities_query(
    model: &EntityModel,
    type_name: &str,
    permissions: &[Permission],
    args: &QueryArguments,
    limits: &QueryLimits,
) -> Result<EntitiesPlan, EngineError> {
    let root = model.entity_type(type_name)?;

    let permission = bind_caller_permissions(permissions, type_name, Action::Read, root, model)?;
    let filter = bind_request_filter(args, root, model)?;
    let (order_by, order_by_text) = bound_order_by(args, root, model)?;

    let select = non_blank(&args.select)
        .map(parser::parse_paths)
        .transpose()?;
    let expand = non_blank(&args.expand)
        .map(parser::parse_paths)
        .transpose()?;
    let expansion = bind_expansion(select.as_ref(), expand.as_ref(), root, model)?;

    let plan = compiler::compile_flat(
        root,
        model,
        permission.as_ref(),
        filter.as_ref(),
        &order_by,
        &expansion,
        args.skip,
        args.top,
        limits,
    )?;

    Ok(EntitiesPlan {
        plan,
        expansion,
        order_by: order_by_text,
    })
}

pub async fn run_entities_query<B: Backend>(
    backend: &B,
    model: &EntityModel,
    type_name: &str,
    permissions: &[Permission],
    args: &QueryArguments,
    limits: &QueryLimits,
) -> Result<EntitiesResult, EngineError> {
    let planned = plan_entities_query(model, type_name, permissions, args, limits)?;

    let outcome = executor::execute_flat(
        backend,
        &planned.plan,
        &planned.expansion,
        model,
        args.count_entities,
        limits,
    )
    .await?;

    let flattened = flatten::flatten(outcome.entities, model)?;

    Ok(EntitiesResult {
        flattened,
        total_count: outcome.total_count,
        is_partial: outcome.is_partial,
        skip: planned.plan.skip,
        top: planned.plan.page_size.unwrap_or_default(),
        order_by: planned.order_by,
    })
}

pub async fn run_fact_query<B: Backend>(
    backend: &B,
    model: &EntityModel,
    type_name: &str,
    permissions: &[Permission],
    args: &QueryArguments,
    limits: &QueryLimits,
) -> Result<FactResult, EngineError> {
    let root = model.entity_type(type_name)?;

    let permission = bind_caller_permissions(permissions, type_name, Action::Read, root, model)?;
    let filter = bind_request_filter(args, root, model)?;
    let (order_by, order_by_text) = bound_order_by(args, root, model)?;

    let select_text = non_blank(&args.select).ok_or_else(|| {
        EngineError::Bind("A fact query requires a select argument".to_string())
    })?;
    let select = bind_fact_select(&parser::parse_paths(select_text)?, root, model)?;

    let plan = compiler::compile_fact(
        root,
        model,
        permission.as_ref(),
        filter.as_ref(),
        &order_by,
        &select,
        args.skip,
        args.top,
        limits,
    )?;

    let outcome = executor::execute_fact(backend, &plan, args.count_entities, limits).await?;

    Ok(FactResult {
        rows: outcome.rows,
        total_count: outcome.total_count,
        is_partial: outcome.is_partial,
        skip: plan.skip,
        top: plan.page_size.unwrap_or_default(),
        order_by: order_by_text,
    })
}

pub async fn run_aggregate_query<B: Backend>(
    backend: &B,
    model: &EntityModel,
    type_name: &str,
    permissions: &[Permission],
    args: &QueryArguments,
    having: Option<&str>,
    limits: &QueryLimits,
) -> Result<AggregateResult, EngineError> {
    let root = model.entity_type(type_name)?;

    let permission = bind_caller_permissions(permissions, type_name, Action::Read, root, model)?;
    let filter = bind_request_filter(args, root, model)?;

    let select_text = non_blank(&args.select).ok_or_else(|| {
        EngineError::Bind("An aggregate query requires a select argument".to_string())
    })?;
    let select = parser::parse_aggregate_select(select_text)?;
    let (dimensions, measures) = bind_aggregate_select(&select, root, model)?;

    let having = having
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| bind_having(&parser::parse_having(text)?, root, model))
        .transpose()?;

    let plan = compiler::compile_aggregate(
        root,
        model,
        permission.as_ref(),
        filter.as_ref(),
        &dimensions,
        &measures,
        having.as_ref(),
        args.top,
        limits,
    )?;

    let outcome = executor::execute_aggregate(backend, &plan, model, limits).await?;

    Ok(AggregateResult {
        rows: outcome.rows,
        dimension_ancestors: outcome.dimension_ancestors,
        is_partial: outcome.is_partial,
    })
}
