use std::collections::{HashMap, HashSet};

use axum::async_trait;
use indexmap::IndexMap;

use super::{
    binder::ExpandNode,
    compiler::{self, CountPlan, QueryLimits, QueryPlan},
    error::EngineError,
    metadata::{EntityModel, ID_PROPERTY},
    result::{DynamicRow, Entity, FieldValue, ScalarValue},
};

/// One result row as returned by the backend: projected column name to value.
pub type SqlRow = IndexMap<String, serde_json::Value>;

/// The relational backend seam. The production implementation renders a plan
/// to SQL and posts it over HTTP; tests interpret plans over fixture tables.
/// Connectivity failures surface unchanged; the engine never retries.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn run(&self, plan: &QueryPlan) -> Result<Vec<SqlRow>, EngineError>;
    async fn count(&self, plan: &CountPlan) -> Result<u64, EngineError>;
}

#[derive(Debug)]
pub struct FlatOutcome {
    pub entities: Vec<Entity>,
    pub total_count: Option<u64>,
    pub is_partial: bool,
}

#[derive(Debug)]
pub struct FactOutcome {
    pub rows: Vec<DynamicRow>,
    pub total_count: Option<u64>,
    pub is_partial: bool,
}

#[derive(Debug)]
pub struct AggregateOutcome {
    pub rows: Vec<DynamicRow>,
    pub dimension_ancestors: Vec<Entity>,
    pub is_partial: bool,
}

/// Fetches one page plus the detection row, truncating to the page and
/// reporting whether the result was cut short.
fn take_page(mut rows: Vec<SqlRow>, page_size: Option<u64>) -> (Vec<SqlRow>, bool) {
    match page_size {
        Some(page_size) if rows.len() as u64 > page_size => {
            rows.truncate(page_size as usize);
            (rows, true)
        }
        _ => (rows, false),
    }
}

async fn total_count<B: Backend>(
    backend: &B,
    plan: &QueryPlan,
    requested: bool,
    limits: &QueryLimits,
) -> Result<Option<u64>, EngineError> {
    if !requested {
        return Ok(None);
    }
    let count = backend.count(&compiler::compile_count(plan, limits)).await?;
    // past the cap the exact count is unknown, not an error
    Ok((count <= limits.max_count_size).then_some(count))
}

pub async fn execute_flat<B: Backend>(
    backend: &B,
    plan: &QueryPlan,
    expansion: &ExpandNode,
    model: &EntityModel,
    count_requested: bool,
    limits: &QueryLimits,
) -> Result<FlatOutcome, EngineError> {
    let rows = backend.run(plan).await?;
    let (rows, is_partial) = take_page(rows, plan.page_size);

    let mut entities: Vec<Entity> = rows
        .iter()
        .filter_map(|row| materialize(expansion, &[], row, model).transpose())
        .collect::<Result<_, _>>()?;

    load_collections(backend, model, expansion, entities.iter_mut().collect()).await?;

    let total_count = total_count(backend, plan, count_requested, limits).await?;

    Ok(FlatOutcome {
        entities,
        total_count,
        is_partial,
    })
}

pub async fn execute_fact<B: Backend>(
    backend: &B,
    plan: &QueryPlan,
    count_requested: bool,
    limits: &QueryLimits,
) -> Result<FactOutcome, EngineError> {
    let rows = backend.run(plan).await?;
    let (rows, is_partial) = take_page(rows, plan.page_size);

    let rows = rows.iter().map(|row| dynamic_row(plan, row)).collect();
    let total_count = total_count(backend, plan, count_requested, limits).await?;

    Ok(FactOutcome {
        rows,
        total_count,
        is_partial,
    })
}

pub async fn execute_aggregate<B: Backend>(
    backend: &B,
    plan: &QueryPlan,
    model: &EntityModel,
    limits: &QueryLimits,
) -> Result<AggregateOutcome, EngineError> {
    let rows = backend.run(plan).await?;
    let page_size = plan.page_size.unwrap_or(u64::MAX);
    let overflowed = rows.len() as u64 > page_size;
    if overflowed && page_size >= limits.max_aggregate_result_size {
        // the server-side cap cut the result: refuse rather than truncate
        return Err(EngineError::ResultTooLarge { cap: page_size });
    }
    let (rows, is_partial) = take_page(rows, plan.page_size);

    let rows: Vec<DynamicRow> = rows.iter().map(|row| dynamic_row(plan, row)).collect();

    let dimension_ancestors = resolve_dimension_ancestors(backend, plan, model, &rows).await?;

    Ok(AggregateOutcome {
        rows,
        dimension_ancestors,
        is_partial,
    })
}

fn dynamic_row(plan: &QueryPlan, row: &SqlRow) -> DynamicRow {
    DynamicRow(
        plan.columns
            .iter()
            .map(|column| {
                let value = row
                    .get(&column.name)
                    .map(ScalarValue::from_json)
                    .unwrap_or(ScalarValue::Null);
                (column.name.clone(), value)
            })
            .collect(),
    )
}

/// Builds the entity at `prefix` out of one result row. A missed LEFT join
/// leaves the prefix's key column null and the whole sub-entity absent.
fn materialize(
    node: &ExpandNode,
    prefix: &[String],
    row: &SqlRow,
    model: &EntityModel,
) -> Result<Option<Entity>, EngineError> {
    let column_name = |property: &str| {
        if prefix.is_empty() {
            property.to_owned()
        } else {
            format!("{}.{}", prefix.join("."), property)
        }
    };

    let id = match row.get(&column_name(ID_PROPERTY)) {
        Some(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(id) => id,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };

    let mut entity = Entity::new(&node.type_name, id);
    for property in compiler::projected_properties(node, model)? {
        let value = row
            .get(&column_name(&property))
            .map(ScalarValue::from_json)
            .unwrap_or(ScalarValue::Null);
        entity.values.insert(property, FieldValue::Scalar(value));
    }

    for (navigation_name, child) in &node.navigations {
        let child_prefix = [prefix, &[navigation_name.clone()]].concat();
        let child_entity = materialize(child, &child_prefix, row, model)?;
        entity.values.insert(
            navigation_name.clone(),
            FieldValue::One(child_entity.map(Box::new)),
        );
    }
    Ok(Some(entity))
}

/// Loads every collection subtree reachable from `node` for `parents`, one
/// statement per collection, keyed by the inverse foreign key. Children are
/// materialized, recursed into, then distributed onto their parents;
/// navigation children already materialized by the joins are walked so their
/// own collections load too.
async fn load_collections<B: Backend>(
    backend: &B,
    model: &EntityModel,
    node: &ExpandNode,
    mut parents: Vec<&mut Entity>,
) -> Result<(), EngineError> {
    for (collection_name, child_node) in &node.collections {
        let node_type = model.entity_type(&node.type_name)?;
        let descriptor = node_type.collection(collection_name).ok_or_else(|| {
            EngineError::Internal(format!(
                "collection \"{}\" vanished after binding",
                collection_name
            ))
        })?;
        let child_type = model.entity_type(&descriptor.target_type)?;

        let parent_ids: Vec<i64> = parents.iter().map(|parent| parent.id).collect();
        if parent_ids.is_empty() {
            continue;
        }

        let plan = compiler::compile_members(
            child_type,
            model,
            child_node,
            &descriptor.inverse_foreign_key,
            &parent_ids,
        )?;
        let rows = backend.run(&plan).await?;

        let mut children: Vec<Entity> = vec![];
        let mut child_parents: Vec<i64> = vec![];
        for row in &rows {
            if let Some(child) = materialize(child_node, &[], row, model)? {
                let parent_id = row
                    .get(&descriptor.inverse_foreign_key)
                    .and_then(serde_json::Value::as_i64)
                    .ok_or_else(|| {
                        EngineError::Internal(format!(
                            "collection row of \"{}\" is missing \"{}\"",
                            descriptor.target_type, descriptor.inverse_foreign_key
                        ))
                    })?;
                children.push(child);
                child_parents.push(parent_id);
            }
        }

        // depth-first: grandchildren attach before children are handed out
        Box::pin(load_collections(
            backend,
            model,
            child_node,
            children.iter_mut().collect(),
        ))
        .await?;

        let mut grouped: HashMap<i64, Vec<Entity>> = HashMap::new();
        for (child, parent_id) in children.into_iter().zip(child_parents) {
            grouped.entry(parent_id).or_default().push(child);
        }
        for parent in parents.iter_mut() {
            let members = grouped.remove(&parent.id).unwrap_or_default();
            parent
                .values
                .insert(collection_name.clone(), FieldValue::Many(members));
        }
    }

    for (navigation_name, child_node) in &node.navigations {
        if !has_nested_collections(child_node) {
            continue;
        }
        let children: Vec<&mut Entity> = parents
            .iter_mut()
            .filter_map(|parent| match parent.values.get_mut(navigation_name) {
                Some(FieldValue::One(Some(child))) => Some(child.as_mut()),
                _ => None,
            })
            .collect();
        Box::pin(load_collections(backend, model, child_node, children)).await?;
    }

    Ok(())
}

fn has_nested_collections(node: &ExpandNode) -> bool {
    !node.collections.is_empty()
        || node.navigations.values().any(has_nested_collections)
}

/// Walks each tree dimension from the returned leaves up to the roots,
/// fetching every ancestor level with one `Id IN (…)` statement. The leaves
/// themselves are fetched only to discover their parents; the output holds
/// proper ancestors.
async fn resolve_dimension_ancestors<B: Backend>(
    backend: &B,
    plan: &QueryPlan,
    model: &EntityModel,
    rows: &[DynamicRow],
) -> Result<Vec<Entity>, EngineError> {
    let mut ancestors: Vec<Entity> = vec![];

    for dimension in &plan.tree_dimensions {
        let tree_type = model.entity_type(&dimension.tree_type)?;
        let parent_key = tree_type.tree_parent_foreign_key().ok_or_else(|| {
            EngineError::Internal(format!(
                "tree type \"{}\" has no parent navigation",
                dimension.tree_type
            ))
        })?;

        let leaf_ids: Vec<i64> = rows
            .iter()
            .filter_map(|row| row.get(&dimension.column_name).and_then(ScalarValue::as_int))
            .collect();
        let mut seen: HashSet<i64> = leaf_ids.iter().copied().collect();

        let node = ExpandNode::all_of(&tree_type.type_name);
        let mut frontier = leaf_ids;
        let mut emit = false;
        while !frontier.is_empty() {
            frontier.sort_unstable();
            frontier.dedup();
            let plan =
                compiler::compile_members(tree_type, model, &node, ID_PROPERTY, &frontier)?;
            let rows = backend.run(&plan).await?;

            let mut next: Vec<i64> = vec![];
            for row in &rows {
                if let Some(entity) = materialize(&node, &[], row, model)? {
                    if let Some(FieldValue::Scalar(parent)) = entity.values.get(parent_key) {
                        if let Some(parent_id) = parent.as_int() {
                            if seen.insert(parent_id) {
                                next.push(parent_id);
                            }
                        }
                    }
                    if emit {
                        ancestors.push(entity);
                    }
                }
            }
            frontier = next;
            emit = true;
        }
    }

    Ok(ancestors)
}
