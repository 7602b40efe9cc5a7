use indexmap::IndexMap;

use super::{
    error::EngineError,
    expr::ast::{
        AggregateFunction, AggregateItem, AggregateSelectExpr, CompareOp, ExpandExpr, FilterExpr,
        HavingExpr, Literal, OrderByExpr, PathExpr, SelectExpr,
    },
    metadata::{DataType, EntityModel, EntityTypeMetadata, ID_PROPERTY},
};

/// A comparison leaf with its path resolved: `join_path` names the navigation
/// chain the comparison column lives behind (empty for root columns).
#[derive(Debug, Clone, PartialEq)]
pub struct BoundComparison {
    pub join_path: Vec<String>,
    pub column: String,
    pub data_type: DataType,
    pub op: CompareOp,
    pub literal: Literal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundFilter {
    And(Box<BoundFilter>, Box<BoundFilter>),
    Or(Box<BoundFilter>, Box<BoundFilter>),
    Not(Box<BoundFilter>),
    Comparison(BoundComparison),
}

impl BoundFilter {
    pub fn and(self, other: BoundFilter) -> BoundFilter {
        BoundFilter::And(Box::new(self), Box::new(other))
    }

    /// Collects the navigation join paths this filter requires.
    pub fn join_paths(&self, out: &mut Vec<Vec<String>>) {
        match self {
            BoundFilter::And(left, right) | BoundFilter::Or(left, right) => {
                left.join_paths(out);
                right.join_paths(out);
            }
            BoundFilter::Not(inner) => inner.join_paths(out),
            BoundFilter::Comparison(comparison) => {
                if !comparison.join_path.is_empty() && !out.contains(&comparison.join_path) {
                    out.push(comparison.join_path.clone());
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundOrderByItem {
    pub join_path: Vec<String>,
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundDimension {
    /// The column name the dimension groups by, e.g. the original aggregate select text
    pub name: String,
    pub join_path: Vec<String>,
    pub column: String,
    pub data_type: DataType,
    /// Set when this dimension is a hierarchical entity; names the tree type
    /// whose ancestor rows accompany the result.
    pub tree_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundMeasure {
    pub name: String,
    pub function: AggregateFunction,
    pub join_path: Vec<String>,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundHaving {
    And(Box<BoundHaving>, Box<BoundHaving>),
    Or(Box<BoundHaving>, Box<BoundHaving>),
    Not(Box<BoundHaving>),
    Comparison {
        measure: BoundMeasure,
        op: CompareOp,
        literal: Literal,
    },
}

impl BoundHaving {
    pub fn join_paths(&self, out: &mut Vec<Vec<String>>) {
        match self {
            BoundHaving::And(left, right) | BoundHaving::Or(left, right) => {
                left.join_paths(out);
                right.join_paths(out);
            }
            BoundHaving::Not(inner) => inner.join_paths(out),
            BoundHaving::Comparison { measure, .. } => {
                if !measure.join_path.is_empty() && !out.contains(&measure.join_path) {
                    out.push(measure.join_path.clone());
                }
            }
        }
    }
}

/// One level of the materialization tree for a flat entity query. Navigations
/// load through joins on the same statement; collections load through
/// follow-up statements keyed by the inverse foreign key.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandNode {
    pub type_name: String,
    /// The simple properties to project at this level; None projects them all
    pub properties: Option<Vec<String>>,
    pub navigations: IndexMap<String, ExpandNode>,
    pub collections: IndexMap<String, ExpandNode>,
}

impl ExpandNode {
    pub fn all_of(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_owned(),
            properties: None,
            navigations: IndexMap::new(),
            collections: IndexMap::new(),
        }
    }

    fn restricted(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_owned(),
            properties: Some(vec![]),
            navigations: IndexMap::new(),
            collections: IndexMap::new(),
        }
    }

    fn add_property(&mut self, name: &str) {
        if let Some(properties) = &mut self.properties {
            if !properties.iter().any(|p| p == name) {
                properties.push(name.to_owned());
            }
        }
    }

    /// The navigation join paths reachable from this node without crossing a
    /// collection, prefixed with `prefix`.
    pub fn navigation_join_paths(&self, prefix: &[String], out: &mut Vec<Vec<String>>) {
        for (name, child) in &self.navigations {
            let path = [prefix, &[name.clone()]].concat();
            if !out.contains(&path) {
                out.push(path.clone());
            }
            child.navigation_join_paths(&path, out);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundFactColumn {
    pub name: String,
    pub join_path: Vec<String>,
    pub column: String,
    pub data_type: DataType,
}

fn unknown_path(path: &PathExpr, name: &str, on_type: &str) -> EngineError {
    EngineError::Bind(format!(
        "Unknown property \"{}\" on type \"{}\" in path \"{}\"",
        name, on_type, path
    ))
}

/// Walks the navigation segments of a scalar-terminal path. Collections are
/// rejected here: filtering and ordering across a collection requires an
/// aggregate query instead.
fn resolve_navigations<'a>(
    path: &PathExpr,
    root: &'a EntityTypeMetadata,
    model: &'a EntityModel,
) -> Result<&'a EntityTypeMetadata, EngineError> {
    let mut current = root;
    for segment in &path.segments {
        if current.collection(segment).is_some() {
            return Err(EngineError::Bind(format!(
                "Path \"{}\" traverses the collection property \"{}\" of type \"{}\"; use an aggregate query instead",
                path, segment, current.type_name
            )));
        }
        let navigation = current
            .navigation(segment)
            .ok_or_else(|| unknown_path(path, segment, &current.type_name))?;
        current = model.entity_type(&navigation.target_type)?;
    }
    Ok(current)
}

fn resolve_scalar_path<'a>(
    path: &PathExpr,
    root: &'a EntityTypeMetadata,
    model: &'a EntityModel,
) -> Result<(&'a EntityTypeMetadata, DataType), EngineError> {
    let owner = resolve_navigations(path, root, model)?;
    let property = owner
        .property(&path.property)
        .ok_or_else(|| unknown_path(path, &path.property, &owner.type_name))?;
    Ok((owner, property.data_type))
}

fn check_comparison(
    path: &PathExpr,
    data_type: DataType,
    op: CompareOp,
    literal: &Literal,
) -> Result<(), EngineError> {
    match op {
        CompareOp::Contains | CompareOp::Startswith => {
            if data_type != DataType::String {
                return Err(EngineError::Bind(format!(
                    "Operator \"{}\" requires a String property, but \"{}\" is {}",
                    op, path, data_type
                )));
            }
        }
        CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
            if data_type == DataType::Bool {
                return Err(EngineError::Bind(format!(
                    "Operator \"{}\" cannot order the Bool property \"{}\"",
                    op, path
                )));
            }
        }
        CompareOp::Eq | CompareOp::Ne => (),
    }

    let compatible = match literal {
        Literal::Null => {
            if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                return Err(EngineError::Bind(format!(
                    "null only compares with eq/ne, found \"{}\" on path \"{}\"",
                    op, path
                )));
            }
            true
        }
        Literal::Bool(_) => data_type == DataType::Bool,
        Literal::Int(_) => matches!(data_type, DataType::Int | DataType::Decimal),
        Literal::Decimal(_) => data_type == DataType::Decimal,
        Literal::String(_) => matches!(
            data_type,
            DataType::String | DataType::Date | DataType::DateTime
        ),
    };
    if !compatible {
        return Err(EngineError::Bind(format!(
            "Literal {} is not comparable with the {} property \"{}\"",
            literal, data_type, path
        )));
    }
    Ok(())
}

pub fn bind_filter(
    expr: &FilterExpr,
    root: &EntityTypeMetadata,
    model: &EntityModel,
) -> Result<BoundFilter, EngineError> {
    match expr {
        FilterExpr::And(left, right) => Ok(BoundFilter::And(
            Box::new(bind_filter(left, root, model)?),
            Box::new(bind_filter(right, root, model)?),
        )),
        FilterExpr::Or(left, right) => Ok(BoundFilter::Or(
            Box::new(bind_filter(left, root, model)?),
            Box::new(bind_filter(right, root, model)?),
        )),
        FilterExpr::Not(inner) => Ok(BoundFilter::Not(Box::new(bind_filter(
            inner, root, model,
        )?))),
        FilterExpr::Comparison { path, op, literal } => {
            let (_, data_type) = resolve_scalar_path(path, root, model)?;
            check_comparison(path, data_type, *op, literal)?;
            Ok(BoundFilter::Comparison(BoundComparison {
                join_path: path.segments.clone(),
                column: path.property.clone(),
                data_type,
                op: *op,
                literal: literal.clone(),
            }))
        }
    }
}

pub fn bind_order_by(
    expr: &OrderByExpr,
    default_descending: bool,
    root: &EntityTypeMetadata,
    model: &EntityModel,
) -> Result<Vec<BoundOrderByItem>, EngineError> {
    expr.items
        .iter()
        .map(|item| {
            let (_, data_type) = resolve_scalar_path(&item.path, root, model)?;
            if data_type == DataType::Bool {
                return Err(EngineError::Bind(format!(
                    "Cannot order by the Bool property \"{}\"",
                    item.path
                )));
            }
            Ok(BoundOrderByItem {
                join_path: item.path.segments.clone(),
                column: item.path.property.clone(),
                descending: item.descending.unwrap_or(default_descending),
            })
        })
        .collect()
}

/// Builds the materialization tree from the select and expand arguments.
///
/// Select paths restrict the projected simple properties of the level they
/// terminate in; expand paths (and select paths terminating in a navigation
/// or collection) materialize whole sub-objects with all their properties.
pub fn bind_expansion(
    select: Option<&SelectExpr>,
    expand: Option<&ExpandExpr>,
    root: &EntityTypeMetadata,
    model: &EntityModel,
) -> Result<ExpandNode, EngineError> {
    let mut tree = if select.is_some() {
        ExpandNode::restricted(&root.type_name)
    } else {
        ExpandNode::all_of(&root.type_name)
    };

    if let Some(select) = select {
        for path in &select.paths {
            graft_path(&mut tree, path, true, model)?;
        }
    }
    if let Some(expand) = expand {
        for path in &expand.paths {
            graft_path(&mut tree, path, false, model)?;
        }
    }
    Ok(tree)
}

/// Grafts one dotted path onto the tree. `projecting` distinguishes select
/// paths (terminal simple property restricts the projection) from expand
/// paths (terminal must be a navigation or collection).
fn graft_path(
    tree: &mut ExpandNode,
    path: &PathExpr,
    projecting: bool,
    model: &EntityModel,
) -> Result<(), EngineError> {
    let mut node = tree;
    for segment in &path.segments {
        node = descend(node, segment, path, model)?;
    }

    let node_type = model.entity_type(&node.type_name)?;
    if node_type.property(&path.property).is_some() {
        if !projecting {
            return Err(EngineError::Bind(format!(
                "Expand path \"{}\" ends at the simple property \"{}\"; expand paths must end at a navigation or collection property",
                path, path.property
            )));
        }
        node.add_property(&path.property);
        return Ok(());
    }

    // terminal navigation or collection: include the whole sub-object
    descend(node, &path.property, path, model)?;
    Ok(())
}

fn descend<'tree>(
    node: &'tree mut ExpandNode,
    segment: &str,
    path: &PathExpr,
    model: &EntityModel,
) -> Result<&'tree mut ExpandNode, EngineError> {
    let node_type = model.entity_type(&node.type_name)?;
    if let Some(navigation) = node_type.navigation(segment) {
        let target = navigation.target_type.clone();
        Ok(node
            .navigations
            .entry(segment.to_owned())
            .or_insert_with(|| ExpandNode::all_of(&target)))
    } else if let Some(collection) = node_type.collection(segment) {
        let target = collection.target_type.clone();
        Ok(node
            .collections
            .entry(segment.to_owned())
            .or_insert_with(|| ExpandNode::all_of(&target)))
    } else {
        Err(unknown_path(path, segment, &node_type.type_name))
    }
}

pub fn bind_fact_select(
    select: &SelectExpr,
    root: &EntityTypeMetadata,
    model: &EntityModel,
) -> Result<Vec<BoundFactColumn>, EngineError> {
    select
        .paths
        .iter()
        .map(|path| {
            let (_, data_type) = resolve_scalar_path(path, root, model)?;
            Ok(BoundFactColumn {
                name: path.to_string(),
                join_path: path.segments.clone(),
                column: path.property.clone(),
                data_type,
            })
        })
        .collect()
}

fn bind_measure(
    function: AggregateFunction,
    path: &PathExpr,
    root: &EntityTypeMetadata,
    model: &EntityModel,
) -> Result<BoundMeasure, EngineError> {
    let (_, data_type) = resolve_scalar_path(path, root, model)?;
    match function {
        AggregateFunction::Sum | AggregateFunction::Avg => {
            if !matches!(data_type, DataType::Int | DataType::Decimal) {
                return Err(EngineError::Bind(format!(
                    "{}({}) requires a numeric property, but \"{}\" is {}",
                    function, path, path, data_type
                )));
            }
        }
        AggregateFunction::Min | AggregateFunction::Max => {
            if data_type == DataType::Bool {
                return Err(EngineError::Bind(format!(
                    "{}({}) cannot aggregate a Bool property",
                    function, path
                )));
            }
        }
        AggregateFunction::Count => (),
    }
    Ok(BoundMeasure {
        name: format!("{}({})", function, path),
        function,
        join_path: path.segments.clone(),
        column: path.property.clone(),
    })
}

pub fn bind_aggregate_select(
    select: &AggregateSelectExpr,
    root: &EntityTypeMetadata,
    model: &EntityModel,
) -> Result<(Vec<BoundDimension>, Vec<BoundMeasure>), EngineError> {
    let mut dimensions = vec![];
    let mut measures = vec![];

    for item in &select.items {
        match item {
            AggregateItem::Measure { function, path } => {
                measures.push(bind_measure(*function, path, root, model)?);
            }
            AggregateItem::Dimension(path) => {
                // a dimension terminating at a navigation groups by its
                // foreign key; a tree-typed target additionally yields
                // ancestor rows
                let owner = resolve_navigations(path, root, model)?;
                if let Some(navigation) = owner.navigation(&path.property) {
                    let target = model.entity_type(&navigation.target_type)?;
                    dimensions.push(BoundDimension {
                        name: path.to_string(),
                        join_path: path.segments.clone(),
                        column: navigation.foreign_key_property.clone(),
                        data_type: DataType::Int,
                        tree_type: target.is_tree().then(|| target.type_name.clone()),
                    });
                    continue;
                }

                let property = owner
                    .property(&path.property)
                    .ok_or_else(|| unknown_path(path, &path.property, &owner.type_name))?;
                let tree_type = (property.name == ID_PROPERTY && owner.is_tree())
                    .then(|| owner.type_name.clone());
                dimensions.push(BoundDimension {
                    name: path.to_string(),
                    join_path: path.segments.clone(),
                    column: property.name.clone(),
                    data_type: property.data_type,
                    tree_type,
                });
            }
        }
    }

    Ok((dimensions, measures))
}

pub fn bind_having(
    expr: &HavingExpr,
    root: &EntityTypeMetadata,
    model: &EntityModel,
) -> Result<BoundHaving, EngineError> {
    match expr {
        HavingExpr::And(left, right) => Ok(BoundHaving::And(
            Box::new(bind_having(left, root, model)?),
            Box::new(bind_having(right, root, model)?),
        )),
        HavingExpr::Or(left, right) => Ok(BoundHaving::Or(
            Box::new(bind_having(left, root, model)?),
            Box::new(bind_having(right, root, model)?),
        )),
        HavingExpr::Not(inner) => Ok(BoundHaving::Not(Box::new(bind_having(
            inner, root, model,
        )?))),
        HavingExpr::Comparison {
            function,
            path,
            op,
            literal,
        } => {
            let measure = bind_measure(*function, path, root, model)?;
            if matches!(literal, Literal::Null) {
                return Err(EngineError::Bind(format!(
                    "Aggregate \"{}\" cannot compare with null",
                    measure.name
                )));
            }
            Ok(BoundHaving::Comparison {
                measure,
                op: *op,
                literal: literal.clone(),
            })
        }
    }
}
