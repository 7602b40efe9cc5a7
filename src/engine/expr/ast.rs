use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A dotted property path: zero or more navigation segments, then a terminal
/// name which may be a simple property or (in select/expand) a navigation or
/// collection property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathExpr {
    pub segments: Vec<String>,
    pub property: String,
}

impl PathExpr {
    pub fn new(segments: Vec<String>, property: String) -> Self {
        Self { segments, property }
    }

    pub fn root(property: impl Into<String>) -> Self {
        Self {
            segments: vec![],
            property: property.into(),
        }
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{}.", segment)?;
        }
        write!(f, "{}", self.property)
    }
}

#[derive(
    Debug, Serialize, Deserialize, Hash, Eq, PartialEq, Clone, Copy, Display, EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    Startswith,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(f64),
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Decimal(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// Boolean filter tree. Leaves compare a path against a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    Comparison {
        path: PathExpr,
        op: CompareOp,
        literal: Literal,
    },
}

impl FilterExpr {
    pub fn and(self, other: FilterExpr) -> FilterExpr {
        FilterExpr::And(Box::new(self), Box::new(other))
    }
    pub fn or(self, other: FilterExpr) -> FilterExpr {
        FilterExpr::Or(Box::new(self), Box::new(other))
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::And(left, right) => write!(f, "({} and {})", left, right),
            FilterExpr::Or(left, right) => write!(f, "({} or {})", left, right),
            FilterExpr::Not(inner) => write!(f, "(not {})", inner),
            FilterExpr::Comparison { path, op, literal } => {
                write!(f, "{} {} {}", path, op, literal)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub path: PathExpr,
    /// None when the clause carries no direction; the request-level `desc`
    /// flag decides then.
    pub descending: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub items: Vec<OrderByItem>,
}

impl fmt::Display for OrderByExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for item in &self.items {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", item.path)?;
            match item.descending {
                Some(true) => write!(f, " desc")?,
                Some(false) => write!(f, " asc")?,
                None => (),
            }
        }
        Ok(())
    }
}

/// A deduplicated set of paths, used for both select and expand arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathSetExpr {
    pub paths: Vec<PathExpr>,
}

impl PathSetExpr {
    pub fn new(paths: Vec<PathExpr>) -> Self {
        let mut deduped: Vec<PathExpr> = vec![];
        for path in paths {
            if !deduped.contains(&path) {
                deduped.push(path);
            }
        }
        Self { paths: deduped }
    }
}

pub type SelectExpr = PathSetExpr;
pub type ExpandExpr = PathSetExpr;

#[derive(
    Debug, Serialize, Deserialize, Hash, Eq, PartialEq, Clone, Copy, Display, EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateItem {
    /// A grouping key
    Dimension(PathExpr),
    /// An aggregated measure
    Measure {
        function: AggregateFunction,
        path: PathExpr,
    },
}

impl fmt::Display for AggregateItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateItem::Dimension(path) => write!(f, "{}", path),
            AggregateItem::Measure { function, path } => write!(f, "{}({})", function, path),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSelectExpr {
    pub items: Vec<AggregateItem>,
}

impl AggregateSelectExpr {
    pub fn dimensions(&self) -> impl Iterator<Item = &PathExpr> {
        self.items.iter().filter_map(|item| match item {
            AggregateItem::Dimension(path) => Some(path),
            AggregateItem::Measure { .. } => None,
        })
    }
    pub fn measures(&self) -> impl Iterator<Item = (&AggregateFunction, &PathExpr)> {
        self.items.iter().filter_map(|item| match item {
            AggregateItem::Measure { function, path } => Some((function, path)),
            AggregateItem::Dimension(_) => None,
        })
    }
}

/// Post-aggregation filter tree. Leaves compare a measure against a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum HavingExpr {
    And(Box<HavingExpr>, Box<HavingExpr>),
    Or(Box<HavingExpr>, Box<HavingExpr>),
    Not(Box<HavingExpr>),
    Comparison {
        function: AggregateFunction,
        path: PathExpr,
        op: CompareOp,
        literal: Literal,
    },
}
