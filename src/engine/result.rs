use indexmap::IndexMap;
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

use super::expr::ast::Literal;

/// A single typed column value. Dates travel as strings in their ISO form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(f64),
    String(String),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn from_json(value: &serde_json::Value) -> ScalarValue {
        match value {
            serde_json::Value::Null => ScalarValue::Null,
            serde_json::Value::Bool(b) => ScalarValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ScalarValue::Int(i),
                None => ScalarValue::Decimal(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => ScalarValue::String(s.clone()),
            // nested structures do not occur in row payloads
            other => ScalarValue::String(other.to_string()),
        }
    }
}

impl From<Literal> for ScalarValue {
    fn from(literal: Literal) -> Self {
        match literal {
            Literal::Null => ScalarValue::Null,
            Literal::Bool(b) => ScalarValue::Bool(b),
            Literal::Int(n) => ScalarValue::Int(n),
            Literal::Decimal(n) => ScalarValue::Decimal(n),
            Literal::String(s) => ScalarValue::String(s),
        }
    }
}

/// A materialized entity. `values` holds every projected simple property
/// (including `Id` and foreign keys) plus navigation and collection
/// properties, in projection order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    #[serde(skip)]
    pub type_name: String,
    #[serde(skip)]
    pub id: i64,
    #[serde(flatten)]
    pub values: IndexMap<String, FieldValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(ScalarValue),
    One(Option<Box<Entity>>),
    Many(Vec<Entity>),
}

impl Entity {
    pub fn new(type_name: impl Into<String>, id: i64) -> Self {
        Self {
            type_name: type_name.into(),
            id,
            values: IndexMap::new(),
        }
    }
}

/// A denormalized row with a fixed column order, used by fact and aggregate
/// queries. Serialized as an object whose keys keep the compiled order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DynamicRow(pub Vec<(String, ScalarValue)>);

impl DynamicRow {
    pub fn get(&self, name: &str) -> Option<&ScalarValue> {
        self.0
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }
}

impl Serialize for DynamicRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A flattened result graph: no entity appears twice across `primary` and
/// `related`, and no entity holds a direct reference to another strong
/// entity; navigations are nulled out, foreign-key scalars remain.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct FlattenedResult {
    pub primary: Vec<Entity>,
    pub related: IndexMap<String, Vec<Entity>>,
}
