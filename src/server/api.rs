use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

mod error_response;

pub use error_response::{ErrorResponse, ErrorResponseType};

use crate::engine::{
    result::{DynamicRow, Entity},
    InactiveRows,
};

/// The query arguments accepted by the entities, fact and aggregate routes.
/// All fields are optional; absent text arguments mean "not supplied".
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetArguments {
    /// Filter-grammar text restricting the returned rows
    pub filter: Option<String>,
    /// OrderBy-grammar text
    pub orderby: Option<String>,
    /// Applies to orderby clauses that carry no direction of their own
    #[serde(default)]
    pub desc: bool,
    /// Dotted paths to project; may also arrive via the X-Query-Select header
    pub select: Option<String>,
    /// Dotted paths to materialize as nested objects
    pub expand: Option<String>,
    pub top: Option<u64>,
    #[serde(default)]
    pub skip: u64,
    /// Free-text shorthand, expanded over the type's search properties
    pub search: Option<String>,
    #[serde(default)]
    pub inactive: InactiveRows,
    #[serde(default, rename = "countEntities")]
    pub count_entities: bool,
}

/// The aggregate route additionally accepts a having argument; its select is
/// read in the aggregate grammar (grouping paths and measures).
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateArguments {
    #[serde(flatten)]
    pub arguments: GetArguments,
    pub having: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesResponse {
    pub result: Vec<Entity>,
    pub related_entities: IndexMap<String, Vec<Entity>>,
    pub total_count: Option<u64>,
    pub is_partial: bool,
    pub skip: u64,
    pub top: u64,
    pub order_by: String,
    pub server_time: chrono::DateTime<chrono::Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactResponse {
    pub result: Vec<DynamicRow>,
    /// Always empty for fact rows; kept so flat and fact envelopes agree
    pub related_entities: IndexMap<String, Vec<Entity>>,
    pub total_count: Option<u64>,
    pub is_partial: bool,
    pub skip: u64,
    pub top: u64,
    pub order_by: String,
    pub server_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResponse {
    pub result: Vec<DynamicRow>,
    pub dimension_ancestors: Vec<Entity>,
    pub is_partial: bool,
    pub server_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResponse {
    /// The generated SQL statement
    pub query: String,
}
