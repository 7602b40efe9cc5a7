use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use axum_extra::extract::WithRejection;

use crate::{
    engine,
    server::{
        api::{ExplainResponse, GetArguments},
        config::{AppState, CallerPermissions, HeaderSelect, Tenant},
        error::ServerError,
        routes::engine_arguments,
    },
    sql,
};

/// Compiles a flat entity query and returns the SQL it would execute,
/// without touching the backend.
#[axum_macros::debug_handler]
pub async fn post_explain(
    State(state): State<Arc<AppState>>,
    Path(type_name): Path<String>,
    Tenant(tenant): Tenant,
    CallerPermissions(permissions): CallerPermissions,
    HeaderSelect(header_select): HeaderSelect,
    WithRejection(Json(arguments), _): WithRejection<Json<GetArguments>, ServerError>,
) -> Result<Json<ExplainResponse>, ServerError> {
    let model = state.metadata.get(tenant)?;
    let arguments = engine_arguments(arguments, header_select);

    let planned = engine::plan_entities_query(
        &model,
        &type_name,
        &permissions,
        &arguments,
        &state.limits,
    )?;
    let statement = sql::build_query_statement(&planned.plan);

    Ok(Json(ExplainResponse {
        query: statement.to_string(),
    }))
}
