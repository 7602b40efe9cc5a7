use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use axum_extra::extract::WithRejection;
use tracing::{info_span, Instrument};

use crate::{
    engine,
    server::{
        api::{AggregateArguments, AggregateResponse},
        config::{AppState, CallerPermissions, HeaderSelect, Tenant},
        error::ServerError,
        routes::engine_arguments,
    },
};

#[axum_macros::debug_handler]
pub async fn post_aggregate(
    State(state): State<Arc<AppState>>,
    Path(type_name): Path<String>,
    Tenant(tenant): Tenant,
    CallerPermissions(permissions): CallerPermissions,
    HeaderSelect(header_select): HeaderSelect,
    WithRejection(Json(arguments), _): WithRejection<Json<AggregateArguments>, ServerError>,
) -> Result<Json<AggregateResponse>, ServerError> {
    let model = state.metadata.get(tenant)?;
    let having = arguments.having;
    let arguments = engine_arguments(arguments.arguments, header_select);

    let result = engine::run_aggregate_query(
        &state.backend,
        &model,
        &type_name,
        &permissions,
        &arguments,
        having.as_deref(),
        &state.limits,
    )
    .instrument(info_span!("aggregate_query", %type_name))
    .await?;

    Ok(Json(AggregateResponse {
        result: result.rows,
        dimension_ancestors: result.dimension_ancestors,
        is_partial: result.is_partial,
        server_time: chrono::Utc::now(),
    }))
}
