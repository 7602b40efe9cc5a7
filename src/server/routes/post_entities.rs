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
        api::{EntitiesResponse, GetArguments},
        config::{AppState, CallerPermissions, HeaderSelect, Tenant},
        error::ServerError,
        routes::engine_arguments,
    },
};

#[axum_macros::debug_handler]
pub async fn post_entities(
    State(state): State<Arc<AppState>>,
    Path(type_name): Path<String>,
    Tenant(tenant): Tenant,
    CallerPermissions(permissions): CallerPermissions,
    HeaderSelect(header_select): HeaderSelect,
    WithRejection(Json(arguments), _): WithRejection<Json<GetArguments>, ServerError>,
) -> Result<Json<EntitiesResponse>, ServerError> {
    let model = state.metadata.get(tenant)?;
    let arguments = engine_arguments(arguments, header_select);

    let result = engine::run_entities_query(
        &state.backend,
        &model,
        &type_name,
        &permissions,
        &arguments,
        &state.limits,
    )
    .instrument(info_span!("entities_query", %type_name))
    .await?;

    Ok(Json(EntitiesResponse {
        result: result.flattened.primary,
        related_entities: result.flattened.related,
        total_count: result.total_count,
        is_partial: result.is_partial,
        skip: result.skip,
        top: result.top,
        order_by: result.order_by,
        server_time: chrono::Utc::now(),
    }))
}
