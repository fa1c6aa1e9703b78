//! `GET /dashboard`: thin HTTP wrapper around [`crate::snapshot`].

use axum::{extract::State, Extension, Json};
use std::collections::HashMap;

use conflux_service::error::Result;
use conflux_service::middleware::Claims;

use crate::snapshot;
use crate::state::GatewayState;

pub async fn get_dashboard(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<HashMap<String, serde_json::Value>>> {
    Ok(Json(snapshot::get_dashboard(&state, claims.user_id()).await?))
}
