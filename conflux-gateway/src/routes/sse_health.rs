//! `GET /health/sse`: per-user fan-out diagnostics, the SSE analogue of
//! `conflux_service::health::pool_metrics` (spec.md §4.6, §9 "structured
//! per-connection drop metering").

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::state::GatewayState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SseHealth {
    pub active_users: usize,
    pub relay_enabled: bool,
}

pub async fn sse_health(State(state): State<GatewayState>) -> Json<SseHealth> {
    Json(SseHealth {
        active_users: state.pubsub.broadcaster().active_user_count(),
        relay_enabled: state.service.config.redis.is_some(),
    })
}
