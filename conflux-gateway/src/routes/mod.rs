//! HTTP route table: user-facing routes (JWT + rate-limit protected) plus
//! the internal CDC ingress (shared-secret protected, no JWT).

pub mod dashboard;
pub mod events;
pub mod sse_health;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};

use conflux_service::middleware::jwt::JwksVerifier;
use conflux_service::middleware::rate_limit::RateLimit;

use crate::cdc;
use crate::state::GatewayState;
use crate::streams;

/// Build the full gateway route table against an already-assembled
/// [`GatewayState`]. JWT validation and per-user rate limiting apply to
/// every user-facing route except `/events`; the CDC ingress authenticates
/// separately via its own shared-secret check (spec.md §4.5), and `/events`
/// authenticates itself via [`events::stream_events`]'s own dual
/// header-or-query-parameter token extraction (spec.md §4.1, §4.7) -- both
/// are deliberately kept outside the JWT middleware stack. A browser
/// `EventSource` cannot set an `Authorization` header, so if `/events` sat
/// behind `JwksVerifier::middleware` a token-less request would be 401'd
/// before the handler's own query-parameter fallback ever ran.
pub fn router(state: GatewayState) -> Router<()> {
    let mut user_routes = Router::new()
        .route("/dashboard", get(dashboard::get_dashboard))
        .route("/streams", get(streams::list_streams).post(streams::create_stream))
        .route(
            "/streams/{integration}",
            put(streams::update_stream).delete(streams::delete_stream),
        )
        .route(
            "/preferences",
            get(streams::get_preferences).put(streams::update_preferences),
        );

    if let Some(redis_pool) = try_redis_pool(&state) {
        let rate_limit = RateLimit::new(state.service.config.rate_limit.clone(), redis_pool);
        user_routes = user_routes.layer(from_fn_with_state(rate_limit, RateLimit::middleware));
    }

    user_routes = user_routes.layer(from_fn_with_state((*state.service.jwks).clone(), JwksVerifier::middleware));

    let events_routes = Router::new().route("/events", get(events::stream_events));
    let internal_routes = Router::new().route("/internal/cdc", post(cdc::ingest));
    let diagnostic_routes = Router::new().route("/health/sse", get(sse_health::sse_health));

    Router::new()
        .merge(user_routes)
        .merge(events_routes)
        .merge(internal_routes)
        .merge(diagnostic_routes)
        .with_state(state)
}

/// Rate limiting needs a Redis pool synchronously at router-build time;
/// the pool may still be initializing in the background (`lazy_init`), in
/// which case rate limiting is simply not layered on -- spec.md treats
/// Redis as best-effort infrastructure, not a hard dependency of request
/// handling.
fn try_redis_pool(state: &GatewayState) -> Option<deadpool_redis::Pool> {
    state.service.redis_pool.try_read().ok().and_then(|guard| guard.clone())
}
