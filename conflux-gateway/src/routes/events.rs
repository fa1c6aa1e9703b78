//! SSE push endpoint: `GET /events` (spec.md §4.7, C7).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use conflux_service::error::{Error, Result};
use conflux_service::middleware::jwt::JwksVerifier;
use conflux_service::sse::{ConnectionId, SseConnection};

use crate::state::GatewayState;

/// Turn a JWT `exp` claim (Unix seconds) into a `tokio::time::Instant`
/// deadline. An already-expired `exp` maps to "now" so the write loop tears
/// the connection down on its very next `select!` iteration rather than
/// computing a negative duration.
fn expiry_deadline(exp: i64) -> Instant {
    let now_unix = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    let remaining = (exp - now_unix).max(0) as u64;
    Instant::now() + Duration::from_secs(remaining)
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Pull the bearer token from the `Authorization` header, falling back to
/// a `?token=` query parameter: the browser's `EventSource` primitive
/// can't set arbitrary request headers, so the query string is the only
/// way a plain EventSource client can authenticate (spec.md §4.1).
fn extract_token(headers: &HeaderMap, query: &EventsQuery) -> Result<String> {
    if let Ok(token) = JwksVerifier::extract_token(headers) {
        return Ok(token);
    }
    query
        .token
        .clone()
        .ok_or_else(|| Error::Unauthenticated("missing bearer token".into()))
}

/// `GET /events`: authenticate, subscribe to the caller's per-user
/// channel, and stream frames until the client disconnects, the server
/// shuts down, or the connection is proactively dropped for lagging too
/// far behind (spec.md §4.7's drop-threshold disconnect).
pub async fn stream_events(
    State(state): State<GatewayState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, std::convert::Infallible>>>> {
    let token = extract_token(&headers, &query)?;
    let claims = state.service.jwks.validate_token(&token).await?;
    let user_id = claims.user_id().to_string();

    let broadcaster = state.pubsub.broadcaster().clone();
    let max_connections = state.service.config.sse.max_connections_per_user;
    if broadcaster.subscriber_count(&user_id) >= max_connections {
        return Err(Error::Conflict(format!(
            "maximum of {max_connections} concurrent SSE connections reached for this user"
        )));
    }

    let connection = SseConnection::new(user_id.clone());
    let connection_id = connection.id;

    let mut rx = state.pubsub.subscribe_user(&user_id);
    let heartbeat = state.service.config.sse.heartbeat();
    let write_timeout = state.service.config.sse.write_timeout();
    let drop_threshold = state.service.config.sse.drop_threshold;
    let mut shutdown_rx = state.service.shutdown.subscribe();
    let expiry_deadline = expiry_deadline(claims.exp);

    let (tx, out_rx) = mpsc::channel::<std::result::Result<Event, std::convert::Infallible>>(16);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await; // first tick fires immediately; skip it

        let expiry = tokio::time::sleep_until(expiry_deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Ok(frame) => {
                            let event = Event::default().data(frame.to_string());
                            match tokio::time::timeout(write_timeout, tx.send(Ok(event))).await {
                                Ok(Ok(())) => {}
                                Ok(Err(_)) => break,
                                Err(_) => {
                                    tracing::warn!(user_id = %user_id, connection_id = %connection_id, "SSE write timed out, tearing down");
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            let drops = broadcaster.record_drop(connection_id);
                            if drops >= drop_threshold {
                                tracing::warn!(user_id = %user_id, connection_id = %connection_id, drops, "dropping lagging SSE connection");
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = ticker.tick() => {
                    let event = Event::default().comment("keepalive");
                    match tokio::time::timeout(write_timeout, tx.send(Ok(event))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => break,
                        Err(_) => {
                            tracing::warn!(user_id = %user_id, connection_id = %connection_id, "SSE heartbeat write timed out, tearing down");
                            break;
                        }
                    }
                }
                _ = &mut expiry => {
                    tracing::info!(user_id = %user_id, connection_id = %connection_id, "SSE token expired, tearing down");
                    break;
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        broadcaster.forget_connection(&connection_id);
    });

    Ok(Sse::new(ReceiverStream::new(out_rx)).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_token_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer from-header"));
        let query = EventsQuery { token: Some("from-query".into()) };
        assert_eq!(extract_token(&headers, &query).unwrap(), "from-header");
    }

    #[test]
    fn test_extract_token_falls_back_to_query() {
        let headers = HeaderMap::new();
        let query = EventsQuery { token: Some("from-query".into()) };
        assert_eq!(extract_token(&headers, &query).unwrap(), "from-query");
    }

    #[test]
    fn test_extract_token_missing_is_unauthenticated() {
        let headers = HeaderMap::new();
        let query = EventsQuery { token: None };
        assert!(extract_token(&headers, &query).is_err());
    }

    #[test]
    fn test_expiry_deadline_in_future_is_later_than_now() {
        let now_unix = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let deadline = expiry_deadline(now_unix + 60);
        assert!(deadline > Instant::now());
    }

    #[test]
    fn test_expiry_deadline_in_past_does_not_panic() {
        let now_unix = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let deadline = expiry_deadline(now_unix - 60);
        assert!(deadline <= Instant::now());
    }
}
