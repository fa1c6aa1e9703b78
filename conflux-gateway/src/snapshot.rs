//! Dashboard Snapshot Service (spec.md §4.9, C9).
//!
//! Aggregates one JSON blob per enabled, visible stream. A single
//! integration's snapshot failing (upstream outage, bad cached data) must
//! not take down the whole dashboard response -- its key is simply
//! omitted and the failure logged (spec.md §4.9, "partial results").

use std::collections::HashMap;

use serde_json::Value;

use conflux_service::error::Result;

use crate::dispatcher::{self, StreamEvent};
use crate::state::GatewayState;
use crate::streams::StreamStore;

/// Build the per-integration dashboard for `user_id` (spec.md §4.9):
/// every enabled, visible stream whose integration implements
/// `Snapshottable` contributes one entry, keyed by integration name.
///
/// Every enabled stream also gets a `Sync` lifecycle dispatch first --
/// spec.md §9's "periodic warm-up (Sync lifecycle event on each dashboard
/// load) is the recovery mechanism from a cold KV" -- so a subscriber set
/// that was lost (KV restart, cold replica) is rebuilt from the
/// authoritative `UserStream.config` before the client starts relying on
/// SSE delivery for these resources.
pub async fn get_dashboard(state: &GatewayState, user_id: &str) -> Result<HashMap<String, Value>> {
    let pool = state
        .service
        .db_pool()
        .await
        .ok_or_else(|| conflux_service::error::Error::Unavailable("database not configured".into()))?;
    let store = StreamStore::new(pool);
    let streams = store.list(user_id).await?;

    for stream in streams.iter().filter(|s| s.enabled) {
        dispatcher::dispatch(state, StreamEvent::Sync {
            user_id: user_id.to_string(),
            integration: stream.integration.clone(),
            config: stream.config.clone(),
            enabled: true,
        })
        .await;
    }

    let mut dashboard = HashMap::with_capacity(streams.len());
    for stream in streams.into_iter().filter(|s| s.enabled && s.visible) {
        let Some(integration) = state.registry.get(&stream.integration) else {
            tracing::debug!(integration = %stream.integration, "stream references unregistered integration");
            continue;
        };
        let Some(snapshottable) = integration.as_snapshottable() else {
            continue;
        };
        match snapshottable.get_dashboard_data(state, user_id, &stream).await {
            Ok(data) => {
                dashboard.insert(stream.integration, data);
            }
            Err(e) => {
                tracing::warn!(integration = %stream.integration, user_id, error = %e, "dashboard snapshot failed, omitting");
            }
        }
    }

    Ok(dashboard)
}
