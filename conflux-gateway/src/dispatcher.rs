//! Stream-Lifecycle Dispatcher (spec.md §4.8, C8).
//!
//! Translates `UserStream` CRUD into integration lifecycle-hook calls and
//! the subscriber-set mutations they perform. Every operation must be
//! safely repeatable (spec.md's idempotence requirement); the hooks
//! themselves, not the dispatcher, own that guarantee since only they
//! know their own set-membership semantics.

use serde_json::Value;

use crate::state::GatewayState;

/// The four event kinds the dispatcher reacts to (spec.md §4.8 table).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Created { user_id: String, integration: String, config: Value },
    Updated { user_id: String, integration: String, old_config: Value, new_config: Value, enabled: bool },
    Deleted { user_id: String, integration: String, config: Value },
    Sync { user_id: String, integration: String, config: Value, enabled: bool },
}

impl StreamEvent {
    fn integration_name(&self) -> &str {
        match self {
            StreamEvent::Created { integration, .. }
            | StreamEvent::Updated { integration, .. }
            | StreamEvent::Deleted { integration, .. }
            | StreamEvent::Sync { integration, .. } => integration,
        }
    }
}

/// Dispatch one lifecycle event. Failures are logged, never propagated to
/// the HTTP caller -- a lifecycle hook failing to update a subscriber set
/// degrades that one integration's fan-out, not the API response the user
/// is waiting on.
pub async fn dispatch(state: &GatewayState, event: StreamEvent) {
    let name = event.integration_name().to_string();
    let Some(integration) = state.registry.get(&name) else {
        tracing::debug!(integration = %name, "stream event for unregistered integration, ignoring");
        return;
    };
    let Some(hooks) = integration.as_lifecycled() else {
        tracing::debug!(integration = %name, "integration has no lifecycle hooks, ignoring");
        return;
    };

    let result = match &event {
        StreamEvent::Created { user_id, config, .. } => {
            if let Err(e) = hooks.on_stream_created(state, user_id, config).await {
                tracing::warn!(integration = %name, user_id, error = %e, "OnStreamCreated failed");
            }
            hooks.on_sync_subscriptions(state, user_id, config, true).await
        }
        StreamEvent::Updated { user_id, old_config, new_config, enabled, .. } => {
            hooks.on_stream_updated(state, user_id, old_config, new_config, *enabled).await
        }
        StreamEvent::Deleted { user_id, config, .. } => hooks.on_stream_deleted(state, user_id, config).await,
        StreamEvent::Sync { user_id, config, enabled, .. } => {
            hooks.on_sync_subscriptions(state, user_id, config, *enabled).await
        }
    };

    if let Err(e) = result {
        tracing::warn!(integration = %name, event = ?event, error = %e, "lifecycle hook failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_name_extraction() {
        let event = StreamEvent::Created {
            user_id: "u1".into(),
            integration: "finance".into(),
            config: serde_json::json!({}),
        };
        assert_eq!(event.integration_name(), "finance");
    }
}
