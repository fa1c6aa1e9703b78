//! Integration coverage for the stream-lifecycle dispatcher (spec.md §4.8, C8):
//! event-to-hook routing and the `enabled` toggle threaded into sync calls.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use conflux_gateway::config::{Config, IntegrationsConfig};
use conflux_gateway::dispatcher::{self, StreamEvent};
use conflux_gateway::registry::{Integration, Lifecycled, Registry};
use conflux_gateway::state::GatewayState;
use conflux_service::error::Result as SvcResult;

/// Records every lifecycle hook call it receives, in order, so a test can
/// assert both which hooks fired and in what sequence.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

struct RecordingIntegration {
    recorder: Arc<Recorder>,
}

#[async_trait::async_trait]
impl Lifecycled for RecordingIntegration {
    async fn on_stream_created(&self, _state: &GatewayState, user_id: &str, _config: &Value) -> SvcResult<()> {
        self.recorder.calls.lock().unwrap().push(format!("created:{user_id}"));
        Ok(())
    }

    async fn on_stream_updated(
        &self,
        _state: &GatewayState,
        user_id: &str,
        _old_config: &Value,
        _new_config: &Value,
        enabled: bool,
    ) -> SvcResult<()> {
        self.recorder.calls.lock().unwrap().push(format!("updated:{user_id}:{enabled}"));
        Ok(())
    }

    async fn on_stream_deleted(&self, _state: &GatewayState, user_id: &str, _config: &Value) -> SvcResult<()> {
        self.recorder.calls.lock().unwrap().push(format!("deleted:{user_id}"));
        Ok(())
    }

    async fn on_sync_subscriptions(
        &self,
        _state: &GatewayState,
        user_id: &str,
        _config: &Value,
        enabled: bool,
    ) -> SvcResult<()> {
        self.recorder.calls.lock().unwrap().push(format!("sync:{user_id}:{enabled}"));
        Ok(())
    }
}

impl Integration for RecordingIntegration {
    fn name(&self) -> &str {
        "finance"
    }
    fn display_name(&self) -> &str {
        "Finance"
    }
    fn as_lifecycled(&self) -> Option<&dyn Lifecycled> {
        Some(self)
    }
}

async fn test_state(recorder: Arc<Recorder>) -> GatewayState {
    let mut service = conflux_service::config::Config::default();
    service.jwks.issuer = "https://issuer.example.com".to_string();
    service.jwks.jwks_url = "https://issuer.example.com/.well-known/jwks.json".to_string();

    let config = Config { service, integrations: IntegrationsConfig::default() };

    let mut registry = Registry::new();
    registry.register(Arc::new(RecordingIntegration { recorder })).unwrap();

    GatewayState::build(config, registry).await.unwrap()
}

#[tokio::test]
async fn test_created_event_triggers_created_then_sync() {
    let recorder = Arc::new(Recorder::default());
    let state = test_state(recorder.clone()).await;

    dispatcher::dispatch(&state, StreamEvent::Created {
        user_id: "u1".into(),
        integration: "finance".into(),
        config: serde_json::json!({"symbols": ["AAPL"]}),
    })
    .await;

    let calls = recorder.calls.lock().unwrap();
    assert_eq!(calls.as_slice(), &["created:u1".to_string(), "sync:u1:true".to_string()]);
}

#[tokio::test]
async fn test_updated_event_threads_enabled_flag() {
    let recorder = Arc::new(Recorder::default());
    let state = test_state(recorder.clone()).await;

    dispatcher::dispatch(&state, StreamEvent::Updated {
        user_id: "u1".into(),
        integration: "finance".into(),
        old_config: serde_json::json!({"symbols": ["AAPL"]}),
        new_config: serde_json::json!({"symbols": ["AAPL", "MSFT"]}),
        enabled: false,
    })
    .await;

    let calls = recorder.calls.lock().unwrap();
    assert_eq!(calls.as_slice(), &["updated:u1:false".to_string()]);
}

#[tokio::test]
async fn test_deleted_event_does_not_sync() {
    let recorder = Arc::new(Recorder::default());
    let state = test_state(recorder.clone()).await;

    dispatcher::dispatch(&state, StreamEvent::Deleted {
        user_id: "u1".into(),
        integration: "finance".into(),
        config: serde_json::json!({"symbols": ["AAPL"]}),
    })
    .await;

    let calls = recorder.calls.lock().unwrap();
    assert_eq!(calls.as_slice(), &["deleted:u1".to_string()]);
}

#[tokio::test]
async fn test_unregistered_integration_is_ignored() {
    let recorder = Arc::new(Recorder::default());
    let state = test_state(recorder.clone()).await;

    dispatcher::dispatch(&state, StreamEvent::Sync {
        user_id: "u1".into(),
        integration: "not-registered".into(),
        config: serde_json::json!({}),
        enabled: true,
    })
    .await;

    assert!(recorder.calls.lock().unwrap().is_empty());
}
