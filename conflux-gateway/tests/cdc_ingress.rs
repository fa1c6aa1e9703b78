//! Integration coverage for the CDC ingress endpoint (spec.md §4.5, C5):
//! shared-secret auth, per-record isolation, and framework-table routing.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use conflux_gateway::config::{Config, IntegrationsConfig};
use conflux_gateway::registry::{Integration, Registry, Routable};
use conflux_gateway::routes;
use conflux_gateway::state::GatewayState;
use conflux_service::error::Result as SvcResult;

const SHARED_SECRET: &str = "test-shared-secret";

/// Records every table it's asked to route, standing in for a real
/// integration's subscriber-set lookup and publish.
struct RecordingIntegration {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Routable for RecordingIntegration {
    fn handles_table(&self, table_name: &str) -> bool {
        table_name == "trades"
    }

    async fn route_cdc_record(
        &self,
        _state: &GatewayState,
        record: &conflux_gateway::cdc::CdcRecord,
        _payload: &Arc<str>,
    ) -> SvcResult<()> {
        self.log.lock().unwrap().push(record.table_name().to_string());
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
    fn as_routable(&self) -> Option<&dyn Routable> {
        Some(self)
    }
}

async fn test_state(log: Arc<Mutex<Vec<String>>>) -> GatewayState {
    let mut service = conflux_service::config::Config::default();
    service.jwks.issuer = "https://issuer.example.com".to_string();
    service.jwks.jwks_url = "https://issuer.example.com/.well-known/jwks.json".to_string();
    service.cdc.shared_secret = Some(SHARED_SECRET.to_string());

    let config = Config { service, integrations: IntegrationsConfig::default() };

    let mut registry = Registry::new();
    registry.register(Arc::new(RecordingIntegration { log })).unwrap();

    GatewayState::build(config, registry).await.unwrap()
}

fn cdc_request(body: serde_json::Value, secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/internal/cdc").header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("x-cdc-secret", secret);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_missing_secret_is_rejected() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let state = test_state(log.clone()).await;
    let app = routes::router(state);

    let body = serde_json::json!({"records": []});
    let response = app.oneshot(cdc_request(body, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_record_is_skipped_not_batch_rejecting() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let state = test_state(log.clone()).await;
    let app = routes::router(state);

    let body = serde_json::json!({
        "records": [
            {"not_a_valid_cdc_record": true},
            {
                "action": "update",
                "record": {"symbol": "AAPL", "price": "180.5"},
                "metadata": {"table_name": "trades"},
            },
        ]
    });
    let response = app.oneshot(cdc_request(body, Some(SHARED_SECRET))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(log.lock().unwrap().as_slice(), &["trades".to_string()]);
}

#[tokio::test]
async fn test_unroutable_table_is_dropped_silently() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let state = test_state(log.clone()).await;
    let app = routes::router(state);

    let body = serde_json::json!({
        "records": [{
            "action": "insert",
            "record": {"id": "1"},
            "metadata": {"table_name": "nobody_handles_this"},
        }]
    });
    let response = app.oneshot(cdc_request(body, Some(SHARED_SECRET))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(log.lock().unwrap().is_empty());
}
