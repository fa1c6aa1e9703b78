use axum::routing::get;
use axum::Router;

use conflux_service::health;
use conflux_service::observability;
use conflux_service::server::Server;
use conflux_service::state::AppState;

use conflux_gateway::config::Config;
use conflux_gateway::registry::Integration;
use conflux_gateway::state::GatewayState;
use conflux_gateway::{integrations, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    observability::init_tracing(&config.service)?;

    let service = AppState::builder(config.service.clone()).build().await?;
    let shutdown = service.shutdown.clone();

    let registry = integrations::register_all();
    let gateway_state = GatewayState::from_service(service, config, registry).await?;

    for integration in gateway_state.registry.iter() {
        if let Some(hook) = integration.as_initializable() {
            if let Err(e) = hook.init(&gateway_state).await {
                tracing::error!(integration = integration.name(), error = %e, "integration init failed");
            }
        }
    }

    gateway_state.pubsub.spawn_relay(shutdown.clone());

    let health_router: Router<()> = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/health/pools", get(health::pool_metrics))
        .with_state(gateway_state.service.clone());

    let app = routes::router(gateway_state.clone()).merge(health_router);

    let server = Server::new(gateway_state.config.service.clone(), shutdown);
    server.serve(app).await?;

    Ok(())
}
