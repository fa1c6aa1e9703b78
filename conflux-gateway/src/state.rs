//! Gateway-wide shared state: the ambient [`AppState`] plus the pub/sub
//! façade and the integration registry.

use std::sync::Arc;

use conflux_service::error::Result;
use conflux_service::state::AppState;

use crate::config::Config;
use crate::pubsub::PubSub;
use crate::registry::Registry;

#[derive(Clone)]
pub struct GatewayState {
    pub service: AppState,
    pub pubsub: PubSub,
    pub registry: Arc<Registry>,
    pub config: Arc<Config>,
}

impl GatewayState {
    /// Build the ambient [`AppState`] (pools, JWKS verifier, broadcaster,
    /// shutdown handle), then layer the pub/sub façade and the
    /// already-populated integration registry on top. Used by tests that
    /// don't need the `/health` router `ServiceBuilder` also produces.
    pub async fn build(config: Config, registry: Registry) -> Result<Self> {
        let service = AppState::builder(config.service.clone()).build().await?;
        Self::from_service(service, config, registry).await
    }

    /// Layer the gateway's own state on top of an already-built
    /// [`AppState`] -- the shape `main` uses, since `ServiceBuilder`
    /// already constructs `AppState` while assembling the `/health`
    /// router and there is no reason to build it twice.
    pub async fn from_service(service: AppState, config: Config, registry: Registry) -> Result<Self> {
        let redis_pool = service.redis_pool().await;
        let redis_url = config.service.redis.as_ref().map(|r| r.url.clone());
        let pubsub = PubSub::new(redis_pool, redis_url, service.broadcaster.clone());

        Ok(Self {
            service,
            pubsub,
            registry: Arc::new(registry),
            config: Arc::new(config),
        })
    }
}
