//! Bootstrap helper that wires config, tracing, state, and health routes
//! together so `conflux-gateway`'s `main` can focus on its own route table.

use axum::{routing::get, Router};

use crate::{
    config::Config,
    error::Result,
    health,
    middleware::jwt::JwksVerifier,
    observability,
    server::Server,
    state::AppState,
};

/// Output of [`ServiceBuilder::build`]: a ready [`AppState`] plus a
/// [`Server`] primed with the same config and shutdown handle, and a
/// [`Router`] pre-populated with `/health`, `/health/ready`, and
/// `/health/pools`.
pub struct BuiltService {
    pub state: AppState,
    pub server: Server,
    pub router: Router<AppState>,
}

/// Loads configuration, initializes tracing, and builds the shared
/// [`AppState`] (database/Redis pools, JWKS verifier, SSE broadcaster,
/// shutdown handle) a service needs before it can add its own routes.
pub struct ServiceBuilder {
    config: Option<Config>,
    jwks: Option<JwksVerifier>,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            jwks: None,
        }
    }

    /// Use an already-loaded config instead of calling [`Config::load`].
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Inject a pre-built JWKS verifier, e.g. for tests.
    pub fn with_jwks(mut self, jwks: JwksVerifier) -> Self {
        self.jwks = Some(jwks);
        self
    }

    pub async fn build(self) -> Result<BuiltService> {
        let config = match self.config {
            Some(config) => config,
            None => Config::load()?,
        };

        observability::init_tracing(&config)?;

        let mut builder = AppState::builder(config.clone());
        if let Some(jwks) = self.jwks {
            builder = builder.jwks(jwks);
        }
        let state = builder.build().await?;
        let shutdown = state.shutdown.clone();

        let router = Router::new()
            .route("/health", get(health::health))
            .route("/health/ready", get(health::readiness))
            .route("/health/pools", get(health::pool_metrics));

        let server = Server::new(config, shutdown);

        Ok(BuiltService {
            state,
            server,
            router,
        })
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.jwks.issuer = "https://issuer.example.com".to_string();
        config.jwks.jwks_url = "https://issuer.example.com/.well-known/jwks.json".to_string();
        config
    }

    #[tokio::test]
    async fn test_build_without_optional_dependencies() {
        let built = ServiceBuilder::new()
            .with_config(test_config())
            .build()
            .await
            .unwrap();
        assert!(built.state.db_pool().await.is_none());
        assert!(!built.state.shutdown.is_shutting_down());
    }
}
