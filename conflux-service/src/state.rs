//! Shared application state and its builder.
//!
//! Database and Redis access are optional dependencies of the ambient
//! layer: a deployment that runs only broadcast-style integrations may
//! omit Redis entirely and fall back to the in-process broadcaster, and
//! ownership lookups that need Postgres are only exercised by the
//! integrations that require them. The builder preserves the teacher's
//! lazy-vs-eager and optional-vs-required pool-init semantics so that
//! operators keep the same knobs they already understand.

use std::sync::Arc;
use tokio::sync::RwLock;

use deadpool_redis::Pool as RedisPool;
use sqlx::PgPool;

use crate::{
    cache, config::Config, database, error::Result, middleware::jwt::JwksVerifier,
    shutdown::ShutdownHandle, sse::SseBroadcaster,
};

/// Shared, cloneable application state threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db_pool: Arc<RwLock<Option<PgPool>>>,
    pub redis_pool: Arc<RwLock<Option<RedisPool>>>,
    pub jwks: Arc<JwksVerifier>,
    pub broadcaster: SseBroadcaster,
    pub shutdown: ShutdownHandle,
}

impl AppState {
    pub fn builder(config: Config) -> AppStateBuilder {
        AppStateBuilder::new(config)
    }

    /// Borrow the current Postgres pool, if one is configured and has
    /// finished (or been given) its initialization.
    pub async fn db_pool(&self) -> Option<PgPool> {
        self.db_pool.read().await.clone()
    }

    pub async fn redis_pool(&self) -> Option<RedisPool> {
        self.redis_pool.read().await.clone()
    }
}

/// Builds an [`AppState`], resolving the optional Postgres/Redis pools
/// eagerly or in the background depending on each pool's `lazy_init`
/// setting, and either failing fast or continuing with `None` depending
/// on each pool's `optional` setting.
pub struct AppStateBuilder {
    config: Config,
    jwks: Option<JwksVerifier>,
}

impl AppStateBuilder {
    pub fn new(config: Config) -> Self {
        Self { config, jwks: None }
    }

    pub fn jwks(mut self, jwks: JwksVerifier) -> Self {
        self.jwks = Some(jwks);
        self
    }

    pub async fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config);

        let jwks = match self.jwks {
            Some(j) => j,
            None => JwksVerifier::new(config.jwks.clone())?,
        };

        let db_pool = Arc::new(RwLock::new(None));
        if let Some(db_config) = config.database.clone() {
            if db_config.lazy_init {
                let db_pool = db_pool.clone();
                let optional = db_config.optional;
                tokio::spawn(async move {
                    match database::create_pool(&db_config).await {
                        Ok(pool) => {
                            *db_pool.write().await = Some(pool);
                        }
                        Err(e) => {
                            if optional {
                                tracing::warn!(error = %e, "database pool init failed, continuing without it");
                            } else {
                                tracing::error!(error = %e, "database pool init failed");
                            }
                        }
                    }
                });
            } else {
                match database::create_pool(&db_config).await {
                    Ok(pool) => *db_pool.write().await = Some(pool),
                    Err(e) => {
                        if db_config.optional {
                            tracing::warn!(error = %e, "database pool init failed, continuing without it");
                        } else {
                            return Err(e);
                        }
                    }
                }
            }
        }

        let redis_pool = Arc::new(RwLock::new(None));
        if let Some(redis_config) = config.redis.clone() {
            if redis_config.lazy_init {
                let redis_pool = redis_pool.clone();
                let optional = redis_config.optional;
                tokio::spawn(async move {
                    match cache::create_pool(&redis_config).await {
                        Ok(pool) => {
                            *redis_pool.write().await = Some(pool);
                        }
                        Err(e) => {
                            if optional {
                                tracing::warn!(error = %e, "redis pool init failed, continuing without it");
                            } else {
                                tracing::error!(error = %e, "redis pool init failed");
                            }
                        }
                    }
                });
            } else {
                match cache::create_pool(&redis_config).await {
                    Ok(pool) => *redis_pool.write().await = Some(pool),
                    Err(e) => {
                        if redis_config.optional {
                            tracing::warn!(error = %e, "redis pool init failed, continuing without it");
                        } else {
                            return Err(e);
                        }
                    }
                }
            }
        }

        let broadcaster = SseBroadcaster::new(config.sse.buffer_size);

        Ok(AppState {
            config,
            db_pool,
            redis_pool,
            jwks: Arc::new(jwks),
            broadcaster,
            shutdown: ShutdownHandle::new(),
        })
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
    async fn test_state_builder_defaults() {
        let state = AppState::builder(test_config()).build().await.unwrap();
        assert!(state.db_pool().await.is_none());
        assert!(state.redis_pool().await.is_none());
        assert!(!state.shutdown.is_shutting_down());
    }

    #[tokio::test]
    async fn test_state_builder_with_explicit_jwks() {
        let config = test_config();
        let jwks = JwksVerifier::new(config.jwks.clone()).unwrap();
        let state = AppState::builder(config).jwks(jwks).build().await.unwrap();
        assert_eq!(state.config.service.name, "conflux");
    }
}
