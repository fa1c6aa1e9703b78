//! Liveness and readiness endpoints, plus connection pool diagnostics.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::{pool_health::PoolHealthSummary, state::AppState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: &'static str,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub dependencies: Vec<DependencyStatus>,
}

/// Liveness probe: the process is up and serving requests.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: state.config.service.name.clone(),
    })
}

/// Readiness probe: pings Postgres with `SELECT 1` and Redis with `PING`.
/// Returns 503 if a required (non-optional, configured) dependency is down.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let mut dependencies = Vec::new();
    let mut ready = true;

    if let Some(db_config) = state.config.database.as_ref() {
        let status = match state.db_pool().await {
            Some(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
                Ok(_) => DependencyStatus {
                    name: "database",
                    healthy: true,
                    detail: None,
                },
                Err(e) => DependencyStatus {
                    name: "database",
                    healthy: false,
                    detail: Some(e.to_string()),
                },
            },
            None => DependencyStatus {
                name: "database",
                healthy: db_config.optional,
                detail: Some("pool not yet initialized".to_string()),
            },
        };
        if !status.healthy && !db_config.optional {
            ready = false;
        }
        dependencies.push(status);
    }

    if let Some(redis_config) = state.config.redis.as_ref() {
        let status = match state.redis_pool().await {
            Some(pool) => match pool.get().await {
                Ok(mut conn) => match redis::cmd("PING")
                    .query_async::<_, String>(&mut conn)
                    .await
                {
                    Ok(_) => DependencyStatus {
                        name: "redis",
                        healthy: true,
                        detail: None,
                    },
                    Err(e) => DependencyStatus {
                        name: "redis",
                        healthy: false,
                        detail: Some(e.to_string()),
                    },
                },
                Err(e) => DependencyStatus {
                    name: "redis",
                    healthy: false,
                    detail: Some(e.to_string()),
                },
            },
            None => DependencyStatus {
                name: "redis",
                healthy: redis_config.optional,
                detail: Some("pool not yet initialized".to_string()),
            },
        };
        if !status.healthy && !redis_config.optional {
            ready = false;
        }
        dependencies.push(status);
    }

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "not_ready" },
            dependencies,
        }),
    )
}

/// Connection pool diagnostics, surfaced at `/health/pools`.
pub async fn pool_metrics(State(state): State<AppState>) -> Json<PoolHealthSummary> {
    let mut summary = PoolHealthSummary::new();

    if let (Some(pool), Some(db_config)) = (state.db_pool().await, state.config.database.as_ref())
    {
        summary.database = Some(crate::pool_health::DatabasePoolHealth::from_pool(
            &pool, db_config,
        ));
    }

    if let (Some(pool), Some(redis_config)) =
        (state.redis_pool().await, state.config.redis.as_ref())
    {
        summary.redis = Some(crate::pool_health::RedisPoolHealth::from_pool(
            &pool,
            redis_config,
        ));
    }

    summary.healthy = summary.is_healthy();
    Json(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response() {
        let response = HealthResponse {
            status: "ok",
            service: "conflux".to_string(),
        };
        assert_eq!(response.status, "ok");
    }

    #[test]
    fn test_dependency_status() {
        let status = DependencyStatus {
            name: "database",
            healthy: true,
            detail: None,
        };
        assert!(status.healthy);
    }
}
