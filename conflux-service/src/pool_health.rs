//! Connection pool health metrics, surfaced by `/health/pools`.

use serde::{Deserialize, Serialize};

/// Database connection pool health metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabasePoolHealth {
    pub size: u32,
    pub idle: usize,
    pub max_size: u32,
    pub min_size: u32,
    pub healthy: bool,
    pub utilization_percent: f32,
}

impl DatabasePoolHealth {
    pub fn from_pool(pool: &sqlx::PgPool, config: &crate::config::DatabaseConfig) -> Self {
        let size = pool.size();
        let idle = pool.num_idle();
        let max_size = config.max_connections;
        let min_size = config.min_connections;

        let utilization_percent = if max_size > 0 {
            ((size as f32 / max_size as f32) * 100.0).min(100.0)
        } else {
            0.0
        };

        let healthy = size < max_size;

        Self {
            size,
            idle,
            max_size,
            min_size,
            healthy,
            utilization_percent,
        }
    }
}

/// Redis connection pool health metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisPoolHealth {
    pub max_size: usize,
    pub available: bool,
    pub status: String,
}

impl RedisPoolHealth {
    pub fn from_pool(pool: &deadpool_redis::Pool, config: &crate::config::RedisConfig) -> Self {
        let max_size = config.max_connections;
        let status = pool.status();
        let available = status.size > 0 || status.available > 0;

        Self {
            max_size,
            available,
            status: format!("size={}, available={}", status.size, status.available),
        }
    }
}

/// Overall pool health summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolHealthSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabasePoolHealth>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisPoolHealth>,

    pub healthy: bool,
}

impl PoolHealthSummary {
    pub fn new() -> Self {
        Self {
            database: None,
            redis: None,
            healthy: true,
        }
    }

    pub fn is_healthy(&self) -> bool {
        let database_healthy = self.database.as_ref().map_or(true, |db| db.healthy);
        let cache_healthy = self.redis.as_ref().map_or(true, |redis| redis.available);
        database_healthy && cache_healthy
    }
}

impl Default for PoolHealthSummary {
    fn default() -> Self {
        Self::new()
    }
}
