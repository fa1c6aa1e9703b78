//! Redis-backed rate limiting middleware

use deadpool_redis::Pool as RedisPool;
use std::ops::DerefMut;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{config::RateLimitConfig, error::Error, middleware::Claims};

use tracing::warn;

/// Rate limiting middleware state
#[derive(Clone)]
pub struct RateLimit {
    config: RateLimitConfig,
    redis_pool: RedisPool,
}

impl RateLimit {
    pub fn new(config: RateLimitConfig, redis_pool: RedisPool) -> Self {
        Self { config, redis_pool }
    }

    /// Middleware function to enforce rate limits
    pub async fn middleware(
        State(rate_limit): State<Self>,
        request: Request<Body>,
        next: Next,
    ) -> Result<Response, Error> {
        let claims = request.extensions().get::<Claims>().cloned();

        if let Some(claims) = claims {
            rate_limit.check_rate_limit(&claims).await?;
        } else {
            warn!("rate limit middleware invoked without JWT claims");
        }

        Ok(next.run(request).await)
    }

    /// Check rate limit for a user, keyed by their claimed subject.
    async fn check_rate_limit(&self, claims: &Claims) -> Result<(), Error> {
        let mut conn = self
            .redis_pool
            .get()
            .await
            .map_err(|e| Error::TransientInternal(format!("redis connection: {}", e)))?;

        let key = format!("ratelimit:user:{}", claims.sub);
        let limit = self.config.per_user_rpm;

        let count: u32 = redis::cmd("INCR")
            .arg(&key)
            .query_async(conn.deref_mut())
            .await?;

        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(self.config.window_secs as i64)
                .query_async(conn.deref_mut())
                .await?;
        }

        if count > limit {
            warn!(
                user = %claims.sub,
                count,
                window_secs = self.config.window_secs,
                limit,
                "rate limit exceeded"
            );
            return Err(Error::RateLimitExceeded);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_config_defaults() {
        let config = RateLimitConfig {
            per_user_rpm: 200,
            per_client_rpm: 1000,
            window_secs: 60,
        };
        assert_eq!(config.per_user_rpm, 200);
    }
}
