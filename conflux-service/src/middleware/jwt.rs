//! JWKS-backed JWT authentication middleware.
//!
//! Unlike a statically-configured public key, the verifier fetches the
//! identity provider's JSON Web Key Set over HTTP, caches the keys by `kid`,
//! and refetches on a verification miss -- rate-limited so a flood of
//! requests bearing an unknown `kid` can't turn into a thundering herd
//! against the provider.

use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

use async_trait::async_trait;
use deadpool_redis::Pool as RedisPool;

use crate::{config::JwksConfig, error::Error};

/// JWT claims carried by every authenticated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject -- the user ID this token identifies.
    pub sub: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Whether this user's account has the real-time SSE tier enabled.
    /// The boolean payment-tier gate from the platform's billing system;
    /// everything beyond it is out of scope here.
    #[serde(default = "default_sse_enabled")]
    pub sse_enabled: bool,

    pub exp: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

fn default_sse_enabled() -> bool {
    true
}

impl Claims {
    pub fn user_id(&self) -> &str {
        &self.sub
    }
}

/// Trait for JWT revocation storage -- allows tokens to be invalidated
/// before their natural expiration.
#[async_trait]
pub trait JwtRevocation: Send + Sync {
    async fn is_revoked(&self, jti: &str) -> Result<bool, Error>;
    async fn revoke(&self, jti: &str, ttl_secs: u64) -> Result<(), Error>;
}

/// Redis-based JWT revocation implementation.
///
/// Stores revoked JTIs with automatic expiration (SETEX). Key pattern:
/// `jwt:revoked:{jti}`.
#[derive(Clone)]
pub struct RedisJwtRevocation {
    pool: RedisPool,
}

impl RedisJwtRevocation {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    fn revocation_key(jti: &str) -> String {
        format!("jwt:revoked:{}", jti)
    }
}

#[async_trait]
impl JwtRevocation for RedisJwtRevocation {
    async fn is_revoked(&self, jti: &str) -> Result<bool, Error> {
        use deadpool_redis::redis::AsyncCommands;

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| Error::TransientInternal(format!("redis connection: {}", e)))?;

        let key = Self::revocation_key(jti);
        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|e| Error::TransientInternal(format!("revocation lookup: {}", e)))?;

        Ok(exists)
    }

    async fn revoke(&self, jti: &str, ttl_secs: u64) -> Result<(), Error> {
        use deadpool_redis::redis::AsyncCommands;

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| Error::TransientInternal(format!("redis connection: {}", e)))?;

        let key = Self::revocation_key(jti);
        conn.set_ex::<_, _, ()>(&key, 1, ttl_secs)
            .await
            .map_err(|e| Error::TransientInternal(format!("revoke: {}", e)))?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize, Clone)]
struct JwkEntry {
    kid: String,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    alg: Option<String>,
}

struct KeyCache {
    keys: HashMap<String, (DecodingKey, Algorithm)>,
    fetched_at: Option<Instant>,
}

impl KeyCache {
    fn empty() -> Self {
        Self {
            keys: HashMap::new(),
            fetched_at: None,
        }
    }
}

/// Fetches, caches, and refreshes a remote JSON Web Key Set.
#[derive(Clone)]
pub struct JwksVerifier {
    http: reqwest::Client,
    config: Arc<JwksConfig>,
    cache: Arc<RwLock<KeyCache>>,
    revocation: Option<Arc<dyn JwtRevocation>>,
}

impl JwksVerifier {
    pub fn new(config: JwksConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| Error::Config(Box::new(figment::Error::from(e.to_string()))))?;

        Ok(Self {
            http,
            config: Arc::new(config),
            cache: Arc::new(RwLock::new(KeyCache::empty())),
            revocation: None,
        })
    }

    pub fn with_revocation<R: JwtRevocation + 'static>(mut self, revocation: R) -> Self {
        self.revocation = Some(Arc::new(revocation));
        self
    }

    /// Force a refetch of the key set, subject to the configured minimum
    /// refresh interval. Returns without doing network work if the cache
    /// was populated too recently.
    async fn refresh(&self) -> Result<(), Error> {
        {
            let cache = self.cache.read().await;
            if let Some(fetched_at) = cache.fetched_at {
                if fetched_at.elapsed() < Duration::from_secs(self.config.min_refresh_interval_secs)
                {
                    return Ok(());
                }
            }
        }

        let response: JwksResponse = self
            .http
            .get(&self.config.jwks_url)
            .send()
            .await
            .map_err(Error::from)?
            .error_for_status()
            .map_err(Error::from)?
            .json()
            .await
            .map_err(Error::from)?;

        let mut keys = HashMap::new();
        for jwk in response.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            let (n, e) = match (jwk.n.as_deref(), jwk.e.as_deref()) {
                (Some(n), Some(e)) => (n, e),
                _ => continue,
            };
            let decoding_key = match DecodingKey::from_rsa_components(n, e) {
                Ok(k) => k,
                Err(err) => {
                    tracing::warn!(kid = %jwk.kid, error = %err, "skipping malformed JWKS entry");
                    continue;
                }
            };
            let algorithm = match jwk.alg.as_deref() {
                Some("RS384") => Algorithm::RS384,
                Some("RS512") => Algorithm::RS512,
                _ => Algorithm::RS256,
            };
            keys.insert(jwk.kid.clone(), (decoding_key, algorithm));
        }

        let mut cache = self.cache.write().await;
        cache.keys = keys;
        cache.fetched_at = Some(Instant::now());
        Ok(())
    }

    /// Validate and decode a bearer token, fetching/refreshing the key set
    /// on a cache miss.
    pub async fn validate_token(&self, token: &str) -> Result<Claims, Error> {
        let header = decode_header(token).map_err(Error::from)?;
        let kid = header
            .kid
            .ok_or_else(|| Error::Unauthenticated("token missing kid header".into()))?;

        if !self.cache.read().await.keys.contains_key(&kid) {
            self.refresh().await?;
        }

        let (decoding_key, algorithm) = {
            let cache = self.cache.read().await;
            cache
                .keys
                .get(&kid)
                .cloned()
                .ok_or_else(|| Error::Unauthenticated("unknown signing key".into()))?
        };

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[&self.config.issuer]);
        if let Some(audience) = &self.config.audience {
            validation.set_audience(&[audience]);
        }

        let token_data = decode::<Claims>(token, &decoding_key, &validation).map_err(Error::from)?;
        let claims = token_data.claims;

        if let Some(revocation) = &self.revocation {
            if let Some(jti) = &claims.jti {
                if revocation.is_revoked(jti).await? {
                    return Err(Error::Unauthenticated("token has been revoked".into()));
                }
            }
        }

        Ok(claims)
    }

    pub fn extract_token(headers: &HeaderMap) -> Result<String, Error> {
        let auth_header = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Unauthenticated("missing Authorization header".into()))?;

        auth_header
            .strip_prefix("Bearer ")
            .map(str::to_string)
            .ok_or_else(|| Error::Unauthenticated("invalid Authorization header format".into()))
    }

    /// Axum middleware entry point: validates the bearer token and injects
    /// [`Claims`] into the request extensions for downstream extractors.
    pub async fn middleware(
        State(verifier): State<Self>,
        mut request: Request<Body>,
        next: Next,
    ) -> Result<Response, Error> {
        let token = Self::extract_token(request.headers())?;
        let claims = verifier.validate_token(&token).await?;
        request.extensions_mut().insert(claims);
        Ok(next.run(request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_claims(sub: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            email: None,
            sse_enabled: true,
            exp: 0,
            iat: None,
            jti: None,
            iss: None,
            aud: None,
        }
    }

    #[test]
    fn test_user_id() {
        let claims = sample_claims("user-123");
        assert_eq!(claims.user_id(), "user-123");
    }

    #[test]
    fn test_revocation_key_format() {
        let key = RedisJwtRevocation::revocation_key("test-jwt-id-123");
        assert_eq!(key, "jwt:revoked:test-jwt-id-123");
    }

    #[test]
    fn test_revocation_trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn JwtRevocation) {}
    }

    #[tokio::test]
    async fn test_extract_token_requires_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Basic abc123".parse().unwrap());
        let err = JwksVerifier::extract_token(&headers).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_extract_token_happy_path() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer abc.def.ghi".parse().unwrap());
        let token = JwksVerifier::extract_token(&headers).unwrap();
        assert_eq!(token, "abc.def.ghi");
    }
}
