//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: CONFLUX_)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/conflux/{service_name}/config.toml
//! 4. System directory: /etc/conflux/{service_name}/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub jwks: JwksConfig,
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub middleware: MiddlewareConfig,

    /// Read-only Postgres access (system of record lives elsewhere).
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub redis: Option<RedisConfig>,

    #[serde(default)]
    pub cdc: CdcConfig,

    #[serde(default)]
    pub sse: SseConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_environment")]
    pub environment: String,
}

/// JWKS-based JWT verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksConfig {
    /// Expected `iss` claim.
    pub issuer: String,

    /// URL the JWKS document is fetched from.
    pub jwks_url: String,

    /// Expected `aud` claim, if the identity provider sets one.
    #[serde(default)]
    pub audience: Option<String>,

    /// Minimum time between JWKS refetches, to blunt a thundering herd of
    /// unknown-`kid` tokens.
    #[serde(default = "default_min_refresh_interval")]
    pub min_refresh_interval_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl JwksConfig {
    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.min_refresh_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_user_rpm")]
    pub per_user_rpm: u32,

    #[serde(default = "default_per_client_rpm")]
    pub per_client_rpm: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_false")]
    pub optional: bool,

    #[serde(default = "default_lazy_init")]
    pub lazy_init: bool,
}

/// Redis configuration -- cache, subscriber sets, cross-replica pub/sub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,

    #[serde(default = "default_redis_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// When true, absence of Redis is not fatal -- the service falls back
    /// to the in-process broadcaster (single-replica deployments only).
    #[serde(default = "default_false")]
    pub optional: bool,

    #[serde(default = "default_lazy_init")]
    pub lazy_init: bool,
}

/// CDC ingress configuration (spec.md §4.5)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcConfig {
    /// Shared secret the upstream CDC router authenticates batches with.
    #[serde(default)]
    pub shared_secret: Option<String>,

    #[serde(default = "default_cdc_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            max_batch_size: default_cdc_max_batch_size(),
        }
    }
}

/// Server-Sent Events configuration (spec.md §4.7)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    #[serde(default = "default_sse_heartbeat_secs")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_sse_write_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Per-subscriber bounded channel capacity before the oldest frame is
    /// dropped (spec.md §4.6, Testable Property 8).
    #[serde(default = "default_sse_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_sse_max_connections_per_user")]
    pub max_connections_per_user: usize,

    /// Dropped-frame count, above which a connection is proactively closed
    /// so the client reconnects and re-snapshots.
    #[serde(default = "default_sse_drop_threshold")]
    pub drop_threshold: u64,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_sse_heartbeat_secs(),
            write_timeout_secs: default_sse_write_timeout_secs(),
            buffer_size: default_sse_buffer_size(),
            max_connections_per_user: default_sse_max_connections_per_user(),
            drop_threshold: default_sse_drop_threshold(),
        }
    }
}

impl SseConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Graceful shutdown configuration (spec.md §5, "Cancellation")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long to wait for in-flight requests and SSE streams to drain
    /// before forcing them closed.
    #[serde(default = "default_drain_secs")]
    pub drain_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_secs: default_drain_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

/// Middleware configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(default)]
    pub request_tracking: RequestTrackingConfig,

    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,

    #[serde(default = "default_true")]
    pub catch_panic: bool,

    #[serde(default = "default_true")]
    pub compression: bool,

    #[serde(default = "default_cors_mode")]
    pub cors_mode: String,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            request_tracking: RequestTrackingConfig::default(),
            body_limit_mb: default_body_limit_mb(),
            catch_panic: true,
            compression: true,
            cors_mode: default_cors_mode(),
        }
    }
}

/// Request tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTrackingConfig {
    #[serde(default = "default_true")]
    pub request_id_enabled: bool,

    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,

    #[serde(default = "default_true")]
    pub propagate_headers: bool,

    #[serde(default = "default_true")]
    pub mask_sensitive_headers: bool,
}

impl Default for RequestTrackingConfig {
    fn default() -> Self {
        Self {
            request_id_enabled: true,
            request_id_header: default_request_id_header(),
            propagate_headers: true,
            mask_sensitive_headers: true,
        }
    }
}

// Default value functions
fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_min_refresh_interval() -> u64 {
    300
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_per_user_rpm() -> u32 {
    200
}

fn default_per_client_rpm() -> u32 {
    1000
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_connections() -> u32 {
    50
}

fn default_min_connections() -> u32 {
    5
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_redis_max_connections() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

fn default_lazy_init() -> bool {
    true
}

fn default_cdc_max_batch_size() -> usize {
    500
}

fn default_sse_heartbeat_secs() -> u64 {
    15
}

fn default_sse_write_timeout_secs() -> u64 {
    10
}

fn default_sse_buffer_size() -> usize {
    64
}

fn default_sse_max_connections_per_user() -> usize {
    4
}

fn default_sse_drop_threshold() -> u64 {
    32
}

fn default_drain_secs() -> u64 {
    20
}

fn default_body_limit_mb() -> usize {
    10
}

fn default_cors_mode() -> String {
    "permissive".to_string()
}

fn default_request_id_header() -> String {
    "x-request-id".to_string()
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Environment variables (`CONFLUX_` prefix) override all file-based
    /// configs.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "conflux".to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name.
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("CONFLUX_").split("_"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file, bypassing XDG/system
    /// directories. Useful for tests or non-standard deployments.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CONFLUX_").split("_"))
            .extract()?;

        Ok(config)
    }

    /// Find all possible config file paths for a service, highest priority first.
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        paths.push(PathBuf::from("config.toml"));

        let xdg_dirs = xdg::BaseDirectories::with_prefix("conflux");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Ok(path) = xdg_dirs.place_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/conflux").join(service_name).join("config.toml"));

        paths
    }

    /// The recommended config path for a service: where it should be placed
    /// in production.
    pub fn recommended_path(service_name: &str) -> PathBuf {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("conflux");
        let config_file_path = Path::new(service_name).join("config.toml");

        xdg_dirs.place_config_file(&config_file_path).unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| String::from("~")))
                .join(".config/conflux")
                .join(service_name)
                .join("config.toml")
        })
    }

    pub fn create_config_dir(service_name: &str) -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("conflux");
        let config_file_path = Path::new(service_name).join("config.toml");

        let config_path = xdg_dirs
            .place_config_file(&config_file_path)
            .map_err(|e| crate::error::Error::Internal(format!("failed to create config directory: {}", e)))?;

        Ok(config_path
            .parent()
            .ok_or_else(|| crate::error::Error::Internal("invalid config path".to_string()))?
            .to_path_buf())
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database.as_ref().map(|db| db.url.as_str())
    }

    pub fn redis_url(&self) -> Option<&str> {
        self.redis.as_ref().map(|r| r.url.as_str())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "conflux".to_string(),
                port: default_port(),
                log_level: default_log_level(),
                timeout_secs: default_timeout(),
                environment: default_environment(),
            },
            jwks: JwksConfig {
                issuer: String::new(),
                jwks_url: String::new(),
                audience: None,
                min_refresh_interval_secs: default_min_refresh_interval(),
                fetch_timeout_secs: default_fetch_timeout(),
            },
            rate_limit: RateLimitConfig {
                per_user_rpm: default_per_user_rpm(),
                per_client_rpm: default_per_client_rpm(),
                window_secs: default_window_secs(),
            },
            middleware: MiddlewareConfig::default(),
            database: None,
            redis: None,
            cdc: CdcConfig::default(),
            sse: SseConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.port, 8080);
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.rate_limit.per_user_rpm, 200);
        assert_eq!(config.sse.buffer_size, 64);
        assert_eq!(config.shutdown.drain_secs, 20);
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let config = Config::load_from("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config.service.name, "conflux");
    }
}
