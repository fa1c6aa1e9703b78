//! # conflux-service
//!
//! Ambient service layer for Conflux, the real-time personal data
//! aggregation platform: configuration, the error taxonomy, JWKS-backed
//! JWT verification, Postgres/Redis pool management, SSE primitives,
//! health checks, and graceful shutdown.
//!
//! `conflux-gateway` builds the actual delivery plane (integrations, CDC
//! ingress, per-user fan-out, stream lifecycle, dashboard snapshots) on
//! top of the pieces exposed here.
//!
//! ## Example
//!
//! ```rust,no_run
//! use conflux_service::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let built = ServiceBuilder::new().with_config(config).build().await?;
//!     let app = built.router.with_state(built.state);
//!
//!     built.server.serve(app).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod ids;
pub mod middleware;
pub mod observability;
pub mod pool_health;
pub mod responses;
pub mod server;
pub mod service_builder;
pub mod shutdown;
pub mod sse;
pub mod state;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{
        CdcConfig, Config, DatabaseConfig, JwksConfig, MiddlewareConfig, RateLimitConfig,
        RedisConfig, ServiceConfig, ShutdownConfig, SseConfig,
    };

    pub use crate::error::{Error, Result};
    pub use crate::health::{health, pool_metrics, readiness};
    pub use crate::ids::{MakeTypedRequestId, RequestId, RequestIdError};
    pub use crate::pool_health::{DatabasePoolHealth, PoolHealthSummary, RedisPoolHealth};

    pub use crate::middleware::{
        Claims, JwksVerifier, JwtRevocation, RateLimit, RedisJwtRevocation,
        PROPAGATE_HEADERS, SENSITIVE_HEADERS, request_id_layer, request_id_propagation_layer,
        sensitive_headers_layer,
    };

    pub use crate::server::Server;
    pub use crate::service_builder::{BuiltService, ServiceBuilder};
    pub use crate::shutdown::ShutdownHandle;
    pub use crate::state::{AppState, AppStateBuilder};

    pub use crate::responses::{
        Accepted, Conflict, Created, FieldError, NoContent, Success, ValidationError,
    };

    pub use crate::observability::init_tracing;

    // Server-Sent Events support.
    pub use crate::sse::{
        ConnectionId as SseConnectionId, Frame, SseBroadcaster, SseConnection, SseEventExt,
        TypedEvent,
    };
    pub use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};

    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};

    pub use tokio;

    pub use async_trait::async_trait;

    pub use thiserror::Error;
    pub use anyhow::{self, Context as AnyhowContext};

    pub use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};

    pub use uuid::Uuid;

    pub use futures::{future, stream, Future, Stream, StreamExt, TryFutureExt, TryStreamExt};

    pub use http::{Method, Uri};
}
