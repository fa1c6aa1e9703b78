//! `UserStream` / `UserPreferences` data model and their CRUD routes
//! (spec.md §3 "UserStream", §6.1).

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use conflux_service::error::{Error, Result};
use conflux_service::middleware::Claims;

use crate::dispatcher::{self, StreamEvent};
use crate::state::GatewayState;

fn default_true() -> bool {
    true
}

/// `(userID, integrationName) -> {enabled, visible, config}` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserStream {
    pub user_id: String,
    pub integration: String,
    pub enabled: bool,
    pub visible: bool,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStreamRequest {
    pub integration: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateStreamRequest {
    pub config: Option<serde_json::Value>,
    pub enabled: Option<bool>,
    pub visible: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserPreferences {
    pub user_id: String,
    pub display: serde_json::Value,
}

/// Persistence for the two framework tables -- `user_streams` and
/// `user_preferences` are the two "control-plane echo" tables the CDC
/// ingress special-cases (spec.md §4.5).
pub struct StreamStore {
    pool: PgPool,
}

impl StreamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<UserStream>> {
        sqlx::query_as::<_, UserStream>(
            "SELECT user_id, integration, enabled, visible, config FROM user_streams WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn get(&self, user_id: &str, integration: &str) -> Result<Option<UserStream>> {
        sqlx::query_as::<_, UserStream>(
            "SELECT user_id, integration, enabled, visible, config FROM user_streams \
             WHERE user_id = $1 AND integration = $2",
        )
        .bind(user_id)
        .bind(integration)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn upsert(&self, stream: &UserStream) -> Result<UserStream> {
        sqlx::query_as::<_, UserStream>(
            "INSERT INTO user_streams (user_id, integration, enabled, visible, config) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, integration) DO UPDATE \
               SET enabled = excluded.enabled, visible = excluded.visible, config = excluded.config \
             RETURNING user_id, integration, enabled, visible, config",
        )
        .bind(&stream.user_id)
        .bind(&stream.integration)
        .bind(stream.enabled)
        .bind(stream.visible)
        .bind(&stream.config)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn delete(&self, user_id: &str, integration: &str) -> Result<()> {
        sqlx::query("DELETE FROM user_streams WHERE user_id = $1 AND integration = $2")
            .bind(user_id)
            .bind(integration)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    pub async fn get_preferences(&self, user_id: &str) -> Result<UserPreferences> {
        let row = sqlx::query_as::<_, UserPreferences>(
            "SELECT user_id, display FROM user_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(row.unwrap_or_else(|| UserPreferences {
            user_id: user_id.to_string(),
            display: serde_json::json!({}),
        }))
    }

    pub async fn upsert_preferences(&self, prefs: &UserPreferences) -> Result<UserPreferences> {
        sqlx::query_as::<_, UserPreferences>(
            "INSERT INTO user_preferences (user_id, display) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET display = excluded.display \
             RETURNING user_id, display",
        )
        .bind(&prefs.user_id)
        .bind(&prefs.display)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }
}

async fn require_pool(state: &GatewayState) -> Result<PgPool> {
    state
        .service
        .db_pool()
        .await
        .ok_or_else(|| Error::Unavailable("database not configured".into()))
}

pub async fn list_streams(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<UserStream>>> {
    let store = StreamStore::new(require_pool(&state).await?);
    Ok(Json(store.list(claims.user_id()).await?))
}

pub async fn create_stream(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateStreamRequest>,
) -> Result<Json<UserStream>> {
    let store = StreamStore::new(require_pool(&state).await?);
    let stream = UserStream {
        user_id: claims.user_id().to_string(),
        integration: req.integration,
        enabled: req.enabled,
        visible: req.visible,
        config: req.config,
    };
    let saved = store.upsert(&stream).await?;

    dispatcher::dispatch(&state, StreamEvent::Created {
        user_id: saved.user_id.clone(),
        integration: saved.integration.clone(),
        config: saved.config.clone(),
    })
    .await;

    Ok(Json(saved))
}

pub async fn update_stream(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    Path(integration): Path<String>,
    Json(req): Json<UpdateStreamRequest>,
) -> Result<Json<UserStream>> {
    let store = StreamStore::new(require_pool(&state).await?);
    let user_id = claims.user_id().to_string();

    let existing = store
        .get(&user_id, &integration)
        .await?
        .ok_or_else(|| Error::NotFound(format!("no stream for integration {integration}")))?;

    let updated = UserStream {
        user_id: existing.user_id.clone(),
        integration: existing.integration.clone(),
        enabled: req.enabled.unwrap_or(existing.enabled),
        visible: req.visible.unwrap_or(existing.visible),
        config: req.config.clone().unwrap_or_else(|| existing.config.clone()),
    };
    let saved = store.upsert(&updated).await?;

    dispatcher::dispatch(&state, StreamEvent::Updated {
        user_id: saved.user_id.clone(),
        integration: saved.integration.clone(),
        old_config: existing.config,
        new_config: saved.config.clone(),
        enabled: saved.enabled,
    })
    .await;

    Ok(Json(saved))
}

pub async fn delete_stream(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    Path(integration): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let store = StreamStore::new(require_pool(&state).await?);
    let user_id = claims.user_id().to_string();

    let existing = store
        .get(&user_id, &integration)
        .await?
        .ok_or_else(|| Error::NotFound(format!("no stream for integration {integration}")))?;

    store.delete(&user_id, &integration).await?;

    dispatcher::dispatch(&state, StreamEvent::Deleted {
        user_id: existing.user_id.clone(),
        integration: existing.integration.clone(),
        config: existing.config.clone(),
    })
    .await;

    Ok(Json(serde_json::json!({"status": "ok"})))
}

pub async fn get_preferences(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserPreferences>> {
    let store = StreamStore::new(require_pool(&state).await?);
    Ok(Json(store.get_preferences(claims.user_id()).await?))
}

pub async fn update_preferences(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    Json(display): Json<serde_json::Value>,
) -> Result<Json<UserPreferences>> {
    let store = StreamStore::new(require_pool(&state).await?);
    let prefs = UserPreferences { user_id: claims.user_id().to_string(), display };
    let saved = store.upsert_preferences(&prefs).await?;

    // Framework-table echo: user_preferences changes made through this API
    // are published the same way the CDC ingress publishes an external
    // writer's change to the row, so every open tab sees the update.
    let payload = serde_json::json!({
        "action": "update",
        "metadata": {"table_name": "user_preferences"},
        "record": {"user_id": saved.user_id, "display": saved.display},
    });
    if let Ok(encoded) = serde_json::to_string(&payload) {
        state.pubsub.publish_user(&saved.user_id, encoded).await;
    }

    Ok(Json(saved))
}
