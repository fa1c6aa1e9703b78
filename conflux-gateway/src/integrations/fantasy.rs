//! Fantasy-sports integration: owner-by-ID CDC routing via a persisted
//! reverse lookup from the upstream's foreign GUID to a `userID`
//! (spec.md §4.4's "owner-by-ID" strategy, §9's "OAuth tokens with a
//! foreign user identifier" pattern).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use conflux_service::error::{Error, Result};

use crate::cdc::record::CdcRecord;
use crate::registry::{Integration, Lifecycled, Routable, Snapshottable};
use crate::state::GatewayState;
use crate::streams::UserStream;

const NAME: &str = "fantasy";

#[derive(Debug, Default, Deserialize)]
struct FantasyConfig {
    guid: Option<String>,
}

fn parse_guid(config: &Value) -> Option<String> {
    serde_json::from_value::<FantasyConfig>(config.clone()).ok().and_then(|c| c.guid)
}

async fn resolve_user_id(state: &GatewayState, guid: &str) -> Result<Option<String>> {
    let cache_key = format!("cache:fantasy:reverse:{guid}");
    if let Some(cached) = state.pubsub.get_json::<String>(&cache_key).await? {
        return Ok(Some(cached));
    }

    let pool = state
        .service
        .db_pool()
        .await
        .ok_or_else(|| Error::Unavailable("database not configured".into()))?;
    let row: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM fantasy_reverse_lookup WHERE foreign_id = $1")
            .bind(guid)
            .fetch_optional(&pool)
            .await
            .map_err(Error::from)?;

    if let Some((user_id,)) = &row {
        state
            .pubsub
            .set_json(&cache_key, user_id, std::time::Duration::from_secs(300))
            .await?;
    }
    Ok(row.map(|(user_id,)| user_id))
}

async fn upsert_reverse_lookup(state: &GatewayState, user_id: &str, guid: &str) -> Result<()> {
    let pool = state
        .service
        .db_pool()
        .await
        .ok_or_else(|| Error::Unavailable("database not configured".into()))?;
    sqlx::query(
        "INSERT INTO fantasy_reverse_lookup (foreign_id, user_id) VALUES ($1, $2) \
         ON CONFLICT (foreign_id) DO UPDATE SET user_id = excluded.user_id",
    )
    .bind(guid)
    .bind(user_id)
    .execute(&pool)
    .await
    .map_err(Error::from)?;
    Ok(())
}

async fn delete_reverse_lookup(state: &GatewayState, guid: &str) -> Result<()> {
    let pool = state
        .service
        .db_pool()
        .await
        .ok_or_else(|| Error::Unavailable("database not configured".into()))?;
    sqlx::query("DELETE FROM fantasy_reverse_lookup WHERE foreign_id = $1")
        .bind(guid)
        .execute(&pool)
        .await
        .map_err(Error::from)?;
    state.pubsub.delete(&format!("cache:fantasy:reverse:{guid}")).await;
    Ok(())
}

pub struct FantasyIntegration;

#[async_trait]
impl Routable for FantasyIntegration {
    fn handles_table(&self, table_name: &str) -> bool {
        table_name == "fantasy_rosters"
    }

    async fn route_cdc_record(&self, state: &GatewayState, record: &CdcRecord, payload: &Arc<str>) -> Result<()> {
        let Some(guid) = record.column_str("guid") else {
            return Ok(());
        };
        let Some(user_id) = resolve_user_id(state, guid).await? else {
            tracing::debug!(guid, "no reverse-lookup entry for fantasy GUID, dropping record");
            return Ok(());
        };
        state.pubsub.publish_user(&user_id, payload.clone()).await;
        Ok(())
    }
}

#[async_trait]
impl Snapshottable for FantasyIntegration {
    async fn get_dashboard_data(&self, state: &GatewayState, _user_id: &str, stream: &UserStream) -> Result<Value> {
        let Some(guid) = parse_guid(&stream.config) else {
            return Ok(serde_json::json!({"roster": []}));
        };
        let pool = state
            .service
            .db_pool()
            .await
            .ok_or_else(|| Error::Unavailable("database not configured".into()))?;
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT player_name, position FROM fantasy_rosters WHERE guid = $1",
        )
        .bind(&guid)
        .fetch_all(&pool)
        .await
        .map_err(Error::from)?;

        let roster: Vec<Value> = rows
            .into_iter()
            .map(|(player, position)| serde_json::json!({"player": player, "position": position}))
            .collect();
        Ok(serde_json::json!({"roster": roster}))
    }
}

/// Unlike the set-based integrations, this one's subscriber state is the
/// reverse-lookup row itself -- there is no subscriber set to add to or
/// remove from, just one row per GUID (spec.md §4.4, owner-by-ID).
#[async_trait]
impl Lifecycled for FantasyIntegration {
    async fn on_stream_created(&self, state: &GatewayState, user_id: &str, config: &Value) -> Result<()> {
        if let Some(guid) = parse_guid(config) {
            upsert_reverse_lookup(state, user_id, &guid).await?;
        }
        Ok(())
    }

    async fn on_stream_updated(
        &self,
        state: &GatewayState,
        user_id: &str,
        old_config: &Value,
        new_config: &Value,
        enabled: bool,
    ) -> Result<()> {
        let old_guid = parse_guid(old_config);
        let new_guid = parse_guid(new_config);

        if old_guid != new_guid {
            if let Some(old_guid) = &old_guid {
                delete_reverse_lookup(state, old_guid).await?;
            }
        }
        if enabled {
            if let Some(new_guid) = &new_guid {
                upsert_reverse_lookup(state, user_id, new_guid).await?;
            }
        }
        Ok(())
    }

    async fn on_stream_deleted(&self, state: &GatewayState, _user_id: &str, config: &Value) -> Result<()> {
        if let Some(guid) = parse_guid(config) {
            delete_reverse_lookup(state, &guid).await?;
        }
        Ok(())
    }

    async fn on_sync_subscriptions(
        &self,
        state: &GatewayState,
        user_id: &str,
        config: &Value,
        enabled: bool,
    ) -> Result<()> {
        let Some(guid) = parse_guid(config) else {
            return Ok(());
        };
        if enabled {
            upsert_reverse_lookup(state, user_id, &guid).await?;
        } else {
            delete_reverse_lookup(state, &guid).await?;
        }
        Ok(())
    }
}

impl Integration for FantasyIntegration {
    fn name(&self) -> &str {
        NAME
    }
    fn display_name(&self) -> &str {
        "Fantasy Sports"
    }
    fn as_routable(&self) -> Option<&dyn Routable> {
        Some(self)
    }
    fn as_snapshottable(&self) -> Option<&dyn Snapshottable> {
        Some(self)
    }
    fn as_lifecycled(&self) -> Option<&dyn Lifecycled> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_guid_present() {
        let config = serde_json::json!({"guid": "abc-123"});
        assert_eq!(parse_guid(&config).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_parse_guid_missing() {
        assert!(parse_guid(&serde_json::json!({})).is_none());
    }
}
