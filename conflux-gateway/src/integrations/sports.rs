//! Sports integration: broadcast CDC routing with optional per-league
//! sub-bucketing (spec.md §4.4's "broadcast" strategy).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use conflux_service::error::{Error, Result};

use crate::cdc::record::CdcRecord;
use crate::registry::{HealthStatus, Healthy, Integration, Lifecycled, Routable, Snapshottable};
use crate::state::GatewayState;
use crate::streams::UserStream;

const NAME: &str = "sports";

/// Every subscriber of the integration, regardless of league preference
/// -- the legacy global fallback spec.md §9 calls out as a soft-migration
/// artifact new integrations shouldn't rely on. Retained here only
/// because this integration predates per-league sets.
fn global_set_key() -> String {
    "sports:subscribers:all".to_string()
}

fn league_set_key(league: &str) -> String {
    format!("sports:subscribers:league:{}", league.to_uppercase())
}

#[derive(Debug, Default, Deserialize)]
struct SportsConfig {
    #[serde(default)]
    leagues: Vec<String>,
}

fn parse_leagues(config: &Value) -> HashSet<String> {
    serde_json::from_value::<SportsConfig>(config.clone())
        .map(|c| c.leagues.into_iter().map(|l| l.to_uppercase()).collect())
        .unwrap_or_default()
}

pub struct SportsIntegration;

#[async_trait]
impl Routable for SportsIntegration {
    fn handles_table(&self, table_name: &str) -> bool {
        table_name == "scores"
    }

    async fn route_cdc_record(&self, state: &GatewayState, record: &CdcRecord, payload: &Arc<str>) -> Result<()> {
        let league = record.column_str("league").map(str::to_uppercase);

        let mut targets: HashSet<String> = state.pubsub.get_subscribers(&global_set_key()).await.into_iter().collect();
        if let Some(league) = &league {
            targets.extend(state.pubsub.get_subscribers(&league_set_key(league)).await);
        }

        for user_id in targets {
            state.pubsub.publish_user(&user_id, payload.clone()).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Snapshottable for SportsIntegration {
    async fn get_dashboard_data(&self, state: &GatewayState, _user_id: &str, stream: &UserStream) -> Result<Value> {
        let leagues = parse_leagues(&stream.config);
        if leagues.is_empty() {
            return Ok(serde_json::json!({"leagues": []}));
        }

        let pool = state
            .service
            .db_pool()
            .await
            .ok_or_else(|| Error::Unavailable("database not configured".into()))?;

        let mut scoreboards = serde_json::Map::with_capacity(leagues.len());
        for league in leagues {
            let rows: Vec<(String, String, i32, i32)> = sqlx::query_as(
                "SELECT home_team, away_team, home_score, away_score FROM scores \
                 WHERE league = $1 ORDER BY updated_at DESC LIMIT 10",
            )
            .bind(&league)
            .fetch_all(&pool)
            .await
            .map_err(Error::from)?;

            let games: Vec<Value> = rows
                .into_iter()
                .map(|(home, away, home_score, away_score)| {
                    serde_json::json!({"home": home, "away": away, "home_score": home_score, "away_score": away_score})
                })
                .collect();
            scoreboards.insert(league, Value::Array(games));
        }

        Ok(Value::Object(scoreboards))
    }
}

#[async_trait]
impl Lifecycled for SportsIntegration {
    async fn on_stream_created(&self, state: &GatewayState, user_id: &str, config: &Value) -> Result<()> {
        self.on_sync_subscriptions(state, user_id, config, true).await
    }

    async fn on_stream_updated(
        &self,
        state: &GatewayState,
        user_id: &str,
        old_config: &Value,
        new_config: &Value,
        enabled: bool,
    ) -> Result<()> {
        let old_leagues = parse_leagues(old_config);
        let new_leagues = parse_leagues(new_config);

        for removed in old_leagues.difference(&new_leagues) {
            state.pubsub.remove_subscriber(&league_set_key(removed), user_id).await;
        }
        if enabled {
            for added in new_leagues.difference(&old_leagues) {
                state.pubsub.add_subscriber(&league_set_key(added), user_id).await;
            }
        }
        Ok(())
    }

    async fn on_stream_deleted(&self, state: &GatewayState, user_id: &str, config: &Value) -> Result<()> {
        state.pubsub.remove_subscriber(&global_set_key(), user_id).await;
        for league in parse_leagues(config) {
            state.pubsub.remove_subscriber(&league_set_key(&league), user_id).await;
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
        let leagues = parse_leagues(config);

        if leagues.is_empty() {
            if enabled {
                state.pubsub.add_subscriber(&global_set_key(), user_id).await;
            } else {
                state.pubsub.remove_subscriber(&global_set_key(), user_id).await;
            }
            return Ok(());
        }

        for league in leagues {
            let key = league_set_key(&league);
            if enabled {
                state.pubsub.add_subscriber(&key, user_id).await;
            } else {
                state.pubsub.remove_subscriber(&key, user_id).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Healthy for SportsIntegration {
    async fn health_check(&self, state: &GatewayState) -> HealthStatus {
        match state.service.db_pool().await {
            Some(_) => HealthStatus::Healthy,
            None => HealthStatus::Degraded,
        }
    }
}

impl Integration for SportsIntegration {
    fn name(&self) -> &str {
        NAME
    }
    fn display_name(&self) -> &str {
        "Sports"
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
    fn as_healthy(&self) -> Option<&dyn Healthy> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_league_set_key_uppercases() {
        assert_eq!(league_set_key("nfl"), "sports:subscribers:league:NFL");
    }

    #[test]
    fn test_parse_leagues_empty_config() {
        assert!(parse_leagues(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn test_parse_leagues_normalizes_case() {
        let leagues = parse_leagues(&serde_json::json!({"leagues": ["nfl", "NBA"]}));
        assert!(leagues.contains("NFL"));
        assert!(leagues.contains("NBA"));
    }
}
