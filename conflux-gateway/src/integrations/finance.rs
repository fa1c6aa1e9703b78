//! Finance integration: resource-key CDC routing keyed by ticker symbol
//! (spec.md §4.4's "resource-key" strategy).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use conflux_service::error::{Error, Result};

use crate::cdc::record::CdcRecord;
use crate::registry::{Integration, Lifecycled, Routable, Snapshottable};
use crate::state::GatewayState;
use crate::streams::UserStream;

const NAME: &str = "finance";
const SNAPSHOT_TTL: Duration = Duration::from_secs(30);

fn subscriber_set_key(symbol: &str) -> String {
    format!("finance:subscribers:{symbol}")
}

fn snapshot_cache_key(symbol: &str) -> String {
    format!("cache:finance:quote:{symbol}")
}

#[derive(Debug, Default, Deserialize)]
struct FinanceConfig {
    #[serde(default)]
    symbols: Vec<String>,
}

fn parse_symbols(config: &Value) -> HashSet<String> {
    serde_json::from_value::<FinanceConfig>(config.clone())
        .map(|c| c.symbols.into_iter().map(|s| s.to_uppercase()).collect())
        .unwrap_or_default()
}

pub struct FinanceIntegration;

#[async_trait]
impl Routable for FinanceIntegration {
    fn handles_table(&self, table_name: &str) -> bool {
        table_name == "trades"
    }

    async fn route_cdc_record(&self, state: &GatewayState, record: &CdcRecord, payload: &Arc<str>) -> Result<()> {
        let Some(symbol) = record.column_str("symbol").map(str::to_uppercase) else {
            return Ok(());
        };
        let subscribers = state.pubsub.get_subscribers(&subscriber_set_key(&symbol)).await;
        for user_id in subscribers {
            state.pubsub.publish_user(&user_id, payload.clone()).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Snapshottable for FinanceIntegration {
    async fn get_dashboard_data(&self, state: &GatewayState, _user_id: &str, stream: &UserStream) -> Result<Value> {
        let symbols = parse_symbols(&stream.config);
        let mut quotes = serde_json::Map::with_capacity(symbols.len());

        for symbol in symbols {
            let key = snapshot_cache_key(&symbol);
            if let Some(cached) = state.pubsub.get_json::<Value>(&key).await? {
                quotes.insert(symbol, cached);
                continue;
            }

            let pool = state
                .service
                .db_pool()
                .await
                .ok_or_else(|| Error::Unavailable("database not configured".into()))?;
            let row: Option<(String, String)> = sqlx::query_as(
                "SELECT symbol, price FROM trades WHERE symbol = $1 ORDER BY traded_at DESC LIMIT 1",
            )
            .bind(&symbol)
            .fetch_optional(&pool)
            .await
            .map_err(Error::from)?;

            if let Some((symbol, price)) = row {
                let quote = serde_json::json!({"symbol": symbol, "price": price});
                state.pubsub.set_json(&key, &quote, SNAPSHOT_TTL).await?;
                quotes.insert(symbol, quote);
            }
        }

        Ok(Value::Object(quotes))
    }
}

#[async_trait]
impl Lifecycled for FinanceIntegration {
    async fn on_stream_created(&self, state: &GatewayState, user_id: &str, config: &Value) -> Result<()> {
        for symbol in parse_symbols(config) {
            state.pubsub.add_subscriber(&subscriber_set_key(&symbol), user_id).await;
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
        let old_symbols = parse_symbols(old_config);
        let new_symbols = parse_symbols(new_config);

        for removed in old_symbols.difference(&new_symbols) {
            state.pubsub.remove_subscriber(&subscriber_set_key(removed), user_id).await;
        }
        if enabled {
            for added in new_symbols.difference(&old_symbols) {
                state.pubsub.add_subscriber(&subscriber_set_key(added), user_id).await;
            }
        }
        Ok(())
    }

    async fn on_stream_deleted(&self, state: &GatewayState, user_id: &str, config: &Value) -> Result<()> {
        for symbol in parse_symbols(config) {
            state.pubsub.remove_subscriber(&subscriber_set_key(&symbol), user_id).await;
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
        for symbol in parse_symbols(config) {
            let key = subscriber_set_key(&symbol);
            if enabled {
                state.pubsub.add_subscriber(&key, user_id).await;
            } else {
                state.pubsub.remove_subscriber(&key, user_id).await;
            }
        }
        Ok(())
    }
}

impl Integration for FinanceIntegration {
    fn name(&self) -> &str {
        NAME
    }
    fn display_name(&self) -> &str {
        "Finance"
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
    fn test_subscriber_set_key_is_uppercased() {
        assert_eq!(subscriber_set_key("aapl"), "finance:subscribers:aapl");
    }

    #[test]
    fn test_parse_symbols_uppercases_and_dedupes_via_set() {
        let config = serde_json::json!({"symbols": ["aapl", "AAPL", "msft"]});
        let symbols = parse_symbols(&config);
        assert_eq!(symbols.len(), 2);
        assert!(symbols.contains("AAPL"));
        assert!(symbols.contains("MSFT"));
    }

    #[test]
    fn test_parse_symbols_missing_field_is_empty() {
        assert!(parse_symbols(&serde_json::json!({})).is_empty());
    }
}
