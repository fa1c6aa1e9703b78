//! RSS integration: resource-key CDC routing keyed by feed URL
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

const NAME: &str = "rss";
const CATALOG_TTL: Duration = Duration::from_secs(300);

fn subscriber_set_key(feed_url: &str) -> String {
    format!("rss:subscribers:{feed_url}")
}

fn snapshot_cache_key(feed_url: &str) -> String {
    format!("cache:rss:items:{feed_url}")
}

#[derive(Debug, Default, Deserialize)]
struct RssConfig {
    #[serde(default)]
    feeds: Vec<String>,
}

fn parse_feeds(config: &Value) -> HashSet<String> {
    serde_json::from_value::<RssConfig>(config.clone())
        .map(|c| c.feeds.into_iter().collect())
        .unwrap_or_default()
}

pub struct RssIntegration;

#[async_trait]
impl Routable for RssIntegration {
    fn handles_table(&self, table_name: &str) -> bool {
        table_name == "rss_items"
    }

    async fn route_cdc_record(&self, state: &GatewayState, record: &CdcRecord, payload: &Arc<str>) -> Result<()> {
        let Some(feed_url) = record.column_str("feed_url") else {
            return Ok(());
        };
        let subscribers = state.pubsub.get_subscribers(&subscriber_set_key(feed_url)).await;
        for user_id in subscribers {
            state.pubsub.publish_user(&user_id, payload.clone()).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Snapshottable for RssIntegration {
    async fn get_dashboard_data(&self, state: &GatewayState, _user_id: &str, stream: &UserStream) -> Result<Value> {
        let feeds = parse_feeds(&stream.config);
        let mut items = serde_json::Map::with_capacity(feeds.len());

        for feed_url in feeds {
            let key = snapshot_cache_key(&feed_url);
            if let Some(cached) = state.pubsub.get_json::<Value>(&key).await? {
                items.insert(feed_url, cached);
                continue;
            }

            let pool = state
                .service
                .db_pool()
                .await
                .ok_or_else(|| Error::Unavailable("database not configured".into()))?;
            let rows: Vec<(String, String)> = sqlx::query_as(
                "SELECT title, published_at FROM rss_items WHERE feed_url = $1 \
                 ORDER BY published_at DESC LIMIT 20",
            )
            .bind(&feed_url)
            .fetch_all(&pool)
            .await
            .map_err(Error::from)?;

            let entries: Vec<Value> = rows
                .into_iter()
                .map(|(title, published_at)| serde_json::json!({"title": title, "published_at": published_at}))
                .collect();
            let value = Value::Array(entries);
            state.pubsub.set_json(&key, &value, CATALOG_TTL).await?;
            items.insert(feed_url, value);
        }

        Ok(Value::Object(items))
    }
}

#[async_trait]
impl Lifecycled for RssIntegration {
    async fn on_stream_created(&self, state: &GatewayState, user_id: &str, config: &Value) -> Result<()> {
        for feed_url in parse_feeds(config) {
            state.pubsub.add_subscriber(&subscriber_set_key(&feed_url), user_id).await;
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
        let old_feeds = parse_feeds(old_config);
        let new_feeds = parse_feeds(new_config);

        for removed in old_feeds.difference(&new_feeds) {
            state.pubsub.remove_subscriber(&subscriber_set_key(removed), user_id).await;
        }
        if enabled {
            for added in new_feeds.difference(&old_feeds) {
                state.pubsub.add_subscriber(&subscriber_set_key(added), user_id).await;
            }
        }
        Ok(())
    }

    async fn on_stream_deleted(&self, state: &GatewayState, user_id: &str, config: &Value) -> Result<()> {
        for feed_url in parse_feeds(config) {
            state.pubsub.remove_subscriber(&subscriber_set_key(&feed_url), user_id).await;
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
        for feed_url in parse_feeds(config) {
            let key = subscriber_set_key(&feed_url);
            if enabled {
                state.pubsub.add_subscriber(&key, user_id).await;
            } else {
                state.pubsub.remove_subscriber(&key, user_id).await;
            }
        }
        Ok(())
    }
}

impl Integration for RssIntegration {
    fn name(&self) -> &str {
        NAME
    }
    fn display_name(&self) -> &str {
        "RSS Feeds"
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
    fn test_parse_feeds() {
        let config = serde_json::json!({"feeds": ["https://a.example/rss", "https://b.example/rss"]});
        let feeds = parse_feeds(&config);
        assert_eq!(feeds.len(), 2);
        assert!(feeds.contains("https://a.example/rss"));
    }

    #[test]
    fn test_subscriber_set_key() {
        assert_eq!(subscriber_set_key("https://a.example/rss"), "rss:subscribers:https://a.example/rss");
    }
}
