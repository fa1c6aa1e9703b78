//! Integration Registry (spec.md §4.3, C3).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use conflux_service::error::{Error, Result};

use crate::cdc::record::CdcRecord;
use crate::state::GatewayState;
use crate::streams::UserStream;

/// Health status returned by a `Healthy` integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Consumes CDC records (spec.md §4.4's `Routable` capability).
#[async_trait]
pub trait Routable: Send + Sync {
    fn handles_table(&self, table_name: &str) -> bool;

    /// Resolve the record's target user(s) and publish to each. `payload`
    /// is the pre-marshaled canonical JSON for this record, shared across
    /// every target user so it's serialized exactly once per record
    /// (spec.md §4.5 step 3).
    async fn route_cdc_record(&self, state: &GatewayState, record: &CdcRecord, payload: &Arc<str>) -> Result<()>;
}

/// Produces a dashboard snapshot for a user (spec.md §4.9's `Snapshottable`).
#[async_trait]
pub trait Snapshottable: Send + Sync {
    async fn get_dashboard_data(&self, state: &GatewayState, user_id: &str, stream: &UserStream) -> Result<Value>;
}

/// Responds to `UserStream` CRUD (spec.md §4.8's `Lifecycled`).
#[async_trait]
pub trait Lifecycled: Send + Sync {
    async fn on_stream_created(&self, state: &GatewayState, user_id: &str, config: &Value) -> Result<()>;

    /// `enabled` reflects the stream's current toggle: resources removed
    /// in the diff are always dropped from subscriber sets, but newly
    /// added resources are only subscribed to if the stream is enabled
    /// (spec.md §4.8).
    async fn on_stream_updated(
        &self,
        state: &GatewayState,
        user_id: &str,
        old_config: &Value,
        new_config: &Value,
        enabled: bool,
    ) -> Result<()>;

    async fn on_stream_deleted(&self, state: &GatewayState, user_id: &str, config: &Value) -> Result<()>;

    async fn on_sync_subscriptions(
        &self,
        state: &GatewayState,
        user_id: &str,
        config: &Value,
        enabled: bool,
    ) -> Result<()>;
}

/// Exposes integration-specific health (spec.md §4.3's `Healthy`).
#[async_trait]
pub trait Healthy: Send + Sync {
    async fn health_check(&self, state: &GatewayState) -> HealthStatus;
}

/// Runs exactly once at startup, after C2/DB are ready (spec.md §4.3's
/// `Initializable`).
#[async_trait]
pub trait Initializable: Send + Sync {
    async fn init(&self, state: &GatewayState) -> Result<()>;
}

/// The mandatory base interface every integration implements, plus
/// accessor methods for its optional capabilities. spec.md §9 notes a flat
/// struct with nullable hook pointers is equivalent to interface
/// polymorphism in languages without it; these `as_*` accessors play that
/// role for trait objects -- each defaults to `None` so an integration
/// only overrides the capabilities it actually implements.
pub trait Integration: Send + Sync {
    fn name(&self) -> &str;
    fn display_name(&self) -> &str;

    fn as_routable(&self) -> Option<&dyn Routable> {
        None
    }
    fn as_snapshottable(&self) -> Option<&dyn Snapshottable> {
        None
    }
    fn as_lifecycled(&self) -> Option<&dyn Lifecycled> {
        None
    }
    fn as_healthy(&self) -> Option<&dyn Healthy> {
        None
    }
    fn as_initializable(&self) -> Option<&dyn Initializable> {
        None
    }
}

/// Process-local map of integration name -> instance, populated at
/// startup and read-only thereafter (spec.md §4.3).
#[derive(Clone, Default)]
pub struct Registry {
    integrations: HashMap<String, Arc<dyn Integration>>,
}

impl Registry {
    pub fn new() -> Self {
        Self { integrations: HashMap::new() }
    }

    /// Register an integration. Duplicate names are a startup
    /// misconfiguration -- spec.md §4.3 calls for a fatal error, not a
    /// silent overwrite.
    pub fn register(&mut self, integration: Arc<dyn Integration>) -> Result<()> {
        let name = integration.name().to_string();
        if self.integrations.contains_key(&name) {
            return Err(Error::Fatal(format!("duplicate integration name: {name}")));
        }
        self.integrations.insert(name, integration);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Integration>> {
        self.integrations.values()
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }

    /// Find the integration claiming this table (spec.md §4.5 step 2).
    /// At most one integration should claim any given table; the first
    /// match wins if more than one mistakenly does.
    pub fn routable_for_table(&self, table_name: &str) -> Option<Arc<dyn Integration>> {
        self.integrations
            .values()
            .find(|i| i.as_routable().map(|r| r.handles_table(table_name)).unwrap_or(false))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(&'static str);
    impl Integration for Dummy {
        fn name(&self) -> &str {
            self.0
        }
        fn display_name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_duplicate_registration_is_fatal() {
        let mut registry = Registry::new();
        registry.register(Arc::new(Dummy("finance"))).unwrap();
        let err = registry.register(Arc::new(Dummy("finance"))).unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
    }

    #[test]
    fn test_lookup_by_name() {
        let mut registry = Registry::new();
        registry.register(Arc::new(Dummy("sports"))).unwrap();
        assert!(registry.get("sports").is_some());
        assert!(registry.get("finance").is_none());
    }

    #[test]
    fn test_routable_for_table_none_without_routable_capability() {
        let mut registry = Registry::new();
        registry.register(Arc::new(Dummy("sports"))).unwrap();
        assert!(registry.routable_for_table("scores").is_none());
    }
}
