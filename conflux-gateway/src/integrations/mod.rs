//! Integration Modules (spec.md §4.4, C4).
//!
//! Four first-party feed integrations, each a self-contained unit owning
//! its own subscriber-set namespace, snapshot logic, and (for `fantasy`)
//! reverse-lookup table. Every module picks exactly one of the three
//! canonical CDC routing strategies rather than inventing its own.

pub mod fantasy;
pub mod finance;
pub mod rss;
pub mod sports;

use std::sync::Arc;

use crate::registry::{Integration, Registry};

/// Populate a fresh [`Registry`] with the four built-in integrations.
/// Called once at startup, before [`crate::state::GatewayState`] is
/// built -- registration itself needs no state, only [`Initializable`]
/// hooks (run separately, after the state exists) do (spec.md §4.3).
pub fn register_all() -> Registry {
    let mut registry = Registry::new();
    let integrations: Vec<Arc<dyn Integration>> = vec![
        Arc::new(finance::FinanceIntegration),
        Arc::new(sports::SportsIntegration),
        Arc::new(fantasy::FantasyIntegration),
        Arc::new(rss::RssIntegration),
    ];
    for integration in integrations {
        registry
            .register(integration)
            .expect("built-in integration names must be unique");
    }
    registry
}
