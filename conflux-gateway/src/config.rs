//! Gateway-specific configuration layered on top of [`conflux_service::config::Config`].
//!
//! The ambient layer owns service/JWKS/database/redis/sse/shutdown config;
//! this module only adds the knobs the integrations and CDC ingress need
//! (spec.md §6.5 "Per-integration upstream credentials").

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use conflux_service::config::Config as ServiceConfig;
use conflux_service::error::Result;

/// Upstream credentials and tuning for a single integration. Every field
/// is optional because an integration may need none of them (sports has
/// no per-user OAuth, for instance).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationCredentials {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub oauth_client_id: Option<String>,

    #[serde(default)]
    pub oauth_client_secret: Option<String>,

    #[serde(default)]
    pub upstream_base_url: Option<String>,
}

/// Per-integration credential/tuning map, keyed by integration name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    #[serde(default)]
    pub finance: IntegrationCredentials,

    #[serde(default)]
    pub sports: IntegrationCredentials,

    #[serde(default)]
    pub fantasy: IntegrationCredentials,

    #[serde(default)]
    pub rss: IntegrationCredentials,
}

/// The gateway's full configuration: the ambient service config plus the
/// per-integration credential set.
#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub integrations: IntegrationsConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_for_service("conflux-gateway")
    }

    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let service = ServiceConfig::load_for_service(service_name)?;

        let config_paths = [
            std::path::PathBuf::from("config.toml"),
            conflux_service::config::Config::recommended_path(service_name),
            std::path::PathBuf::from("/etc/conflux").join(service_name).join("config.toml"),
        ];

        let mut figment = Figment::new().merge(Serialized::defaults(IntegrationsConfig::default()));
        for path in config_paths.iter().rev() {
            if path.exists() {
                figment = figment.merge(Toml::file(path).nested());
            }
        }
        figment = figment.merge(Env::prefixed("CONFLUX_INTEGRATIONS_").split("_"));

        let integrations: IntegrationsConfig = figment.extract()?;

        Ok(Self { service, integrations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrations_default_to_empty() {
        let integrations = IntegrationsConfig::default();
        assert!(integrations.finance.api_key.is_none());
        assert!(integrations.rss.upstream_base_url.is_none());
    }
}
