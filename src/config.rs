use std::time::Duration;

use anyhow::anyhow;

use crate::error::{LibError, Result};

pub const DEFAULT_GRAPH_NAME: &str = "My Knowledge Graph";
pub const DEFAULT_GRAPH_DESCRIPTION: &str = "Default graph created for existing documents";
pub const DEFAULT_ZEP_GRAPH_ID_PREFIX: &str = "graph_";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 2;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// What to do when a user's transaction ends up reassigning zero documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyGraphPolicy {
    /// Commit the graph and membership anyway.
    #[default]
    Keep,
    /// Roll the transaction back and report the user as skipped.
    Skip,
}

#[derive(Debug, Clone)]
pub struct GraphStoreConfig {
    pub api_key: Option<String>,
    pub graph_id_prefix: String,
}

/// Process-wide settings, loaded once at startup.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub default_graph_name: String,
    pub default_graph_description: Option<String>,
    pub graph_store: GraphStoreConfig,
    pub empty_graph_policy: EmptyGraphPolicy,
}

impl BackfillConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = get("DATABASE_URL").ok_or_else(|| {
            LibError::configuration(
                "DATABASE_URL is required",
                anyhow!("DATABASE_URL is not set"),
            )
        })?;

        let max_connections = match get("BACKFILL_MAX_CONNECTIONS") {
            Some(raw) => raw.parse::<u32>().map_err(|err| {
                LibError::configuration(
                    "BACKFILL_MAX_CONNECTIONS must be a positive integer",
                    anyhow!("invalid BACKFILL_MAX_CONNECTIONS '{}': {}", raw, err),
                )
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            return Err(LibError::configuration(
                "BACKFILL_MAX_CONNECTIONS must be at least 1",
                anyhow!("BACKFILL_MAX_CONNECTIONS was {}", max_connections),
            ));
        }

        let connect_timeout_secs = match get("BACKFILL_CONNECT_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|err| {
                LibError::configuration(
                    "BACKFILL_CONNECT_TIMEOUT_SECS must be a whole number of seconds",
                    anyhow!("invalid BACKFILL_CONNECT_TIMEOUT_SECS '{}': {}", raw, err),
                )
            })?,
            None => DEFAULT_CONNECT_TIMEOUT_SECS,
        };

        Ok(Self {
            database_url,
            max_connections,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            default_graph_name: get("BACKFILL_DEFAULT_GRAPH_NAME")
                .unwrap_or_else(|| DEFAULT_GRAPH_NAME.to_string()),
            default_graph_description: Some(
                get("BACKFILL_DEFAULT_GRAPH_DESCRIPTION")
                    .unwrap_or_else(|| DEFAULT_GRAPH_DESCRIPTION.to_string()),
            ),
            graph_store: GraphStoreConfig {
                api_key: get("ZEP_API_KEY"),
                graph_id_prefix: get("ZEP_GRAPH_ID_PREFIX")
                    .unwrap_or_else(|| DEFAULT_ZEP_GRAPH_ID_PREFIX.to_string()),
            },
            empty_graph_policy: EmptyGraphPolicy::default(),
        })
    }

    pub fn with_empty_graph_policy(mut self, policy: EmptyGraphPolicy) -> Self {
        self.empty_graph_policy = policy;
        self
    }

    /// Writes need a configured graph store; dry runs do not.
    pub fn require_graph_store(&self) -> Result<&str> {
        self.graph_store.api_key.as_deref().ok_or_else(|| {
            LibError::configuration(
                "ZEP_API_KEY is required unless --dry-run is set",
                anyhow!("ZEP_API_KEY is not set"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::ErrorKind;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = BackfillConfig::from_lookup(lookup(&[(
            "DATABASE_URL",
            "postgres://localhost/app",
        )]))
        .expect("config should load");

        assert_eq!(config.database_url, "postgres://localhost/app");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.default_graph_name, DEFAULT_GRAPH_NAME);
        assert_eq!(config.graph_store.graph_id_prefix, "graph_");
        assert_eq!(config.empty_graph_policy, EmptyGraphPolicy::Keep);
        assert!(config.require_graph_store().is_err());
    }

    #[test]
    fn missing_database_url_is_a_configuration_error() {
        let err = BackfillConfig::from_lookup(lookup(&[("DATABASE_URL", "   ")]))
            .expect_err("blank url should fail");
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.is_fatal());
    }

    #[test]
    fn rejects_empty_pools() {
        let err = BackfillConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("BACKFILL_MAX_CONNECTIONS", "0"),
        ]))
        .expect_err("zero connections cannot run anything");
        assert_eq!(err.public, "BACKFILL_MAX_CONNECTIONS must be at least 1");
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let err = BackfillConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("BACKFILL_CONNECT_TIMEOUT_SECS", "soon"),
        ]))
        .expect_err("timeout must be numeric");
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn reads_graph_store_settings() {
        let config = BackfillConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("ZEP_API_KEY", "z_test"),
            ("ZEP_GRAPH_ID_PREFIX", "kg-"),
            ("BACKFILL_DEFAULT_GRAPH_NAME", "Legacy Documents"),
        ]))
        .expect("config should load")
        .with_empty_graph_policy(EmptyGraphPolicy::Skip);

        assert_eq!(config.require_graph_store().expect("key set"), "z_test");
        assert_eq!(config.graph_store.graph_id_prefix, "kg-");
        assert_eq!(config.default_graph_name, "Legacy Documents");
        assert_eq!(config.empty_graph_policy, EmptyGraphPolicy::Skip);
    }
}
