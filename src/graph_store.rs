use anyhow::anyhow;
use uuid::Uuid;

use crate::config::GraphStoreConfig;
use crate::error::{LibError, Result};
use crate::models::UserId;

/// Mints the external reference a graph row uses to address its
/// counterpart in the managed graph store.
pub trait GraphStoreClient: Send + Sync {
    fn mint_graph_ref(&self, owner: UserId) -> String;
}

/// Zep Cloud addressing. References are generated locally; the remote store
/// is never contacted while backfilling.
#[derive(Debug, Clone)]
pub struct ZepGraphClient {
    graph_id_prefix: String,
}

impl ZepGraphClient {
    pub fn new(graph_id_prefix: impl Into<String>) -> Self {
        Self {
            graph_id_prefix: graph_id_prefix.into(),
        }
    }

    pub fn from_config(config: &GraphStoreConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(LibError::configuration(
                "ZEP_API_KEY is required to provision graphs",
                anyhow!("graph store client requested without an api key"),
            ));
        }
        if config.graph_id_prefix.chars().any(char::is_whitespace) {
            return Err(LibError::configuration(
                "ZEP_GRAPH_ID_PREFIX must not contain whitespace",
                anyhow!("invalid graph id prefix '{}'", config.graph_id_prefix),
            ));
        }
        Ok(Self::new(config.graph_id_prefix.clone()))
    }
}

impl GraphStoreClient for ZepGraphClient {
    fn mint_graph_ref(&self, _owner: UserId) -> String {
        format!("{}{}", self.graph_id_prefix, Uuid::new_v4().simple())
    }
}
