//! # Store backends
//!
//! The uniform key/value surface consumed by template processors and the
//! admin server, plus the Redis and in-memory implementations of it.
//! Directory-style listing is emulated over the flat key space: a key with no
//! value of its own is treated as a prefix and everything beneath it is
//! returned.

pub mod connection;
pub mod endpoint;
pub mod memory;
pub mod protocol;
pub mod redis;
#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionManager, ConnectionState, Connector, ProbeOutcome, Session};
pub use endpoint::{Endpoint, TransportKind, parse_endpoints};
pub use memory::MemoryStore;
pub use redis::{RedisConnector, RedisStoreClient};

use crate::error::{FetchError, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Absolute key path to value. Rebuilt fresh by every fetch.
pub type KeyValueMap = BTreeMap<String, String>;

/// A store client shared between the processor and the admin server.
pub type SharedStore = Arc<dyn StoreClient>;

/// What a backend can do beyond the basic get/set/remove surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendCapabilities {
    /// Whether `watch_prefix` delivers real change notifications. When false
    /// it only returns once the stop token fires.
    pub supports_watch: bool,
}

/// Uniform key/value backend surface.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Short backend name for logs and the admin API.
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> BackendCapabilities;

    /// Fetch every key in `keys`. Keys without a value are expanded as
    /// prefixes; keys absent at both stages are omitted. On failure the
    /// error carries the values collected so far.
    async fn get_values(&self, keys: &[String]) -> Result<KeyValueMap, FetchError>;

    /// Unconditionally assign `value` to `key`.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`. Deleting nothing is reported as `NotFound`.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Block until something under `prefix` changes after `wait_index`, or
    /// `stop` fires. Returns the index to wait from next time.
    async fn watch_prefix(
        &self,
        prefix: &str,
        keys: &[String],
        wait_index: u64,
        stop: &CancellationToken,
    ) -> Result<u64, StoreError>;
}

/// Which backend implementation to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Redis,
    Memory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Redis => write!(f, "redis"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

/// Configuration for the store backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Ordered endpoint list. Accepts an array or one comma-separated string.
    #[serde(deserialize_with = "deserialize_node_list")]
    pub nodes: Vec<String>,
    /// Credential applied to every connect attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Initial contents for the memory backend.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub seed: BTreeMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Redis,
            nodes: vec!["127.0.0.1:6379".to_string()],
            password: None,
            seed: BTreeMap::new(),
        }
    }
}

fn deserialize_node_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NodeList {
        One(String),
        Many(Vec<String>),
    }

    let nodes = match NodeList::deserialize(deserializer)? {
        NodeList::One(s) => vec![s],
        NodeList::Many(v) => v,
    };
    Ok(nodes
        .iter()
        .flat_map(|n| n.split(','))
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect())
}

/// Build the configured store client. For Redis this performs the initial
/// connection and fails if no endpoint is reachable.
pub async fn new_store_client(config: &BackendConfig) -> Result<SharedStore, StoreError> {
    match config.kind {
        BackendKind::Redis => {
            let endpoints = parse_endpoints(&config.nodes)?;
            info!(nodes = ?config.nodes, "Connecting to redis backend");
            let client = RedisStoreClient::connect(endpoints, config.password.clone()).await?;
            Ok(Arc::new(client))
        }
        BackendKind::Memory => {
            info!(keys = config.seed.len(), "Using in-memory backend");
            Ok(Arc::new(MemoryStore::with_entries(config.seed.clone())))
        }
    }
}

/// Drop one trailing `/*` wildcard marker.
pub fn strip_wildcard(key: &str) -> &str {
    key.strip_suffix("/*").unwrap_or(key)
}

/// The directory prefix a key expands to: `/` for the root, otherwise the key
/// with a single trailing `/`.
pub fn key_prefix(key: &str) -> String {
    format!("{}/", key.trim_end_matches('/'))
}

/// Glob pattern matching everything beneath `key`.
pub fn scan_pattern(key: &str) -> String {
    format!("{}*", key_prefix(key))
}
