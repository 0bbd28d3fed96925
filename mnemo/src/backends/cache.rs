//! Cache Store (C4, §4.4) — a namespaced, keyed TTL cache over Redis.
//!
//! Degrades to a disabled mode (every operation returns `backend_unavailable`
//! immediately) when `redis.enabled = false` in config, or when the initial
//! connection attempt fails — callers never block retrying a cache that
//! isn't there.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use super::{Health, StorageBackend};
use crate::config::RedisConfig;
use crate::error::{Backend as BackendKind, MnemoError, MnemoResult};

/// Which key prefix a cache entry lives under (§4.4 example keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    Doc,
    ReasoningChain,
}

impl CacheNamespace {
    fn prefix(&self) -> &'static str {
        match self {
            CacheNamespace::Doc => "ltmc:doc:",
            CacheNamespace::ReasoningChain => "mindgraph:reasoning_chain:",
        }
    }
}

fn key_for(namespace: CacheNamespace, id: &str) -> String {
    format!("{}{}", namespace.prefix(), id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    content: String,
    metadata: serde_json::Value,
}

enum Mode {
    Enabled {
        manager: ConnectionManager,
    },
    Disabled {
        reason: String,
    },
}

pub struct CacheStore {
    mode: tokio::sync::Mutex<Mode>,
    default_ttl: u64,
}

fn unavailable(reason: &str) -> MnemoError {
    MnemoError::backend_unavailable(BackendKind::Cs, reason.to_string())
}

impl CacheStore {
    /// Connects per `config`, degrading to disabled mode rather than
    /// returning an error when `enabled = false` or the connection fails.
    pub async fn connect(config: &RedisConfig) -> Self {
        if !config.enabled {
            tracing::info!("cache store disabled via config");
            return Self {
                mode: tokio::sync::Mutex::new(Mode::Disabled {
                    reason: "redis.enabled is false".to_string(),
                }),
                default_ttl: 3600,
            };
        }

        let url = if config.password.is_empty() {
            format!("redis://{}:{}/{}", config.host, config.port, config.db)
        } else {
            format!("redis://:{}@{}:{}/{}", config.password, config.host, config.port, config.db)
        };

        let mode = match redis::Client::open(url) {
            Ok(client) => match tokio::time::timeout(
                std::time::Duration::from_secs(config.connection_timeout),
                ConnectionManager::new(client),
            )
            .await
            {
                Ok(Ok(manager)) => Mode::Enabled { manager },
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "cache store connection failed, running disabled");
                    Mode::Disabled { reason: err.to_string() }
                }
                Err(_) => {
                    tracing::warn!("cache store connection timed out, running disabled");
                    Mode::Disabled {
                        reason: "connection timed out".to_string(),
                    }
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "invalid redis url, running disabled");
                Mode::Disabled { reason: err.to_string() }
            }
        };

        Self {
            mode: tokio::sync::Mutex::new(mode),
            default_ttl: 3600,
        }
    }

    #[tracing::instrument(skip(self, content, metadata))]
    pub async fn cache(
        &self,
        namespace: CacheNamespace,
        id: &str,
        content: &str,
        metadata: serde_json::Value,
        ttl: Option<u64>,
    ) -> MnemoResult<()> {
        let key = key_for(namespace, id);
        let entry = CacheEntry {
            content: content.to_string(),
            metadata,
        };
        let payload = serde_json::to_string(&entry)?;
        let ttl = ttl.unwrap_or(self.default_ttl);

        let mut mode = self.mode.lock().await;
        match &mut *mode {
            Mode::Enabled { manager } => manager
                .set_ex::<_, _, ()>(&key, payload, ttl)
                .await
                .map_err(|e| MnemoError::backend_failed(BackendKind::Cs, e.to_string())),
            Mode::Disabled { reason } => Err(unavailable(reason)),
        }
    }

    pub async fn get(&self, namespace: CacheNamespace, id: &str) -> MnemoResult<Option<(String, serde_json::Value)>> {
        let key = key_for(namespace, id);
        let mut mode = self.mode.lock().await;
        match &mut *mode {
            Mode::Enabled { manager } => {
                let raw: Option<String> = manager
                    .get(&key)
                    .await
                    .map_err(|e| MnemoError::backend_failed(BackendKind::Cs, e.to_string()))?;
                match raw {
                    Some(raw) => {
                        let entry: CacheEntry = serde_json::from_str(&raw)?;
                        Ok(Some((entry.content, entry.metadata)))
                    }
                    None => Ok(None),
                }
            }
            Mode::Disabled { reason } => Err(unavailable(reason)),
        }
    }

    pub async fn exists(&self, namespace: CacheNamespace, id: &str) -> MnemoResult<bool> {
        let key = key_for(namespace, id);
        let mut mode = self.mode.lock().await;
        match &mut *mode {
            Mode::Enabled { manager } => manager
                .exists(&key)
                .await
                .map_err(|e| MnemoError::backend_failed(BackendKind::Cs, e.to_string())),
            Mode::Disabled { reason } => Err(unavailable(reason)),
        }
    }

    pub async fn delete(&self, namespace: CacheNamespace, id: &str) -> MnemoResult<()> {
        let key = key_for(namespace, id);
        let mut mode = self.mode.lock().await;
        match &mut *mode {
            Mode::Enabled { manager } => manager
                .del::<_, ()>(&key)
                .await
                .map_err(|e| MnemoError::backend_failed(BackendKind::Cs, e.to_string())),
            Mode::Disabled { reason } => Err(unavailable(reason)),
        }
    }

    pub async fn set_ttl(&self, namespace: CacheNamespace, id: &str, ttl: u64) -> MnemoResult<()> {
        let key = key_for(namespace, id);
        let mut mode = self.mode.lock().await;
        match &mut *mode {
            Mode::Enabled { manager } => manager
                .expire::<_, ()>(&key, ttl as i64)
                .await
                .map_err(|e| MnemoError::backend_failed(BackendKind::Cs, e.to_string())),
            Mode::Disabled { reason } => Err(unavailable(reason)),
        }
    }

    /// Bounded, non-blocking key scan using `SCAN` cursors rather than `KEYS`.
    pub async fn scan(&self, pattern: &str, limit: usize) -> MnemoResult<Vec<String>> {
        let mut mode = self.mode.lock().await;
        match &mut *mode {
            Mode::Enabled { manager } => {
                let mut cursor: u64 = 0;
                let mut found = Vec::new();
                loop {
                    let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(manager)
                        .await
                        .map_err(|e| MnemoError::backend_failed(BackendKind::Cs, e.to_string()))?;
                    found.extend(batch);
                    cursor = next_cursor;
                    if found.len() >= limit || cursor == 0 {
                        break;
                    }
                }
                found.truncate(limit);
                Ok(found)
            }
            Mode::Disabled { reason } => Err(unavailable(reason)),
        }
    }

    /// Deletes every key under this crate's namespaces matching `pattern`.
    /// `flush("*")` still only ever touches `ltmc:*` / `mindgraph:*` keys.
    pub async fn flush(&self, pattern: &str) -> MnemoResult<u64> {
        let mut keys = self.scan(&format!("{}{pattern}", CacheNamespace::Doc.prefix()), 10_000).await?;
        keys.extend(self.scan(&format!("{}{pattern}", CacheNamespace::ReasoningChain.prefix()), 10_000).await?);
        if keys.is_empty() {
            return Ok(0);
        }
        let mut mode = self.mode.lock().await;
        match &mut *mode {
            Mode::Enabled { manager } => {
                let count = keys.len() as u64;
                manager
                    .del::<_, ()>(keys)
                    .await
                    .map_err(|e| MnemoError::backend_failed(BackendKind::Cs, e.to_string()))?;
                Ok(count)
            }
            Mode::Disabled { reason } => Err(unavailable(reason)),
        }
    }
}

#[async_trait]
impl StorageBackend for CacheStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Cs
    }

    async fn exists(&self, key: &str) -> MnemoResult<bool> {
        self.exists(CacheNamespace::Doc, key).await
    }

    async fn delete(&self, key: &str) -> MnemoResult<()> {
        self.delete(CacheNamespace::Doc, key).await
    }

    async fn health(&self) -> Health {
        let mut mode = self.mode.lock().await;
        match &mut *mode {
            Mode::Enabled { manager } => match redis::cmd("PING").query_async::<_, String>(manager).await {
                Ok(_) => Health::Up,
                Err(err) => Health::Down(err.to_string()),
            },
            Mode::Disabled { reason } => Health::Down(reason.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_config_yields_disabled_mode() {
        let config = RedisConfig {
            enabled: false,
            ..RedisConfig::default()
        };
        let cache = CacheStore::connect(&config).await;
        let err = cache.cache(CacheNamespace::Doc, "1", "hi", serde_json::json!({}), None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::BackendUnavailable);
    }

    #[tokio::test]
    async fn unreachable_host_degrades_instead_of_panicking() {
        let config = RedisConfig {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 1,
            connection_timeout: 1,
            ..RedisConfig::default()
        };
        let cache = CacheStore::connect(&config).await;
        assert!(matches!(cache.health().await, Health::Down(_)));
    }
}
