use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis::Client;
use tokio::sync::mpsc;

use crate::db::candidates::{CacheKey, CandidateStore, PER_USER_PREFIXES};
use crate::error::{AppError, AppResult};
use crate::services::retry::{connect_with_retry, RetryPolicy};

/// Creates a Redis client for the candidate cache and the event stream
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Opens a managed (auto-reconnecting) connection, retrying with fixed backoff
pub async fn connect_manager(client: &Client, policy: &RetryPolicy) -> AppResult<ConnectionManager> {
    connect_with_retry("redis", policy, || {
        let client = client.clone();
        async move { ConnectionManager::new(client).await.map_err(AppError::from) }
    })
    .await
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
}

/// Candidate cache backed by Redis
///
/// Every entry is a JSON array stored under a plain string key. Writes are
/// queued to a single background writer, so writes to one key keep their
/// order and each `SET` replaces the value atomically.
#[derive(Clone)]
pub struct RedisCandidateStore {
    conn: ConnectionManager,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl CacheWriterHandle {
    /// Signals the writer task and waits until every queued write is flushed
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cache writer task ended abnormally");
        }
    }
}

impl RedisCandidateStore {
    /// Creates a store over an established connection and spawns its writer task
    pub fn new(conn: ConnectionManager) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let writer_conn = conn.clone();
        let task = tokio::spawn(async move {
            Self::cache_writer_task(writer_conn, write_rx, shutdown_rx).await;
        });

        let store = Self { conn, write_tx };
        let handle = CacheWriterHandle { shutdown_tx, task };

        (store, handle)
    }

    /// Background task that processes cache write messages
    ///
    /// On shutdown the channel is closed and drained before the task exits.
    async fn cache_writer_task(
        mut conn: ConnectionManager,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                maybe_msg = write_rx.recv() => {
                    let Some(msg) = maybe_msg else { break };
                    if let Err(e) = Self::write_to_redis(&mut conn, msg).await {
                        tracing::error!(error = %e, "Failed to write candidate entry to Redis");
                    }
                }
                _ = shutdown_rx.recv() => {
                    write_rx.close();
                    let mut flushed = 0usize;
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write_to_redis(&mut conn, msg).await {
                            tracing::error!(error = %e, "Failed to flush candidate entry during shutdown");
                        } else {
                            flushed += 1;
                        }
                    }
                    tracing::info!(flushed, "Cache writer flushed remaining writes");
                    break;
                }
            }
        }

        tracing::info!("Cache writer task stopped");
    }

    async fn write_to_redis(conn: &mut ConnectionManager, msg: CacheWriteMessage) -> AppResult<()> {
        let _: () = conn.set(msg.key, msg.value).await?;
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

#[async_trait::async_trait]
impl CandidateStore for RedisCandidateStore {
    async fn get(&self, key: &CacheKey) -> AppResult<Option<Vec<String>>> {
        let mut conn = self.conn.clone();
        let cached: Option<String> = conn.get(key.to_string()).await?;

        match cached {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &CacheKey, item_ids: Vec<String>) -> AppResult<()> {
        let msg = CacheWriteMessage {
            key: key.to_string(),
            value: serde_json::to_string(&item_ids)?,
        };

        self.write_tx
            .send(msg)
            .map_err(|_| AppError::Internal("cache writer is no longer running".to_string()))
    }

    async fn clear(&self) -> AppResult<()> {
        let mut keys = vec![CacheKey::TopItems.to_string()];
        for prefix in PER_USER_PREFIXES {
            keys.extend(self.scan_keys(&format!("{}*", prefix)).await?);
        }

        let mut conn = self.conn.clone();
        for chunk in keys.chunks(500) {
            let _: () = conn.del(chunk).await?;
        }

        tracing::info!(deleted = keys.len(), "Cleared candidate cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    async fn connect() -> ConnectionManager {
        let client = create_redis_client(&redis_url()).unwrap();
        let policy = RetryPolicy {
            attempts: 1,
            backoff: Duration::from_millis(10),
        };
        connect_manager(&client, &policy).await.unwrap()
    }

    #[test]
    fn test_create_redis_client_rejects_bad_url() {
        assert!(create_redis_client("not a url").is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_cache_miss() {
        let (store, _handle) = RedisCandidateStore::new(connect().await);

        let key = CacheKey::ModelRecs("nonexistent_user_12345".to_string());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_set_then_get_after_writer_drains() {
        let (store, _handle) = RedisCandidateStore::new(connect().await);

        let key = CacheKey::NovelItems("redis_test_user".to_string());
        let value = vec!["item1".to_string(), "item2".to_string()];
        store.set(&key, value.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get(&key).await.unwrap(), Some(value));

        let mut conn = connect().await;
        let _: () = conn.del(key.to_string()).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_shutdown_flushes_pending_writes() {
        let (store, handle) = RedisCandidateStore::new(connect().await);

        let key = CacheKey::ModelRecs("redis_shutdown_user".to_string());
        let value = vec!["shutdown_test".to_string()];
        store.set(&key, value.clone()).await.unwrap();

        handle.shutdown().await;

        assert_eq!(store.get(&key).await.unwrap(), Some(value));
        assert!(store.set(&key, vec![]).await.is_err());

        let mut conn = connect().await;
        let _: () = conn.del(key.to_string()).await.unwrap();
    }
}
