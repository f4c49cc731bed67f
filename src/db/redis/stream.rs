use std::collections::VecDeque;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};

use super::cache::connect_manager;
use crate::error::{AppError, AppResult};
use crate::models::InteractionMessage;
use crate::services::event_source::{Delivery, EventPublisher, EventSource, Received};
use crate::services::retry::{retry, RetryPolicy};

/// Stream entry field carrying the JSON-encoded interaction message
const PAYLOAD_FIELD: &str = "data";

/// Entries fetched per read, mirroring a consumer prefetch window
const PREFETCH: usize = 10;

/// Pending entries of other consumers idle this long are taken over on start
const CLAIM_MIN_IDLE_MS: u64 = 60_000;

/// Interaction events consumed from a Redis stream through a consumer group
///
/// Entries stay in the group's pending list until acknowledged, so anything
/// read but not acknowledged before a crash is replayed on restart: the
/// consumer first claims long-idle entries left pending by other consumer
/// names, drains its own pending entries, then switches to new ones.
///
/// Reads block server-side, so the source owns a connection no other
/// component shares.
pub struct RedisStreamSource {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    retry: RetryPolicy,
    backlog_drained: bool,
    buffered: VecDeque<Delivery>,
}

impl RedisStreamSource {
    /// Opens a dedicated connection and joins (creating if needed) the
    /// consumer group on `stream`
    pub async fn connect(
        client: &Client,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        retry: RetryPolicy,
    ) -> AppResult<Self> {
        let conn = connect_manager(client, &retry).await?;
        let stream = stream.into();
        let group = group.into();
        let mut setup_conn = conn.clone();

        let created: redis::RedisResult<()> =
            setup_conn.xgroup_create_mkstream(&stream, &group, "0").await;
        match created {
            Ok(()) => tracing::info!(stream = %stream, group = %group, "Created consumer group"),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                tracing::debug!(stream = %stream, group = %group, "Consumer group already exists")
            }
            Err(e) => return Err(e.into()),
        }

        let mut source = Self {
            conn,
            stream,
            group,
            consumer: consumer.into(),
            retry,
            backlog_drained: false,
            buffered: VecDeque::new(),
        };
        source.claim_orphaned().await?;
        Ok(source)
    }

    /// Moves idle pending entries of other consumers onto this consumer, so
    /// the backlog read below replays them
    async fn claim_orphaned(&mut self) -> AppResult<usize> {
        let mut cursor = "0-0".to_string();
        let mut claimed = 0usize;

        loop {
            let reply: Vec<redis::Value> = redis::cmd("XAUTOCLAIM")
                .arg(&self.stream)
                .arg(&self.group)
                .arg(&self.consumer)
                .arg(CLAIM_MIN_IDLE_MS)
                .arg(&cursor)
                .arg("COUNT")
                .arg(100)
                .arg("JUSTID")
                .query_async(&mut self.conn)
                .await?;

            let (Some(next), Some(ids)) = (reply.first(), reply.get(1)) else {
                return Err(AppError::Internal(
                    "unexpected XAUTOCLAIM reply".to_string(),
                ));
            };
            cursor = redis::from_redis_value(next)?;
            claimed += redis::from_redis_value::<Vec<String>>(ids)?.len();

            if cursor == "0-0" {
                break;
            }
        }

        if claimed > 0 {
            tracing::info!(stream = %self.stream, claimed, "Claimed pending entries of other consumers");
        }
        Ok(claimed)
    }

    async fn read_batch(&mut self, wait: Duration) -> AppResult<Vec<Delivery>> {
        let start_id = if self.backlog_drained { ">" } else { "0" };
        let block_ms = self
            .backlog_drained
            .then(|| wait.as_millis().max(1) as usize);

        let reply: Option<StreamReadReply> = retry("event stream read", &self.retry, || {
            let mut conn = self.conn.clone();
            let stream = self.stream.clone();
            let mut options = StreamReadOptions::default()
                .group(&self.group, &self.consumer)
                .count(PREFETCH);
            if let Some(ms) = block_ms {
                options = options.block(ms);
            }
            async move {
                conn.xread_options(&[stream.as_str()], &[start_id], &options)
                    .await
                    .map_err(AppError::from)
            }
        })
        .await?;

        let mut deliveries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in key.ids {
                match entry.get::<String>(PAYLOAD_FIELD) {
                    Some(payload) => deliveries.push(Delivery {
                        id: entry.id,
                        payload: payload.into_bytes(),
                    }),
                    None => {
                        tracing::warn!(id = %entry.id, "Stream entry without payload field");
                        deliveries.push(Delivery {
                            id: entry.id,
                            payload: Vec::new(),
                        });
                    }
                }
            }
        }

        if !self.backlog_drained && deliveries.is_empty() {
            tracing::info!(stream = %self.stream, "Pending backlog drained");
            self.backlog_drained = true;
        }

        Ok(deliveries)
    }
}

#[async_trait::async_trait]
impl EventSource for RedisStreamSource {
    async fn receive(&mut self, wait: Duration) -> AppResult<Received> {
        if self.buffered.is_empty() {
            let batch = self.read_batch(wait).await?;
            self.buffered.extend(batch);
        }

        Ok(match self.buffered.pop_front() {
            Some(delivery) => Received::Message(delivery),
            None => Received::Idle,
        })
    }

    async fn ack(&mut self, delivery_id: &str) -> AppResult<()> {
        let _: i64 = self
            .conn
            .xack(&self.stream, &self.group, &[delivery_id])
            .await?;
        Ok(())
    }
}

/// Appends interaction messages to the Redis stream
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: ConnectionManager,
    stream: String,
}

impl RedisStreamPublisher {
    pub fn new(conn: ConnectionManager, stream: impl Into<String>) -> Self {
        Self {
            conn,
            stream: stream.into(),
        }
    }
}

#[async_trait::async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, message: &InteractionMessage) -> AppResult<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn.clone();
        let _: String = conn
            .xadd(&self.stream, "*", &[(PAYLOAD_FIELD, payload)])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::redis::RedisCandidateStore;
    use crate::db::{CacheKey, CandidateStore};
    use crate::models::{Action, OneOrMany};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 1,
            backoff: Duration::from_millis(10),
        }
    }

    async fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let count: usize = line.trim().strip_prefix('*')?.parse().ok()?;

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            let len: usize = line.trim().strip_prefix('$')?.parse().ok()?;
            let mut data = vec![0u8; len + 2];
            reader.read_exact(&mut data).await.ok()?;
            data.truncate(len);
            args.push(String::from_utf8(data).ok()?);
        }
        Some(args)
    }

    /// Minimal RESP server that, like Redis, answers one connection's
    /// commands strictly in order; `XREADGROUP ... BLOCK` holds its connection
    async fn spawn_in_order_server(connections: Arc<AtomicUsize>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut reader = BufReader::new(socket);
                    while let Some(args) = read_command(&mut reader).await {
                        let reply: &[u8] = match args[0].to_ascii_uppercase().as_str() {
                            "XREADGROUP" => {
                                if let Some(pos) = args.iter().position(|a| a == "BLOCK") {
                                    let ms: u64 = args[pos + 1].parse().unwrap_or(0);
                                    tokio::time::sleep(Duration::from_millis(ms)).await;
                                }
                                b"*-1\r\n"
                            }
                            "XAUTOCLAIM" => b"*2\r\n$3\r\n0-0\r\n*0\r\n",
                            "GET" => b"$-1\r\n",
                            _ => b"+OK\r\n",
                        };
                        if reader.get_mut().write_all(reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_blocked_receive_does_not_delay_cache_reads() {
        let connections = Arc::new(AtomicUsize::new(0));
        let addr = spawn_in_order_server(connections.clone()).await;
        let client = Client::open(format!("redis://{}/", addr)).unwrap();

        let cache_conn = connect_manager(&client, &fast_policy()).await.unwrap();
        let (store, _writer) = RedisCandidateStore::new(cache_conn);
        let mut source = RedisStreamSource::connect(&client, "events", "recs", "c1", fast_policy())
            .await
            .unwrap();

        // first receive drains the (empty) backlog without blocking
        assert_eq!(
            source.receive(Duration::from_millis(10)).await.unwrap(),
            Received::Idle
        );
        let reader = tokio::spawn(async move { source.receive(Duration::from_secs(3)).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        assert_eq!(store.get(&CacheKey::TopItems).await.unwrap(), None);
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "cache read waited {:?}",
            started.elapsed()
        );
        assert!(connections.load(Ordering::SeqCst) >= 2);

        reader.abort();
    }

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    async fn publish_one(client: &Client, stream: &str) {
        let conn = connect_manager(client, &fast_policy()).await.unwrap();
        let message = InteractionMessage {
            user_id: "u1".to_string(),
            item_ids: OneOrMany::One("42".to_string()),
            actions: OneOrMany::One(Action::Like),
            timestamp: 1.0,
        };
        RedisStreamPublisher::new(conn, stream)
            .publish(&message)
            .await
            .unwrap();
    }

    async fn next_message(source: &mut RedisStreamSource) -> Delivery {
        for _ in 0..5 {
            if let Received::Message(delivery) =
                source.receive(Duration::from_millis(200)).await.unwrap()
            {
                return delivery;
            }
        }
        panic!("no delivery");
    }

    async fn drop_stream(client: &Client, stream: &str) {
        let mut conn = connect_manager(client, &fast_policy()).await.unwrap();
        let _: () = conn.del(stream).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_unacked_entry_is_replayed_after_restart() {
        let client = create_client();
        let stream = format!("recs_test_replay_{}", uuid::Uuid::new_v4());

        let mut first = RedisStreamSource::connect(&client, &stream, "recs", "ingestor", fast_policy())
            .await
            .unwrap();
        publish_one(&client, &stream).await;
        let delivered = next_message(&mut first).await;
        drop(first);

        let mut restarted =
            RedisStreamSource::connect(&client, &stream, "recs", "ingestor", fast_policy())
                .await
                .unwrap();
        let replayed = next_message(&mut restarted).await;
        assert_eq!(replayed.id, delivered.id);
        restarted.ack(&replayed.id).await.unwrap();

        drop_stream(&client, &stream).await;
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_idle_entries_of_renamed_consumer_are_claimed() {
        let client = create_client();
        let stream = format!("recs_test_claim_{}", uuid::Uuid::new_v4());

        let mut old = RedisStreamSource::connect(&client, &stream, "recs", "old-name", fast_policy())
            .await
            .unwrap();
        publish_one(&client, &stream).await;
        let delivered = next_message(&mut old).await;
        drop(old);

        // age the pending entry past the claim threshold
        let mut conn = connect_manager(&client, &fast_policy()).await.unwrap();
        let _: redis::Value = redis::cmd("XCLAIM")
            .arg(&stream)
            .arg("recs")
            .arg("old-name")
            .arg(0)
            .arg(&delivered.id)
            .arg("IDLE")
            .arg(CLAIM_MIN_IDLE_MS + 1_000)
            .query_async(&mut conn)
            .await
            .unwrap();

        let mut renamed =
            RedisStreamSource::connect(&client, &stream, "recs", "new-name", fast_policy())
                .await
                .unwrap();
        let replayed = next_message(&mut renamed).await;
        assert_eq!(replayed.id, delivered.id);

        drop_stream(&client, &stream).await;
    }

    fn create_client() -> Client {
        Client::open(redis_url()).unwrap()
    }
}
