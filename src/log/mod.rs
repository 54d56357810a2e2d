//! The durable log: an append-only stream abstraction with consumer-group
//! semantics, backed by Redis Streams.
//!
//! Grounded on the connection-manager-with-retry idiom of a sibling venue
//! backend's Redis client, wired to the stream primitives (`XADD`,
//! `XGROUP CREATE ... MKSTREAM`, `XREADGROUP ... STREAMS <stream> >`,
//! `XACK`) the original poller/matcher/finder/executor services use.

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// One record read off a stream: its log-id (used to `ack`) and its
/// string-keyed field map (the wire format of spec section 6).
#[derive(Debug, Clone)]
pub struct Record {
    pub log_id: String,
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub url: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Server-side BLOCK timeout for `read_group`, in milliseconds.
    pub block_ms: usize,
}

impl LogConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_retries: 3,
            retry_delay_ms: 100,
            block_ms: 2000,
        }
    }
}

/// A durable log client. One instance is owned by each stage for its
/// lifetime (process-private connection pool, per spec section 5).
pub struct Log {
    config: LogConfig,
    connection: Arc<RwLock<Option<ConnectionManager>>>,
    client: Client,
}

impl Log {
    pub async fn connect(config: LogConfig) -> Result<Self, RedisError> {
        let client = Client::open(config.url.as_str())?;
        let log = Self {
            config,
            connection: Arc::new(RwLock::new(None)),
            client,
        };
        log.ensure_connected().await?;
        Ok(log)
    }

    async fn ensure_connected(&self) -> Result<(), RedisError> {
        let mut conn = self.connection.write().await;
        if conn.is_none() {
            tracing::info!(url = %self.config.url, "connecting to log backend");
            *conn = Some(ConnectionManager::new(self.client.clone()).await?);
        }
        Ok(())
    }

    async fn get_connection(&self) -> Result<ConnectionManager, RedisError> {
        self.ensure_connected().await?;
        let conn = self.connection.read().await;
        conn.clone()
            .ok_or_else(|| RedisError::from((redis::ErrorKind::IoError, "connection not available")))
    }

    async fn with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T, RedisError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let mut last_error = None;
        for attempt in 0..self.config.max_retries {
            match self.get_connection().await {
                Ok(conn) => match operation(conn).await {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        tracing::warn!(attempt, "log operation failed: {e}");
                        last_error = Some(e);
                        let mut conn = self.connection.write().await;
                        *conn = None;
                    }
                },
                Err(e) => last_error = Some(e),
            }
            tokio::time::sleep(Duration::from_millis(
                self.config.retry_delay_ms * (attempt as u64 + 1),
            ))
            .await;
        }
        Err(last_error
            .unwrap_or_else(|| RedisError::from((redis::ErrorKind::IoError, "max retries exceeded"))))
    }

    /// `XADD stream * field value ...`. Network errors are logged and
    /// swallowed: the caller decides whether to retry at its own layer.
    pub async fn append(&self, stream: &str, fields: &HashMap<String, String>) {
        let pairs: Vec<(String, String)> = fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let result = self
            .with_retry(|mut conn| {
                let stream = stream.to_string();
                let pairs = pairs.clone();
                async move {
                    let _: String = conn.xadd(&stream, "*", &pairs).await?;
                    Ok(())
                }
            })
            .await;
        if let Err(e) = result {
            tracing::error!(stream, "failed to append to log: {e}");
        }
    }

    /// `XGROUP CREATE stream group $ MKSTREAM`, idempotent: swallows
    /// `BUSYGROUP` (the group already existing is not an error).
    pub async fn create_group(&self, stream: &str, group: &str) -> Result<(), RedisError> {
        let result: Result<(), RedisError> = self
            .with_retry(|mut conn| {
                let stream = stream.to_string();
                let group = group.to_string();
                async move { conn.xgroup_create_mkstream(&stream, &group, "0").await }
            })
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// `XREADGROUP GROUP group consumer BLOCK <ms> COUNT max_count STREAMS
    /// stream >`. Returns only records not yet delivered to any consumer of
    /// this group. Never blocks beyond the configured server-side timeout.
    pub async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
    ) -> Result<Vec<Record>, RedisError> {
        let block_ms = self.config.block_ms;
        let reply: StreamReadReply = self
            .with_retry(|mut conn| {
                let stream = stream.to_string();
                let group = group.to_string();
                let consumer = consumer.to_string();
                async move {
                    let opts = StreamReadOptions::default()
                        .group(&group, &consumer)
                        .count(max_count)
                        .block(block_ms);
                    conn.xread_options(&[stream], &[">"], &opts).await
                }
            })
            .await?;

        let mut records = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let mut fields = HashMap::new();
                for (field, value) in id.map {
                    if let redis::Value::Data(bytes) = value {
                        if let Ok(s) = String::from_utf8(bytes) {
                            fields.insert(field, s);
                        }
                    }
                }
                records.push(Record {
                    log_id: id.id,
                    fields,
                });
            }
        }
        Ok(records)
    }

    /// `XACK stream group log_id`.
    pub async fn ack(&self, stream: &str, group: &str, log_id: &str) -> Result<(), RedisError> {
        self.with_retry(|mut conn| {
            let stream = stream.to_string();
            let group = group.to_string();
            let log_id = log_id.to_string();
            async move {
                let _: i64 = conn.xack(&stream, &group, &[log_id]).await?;
                Ok(())
            }
        })
        .await
    }
}

/// Per-process consumer name: a stable prefix plus the host's name, so
/// multiple replicas of the same stage horizontally shard the stream.
pub fn consumer_name(prefix: &str) -> String {
    let host = hostname_or_unknown();
    format!("{prefix}-{host}")
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::process::Command::new("hostname")
                .output()
                .ok()
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_name_includes_prefix() {
        let name = consumer_name("market-poller");
        assert!(name.starts_with("market-poller-"));
    }
}
