//! CacheSink - writes the latest value of each key into Redis

use std::time::Duration;

use contracts::{ContractError, DeliveryAdapter, MetadataRecord};
use redis::aio::ConnectionManager;
use redis::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

/// Config for the `cache` kind
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSinkConfig {
    /// Redis host
    pub host: String,
    /// Redis port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Logical database index
    #[serde(default)]
    pub db: i64,
    /// Per-operation timeout (ms), connect included
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_port() -> u16 {
    6379
}

fn default_timeout_ms() -> u64 {
    2000
}

impl CacheSinkConfig {
    fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Sink that `SET`s `key` to the raw payload bytes, without expiry
///
/// The connection is opened on first delivery, so a cache that is down at
/// startup only fails deliveries, never registry loading.
pub struct CacheSink {
    name: String,
    client: Client,
    timeout: Duration,
    conn: OnceCell<ConnectionManager>,
}

impl CacheSink {
    /// Create a new CacheSink
    pub fn new(name: impl Into<String>, config: CacheSinkConfig) -> Result<Self, ContractError> {
        let name = name.into();
        let client = Client::open(config.url())
            .map_err(|e| ContractError::invalid_sink_config(&name, e.to_string()))?;
        Ok(Self {
            name,
            client,
            timeout: Duration::from_millis(config.timeout_ms),
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, ContractError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!(sink = %self.name, "Opening cache connection");
                self.client.get_connection_manager().await
            })
            .await
            .map_err(|e| ContractError::delivery(&self.name, format!("connect failed: {e}")))?;
        Ok(conn.clone())
    }

    async fn set(&self, record: &MetadataRecord) -> Result<(), ContractError> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("SET")
            .arg(&record.key)
            .arg(&record.value[..])
            .query_async(&mut conn)
            .await
            .map_err(|e| ContractError::delivery(&self.name, format!("SET failed: {e}")))?;
        Ok(())
    }
}

impl DeliveryAdapter for CacheSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "cache_sink_apply",
        skip(self, record),
        fields(sink = %self.name, key = %record.key)
    )]
    async fn apply(&self, record: &MetadataRecord) -> Result<(), ContractError> {
        tokio::time::timeout(self.timeout, self.set(record))
            .await
            .map_err(|_| ContractError::DeliveryTimeout {
                sink_name: self.name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Split one RESP array of bulk strings off the front of `buf`
    fn parse_command(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
        fn line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
            let end = buf[from..].windows(2).position(|w| w == b"\r\n")? + from;
            Some((&buf[from..end], end + 2))
        }
        fn number(raw: &[u8], prefix: u8) -> Option<usize> {
            let (first, rest) = raw.split_first()?;
            if *first != prefix {
                return None;
            }
            std::str::from_utf8(rest).ok()?.parse().ok()
        }

        let (head, mut pos) = line(buf, 0)?;
        let count = number(head, b'*')?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let (len_line, start) = line(buf, pos)?;
            let len = number(len_line, b'$')?;
            if buf.len() < start + len + 2 {
                return None;
            }
            args.push(buf[start..start + len].to_vec());
            pos = start + len + 2;
        }
        Some((args, pos))
    }

    /// Fake Redis: `SET` gets `set_reply`, any setup command gets `+OK`
    async fn serve_resp(set_reply: &'static str) -> (u16, mpsc::UnboundedReceiver<Vec<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        while let Some((args, used)) = parse_command(&buf) {
                            buf.drain(..used);
                            let is_set = args
                                .first()
                                .is_some_and(|cmd| cmd.eq_ignore_ascii_case(b"SET"));
                            let reply = if is_set { set_reply } else { "+OK\r\n" };
                            let _ = tx.send(args);
                            if socket.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
        (port, rx)
    }

    fn sink_on(port: u16) -> CacheSink {
        let config = CacheSinkConfig {
            host: "127.0.0.1".to_string(),
            port,
            db: 0,
            timeout_ms: 2000,
        };
        CacheSink::new("edge-cache", config).unwrap()
    }

    async fn next_set(rx: &mut mpsc::UnboundedReceiver<Vec<Vec<u8>>>) -> Vec<Vec<u8>> {
        loop {
            let args = rx.recv().await.unwrap();
            if args[0].eq_ignore_ascii_case(b"SET") {
                return args;
            }
        }
    }

    #[tokio::test]
    async fn test_apply_sets_raw_payload_without_expiry() {
        let (port, mut commands) = serve_resp("+OK\r\n").await;
        let sink = sink_on(port);
        let record = MetadataRecord::new("throttle.ips", r#"["10.0.0.1"]"#, Utc::now());

        sink.apply(&record).await.unwrap();

        let set = next_set(&mut commands).await;
        assert_eq!(
            set,
            vec![
                b"SET".to_vec(),
                b"throttle.ips".to_vec(),
                br#"["10.0.0.1"]"#.to_vec(),
            ]
        );

        // Connection is reused for the next delivery
        let newer = MetadataRecord::new("throttle.ips", "[]", Utc::now());
        sink.apply(&newer).await.unwrap();
        assert_eq!(next_set(&mut commands).await[2], b"[]".to_vec());
    }

    #[tokio::test]
    async fn test_error_reply_fails_delivery() {
        let (port, _commands) = serve_resp("-ERR replica is read only\r\n").await;
        let sink = sink_on(port);
        let record = MetadataRecord::new("k", "v", Utc::now());

        let err = sink.apply(&record).await.unwrap_err();
        assert!(matches!(err, ContractError::Delivery { .. }));
        assert!(err.to_string().contains("SET failed"));
    }

    #[test]
    fn test_config_defaults() {
        let config: CacheSinkConfig = serde_json::from_str(r#"{"host":"127.0.0.1"}"#).unwrap();
        assert_eq!(config.port, 6379);
        assert_eq!(config.url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        let result: Result<CacheSinkConfig, _> =
            serde_json::from_str(r#"{"host":"127.0.0.1","ttl":5}"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_cache_fails_delivery() {
        // Nothing listens on port 1
        let config: CacheSinkConfig =
            serde_json::from_str(r#"{"host":"127.0.0.1","port":1,"timeout_ms":500}"#).unwrap();
        let sink = CacheSink::new("edge-cache", config).unwrap();
        let record = MetadataRecord::new("k", "v", Utc::now());

        let err = sink.apply(&record).await.unwrap_err();
        assert!(err.is_transient());
    }
}
