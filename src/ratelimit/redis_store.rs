//! Counter store backed by Redis.
//!
//! Every event runs one server-side script that increments the key and, only
//! when that increment created the record, attaches the window expiry. Redis
//! executes scripts one at a time, so concurrent events for the same key can
//! neither lose an increment nor reset an expiry that is already running,
//! regardless of how many service instances share the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tokio::time::timeout;
use tracing::{info, trace};

use super::backend::{validate_request, CounterStore};
use crate::error::{Result, TurnstileError};

/// Increment the counter, setting its expiry exactly once per window.
///
/// A key left without a TTL (`PTTL` of -1) is given one as well, so a record
/// can never outlive its window.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Options for a Redis-backed store.
#[derive(Debug, Clone)]
pub struct RedisStoreOptions {
    /// Prefix applied to every counter key
    pub key_prefix: String,
    /// Bound on a single round trip, including the initial connection
    pub timeout: Duration,
}

impl Default for RedisStoreOptions {
    fn default() -> Self {
        Self {
            key_prefix: "turnstile:".to_string(),
            timeout: Duration::from_millis(500),
        }
    }
}

/// A counter store whose records live in Redis and are shared by every instance
/// pointed at the same server.
pub struct RedisStore {
    /// Multiplexed connection, re-established automatically on failure
    conn: ConnectionManager,
    /// The increment-and-expire script
    script: Script,
    /// Store options
    options: RedisStoreOptions,
}

impl RedisStore {
    /// Connect to Redis at `url` and verify the server answers.
    pub async fn connect(url: &str, options: RedisStoreOptions) -> Result<Self> {
        let client = redis::Client::open(url)?;

        let mut conn = timeout(options.timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| timed_out("connect", options.timeout))??;

        let _: String = timeout(options.timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| timed_out("PING", options.timeout))??;

        info!(prefix = %options.key_prefix, "Connected to Redis counter store");

        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
            options,
        })
    }

    /// The namespaced Redis key for a rate key.
    pub fn storage_key(&self, key: &str) -> String {
        storage_key(&self.options.key_prefix, key)
    }

    /// Get the current count for a key, or `None` if it has no live record.
    pub async fn count(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        let storage_key = self.storage_key(key);

        let count: Option<u64> = timeout(
            self.options.timeout,
            redis::cmd("GET").arg(&storage_key).query_async(&mut conn),
        )
        .await
        .map_err(|_| timed_out("GET", self.options.timeout))??;

        Ok(count)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn allow(&self, key: &str, limit: u64, window: Duration) -> Result<bool> {
        validate_request(key, window)?;

        let mut conn = self.conn.clone();
        let storage_key = self.storage_key(key);
        let window_ms = window_millis(window);

        let mut invocation = self.script.key(&storage_key);
        invocation.arg(window_ms);

        let count: u64 = timeout(self.options.timeout, invocation.invoke_async(&mut conn))
            .await
            .map_err(|_| timed_out("increment", self.options.timeout))??;

        trace!(key = %storage_key, count = count, limit = limit, "Recorded event");

        Ok(count <= limit)
    }
}

fn storage_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

/// Window length in whole milliseconds, never less than one.
fn window_millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn timed_out(operation: &str, after: Duration) -> TurnstileError {
    TurnstileError::StorageUnavailable(format!(
        "redis {} timed out after {:?}",
        operation, after
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::Arc;
    use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    const REDIS_URL: &str = "redis://127.0.0.1:6379";

    fn options(prefix: &str) -> RedisStoreOptions {
        RedisStoreOptions {
            key_prefix: format!("turnstile-test:{}:{}:", prefix, std::process::id()),
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_storage_key_is_prefixed() {
        assert_eq!(storage_key("turnstile:", "1.2.3.4"), "turnstile:1.2.3.4");
        assert_eq!(storage_key("", "tok-1"), "tok-1");
    }

    #[test]
    fn test_window_millis() {
        assert_eq!(window_millis(Duration::from_secs(60)), 60_000);
        assert_eq!(window_millis(Duration::from_micros(10)), 1);
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_fails() {
        let options = RedisStoreOptions {
            key_prefix: "unused:".to_string(),
            timeout: Duration::from_millis(300),
        };

        let result = RedisStore::connect("redis://127.0.0.1:1", options).await;
        assert!(matches!(result, Err(TurnstileError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_is_a_configuration_error() {
        let result = RedisStore::connect("not-a-url", RedisStoreOptions::default()).await;
        assert!(matches!(result, Err(TurnstileError::InvalidConfiguration(_))));
    }

    /// Read one RESP command and return its name, or `None` at end of stream.
    async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<String> {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        let count: usize = line.trim().strip_prefix('*')?.parse().ok()?;

        let mut name = None;
        for _ in 0..count {
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            let len: usize = line.trim().strip_prefix('$')?.parse().ok()?;
            let mut arg = vec![0; len + 2];
            reader.read_exact(&mut arg).await.ok()?;
            if name.is_none() {
                name = Some(String::from_utf8_lossy(&arg[..len]).to_ascii_uppercase());
            }
        }
        name
    }

    /// A server that completes the handshake and answers PING, but never
    /// replies to a script.
    async fn spawn_stalled_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut reader = BufReader::new(read);
                    while let Some(command) = read_command(&mut reader).await {
                        let reply: &[u8] = match command.as_str() {
                            "EVALSHA" | "EVAL" => continue,
                            "PING" => b"+PONG\r\n",
                            _ => b"+OK\r\n",
                        };
                        if write.write_all(reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_stalled_server_times_out() {
        let addr = spawn_stalled_server().await;
        let options = RedisStoreOptions {
            key_prefix: "stalled:".to_string(),
            timeout: Duration::from_millis(200),
        };
        let store = RedisStore::connect(&format!("redis://{}", addr), options)
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let result = store.allow("k", 10, Duration::from_secs(60)).await;

        assert!(matches!(result, Err(TurnstileError::StorageUnavailable(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_allows_up_to_limit_then_denies() {
        let store = RedisStore::connect(REDIS_URL, options("limit")).await.unwrap();
        let window = Duration::from_secs(30);

        for _ in 0..3 {
            assert!(store.allow("k", 3, window).await.unwrap());
        }
        assert!(!store.allow("k", 3, window).await.unwrap());
        assert_eq!(store.count("k").await.unwrap(), Some(4));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_window_expiry_starts_fresh() {
        let store = RedisStore::connect(REDIS_URL, options("expiry")).await.unwrap();
        let window = Duration::from_millis(300);

        assert!(store.allow("k", 1, window).await.unwrap());
        assert!(!store.allow("k", 1, window).await.unwrap());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.count("k").await.unwrap(), None);
        assert!(store.allow("k", 1, window).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_concurrent_events_are_not_lost() {
        let store = Arc::new(RedisStore::connect(REDIS_URL, options("concurrent")).await.unwrap());
        let n = 100;

        let tasks = (0..n).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store.allow("shared", n, Duration::from_secs(30)).await.unwrap()
            })
        });
        let accepted = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(accepted as u64, n);
        assert_eq!(store.count("shared").await.unwrap(), Some(n));
    }
}
