//! Distributed counter store backed by Redis.
//!
//! Every call issues `INCR key` and `EXPIRE key window` as one atomic
//! pipeline, so concurrent callers across all processes see a strict order of
//! increments and no client-side locking is needed. The TTL is refreshed on
//! every increment: a key under steady traffic never expires mid-burst, while
//! a key that goes quiet for a full window disappears on its own.
//!
//! The connection is made on first use, in a single attempt. Until one
//! succeeds, calls made within the reconnect cooldown of the previous attempt
//! fail at once with [`StoreError::Unavailable`].

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, Pipeline};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::{CounterSnapshot, CounterStore};
use crate::config::StoreConfig;
use crate::error::{GatekeeperError, Result, StoreError};

/// Default bound on a single Redis command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

/// Minimum gap between connection attempts while Redis is unreachable.
pub const DEFAULT_RECONNECT_COOLDOWN: Duration = Duration::from_secs(1);

/// Redis-backed counter store shared by every process instance.
pub struct DistributedCounterStore {
    client: Client,
    /// Connected lazily; a failed attempt leaves the cell empty.
    connection: OnceCell<ConnectionManager>,
    connect_timeout: Duration,
    command_timeout: Duration,
    reconnect_cooldown: Duration,
    /// Start of the last connection attempt that has not succeeded. Stamped
    /// before connecting so an attempt cancelled by the caller's timeout
    /// still backs off.
    last_attempt: Mutex<Option<Instant>>,
}

impl DistributedCounterStore {
    /// Create a store for `url`. No connection is made until first use.
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = Client::open(url).map_err(|e| {
            GatekeeperError::Config(format!("invalid Redis URL {}: {}", sanitize_url(url), e))
        })?;
        info!(url = %sanitize_url(url), "Distributed counter store configured");

        Ok(Self {
            client,
            connection: OnceCell::new(),
            connect_timeout,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            reconnect_cooldown: DEFAULT_RECONNECT_COOLDOWN,
            last_attempt: Mutex::new(None),
        })
    }

    /// Create a store from the `store` section of the configuration.
    ///
    /// Returns `Ok(None)` when no Redis URL is configured.
    pub fn from_config(config: &StoreConfig) -> Result<Option<Self>> {
        match config.redis_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(Some(
                Self::new(url, config.connect_timeout())?
                    .with_command_timeout(config.command_timeout()),
            )),
            _ => Ok(None),
        }
    }

    /// Bound each Redis command, including the startup `PING`.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the minimum gap between connection attempts.
    pub fn with_reconnect_cooldown(mut self, cooldown: Duration) -> Self {
        self.reconnect_cooldown = cooldown;
        self
    }

    async fn connection(&self) -> std::result::Result<ConnectionManager, StoreError> {
        if let Some(manager) = self.connection.get() {
            return Ok(manager.clone());
        }

        {
            let mut last_attempt = self.last_attempt.lock();
            if let Some(attempted_at) = *last_attempt {
                let since = attempted_at.elapsed();
                if since < self.reconnect_cooldown {
                    return Err(StoreError::Unavailable(format!(
                        "no connection, last attempt {:?} ago, backing off",
                        since
                    )));
                }
            }
            *last_attempt = Some(Instant::now());
        }

        let result = self
            .connection
            .get_or_try_init(|| async {
                debug!("Connecting to Redis");
                // One attempt per cooldown, no retries.
                let config = ConnectionManagerConfig::new()
                    .set_number_of_retries(0)
                    .set_connection_timeout(self.connect_timeout)
                    .set_response_timeout(self.command_timeout);
                let manager = tokio::time::timeout(
                    self.connect_timeout,
                    ConnectionManager::new_with_config(self.client.clone(), config),
                )
                .await
                .map_err(|_| StoreError::Timeout(self.connect_timeout))??;
                info!("Connected to Redis");
                Ok::<_, StoreError>(manager)
            })
            .await;

        match result {
            Ok(manager) => {
                self.last_attempt.lock().take();
                Ok(manager.clone())
            }
            Err(e) => {
                *self.last_attempt.lock() = Some(Instant::now());
                Err(e)
            }
        }
    }

    /// Round-trip a `PING` to check that the backend is reachable.
    pub async fn ping(&self) -> std::result::Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let reply: String = tokio::time::timeout(
            self.command_timeout,
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.command_timeout))??;
        if reply != "PONG" {
            return Err(StoreError::Protocol(format!("unexpected PING reply: {}", reply)));
        }
        Ok(())
    }
}

/// `INCR key` then `EXPIRE key ttl` in one `MULTI`/`EXEC` block. Only the
/// post-increment count is returned.
fn counter_pipeline(key: &str, ttl: i64) -> Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic().incr(key, 1).expire(key, ttl).ignore();
    pipe
}

#[async_trait]
impl CounterStore for DistributedCounterStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn increment_and_check(
        &self,
        key: &str,
        window_secs: u64,
    ) -> std::result::Result<CounterSnapshot, StoreError> {
        let ttl = i64::try_from(window_secs)
            .map_err(|_| StoreError::Internal(format!("window too large: {}", window_secs)))?;
        let mut conn = self.connection().await?;

        let (count,): (u64,) = counter_pipeline(key, ttl).query_async(&mut conn).await?;

        trace!(key = %key, count, "Distributed counter incremented");
        Ok(CounterSnapshot::new(count))
    }
}

/// Hide the password of a Redis URL for logging.
fn sanitize_url(url: &str) -> String {
    match url.split_once('@') {
        Some((credentials, host)) => match credentials.rsplit_once(':') {
            Some((scheme_user, _password)) if scheme_user.contains("//") => {
                format!("{}:***@{}", scheme_user, host)
            }
            _ => format!("{}@{}", credentials, host),
        },
        None => url.to_string(),
    }
}
