//! Redis-backed counter and archive stores.
//!
//! Lets several application instances share number counters and the
//! archive.
//!
//! ## Key layout
//!
//! - Counters: `{prefix}counter:{scope}` holding the last issued number as a
//!   Redis integer. Allocation is a single atomic `SET NX` + `INCR`
//!   transaction, so no two instances can issue the same number.
//! - Archive: `{prefix}archive:{scope}:{number}` holding the bincode-encoded
//!   record, written with `SET NX` so the first record wins.
//!
//! Counters are signed 64-bit integers inside Redis; a counter that would
//! pass `i64::MAX` reports [`StoreError::Overflow`].
//!
//! ## Sync bridge
//!
//! The ports are synchronous. Inside a multi-threaded tokio runtime the calls
//! run through `block_in_place`; outside any runtime a temporary runtime is
//! created. Every Redis round trip is bounded by `op_timeout`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use docnum_guard::{DocumentGuard, RedisArchiveStore, RedisCounterStore, RedisStoreConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RedisStoreConfig::default();
//!     let counters = RedisCounterStore::connect_with_config("redis://127.0.0.1/", config.clone())
//!         .await
//!         .expect("Failed to connect to Redis");
//!     let archive = RedisArchiveStore::connect_with_config("redis://127.0.0.1/", config)
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let guard = DocumentGuard::builder()
//!         .with_counter_store(counters)
//!         .with_archive_store(archive)
//!         .build()
//!         .unwrap();
//! }
//! ```

use crate::application::ports::{ArchiveInsert, ArchiveStore, CounterStore, StoreError};
use crate::domain::archive::ArchiveRecord;
use crate::domain::scope::{DocumentNumber, ScopeKey};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ErrorKind, RedisError};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Configuration shared by the Redis stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStoreConfig {
    /// Key prefix for Redis keys (default: "docnum-guard:")
    pub key_prefix: String,
    /// Bound on each Redis round trip (default: 500ms)
    pub op_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "docnum-guard:".to_string(),
            op_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
struct RedisConnection {
    manager: ConnectionManager,
    config: RedisStoreConfig,
}

impl RedisConnection {
    async fn connect(url: &str, config: RedisStoreConfig) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager, config })
    }

    fn key(&self, kind: &str, rest: fmt::Arguments<'_>) -> String {
        format!("{}{}:{}", self.config.key_prefix, kind, rest)
    }

    /// Run `op` to completion from synchronous code, bounded by `op_timeout`.
    fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let waited = self.config.op_timeout;
        let bounded = async move {
            match tokio::time::timeout(waited, op).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(timeout_ms = waited.as_millis() as u64, "redis operation timed out");
                    Err(StoreError::Timeout { waited })
                }
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => tokio::task::block_in_place(|| handle.block_on(bounded)),
            Err(_) => {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| StoreError::Unavailable {
                        reason: format!("failed to create tokio runtime: {e}"),
                    })?;
                rt.block_on(bounded)
            }
        }
    }
}

fn unavailable(error: RedisError) -> StoreError {
    StoreError::Unavailable {
        reason: error.to_string(),
    }
}

fn is_overflow(error: &RedisError) -> bool {
    error.kind() == ErrorKind::ResponseError && error.to_string().contains("overflow")
}

/// Counter store keeping per-scope counters in Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: RedisConnection,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("config", &self.connection.config)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(url: &str, config: RedisStoreConfig) -> Result<Self, RedisError> {
        Ok(Self {
            connection: RedisConnection::connect(url, config).await?,
        })
    }

    fn key(&self, scope: &ScopeKey) -> String {
        self.connection.key("counter", format_args!("{scope}"))
    }
}

impl CounterStore for RedisCounterStore {
    fn next(&self, scope: &ScopeKey, start: u64) -> Result<u64, StoreError> {
        // the counter holds the last issued value, so seed it one below start
        let seed = i64::try_from(start)
            .map_err(|_| StoreError::Overflow)?
            .checked_sub(1)
            .ok_or(StoreError::Overflow)?;
        let key = self.key(scope);
        let mut conn = self.connection.manager.clone();

        let issued: i64 = self.connection.run(async move {
            let (issued,): (i64,) = redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(&key)
                .arg(seed)
                .arg("NX")
                .ignore()
                .cmd("INCR")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    if is_overflow(&e) {
                        StoreError::Overflow
                    } else {
                        unavailable(e)
                    }
                })?;
            Ok(issued)
        })?;

        u64::try_from(issued).map_err(|_| StoreError::Corrupted {
            reason: format!("negative counter {issued} for scope {scope}"),
        })
    }

    fn last_issued(&self, scope: &ScopeKey) -> Result<Option<u64>, StoreError> {
        let key = self.key(scope);
        let mut conn = self.connection.manager.clone();

        let last: Option<i64> = self.connection.run(async move {
            conn.get(&key).await.map_err(unavailable)
        })?;

        last.map(|value| {
            u64::try_from(value).map_err(|_| StoreError::Corrupted {
                reason: format!("negative counter {value} for scope {scope}"),
            })
        })
        .transpose()
    }
}

/// Append-only archive kept in Redis.
#[derive(Clone)]
pub struct RedisArchiveStore {
    connection: RedisConnection,
}

impl fmt::Debug for RedisArchiveStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisArchiveStore")
            .field("config", &self.connection.config)
            .finish_non_exhaustive()
    }
}

impl RedisArchiveStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(url: &str, config: RedisStoreConfig) -> Result<Self, RedisError> {
        Ok(Self {
            connection: RedisConnection::connect(url, config).await?,
        })
    }

    fn key(&self, scope: &ScopeKey, number: DocumentNumber) -> String {
        self.connection
            .key("archive", format_args!("{scope}:{number}"))
    }
}

fn decode(bytes: &[u8]) -> Result<ArchiveRecord, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Corrupted {
        reason: e.to_string(),
    })
}

impl ArchiveStore for RedisArchiveStore {
    fn insert_new(&self, record: ArchiveRecord) -> Result<ArchiveInsert, StoreError> {
        let key = self.key(record.scope(), record.number());
        let bytes = bincode::serialize(&record).map_err(|e| StoreError::Corrupted {
            reason: e.to_string(),
        })?;
        let mut conn = self.connection.manager.clone();

        let existing: Option<Vec<u8>> = self.connection.run(async move {
            let written: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(bytes)
                .arg("NX")
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            if written.is_some() {
                return Ok(None);
            }
            let existing: Option<Vec<u8>> = conn.get(&key).await.map_err(unavailable)?;
            existing.map(Some).ok_or_else(|| StoreError::Corrupted {
                reason: format!("archive key {key} refused NX but holds no record"),
            })
        })?;

        match existing {
            None => Ok(ArchiveInsert::Inserted),
            Some(bytes) => decode(&bytes).map(ArchiveInsert::Existing),
        }
    }

    fn get(
        &self,
        scope: &ScopeKey,
        number: DocumentNumber,
    ) -> Result<Option<ArchiveRecord>, StoreError> {
        let key = self.key(scope, number);
        let mut conn = self.connection.manager.clone();

        let bytes: Option<Vec<u8>> = self.connection.run(async move {
            conn.get(&key).await.map_err(unavailable)
        })?;

        bytes.as_deref().map(decode).transpose()
    }
}
