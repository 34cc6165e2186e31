//! Key-value store abstraction used by the resolver.
//!
//! `KvStore` is the seam between the resolver and whatever shared store holds
//! cached pages. `MemoryStore` is the in-process implementation; the memcached
//! client lives in `memcache.rs`.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;

/// Entry lifetime in whole seconds, fixed per engine.
///
/// `Ttl::NEVER` (zero) stores the entry without expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ttl(u32);

impl Ttl {
    pub const NEVER: Ttl = Ttl(0);
    pub const TWO_WEEKS: Ttl = Ttl(14 * 24 * 60 * 60);

    pub const fn from_secs(secs: u32) -> Self {
        Self(secs)
    }

    pub const fn as_secs(self) -> u32 {
        self.0
    }

    pub const fn expires(self) -> bool {
        self.0 != 0
    }

    pub fn as_duration(self) -> Option<Duration> {
        self.expires().then(|| Duration::from_secs(u64::from(self.0)))
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Self::TWO_WEEKS
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expires() {
            write!(f, "{}s", self.0)
        } else {
            f.write_str("never")
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store operation timed out")]
    Timeout,
    #[error("store protocol error: {0}")]
    Protocol(String),
    #[error("store server error: {0}")]
    Server(String),
    #[error("malformed cache key `{0}`")]
    MalformedKey(String),
    #[error("store rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Whether the connection that produced this error can still be used.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout | Self::Protocol(_))
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Look a key up; `Ok(None)` means the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    async fn set(&self, key: &str, value: Bytes, ttl: Ttl) -> Result<(), StoreError>;

    /// Remove a key; removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

/// In-process store with lazy expiry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Ttl) -> Result<(), StoreError> {
        let expires_at = ttl.as_duration().map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
