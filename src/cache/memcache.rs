//! Memcached store backed by the `async-memcached` client.
//!
//! One client connection is opened lazily and shared behind a mutex. It is
//! dropped after any I/O, timeout or protocol failure, and after a call that
//! was abandoned before its reply was read; the next operation reconnects.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_memcached::{AsciiProtocol, Client, Error as MemcachedError, Status};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;

use super::store::{KvStore, StoreError, Ttl};

pub const DEFAULT_PORT: u16 = 11211;
pub const MAX_KEY_LEN: usize = 250;
/// Relative expirations above this are read by memcached as unix timestamps.
pub const MAX_RELATIVE_EXPTIME: u32 = 60 * 60 * 24 * 30;

const SOURCE: &str = "cache::memcache";

/// Append the default memcached port when `address` carries none.
///
/// Bare IPv6 literals are bracketed first.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    if let Some(rest) = address.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((_, "")) => format!("{address}:{DEFAULT_PORT}"),
            _ => address.to_string(),
        };
    }
    match address.matches(':').count() {
        0 => format!("{address}:{DEFAULT_PORT}"),
        1 => address.to_string(),
        _ => format!("[{address}]:{DEFAULT_PORT}"),
    }
}

struct Connection {
    client: Client,
    // Set while a command is on the wire. Still set when the lock is next
    // taken means the caller dropped the call and a reply may be unread.
    in_flight: bool,
}

pub struct MemcacheStore {
    address: String,
    io_timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl MemcacheStore {
    pub fn new(address: &str, io_timeout: Duration) -> Self {
        Self {
            address: normalize_address(address),
            io_timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<Connection, StoreError> {
        let dsn = format!("tcp://{}", self.address);
        let client = Client::new(&dsn).await.map_err(StoreError::from_memcached)?;
        debug!(target_module = SOURCE, address = %self.address, "memcached connection opened");
        Ok(Connection {
            client,
            in_flight: false,
        })
    }

    async fn execute(&self, request: Request<'_>) -> Result<Reply, StoreError> {
        let mut slot = self.conn.lock().await;
        if slot.as_ref().is_some_and(|conn| conn.in_flight) {
            debug!(
                target_module = SOURCE,
                address = %self.address,
                "discarding memcached connection left mid-command"
            );
            *slot = None;
        }

        let outcome = tokio::time::timeout(self.io_timeout, async {
            if slot.is_none() {
                *slot = Some(self.connect().await?);
            }
            let conn = slot
                .as_mut()
                .ok_or_else(|| StoreError::protocol("connection unavailable"))?;
            conn.in_flight = true;
            let result = request.run(&mut conn.client).await;
            conn.in_flight = false;
            result
        })
        .await;

        let result = outcome.unwrap_or(Err(StoreError::Timeout));
        if let Err(err) = &result {
            if err.is_connection_fatal() {
                debug!(
                    target_module = SOURCE,
                    address = %self.address,
                    error = %err,
                    "dropping memcached connection"
                );
                *slot = None;
            }
        }
        result
    }
}

impl std::fmt::Debug for MemcacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcacheStore")
            .field("address", &self.address)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KvStore for MemcacheStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        validate_key(key)?;
        match self.execute(Request::Get { key }).await? {
            Reply::Value(value) => Ok(value),
            Reply::Done => Err(StoreError::protocol("unexpected reply to get")),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Ttl) -> Result<(), StoreError> {
        validate_key(key)?;
        self.execute(Request::Set {
            key,
            value,
            exptime: exptime(ttl, SystemTime::now()),
        })
        .await
        .map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.execute(Request::Delete { key }).await.map(|_| ())
    }
}

impl StoreError {
    fn from_memcached(err: MemcachedError) -> Self {
        match err {
            MemcachedError::Io(err) => Self::Io(err),
            MemcachedError::Protocol(Status::NotStored) => Self::Rejected("not stored".into()),
            other => Self::protocol(other.to_string()),
        }
    }
}

/// Reject keys memcached would refuse before any bytes go on the wire.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(StoreError::MalformedKey(key.to_string()));
    }
    if key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(StoreError::MalformedKey(key.to_string()));
    }
    Ok(())
}

/// Wire exptime for a TTL, switching to an absolute timestamp past 30 days.
fn exptime(ttl: Ttl, now: SystemTime) -> i64 {
    let secs = i64::from(ttl.as_secs());
    if ttl.as_secs() <= MAX_RELATIVE_EXPTIME {
        return secs;
    }
    let now = now
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    i64::try_from(now).unwrap_or(i64::MAX).saturating_add(secs)
}

enum Request<'a> {
    Get {
        key: &'a str,
    },
    Set {
        key: &'a str,
        value: Bytes,
        exptime: i64,
    },
    Delete {
        key: &'a str,
    },
}

enum Reply {
    Value(Option<Bytes>),
    Done,
}

impl Request<'_> {
    async fn run(self, client: &mut Client) -> Result<Reply, StoreError> {
        let reply = match self {
            Request::Get { key } => client
                .get(key)
                .await
                .map(|value| Reply::Value(value.and_then(|value| value.data.map(Bytes::from)))),
            Request::Set {
                key,
                value,
                exptime,
            } => client
                .set(key, value.as_ref(), Some(exptime), None)
                .await
                .map(|()| Reply::Done),
            Request::Delete { key } => match client.delete(key).await {
                Ok(()) | Err(MemcachedError::Protocol(Status::NotFound)) => Ok(Reply::Done),
                Err(err) => Err(err),
            },
        };
        reply.map_err(StoreError::from_memcached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_gets_default_port() {
        assert_eq!(normalize_address("localhost"), "localhost:11211");
        assert_eq!(normalize_address("cache.internal:7000"), "cache.internal:7000");
        assert_eq!(normalize_address("[::1]"), "[::1]:11211");
        assert_eq!(normalize_address("[::1]:7000"), "[::1]:7000");
        assert_eq!(normalize_address("::1"), "[::1]:11211");
        assert_eq!(normalize_address(" 10.0.0.5 "), "10.0.0.5:11211");
    }

    #[test]
    fn keys_are_validated() {
        assert!(validate_key("ProxyPageCache_[1]").is_ok());
        assert!(matches!(validate_key(""), Err(StoreError::MalformedKey(_))));
        assert!(matches!(validate_key("a b"), Err(StoreError::MalformedKey(_))));
        assert!(matches!(
            validate_key(&"k".repeat(MAX_KEY_LEN + 1)),
            Err(StoreError::MalformedKey(_))
        ));
    }

    #[test]
    fn long_ttls_become_absolute() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000_000);
        assert_eq!(exptime(Ttl::NEVER, now), 0);
        assert_eq!(exptime(Ttl::from_secs(60), now), 60);
        assert_eq!(
            exptime(Ttl::from_secs(MAX_RELATIVE_EXPTIME), now),
            i64::from(MAX_RELATIVE_EXPTIME)
        );
        assert_eq!(
            exptime(Ttl::from_secs(MAX_RELATIVE_EXPTIME + 1), now),
            1_000_000 + i64::from(MAX_RELATIVE_EXPTIME) + 1
        );
    }

    #[test]
    fn client_errors_are_classified() {
        let io = StoreError::from_memcached(MemcachedError::Io(
            std::io::ErrorKind::UnexpectedEof.into(),
        ));
        assert!(matches!(io, StoreError::Io(_)));
        assert!(io.is_connection_fatal());

        let rejected = StoreError::from_memcached(MemcachedError::Protocol(Status::NotStored));
        assert!(matches!(rejected, StoreError::Rejected(_)));
        assert!(!rejected.is_connection_fatal());
    }

    #[tokio::test]
    async fn abandoned_call_discards_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let store = MemcacheStore::new(&addr.to_string(), Duration::from_secs(5));
        let dropped = tokio::time::timeout(Duration::from_millis(50), store.get("k")).await;
        assert!(dropped.is_err());
        assert!(store.conn.lock().await.as_ref().is_some_and(|conn| conn.in_flight));
    }
}
