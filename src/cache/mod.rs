//! Page cache storage.
//!
//! - **Keys**: `Identifier` and the namespaced key derivation
//! - **Store**: the `KvStore` seam plus in-memory and memcached backends
//!
//! ## Configuration
//!
//! The backend is selected in `page-proxy.toml`:
//!
//! ```toml
//! [store]
//! backend = "memcached"
//! address = "cache.internal"   # port 11211 is appended when omitted
//! io_timeout_ms = 500
//! ```

mod keys;
mod memcache;
mod store;

pub use keys::{Identifier, KEY_PREFIX, KeyError, derive_key};
pub use memcache::{DEFAULT_PORT, MAX_KEY_LEN, MemcacheStore, normalize_address, validate_key};
pub use store::{KvStore, MemoryStore, StoreError, Ttl};
