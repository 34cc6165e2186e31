//! Read-through, cache-aside proxy for origin HTTP pages.
//!
//! [`ResolutionEngine`] answers from a shared key-value store when it can and
//! falls back to the origin on a miss, caching successful bodies under a key
//! derived from an ordered [`Identifier`].

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;

pub use application::{CacheError, EngineOptions, RequestContext, ResolutionEngine, ResolveError};
pub use cache::{Identifier, KvStore, MemcacheStore, MemoryStore, StoreError, Ttl, derive_key};
pub use infra::fetch::{FetchError, FetchedResponse, Fetcher, HttpFetcher};
