//! Cache-aside resolution of origin pages.
//!
//! `resolve` reads the page cache first and only contacts the origin on a
//! miss. Cache failures degrade to a live fetch; origin failures are always
//! returned to the caller and never cached.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, warn};

use crate::{
    cache::{Identifier, KvStore, MemcacheStore, MemoryStore, StoreError, Ttl},
    config::{Settings, StoreBackend},
    infra::{
        error::InfraError,
        fetch::{Fetcher, HttpFetcher},
        telemetry::{
            CACHE_HIT_TOTAL, CACHE_MISS_TOTAL, ORIGIN_FETCH_TOTAL, STORE_WRITE_FAILED_TOTAL,
        },
    },
};

use super::context::{Done, RequestContext};
use super::error::{CacheError, ResolveError};

const SOURCE: &str = "application::resolver";

impl From<Done> for ResolveError {
    fn from(done: Done) -> Self {
        match done {
            Done::Cancelled => ResolveError::Cancelled,
            Done::DeadlineExceeded => ResolveError::DeadlineExceeded,
        }
    }
}

/// Fixed per-engine behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Lifetime applied to every write. `Ttl::NEVER` stores without expiry.
    pub ttl: Ttl,
    /// Emit diagnostic detail (URLs, statuses, store errors) at `warn`.
    pub verbose: bool,
}

/// Read-through page cache in front of an origin.
///
/// Holds only shared client handles, so clones are cheap and may be used
/// from many tasks at once. There is no per-key locking: concurrent misses
/// for one identifier each fetch and each write, and the last write wins.
#[derive(Clone)]
pub struct ResolutionEngine {
    store: Arc<dyn KvStore>,
    fetcher: Arc<dyn Fetcher>,
    options: EngineOptions,
}

impl std::fmt::Debug for ResolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionEngine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ResolutionEngine {
    pub fn new(
        store: Arc<dyn KvStore>,
        fetcher: Arc<dyn Fetcher>,
        options: EngineOptions,
    ) -> Self {
        Self {
            store,
            fetcher,
            options,
        }
    }

    /// Build the production stack described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, InfraError> {
        let store: Arc<dyn KvStore> = match &settings.store.backend {
            StoreBackend::Memcached { address } => {
                Arc::new(MemcacheStore::new(address, settings.store.io_timeout))
            }
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        let fetcher = Arc::new(HttpFetcher::new(settings.http.timeout)?);
        let options = EngineOptions {
            ttl: settings.cache.ttl,
            verbose: settings.logging.verbose,
        };
        Ok(Self::new(store, fetcher, options))
    }

    pub fn ttl(&self) -> Ttl {
        self.options.ttl
    }

    pub fn is_verbose(&self) -> bool {
        self.options.verbose
    }

    /// Return the cached page for `id`, or fetch `url` and cache the body.
    ///
    /// The fetch races `ctx`; when the context finishes first the request is
    /// dropped and nothing is written.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        url: &str,
        id: &Identifier,
    ) -> Result<Bytes, ResolveError> {
        match self.read_from_cache(id).await {
            Ok(content) => {
                counter!(CACHE_HIT_TOTAL).increment(1);
                debug!(target_module = SOURCE, id = %id, "served from cache");
                return Ok(content);
            }
            Err(CacheError::NotFound) => {}
            Err(CacheError::Store(err)) => {
                if self.options.verbose {
                    warn!(
                        target_module = SOURCE,
                        id = %id,
                        error = %err,
                        "cache read failed, falling back to origin"
                    );
                }
            }
        }
        counter!(CACHE_MISS_TOTAL).increment(1);
        counter!(ORIGIN_FETCH_TOTAL).increment(1);

        let fetched = tokio::select! {
            biased;
            done = ctx.done() => Err(ResolveError::from(done)),
            fetched = self.fetcher.get(url) => fetched.map_err(ResolveError::Transport),
        };
        let response = match fetched {
            Ok(response) => response,
            Err(err) => {
                if self.options.verbose {
                    warn!(target_module = SOURCE, url, error = %err, "resolve request failed");
                }
                return Err(err);
            }
        };

        if !response.is_success() {
            let body = response.body_text();
            if self.options.verbose {
                warn!(
                    target_module = SOURCE,
                    url,
                    status = response.status,
                    body = %body,
                    "resolve request returned bad status"
                );
            }
            return Err(ResolveError::Origin {
                status: response.status,
                body,
            });
        }

        if let Err(err) = self.cache(response.body.clone(), id).await {
            counter!(STORE_WRITE_FAILED_TOTAL).increment(1);
            if self.options.verbose {
                warn!(
                    target_module = SOURCE,
                    id = %id,
                    error = %err,
                    "failed to populate cache after fetch"
                );
            }
        }
        Ok(response.body)
    }

    /// Store `content` under `id` with the engine TTL.
    pub async fn cache(&self, content: Bytes, id: &Identifier) -> Result<(), StoreError> {
        self.store
            .set(&id.cache_key(), content, self.options.ttl)
            .await
    }

    /// Drop the entry for `id`. Absent entries and store errors are ignored.
    pub async fn forget(&self, id: &Identifier) {
        if let Err(err) = self.store.delete(&id.cache_key()).await {
            if self.options.verbose {
                warn!(target_module = SOURCE, id = %id, error = %err, "cache delete failed");
            }
        }
    }

    /// True only when the store answers with an entry; errors count as absent.
    pub async fn has_in_cache(&self, id: &Identifier) -> bool {
        matches!(self.store.get(&id.cache_key()).await, Ok(Some(_)))
    }

    pub async fn read_from_cache(&self, id: &Identifier) -> Result<Bytes, CacheError> {
        self.store
            .get(&id.cache_key())
            .await?
            .ok_or(CacheError::NotFound)
    }
}
