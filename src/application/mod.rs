//! Resolution services layered over the cache and origin client.

pub mod context;
pub mod error;
pub mod resolver;

pub use context::{CancelHandle, Done, RequestContext};
pub use error::{AppError, CacheError, ResolveError};
pub use resolver::{EngineOptions, ResolutionEngine};
