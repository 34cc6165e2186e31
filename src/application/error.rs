use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    cache::{KeyError, StoreError},
    config::LoadError,
    infra::{error::InfraError, fetch::FetchError},
};

/// Outcome of a cache read that produced no content.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache miss")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Failures surfaced by `ResolutionEngine::resolve`.
///
/// Cache-side failures never appear here; they degrade to an origin fetch.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("origin request failed: {0}")]
    Transport(#[source] FetchError),
    #[error("origin request cancelled")]
    Cancelled,
    #[error("origin request exceeded its deadline")]
    DeadlineExceeded,
    #[error("origin returned bad status {status}: {body}")]
    Origin { status: u16, body: String },
}

impl ResolveError {
    /// True for failures where no origin response was received.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Cancelled | Self::DeadlineExceeded
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Origin { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn chain(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Process exit status for the binary, loosely following sysexits.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) | AppError::Infra(InfraError::Configuration { .. }) => 78,
            AppError::Key(_) | AppError::Validation(_) => 64,
            AppError::Resolve(err) if err.is_transport() => 69,
            AppError::Resolve(_) => 76,
            AppError::Cache(CacheError::NotFound) => 1,
            AppError::Cache(CacheError::Store(_)) | AppError::Store(_) => 75,
            AppError::Infra(_) => 74,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}
