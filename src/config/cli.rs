use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::cache::{Identifier, KeyError};

/// Command-line arguments for the page-proxy binary.
#[derive(Debug, Parser)]
#[command(
    name = "page-proxy",
    version,
    about = "Read-through page cache in front of an origin HTTP endpoint"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PAGE_PROXY_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Return the cached page, fetching and caching it on a miss.
    Resolve(ResolveArgs),
    /// Store stdin (or a file) under the identifier.
    Cache(CacheArgs),
    /// Print the cached page, failing on a miss.
    Read(IdArgs),
    /// Print whether the identifier is cached.
    Has(IdArgs),
    /// Remove the identifier from the cache.
    Forget(IdArgs),
}

#[derive(Debug, Args, Clone)]
pub struct IdArgs {
    /// Ordered identifier components forming the cache key.
    #[arg(
        value_name = "ID",
        required = true,
        num_args = 1..,
        allow_negative_numbers = true
    )]
    pub ids: Vec<String>,
}

impl IdArgs {
    pub fn identifier(&self) -> Result<Identifier, KeyError> {
        Identifier::new(&self.ids)
    }
}

#[derive(Debug, Args, Clone)]
pub struct ResolveArgs {
    /// Origin URL fetched on a cache miss.
    #[arg(long, value_name = "URL", value_hint = ValueHint::Url)]
    pub url: String,

    /// Abort the origin request after this many milliseconds.
    #[arg(long = "timeout-ms", value_name = "MILLIS")]
    pub timeout_ms: Option<u64>,

    #[command(flatten)]
    pub id: IdArgs,
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    /// Read the content from a file instead of stdin.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    #[command(flatten)]
    pub id: IdArgs,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the store backend (memcached|memory).
    #[arg(long = "store-backend", value_name = "BACKEND", global = true)]
    pub store_backend: Option<String>,

    /// Override the memcached address; port 11211 is used when omitted.
    #[arg(long = "store-address", value_name = "HOST[:PORT]", global = true)]
    pub store_address: Option<String>,

    /// Override the store I/O timeout.
    #[arg(long = "store-io-timeout-ms", value_name = "MILLIS", global = true)]
    pub store_io_timeout_ms: Option<u64>,

    /// Override the cache entry lifetime; 0 stores without expiry.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS", global = true)]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the origin request timeout.
    #[arg(long = "http-timeout-ms", value_name = "MILLIS", global = true)]
    pub http_timeout_ms: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Emit diagnostic detail for failed requests and store errors.
    #[arg(long, action = clap::ArgAction::SetTrue, global = true)]
    pub verbose: bool,
}
