use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Chorus binary.
#[derive(Debug, Parser)]
#[command(
    name = "chorus",
    version,
    about = "Cache core operator tool for messaging and feed data"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CHORUS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate,
    /// Rebuild cached ordered indices from the durable store.
    Rebuild(RebuildArgs),
    /// Print one page of a container's member IDs.
    Page(PageArgs),
    /// Resolve one entity and print it as JSON.
    Resolve(ResolveArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RebuildArgs {
    /// Container to rebuild, e.g. `conversation:7:messages`. Repeatable.
    #[arg(long = "container", value_name = "CONTAINER", required = true)]
    pub containers: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct PageArgs {
    /// Container to page, e.g. `network:5:posts`.
    #[arg(long, value_name = "CONTAINER")]
    pub container: String,

    /// Opaque cursor returned by a previous page.
    #[arg(long, value_name = "TOKEN", conflicts_with_all = ["offset", "before_ms", "after_ms"])]
    pub cursor: Option<String>,

    /// Number of newest members to skip.
    #[arg(long, value_name = "COUNT")]
    pub offset: Option<u64>,

    /// Only members strictly older than this Unix-millisecond timestamp.
    #[arg(long = "before-ms", value_name = "MILLIS", conflicts_with = "after_ms")]
    pub before_ms: Option<i64>,

    /// Only members strictly newer than this Unix-millisecond timestamp.
    #[arg(long = "after-ms", value_name = "MILLIS")]
    pub after_ms: Option<i64>,

    /// Page size.
    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}

#[derive(Debug, Args, Clone)]
pub struct ResolveArgs {
    /// Entity key, e.g. `message:12` or `user:3`.
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the cache backend (memory|redis).
    #[arg(long = "cache-backend", value_name = "BACKEND", global = true)]
    pub cache_backend: Option<String>,

    /// Override the redis connection URL.
    #[arg(long = "redis-url", value_name = "URL", global = true)]
    pub redis_url: Option<String>,

    /// Override the number of background cache workers.
    #[arg(long = "workers", value_name = "COUNT", global = true)]
    pub workers: Option<u32>,
}
