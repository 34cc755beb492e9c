//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheBackendKind, IndexHorizons};

mod cli;

pub use cli::{CliArgs, Command, Overrides, PageArgs, RebuildArgs, ResolveArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "chorus";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CACHE_POOL_SIZE: u32 = 32;
const DEFAULT_CACHE_OP_TIMEOUT_MS: u32 = 50;
const DEFAULT_MEMORY_ENTRY_LIMIT: u32 = 100_000;
const DEFAULT_MEMORY_INDEX_LIMIT: u32 = 10_000;
const DEFAULT_WORKER_COUNT: u32 = 4;
const DEFAULT_QUEUE_CAPACITY: u32 = 1024;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub workers: WorkerSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
    pub pool_size: NonZeroU32,
    pub op_timeout_ms: NonZeroU32,
    pub memory_entry_limit: NonZeroU32,
    pub memory_index_limit: NonZeroU32,
    pub horizons: IndexHorizons,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub count: NonZeroU32,
    pub queue_capacity: NonZeroU32,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("CHORUS").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    workers: RawWorkerSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(count) = overrides.workers {
            self.workers.count = Some(count);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            workers,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            workers: build_worker_settings(workers)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    Ok(LoggingSettings {
        level,
        json: logging.json.unwrap_or(false),
    })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    let acquire_secs = database
        .acquire_timeout_seconds
        .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS);
    if acquire_secs == 0 {
        return Err(LoadError::invalid(
            "database.acquire_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout: Duration::from_secs(acquire_secs),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("memory") => CacheBackendKind::Memory,
        Some("redis") => CacheBackendKind::Redis,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}`; expected `memory` or `redis`"),
            ));
        }
    };

    let redis_url = non_blank(cache.redis_url);
    if backend == CacheBackendKind::Redis && redis_url.is_none() {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "required when cache.backend is `redis`",
        ));
    }

    let horizons = IndexHorizons {
        message: required_horizon(cache.message_horizon, "cache.message_horizon")?,
        post: required_horizon(cache.post_horizon, "cache.post_horizon")?,
        comment: required_horizon(cache.comment_horizon, "cache.comment_horizon")?,
        conversation: required_horizon(cache.conversation_horizon, "cache.conversation_horizon")?,
    };

    Ok(CacheSettings {
        backend,
        redis_url,
        pool_size: non_zero_u32(
            cache.pool_size.unwrap_or(DEFAULT_CACHE_POOL_SIZE).into(),
            "cache.pool_size",
        )?,
        op_timeout_ms: non_zero_u32(
            cache.op_timeout_ms.unwrap_or(DEFAULT_CACHE_OP_TIMEOUT_MS).into(),
            "cache.op_timeout_ms",
        )?,
        memory_entry_limit: non_zero_u32(
            cache
                .memory_entry_limit
                .unwrap_or(DEFAULT_MEMORY_ENTRY_LIMIT)
                .into(),
            "cache.memory_entry_limit",
        )?,
        memory_index_limit: non_zero_u32(
            cache
                .memory_index_limit
                .unwrap_or(DEFAULT_MEMORY_INDEX_LIMIT)
                .into(),
            "cache.memory_index_limit",
        )?,
        horizons,
    })
}

fn build_worker_settings(workers: RawWorkerSettings) -> Result<WorkerSettings, LoadError> {
    let count = non_zero_u32(
        workers.count.unwrap_or(DEFAULT_WORKER_COUNT).into(),
        "workers.count",
    )?;
    let queue_capacity = non_zero_u32(
        workers
            .queue_capacity
            .unwrap_or(DEFAULT_QUEUE_CAPACITY)
            .into(),
        "workers.queue_capacity",
    )?;

    let grace_secs = workers
        .shutdown_grace_seconds
        .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS);
    if grace_secs == 0 {
        return Err(LoadError::invalid(
            "workers.shutdown_grace_seconds",
            "must be greater than zero",
        ));
    }

    Ok(WorkerSettings {
        count,
        queue_capacity,
        shutdown_grace: Duration::from_secs(grace_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    pool_size: Option<u32>,
    op_timeout_ms: Option<u32>,
    memory_entry_limit: Option<u32>,
    memory_index_limit: Option<u32>,
    message_horizon: Option<u64>,
    post_horizon: Option<u64>,
    comment_horizon: Option<u64>,
    conversation_horizon: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    count: Option<u32>,
    queue_capacity: Option<u32>,
    shutdown_grace_seconds: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn required_horizon(value: Option<u64>, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value = value.ok_or_else(|| {
        LoadError::invalid(key, "required: number of most-recent members to cache")
    })?;
    non_zero_u32(value, key)
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
