use std::{process, sync::Arc};

use chorus::{
    application::{
        CacheCore,
        error::AppError,
        pagination::{IndexCursor, PageMode},
        repos::DurableStore,
    },
    cache::{CacheBackend, CacheBackendKind, CacheConfig, MemoryCache, QueueConfig, RedisCache},
    config::{self, Command, PageArgs, RebuildArgs, ResolveArgs},
    domain::types::{Container, EntityKey},
    infra::{db::PostgresRepositories, error::InfraError, telemetry},
};
use sqlx::postgres::PgPool;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, retryable = error.is_retryable(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, retryable = error.is_retryable(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Migrate => run_migrate(&settings).await,
        Command::Rebuild(args) => run_rebuild(&settings, args).await,
        Command::Page(args) => run_page(&settings, args).await,
        Command::Resolve(args) => run_resolve(&settings, args).await,
    }
}

async fn connect_pool(settings: &config::Settings) -> Result<PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
    )
    .await
    .map_err(|err| InfraError::database(err.to_string()))?;
    Ok(pool)
}

async fn run_migrate(settings: &config::Settings) -> Result<(), AppError> {
    let pool = connect_pool(settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    info!(target = "chorus::migrate", "Migrations applied");
    Ok(())
}

async fn build_core(settings: &config::Settings) -> Result<CacheCore, AppError> {
    let repositories = PostgresRepositories::new(connect_pool(settings).await?);
    repositories
        .health_check()
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    let store: Arc<dyn DurableStore> = Arc::new(repositories);

    let cache_config = CacheConfig::from(&settings.cache);
    let backend: Arc<dyn CacheBackend> = match cache_config.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCache::new(&cache_config)),
        CacheBackendKind::Redis => {
            let url = cache_config
                .redis_url
                .as_deref()
                .ok_or_else(|| InfraError::configuration("cache.redis_url is not configured"))?;
            Arc::new(
                RedisCache::connect(url, cache_config.pool_size)
                    .await
                    .map_err(InfraError::from)?,
            )
        }
    };

    info!(
        target = "chorus::core",
        backend = ?cache_config.backend,
        workers = settings.workers.count.get(),
        "Cache core ready"
    );
    Ok(CacheCore::new(
        backend,
        store,
        &cache_config,
        QueueConfig::from(&settings.workers),
    ))
}

async fn run_rebuild(settings: &config::Settings, args: RebuildArgs) -> Result<(), AppError> {
    let containers = args
        .containers
        .iter()
        .map(|raw| raw.parse::<Container>())
        .collect::<Result<Vec<_>, _>>()?;

    let core = build_core(settings).await?;
    let mut outcome = Ok(());
    for container in containers {
        match core.index().rebuild(container).await {
            Ok(members) => println!("{container}\t{members}"),
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
    }
    core.shutdown(settings.workers.shutdown_grace).await;
    outcome
}

async fn run_page(settings: &config::Settings, args: PageArgs) -> Result<(), AppError> {
    let container: Container = args.container.parse()?;
    let mode = match (args.cursor.as_deref(), args.before_ms, args.after_ms) {
        (Some(token), _, _) => PageMode::decode(token)?,
        (None, Some(before), _) => PageMode::Before(IndexCursor::at_score(before)),
        (None, None, Some(after)) => PageMode::After(IndexCursor::at_score(after)),
        (None, None, None) => PageMode::FromStart {
            offset: args.offset.unwrap_or(0),
        },
    };

    let core = build_core(settings).await?;
    let result = core
        .coordinator()
        .page_entries(container, mode, args.limit)
        .await;
    core.shutdown(settings.workers.shutdown_grace).await;
    let entries = result?;

    for entry in &entries {
        println!("{}\t{}", entry.member, entry.score);
    }
    if let Some(next) = mode.next(&entries, u64::from(args.limit)) {
        println!("next\t{}", next.encode()?);
    }
    Ok(())
}

async fn run_resolve(settings: &config::Settings, args: ResolveArgs) -> Result<(), AppError> {
    let key: EntityKey = args.key.parse()?;

    let core = build_core(settings).await?;
    let result = core.resolver().resolve_entity(key).await;
    core.shutdown(settings.workers.shutdown_grace).await;
    let entity = result?;

    let json = serde_json::to_string_pretty(&entity).map_err(InfraError::from)?;
    println!("{json}");
    Ok(())
}
