use std::{process, sync::Arc};

use listing_cache::{
    application::{
        error::AppError,
        listings::{ListingContext, events::EventsListing, groups::GroupsListing},
    },
    cache::{CacheConfig, Invalidator, MemoryStore, ReadThroughCache, Tag, TaggedStore},
    config::{self, StoreBackend},
    infra::{
        cache_warmer::{CacheWarmer, WarmTarget},
        db::PostgresListings,
        error::InfraError,
        redis::RedisStore,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
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
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let cache_config = CacheConfig::from(&settings);
    let store = build_store(&settings, &cache_config)?;
    info!(
        target = "listing_cache::main",
        store = store.name(),
        schema_version = %cache_config.schema_version,
        "cache store ready"
    );
    let cache = Arc::new(ReadThroughCache::from_config(store, &cache_config));

    match cli_args.command {
        config::Command::Warm => run_warm(&settings, cache, &cache_config).await,
        config::Command::Schedule(_) => run_schedule(&settings, cache, &cache_config).await,
        config::Command::Invalidate(args) => run_invalidate(cache, args.tag).await,
    }
}

fn build_store(
    settings: &config::Settings,
    cache_config: &CacheConfig,
) -> Result<Arc<dyn TaggedStore>, AppError> {
    let store: Arc<dyn TaggedStore> = match settings.cache.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new(cache_config.memory_capacity_non_zero())),
        StoreBackend::Redis => Arc::new(RedisStore::connect(&settings.redis)?),
    };
    Ok(store)
}

async fn build_warmer(
    settings: &config::Settings,
    cache: Arc<ReadThroughCache>,
    cache_config: &CacheConfig,
) -> Result<CacheWarmer, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| AppError::validation("warming requires database.url"))?;

    let pool = PostgresListings::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    let source = Arc::new(PostgresListings::new(pool));

    let ctx = Arc::new(ListingContext::from_config(cache, cache_config)?);
    let targets: Vec<Arc<dyn WarmTarget>> = vec![
        Arc::new(GroupsListing::new(ctx.clone(), source.clone())),
        Arc::new(EventsListing::new(ctx, source)),
    ];
    Ok(CacheWarmer::new(targets))
}

async fn run_warm(
    settings: &config::Settings,
    cache: Arc<ReadThroughCache>,
    cache_config: &CacheConfig,
) -> Result<(), AppError> {
    let warmer = build_warmer(settings, cache, cache_config).await?;
    let report = warmer.warm_all().await;

    if report.all_failed() {
        return Err(AppError::WarmFailed(report.failed_resources().join(", ")));
    }
    if !report.failed.is_empty() {
        warn!(
            target = "listing_cache::main",
            failed = ?report.failed_resources(),
            "some listings were not warmed"
        );
    }
    Ok(())
}

async fn run_schedule(
    settings: &config::Settings,
    cache: Arc<ReadThroughCache>,
    cache_config: &CacheConfig,
) -> Result<(), AppError> {
    let warmer = build_warmer(settings, cache, cache_config).await?;
    info!(
        target = "listing_cache::main",
        interval_secs = settings.warmer.interval.as_secs(),
        "starting warm schedule"
    );

    warmer
        .run_every(settings.warmer.interval, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for shutdown signal");
            }
        })
        .await;
    Ok(())
}

async fn run_invalidate(cache: Arc<ReadThroughCache>, tag: String) -> Result<(), AppError> {
    if tag.trim().is_empty() {
        return Err(AppError::validation("tag must not be blank"));
    }
    let tag = Tag::new(tag.trim());
    let removed = Invalidator::new(cache).invalidate(&tag).await?;
    info!(
        target = "listing_cache::main",
        tag = %tag,
        removed,
        "invalidated tag"
    );
    Ok(())
}
