//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{DEFAULT_SCHEMA_VERSION, TtlPolicy};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "listing-cache";
const ENV_PREFIX: &str = "LISTING_CACHE";
const DEFAULT_STORE_TIMEOUT_MS: u64 = 250;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_REDIS_KEY_PREFIX: &str = "listing-cache:";
const DEFAULT_REDIS_TAG_TTL_SECS: u64 = 7_200;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_WARM_INTERVAL_SECS: u64 = 300;

/// Command-line arguments for the listing-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "listing-cache",
    version,
    about = "Warm and invalidate the listing cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "LISTING_CACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Warm the default listings once.
    Warm,
    /// Warm the default listings on an interval until interrupted.
    Schedule(ScheduleArgs),
    /// Invalidate every cached listing carrying a tag.
    Invalidate(InvalidateArgs),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Warm => "warm",
            Self::Schedule(_) => "schedule",
            Self::Invalidate(_) => "invalidate",
        }
    }

    /// Every subcommand runs in its own process, so entries written to or
    /// removed from an in-process store are invisible to any reader.
    fn ensure_shared_store(&self, settings: &Settings) -> Result<(), LoadError> {
        if settings.cache.backend == StoreBackend::Memory {
            return Err(LoadError::invalid(
                "cache.backend",
                format!(
                    "`{}` requires a shared store; set cache.backend = \"redis\"",
                    self.name()
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Args, Clone, Default)]
pub struct ScheduleArgs {
    /// Override the warm interval.
    #[arg(long = "interval-seconds", value_name = "SECONDS")]
    pub interval_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    /// Tag to invalidate, e.g. `events` or `matches_feed:user_42`.
    #[arg(value_name = "TAG")]
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
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

    /// Override the cache store backend.
    #[arg(long = "cache-backend", value_name = "BACKEND", global = true)]
    pub cache_backend: Option<StoreBackend>,

    /// Override the cache key schema version.
    #[arg(long = "schema-version", value_name = "VERSION", global = true)]
    pub schema_version: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL", global = true)]
    pub redis_url: Option<String>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub ttl: TtlPolicy,
    pub redis: RedisSettings,
    pub database: DatabaseSettings,
    pub warmer: WarmerSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub schema_version: String,
    pub store_timeout: Duration,
    pub backend: StoreBackend,
    pub memory_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: Option<String>,
    pub key_prefix: String,
    /// Lifetime of tag index sets; never shorter than the longest entry TTL.
    pub tag_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct WarmerSettings {
    pub interval: Duration,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);
    if let Command::Schedule(args) = &cli.command {
        raw.apply_schedule_overrides(args);
    }

    let settings = Settings::from_raw(raw)?;
    cli.command.ensure_shared_store(&settings)?;
    Ok(settings)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    ttl: RawTtlSettings,
    redis: RawRedisSettings,
    database: RawDatabaseSettings,
    warmer: RawWarmerSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(backend) = overrides.cache_backend {
            self.cache.backend = Some(
                match backend {
                    StoreBackend::Memory => "memory",
                    StoreBackend::Redis => "redis",
                }
                .to_string(),
            );
        }
        if let Some(version) = overrides.schema_version.as_ref() {
            self.cache.schema_version = Some(version.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_schedule_overrides(&mut self, args: &ScheduleArgs) {
        if let Some(seconds) = args.interval_seconds {
            self.warmer.interval_secs = Some(seconds);
        }
    }
}

impl Settings {
    #[cfg(test)]
    pub(crate) fn default_for_tests() -> Self {
        Self::from_raw(RawSettings::default()).expect("default settings are valid")
    }

    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let logging = build_logging_settings(raw.logging)?;
        let cache = build_cache_settings(raw.cache)?;
        let ttl = build_ttl_policy(raw.ttl)?;
        let redis = build_redis_settings(raw.redis, &cache, &ttl)?;
        let database = build_database_settings(raw.database)?;
        let warmer = build_warmer_settings(raw.warmer)?;

        Ok(Self {
            logging,
            cache,
            ttl,
            redis,
            database,
            warmer,
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

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let schema_version = cache
        .schema_version
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_SCHEMA_VERSION.to_string());
    if schema_version.is_empty() {
        return Err(LoadError::invalid("cache.schema_version", "must not be empty"));
    }
    if schema_version.contains(':') || schema_version.chars().any(char::is_whitespace) {
        return Err(LoadError::invalid(
            "cache.schema_version",
            "must not contain ':' or whitespace",
        ));
    }

    let timeout_ms = cache.store_timeout_ms.unwrap_or(DEFAULT_STORE_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.store_timeout_ms",
            "must be greater than zero",
        ));
    }

    let backend = match cache.backend {
        Some(value) => <StoreBackend as ValueEnum>::from_str(value.trim(), true)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => StoreBackend::Memory,
    };

    let memory_capacity =
        NonZeroUsize::new(cache.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY))
            .ok_or_else(|| LoadError::invalid("cache.memory_capacity", "must be greater than zero"))?;

    Ok(CacheSettings {
        schema_version,
        store_timeout: Duration::from_millis(timeout_ms),
        backend,
        memory_capacity,
    })
}

fn build_ttl_policy(ttl: RawTtlSettings) -> Result<TtlPolicy, LoadError> {
    let defaults = TtlPolicy::default();
    let policy = TtlPolicy {
        groups: ttl.groups.unwrap_or(defaults.groups),
        events: ttl.events.unwrap_or(defaults.events),
        matches_feed: ttl.matches_feed.unwrap_or(defaults.matches_feed),
        matches_established: ttl
            .matches_established
            .unwrap_or(defaults.matches_established),
        proximity: ttl.proximity.unwrap_or(defaults.proximity),
        recommendations: ttl.recommendations.unwrap_or(defaults.recommendations),
    };

    if let Some(kind) = policy.first_zero() {
        return Err(LoadError::invalid(
            "ttl",
            format!(
                "ttl for {}:{} must be greater than zero",
                kind.resource(),
                kind.operation()
            ),
        ));
    }

    Ok(policy)
}

fn build_redis_settings(
    redis: RawRedisSettings,
    cache: &CacheSettings,
    ttl: &TtlPolicy,
) -> Result<RedisSettings, LoadError> {
    let url = non_blank(redis.url);
    if cache.backend == StoreBackend::Redis && url.is_none() {
        return Err(LoadError::invalid(
            "redis.url",
            "required when cache.backend = \"redis\"",
        ));
    }

    let tag_ttl_secs = redis.tag_ttl_secs.unwrap_or(DEFAULT_REDIS_TAG_TTL_SECS);
    let longest = ttl.max_secs();
    if tag_ttl_secs < longest {
        return Err(LoadError::invalid(
            "redis.tag_ttl_secs",
            format!("must be at least the longest entry ttl ({longest}s)"),
        ));
    }

    Ok(RedisSettings {
        url,
        key_prefix: redis
            .key_prefix
            .unwrap_or_else(|| DEFAULT_REDIS_KEY_PREFIX.to_string()),
        tag_ttl: Duration::from_secs(tag_ttl_secs),
    })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url: non_blank(database.url),
        max_connections,
    })
}

fn build_warmer_settings(warmer: RawWarmerSettings) -> Result<WarmerSettings, LoadError> {
    let seconds = warmer
        .interval_secs
        .unwrap_or(DEFAULT_WARM_INTERVAL_SECS);
    if seconds == 0 {
        return Err(LoadError::invalid(
            "warmer.interval_secs",
            "must be greater than zero",
        ));
    }

    Ok(WarmerSettings {
        interval: Duration::from_secs(seconds),
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
struct RawCacheSettings {
    schema_version: Option<String>,
    store_timeout_ms: Option<u64>,
    backend: Option<String>,
    memory_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTtlSettings {
    groups: Option<u64>,
    events: Option<u64>,
    matches_feed: Option<u64>,
    matches_established: Option<u64>,
    proximity: Option<u64>,
    recommendations: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    key_prefix: Option<String>,
    tag_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWarmerSettings {
    interval_secs: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
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
