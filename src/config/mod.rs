//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tideline";
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_FLUSH_DELAY_SECS: u64 = 30;
const DEFAULT_BATCH_THRESHOLD: usize = 100;
const DEFAULT_RECONCILE_BATCH_SIZE: usize = 100;
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 1_800;
const DEFAULT_MAX_CACHED_POSTS: usize = 1_000;
const DEFAULT_AUTHOR_CACHE_SIZE: usize = 4_096;
const DEFAULT_HISTORY_MAX_ENTRIES: usize = 1_000;
const DEFAULT_EMPTY_MARKER_TTL_SECS: u64 = 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_QUEUE_BATCH_SIZE: usize = 100;
const DEFAULT_RETRY_SHORT_MS: u64 = 1_000;
const DEFAULT_RETRY_LONG_MS: u64 = 5_000;
const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 5;

/// Command-line arguments for the tideline binary.
#[derive(Debug, Parser)]
#[command(name = "tideline", version, about = "Tideline engagement-core server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TIDELINE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the tideline services.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the write-behind flush delay.
    #[arg(long = "write-behind-flush-delay-seconds", value_name = "SECONDS")]
    pub write_behind_flush_delay_seconds: Option<u64>,

    /// Override the write-behind flush threshold.
    #[arg(long = "write-behind-batch-threshold", value_name = "COUNT")]
    pub write_behind_batch_threshold: Option<usize>,

    /// Toggle the reconciliation sweep.
    #[arg(
        long = "reconciliation-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub reconciliation_enabled: Option<bool>,

    /// Override the reconciliation sweep interval.
    #[arg(long = "reconciliation-interval-seconds", value_name = "SECONDS")]
    pub reconciliation_interval_seconds: Option<u64>,

    /// Override the reconciliation page size.
    #[arg(long = "reconciliation-batch-size", value_name = "COUNT")]
    pub reconciliation_batch_size: Option<usize>,

    /// Override the cached-timeline bound.
    #[arg(long = "timeline-max-cached-posts", value_name = "COUNT")]
    pub timeline_max_cached_posts: Option<usize>,

    /// Override the cached browse-history bound.
    #[arg(long = "history-max-entries", value_name = "COUNT")]
    pub history_max_entries: Option<usize>,

    /// Override the delay-queue poll interval.
    #[arg(long = "delay-queue-poll-interval-ms", value_name = "MILLIS")]
    pub delay_queue_poll_interval_ms: Option<u64>,

    /// Override the notification endpoint.
    #[arg(long = "notification-endpoint", value_name = "URL")]
    pub notification_endpoint: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub write_behind: WriteBehindSettings,
    pub reconciliation: ReconciliationSettings,
    pub timeline: TimelineSettings,
    pub history: HistorySettings,
    pub delay_queue: DelayQueueSettings,
    pub notification: NotificationSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub graceful_shutdown: Duration,
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
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct WriteBehindSettings {
    pub flush_delay_secs: u64,
    pub batch_threshold: usize,
}

#[derive(Debug, Clone)]
pub struct ReconciliationSettings {
    pub enabled: bool,
    pub batch_size: usize,
    pub interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TimelineSettings {
    pub max_cached_posts: usize,
    pub author_cache_size: usize,
}

#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub max_entries: usize,
    pub empty_marker_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DelayQueueSettings {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub retry_short_ms: u64,
    pub retry_long_ms: u64,
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub timeout: Duration,
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

/// Parse the command line and load settings in one step.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("TIDELINE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    write_behind: RawWriteBehindSettings,
    reconciliation: RawReconciliationSettings,
    timeline: RawTimelineSettings,
    history: RawHistorySettings,
    delay_queue: RawDelayQueueSettings,
    notification: RawNotificationSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(delay) = overrides.write_behind_flush_delay_seconds {
            self.write_behind.flush_delay_seconds = Some(delay);
        }
        if let Some(threshold) = overrides.write_behind_batch_threshold {
            self.write_behind.batch_threshold = Some(threshold);
        }
        if let Some(enabled) = overrides.reconciliation_enabled {
            self.reconciliation.enabled = Some(enabled);
        }
        if let Some(interval) = overrides.reconciliation_interval_seconds {
            self.reconciliation.interval_seconds = Some(interval);
        }
        if let Some(batch) = overrides.reconciliation_batch_size {
            self.reconciliation.batch_size = Some(batch);
        }
        if let Some(max) = overrides.timeline_max_cached_posts {
            self.timeline.max_cached_posts = Some(max);
        }
        if let Some(max) = overrides.history_max_entries {
            self.history.max_entries = Some(max);
        }
        if let Some(interval) = overrides.delay_queue_poll_interval_ms {
            self.delay_queue.poll_interval_ms = Some(interval);
        }
        if let Some(endpoint) = overrides.notification_endpoint.as_ref() {
            self.notification.endpoint = Some(endpoint.clone());
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    graceful_shutdown_seconds: Option<u64>,
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
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWriteBehindSettings {
    flush_delay_seconds: Option<u64>,
    batch_threshold: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReconciliationSettings {
    enabled: Option<bool>,
    batch_size: Option<usize>,
    interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTimelineSettings {
    max_cached_posts: Option<usize>,
    author_cache_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHistorySettings {
    max_entries: Option<usize>,
    empty_marker_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDelayQueueSettings {
    poll_interval_ms: Option<u64>,
    batch_size: Option<usize>,
    retry_short_ms: Option<u64>,
    retry_long_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNotificationSettings {
    enabled: Option<bool>,
    endpoint: Option<String>,
    timeout_seconds: Option<u64>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            write_behind,
            reconciliation,
            timeline,
            history,
            delay_queue,
            notification,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            write_behind: build_write_behind_settings(write_behind)?,
            reconciliation: build_reconciliation_settings(reconciliation)?,
            timeline: build_timeline_settings(timeline)?,
            history: build_history_settings(history)?,
            delay_queue: build_delay_queue_settings(delay_queue)?,
            notification: build_notification_settings(notification)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }
    Ok(ServerSettings {
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(max_connections).ok_or_else(|| {
        LoadError::invalid("database.max_connections", "must be greater than zero")
    })?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_write_behind_settings(
    write_behind: RawWriteBehindSettings,
) -> Result<WriteBehindSettings, LoadError> {
    let flush_delay_secs = write_behind
        .flush_delay_seconds
        .unwrap_or(DEFAULT_FLUSH_DELAY_SECS);
    if flush_delay_secs == 0 {
        return Err(LoadError::invalid(
            "write_behind.flush_delay_seconds",
            "must be greater than zero",
        ));
    }
    let batch_threshold = write_behind
        .batch_threshold
        .unwrap_or(DEFAULT_BATCH_THRESHOLD);
    if batch_threshold == 0 {
        return Err(LoadError::invalid(
            "write_behind.batch_threshold",
            "must be greater than zero",
        ));
    }
    Ok(WriteBehindSettings {
        flush_delay_secs,
        batch_threshold,
    })
}

fn build_reconciliation_settings(
    reconciliation: RawReconciliationSettings,
) -> Result<ReconciliationSettings, LoadError> {
    let batch_size = reconciliation
        .batch_size
        .unwrap_or(DEFAULT_RECONCILE_BATCH_SIZE);
    if batch_size == 0 {
        return Err(LoadError::invalid(
            "reconciliation.batch_size",
            "must be greater than zero",
        ));
    }
    let interval_secs = reconciliation
        .interval_seconds
        .unwrap_or(DEFAULT_RECONCILE_INTERVAL_SECS);
    if interval_secs == 0 {
        return Err(LoadError::invalid(
            "reconciliation.interval_seconds",
            "must be greater than zero",
        ));
    }
    Ok(ReconciliationSettings {
        enabled: reconciliation.enabled.unwrap_or(true),
        batch_size,
        interval_secs,
    })
}

fn build_timeline_settings(timeline: RawTimelineSettings) -> Result<TimelineSettings, LoadError> {
    let max_cached_posts = timeline.max_cached_posts.unwrap_or(DEFAULT_MAX_CACHED_POSTS);
    if max_cached_posts == 0 {
        return Err(LoadError::invalid(
            "timeline.max_cached_posts",
            "must be greater than zero",
        ));
    }
    let author_cache_size = timeline
        .author_cache_size
        .unwrap_or(DEFAULT_AUTHOR_CACHE_SIZE);
    if author_cache_size == 0 {
        return Err(LoadError::invalid(
            "timeline.author_cache_size",
            "must be greater than zero",
        ));
    }
    Ok(TimelineSettings {
        max_cached_posts,
        author_cache_size,
    })
}

fn build_history_settings(history: RawHistorySettings) -> Result<HistorySettings, LoadError> {
    let max_entries = history.max_entries.unwrap_or(DEFAULT_HISTORY_MAX_ENTRIES);
    if max_entries == 0 {
        return Err(LoadError::invalid(
            "history.max_entries",
            "must be greater than zero",
        ));
    }
    Ok(HistorySettings {
        max_entries,
        empty_marker_ttl_secs: history
            .empty_marker_ttl_seconds
            .unwrap_or(DEFAULT_EMPTY_MARKER_TTL_SECS),
    })
}

fn build_delay_queue_settings(
    delay_queue: RawDelayQueueSettings,
) -> Result<DelayQueueSettings, LoadError> {
    let poll_interval_ms = delay_queue
        .poll_interval_ms
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
    if poll_interval_ms == 0 {
        return Err(LoadError::invalid(
            "delay_queue.poll_interval_ms",
            "must be greater than zero",
        ));
    }
    let batch_size = delay_queue.batch_size.unwrap_or(DEFAULT_QUEUE_BATCH_SIZE);
    if batch_size == 0 {
        return Err(LoadError::invalid(
            "delay_queue.batch_size",
            "must be greater than zero",
        ));
    }
    Ok(DelayQueueSettings {
        poll_interval_ms,
        batch_size,
        retry_short_ms: delay_queue.retry_short_ms.unwrap_or(DEFAULT_RETRY_SHORT_MS),
        retry_long_ms: delay_queue.retry_long_ms.unwrap_or(DEFAULT_RETRY_LONG_MS),
    })
}

fn build_notification_settings(
    notification: RawNotificationSettings,
) -> Result<NotificationSettings, LoadError> {
    let enabled = notification.enabled.unwrap_or(false);
    let endpoint = notification.endpoint.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    if enabled && endpoint.is_none() {
        return Err(LoadError::invalid(
            "notification.endpoint",
            "required when notifications are enabled",
        ));
    }
    Ok(NotificationSettings {
        enabled,
        endpoint,
        timeout: Duration::from_secs(
            notification
                .timeout_seconds
                .unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_without_any_source() {
        let settings = Settings::from_raw(RawSettings::default()).unwrap();
        assert_eq!(settings.write_behind.flush_delay_secs, 30);
        assert_eq!(settings.write_behind.batch_threshold, 100);
        assert!(settings.reconciliation.enabled);
        assert_eq!(settings.reconciliation.interval_secs, 1_800);
        assert_eq!(settings.timeline.max_cached_posts, 1_000);
        assert_eq!(settings.history.max_entries, 1_000);
        assert_eq!(settings.delay_queue.poll_interval_ms, 1_000);
        assert!(!settings.notification.enabled);
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let mut raw = RawSettings::default();
        raw.timeline.max_cached_posts = Some(0);
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = RawSettings::default();
        raw.write_behind.batch_threshold = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn enabled_notifications_require_an_endpoint() {
        let mut raw = RawSettings::default();
        raw.notification.enabled = Some(true);
        assert!(Settings::from_raw(raw.clone()).is_err());

        raw.notification.endpoint = Some("http://localhost:9900/notify".to_string());
        let settings = Settings::from_raw(raw).unwrap();
        assert!(settings.notification.enabled);
    }

    #[test]
    fn cli_overrides_win_over_raw_values() {
        let mut raw = RawSettings::default();
        raw.write_behind.flush_delay_seconds = Some(60);
        raw.apply_serve_overrides(&ServeOverrides {
            write_behind_flush_delay_seconds: Some(5),
            reconciliation_enabled: Some(false),
            ..ServeOverrides::default()
        });
        let settings = Settings::from_raw(raw).unwrap();
        assert_eq!(settings.write_behind.flush_delay_secs, 5);
        assert!(!settings.reconciliation.enabled);
    }
}
