use anyhow::{anyhow, Context};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use seriesflow_core::extractors::HistoricalRange;
use seriesflow_core::orchestrator::OrchestratorConfig;
use seriesflow_core::retry::RetryPolicy;
use seriesflow_core::series::{ExtractorKind, SeriesFilter};
use seriesflow_extractors::replay::parse_timestamp;
use seriesflow_sinks::cache::DEFAULT_MAX_LEN;
use seriesflow_sinks::FileFormat;

pub struct Config {
    pub registry_path: PathBuf,
    pub transformers_path: Option<PathBuf>,
    pub schema_catalog_path: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub file_format: FileFormat,
    pub cache_max_len: usize,
    /// Root of `<data_source>/<schema>.csv` replay files for historical series.
    pub replay_dir: Option<PathBuf>,
    /// Data sources served by an in-process realtime feed.
    pub feed_sources: Vec<String>,
    pub filter: SeriesFilter,
    pub orchestrator: OrchestratorConfig,
    pub dry_run: bool,
}

impl Config {
    /// Reads `SF_*` variables, after loading `.env` when present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |key: &str, default: u64| -> anyhow::Result<Duration> {
            Ok(Duration::from_millis(parse_or(var(key), key, default)?))
        };

        let registry_path = var("SF_REGISTRY_PATH")
            .map(PathBuf::from)
            .context("SF_REGISTRY_PATH is required")?;

        let file_format = match var("SF_FILE_FORMAT") {
            Some(raw) => FileFormat::from_str(&raw).map_err(|e| anyhow!("SF_FILE_FORMAT: {e}"))?,
            None => FileFormat::default(),
        };

        let feed_sources = var("SF_FEED_SOURCES")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut filter = SeriesFilter::new();
        if let Some(kind) = var("SF_EXTRACTOR_KIND") {
            let kind = ExtractorKind::from_str(&kind)
                .map_err(|e| anyhow!("SF_EXTRACTOR_KIND: {e}"))?;
            filter = filter.kind(kind);
        }
        if let Some(data_source) = var("SF_DATA_SOURCE") {
            filter = filter.data_source(data_source);
        }
        if let Some(asset_type) = var("SF_ASSET_TYPE") {
            filter = filter.asset_type(asset_type);
        }
        if let Some(schema) = var("SF_SCHEMA") {
            filter = filter.schema(schema);
        }

        let bound = |key: &str| -> anyhow::Result<_> {
            var(key)
                .map(|raw| parse_timestamp(&raw).map_err(|e| anyhow!("{key}: {e}")))
                .transpose()
        };
        let historical_range =
            HistoricalRange::new(bound("SF_HISTORICAL_START")?, bound("SF_HISTORICAL_END")?);

        let defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            queue_capacity: parse_or(
                var("SF_QUEUE_CAPACITY"),
                "SF_QUEUE_CAPACITY",
                defaults.queue_capacity,
            )?,
            enqueue_timeout: millis("SF_ENQUEUE_TIMEOUT_MS", 500)?,
            connect_timeout: millis("SF_CONNECT_TIMEOUT_MS", 30_000)?,
            sink_timeout: millis("SF_SINK_TIMEOUT_MS", 10_000)?,
            sink_queue_capacity: parse_or(
                var("SF_SINK_QUEUE_CAPACITY"),
                "SF_SINK_QUEUE_CAPACITY",
                defaults.sink_queue_capacity,
            )?,
            sink_enqueue_timeout: millis("SF_SINK_ENQUEUE_TIMEOUT_MS", 100)?,
            drain_timeout: millis("SF_DRAIN_TIMEOUT_MS", 30_000)?,
            restart: RetryPolicy::fixed(
                millis("SF_RETRY_DELAY_MS", 5_000)?,
                parse_or(var("SF_MAX_RETRY"), "SF_MAX_RETRY", 3)?,
            ),
            historical_range,
            ..defaults
        };

        Ok(Self {
            registry_path,
            transformers_path: var("SF_TRANSFORMERS_PATH").map(PathBuf::from),
            schema_catalog_path: var("SF_SCHEMA_CATALOG_PATH").map(PathBuf::from),
            data_dir: var("SF_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            file_format,
            cache_max_len: parse_or(var("SF_CACHE_MAX_LEN"), "SF_CACHE_MAX_LEN", DEFAULT_MAX_LEN)?,
            replay_dir: var("SF_REPLAY_DIR").map(PathBuf::from),
            feed_sources,
            filter,
            orchestrator,
            dry_run: var("SF_DRY_RUN").is_some_and(|v| is_truthy(&v)),
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("{key}: invalid value '{raw}': {e}")),
        None => Ok(default),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
