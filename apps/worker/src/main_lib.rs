use anyhow::Context;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use seriesflow_core::events::PipelineEventSink;
use seriesflow_core::extractors::ExtractorFactory;
use seriesflow_core::orchestrator::Orchestrator;
use seriesflow_core::schema::{BuiltinSchemaCatalog, SchemaResolver};
use seriesflow_core::series::{ExtractorKind, SeriesRegistry};
use seriesflow_core::transform::{TransformerDefinition, TransformerFactory};
use seriesflow_extractors::{register_feed, register_replay, FeedHub};
use seriesflow_sinks::{build_sinks, InMemoryStore, KeyValueStore, SinkSettings};

/// A wired, not yet running pipeline plus the handles a host needs to drive
/// and observe it.
pub struct Pipeline {
    pub orchestrator: Orchestrator,
    /// In-process feeds by data source; producers publish into these.
    pub feeds: HashMap<String, Arc<FeedHub>>,
    pub cache_store: Arc<dyn KeyValueStore>,
}

/// Installs the global subscriber. `log` records from the library crates are
/// bridged into it.
pub fn init_tracing() -> anyhow::Result<()> {
    let log_format = std::env::var("SF_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()?;
    }
    Ok(())
}

pub async fn build_pipeline(
    config: &Config,
    events: Arc<dyn PipelineEventSink>,
) -> anyhow::Result<Pipeline> {
    let mut catalog = BuiltinSchemaCatalog::new();
    if let Some(path) = &config.schema_catalog_path {
        catalog = catalog
            .with_overlay_path(path)
            .with_context(|| format!("loading schema catalog {}", path.display()))?;
    }

    let mut registry = SeriesRegistry::load_path(&config.registry_path, &catalog)
        .with_context(|| format!("loading registry {}", config.registry_path.display()))?;
    if !config.filter.is_empty() {
        registry = registry.retain(&config.filter);
        tracing::info!("{} series selected by filter {:?}", registry.len(), config.filter);
    }
    anyhow::ensure!(!registry.is_empty(), "no active series selected");

    let transformers = match &config.transformers_path {
        Some(path) => TransformerDefinition::load_path(path)
            .with_context(|| format!("loading transformers {}", path.display()))?,
        None => Vec::new(),
    };

    let schemas = Arc::new(SchemaResolver::new(Arc::new(catalog)));
    let mut factory = ExtractorFactory::new(Arc::clone(&schemas));

    let mut feeds = HashMap::new();
    for data_source in &config.feed_sources {
        let hub = Arc::new(FeedHub::new(data_source.as_str()));
        register_feed(&mut factory, Arc::clone(&hub));
        feeds.insert(data_source.clone(), hub);
    }
    if let Some(replay_dir) = &config.replay_dir {
        let mut registered = Vec::new();
        for series in registry.historical() {
            if !registered.contains(&series.data_source) {
                register_replay(
                    &mut factory,
                    series.data_source.as_str(),
                    replay_dir.join(&series.data_source),
                );
                registered.push(series.data_source);
            }
        }
    }

    let mut destinations: Vec<String> = Vec::new();
    let declared = registry
        .series()
        .iter()
        .flat_map(|s| s.destinations.iter())
        .chain(transformers.iter().flat_map(|t| t.output.destinations.iter()));
    for id in declared {
        if !destinations.contains(id) {
            destinations.push(id.clone());
        }
    }

    let cache_store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let settings = SinkSettings {
        data_dir: config.data_dir.clone(),
        file_format: config.file_format,
        cache_max_len: config.cache_max_len,
        cache_store: Arc::clone(&cache_store),
    };
    let sinks = build_sinks(destinations.iter().map(String::as_str), &settings)?;

    let orchestrator = Orchestrator::builder(registry, schemas)
        .extractors(factory)
        .transformers(transformers, TransformerFactory::with_builtins())
        .sinks(sinks)
        .events(events)
        .config(config.orchestrator.clone())
        .build()
        .await?;

    Ok(Pipeline {
        orchestrator,
        feeds,
        cache_store,
    })
}

/// Human-readable extractor plan, one line per key and one per stage.
pub fn describe_plan(orchestrator: &Orchestrator) -> String {
    let mut out = String::new();
    for entry in orchestrator.plan() {
        let ids: Vec<&str> = entry.series.iter().map(|s| s.series_id.as_str()).collect();
        let _ = writeln!(out, "{} -> {}", entry.key, ids.join(", "));
    }
    for stage in orchestrator.pipeline().stage_ids() {
        let _ = writeln!(out, "transformer {stage}");
    }
    out
}

/// Number of extractor keys of `kind` in the plan.
pub fn count_keys(orchestrator: &Orchestrator, kind: ExtractorKind) -> usize {
    orchestrator
        .plan()
        .iter()
        .filter(|entry| entry.key.kind == kind)
        .count()
}
