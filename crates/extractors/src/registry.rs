//! Wiring of the reference extractors into a core [`ExtractorFactory`].

use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use crate::feed::{FeedExtractor, FeedHub};
use crate::replay::ReplayExtractor;
use seriesflow_core::extractors::{ExtractorFactory, ExtractorHandle};
use seriesflow_core::series::ExtractorKind;

/// Registers a realtime extractor for the hub's data source. Lag is reported
/// through the factory's event sink.
pub fn register_feed(factory: &mut ExtractorFactory, hub: Arc<FeedHub>) {
    let data_source = hub.data_source().to_string();
    info!("Registering realtime feed for {}", data_source);
    factory.register(ExtractorKind::Realtime, data_source, move |ctx| {
        let extractor = FeedExtractor::new(Arc::clone(&hub)).with_events(Arc::clone(ctx.events));
        Ok(ExtractorHandle::Realtime(Arc::new(extractor)))
    });
}

/// Registers a historical replay extractor reading CSV files under `root`.
pub fn register_replay(
    factory: &mut ExtractorFactory,
    data_source: impl Into<String>,
    root: impl Into<PathBuf>,
) {
    let data_source = data_source.into();
    let root = root.into();
    info!(
        "Registering replay for {} from {}",
        data_source,
        root.display()
    );
    factory.register(ExtractorKind::Historical, data_source, move |ctx| {
        Ok(ExtractorHandle::Historical(Arc::new(ReplayExtractor::new(
            ctx.key.data_source.clone(),
            root.clone(),
            Arc::clone(ctx.schemas),
        ))))
    });
}
