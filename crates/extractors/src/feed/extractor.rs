use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info};
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use super::hub::{FeedEvent, FeedHub};
use crate::errors::ExtractorError;
use seriesflow_core::errors::ConnectionError;
use seriesflow_core::events::{NoOpPipelineEventSink, PipelineEvent, PipelineEventSink};
use seriesflow_core::extractors::{ExtractorSession, RealtimeExtractor, RecordStream, SeriesIndex};
use seriesflow_core::records::Record;
use seriesflow_core::series::SeriesDefinition;

/// Realtime extractor over a [`FeedHub`].
///
/// Ticks a lagging session misses are reported as `FeedLagged` events.
pub struct FeedExtractor {
    hub: Arc<FeedHub>,
    events: Arc<dyn PipelineEventSink>,
}

impl FeedExtractor {
    pub fn new(hub: Arc<FeedHub>) -> Self {
        Self {
            hub,
            events: Arc::new(NoOpPipelineEventSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn PipelineEventSink>) -> Self {
        self.events = events;
        self
    }
}

#[async_trait]
impl RealtimeExtractor for FeedExtractor {
    fn data_source(&self) -> &str {
        self.hub.data_source()
    }

    async fn start(
        &self,
        series: &[SeriesDefinition],
    ) -> Result<Box<dyn ExtractorSession>, ConnectionError> {
        let receiver = self
            .hub
            .subscribe()
            .map_err(|e| e.into_connection_error(self.hub.data_source()))?;
        let index = SeriesIndex::new(series);
        info!(
            "Feed {} session opened for {} symbols",
            self.hub.data_source(),
            index.symbols().len()
        );
        Ok(Box::new(FeedSession {
            data_source: self.hub.data_source().to_string(),
            index: Arc::new(index),
            feed: Some(BroadcastStream::new(receiver)),
            events: Arc::clone(&self.events),
        }))
    }
}

struct FeedSession {
    data_source: String,
    index: Arc<SeriesIndex>,
    feed: Option<BroadcastStream<FeedEvent>>,
    events: Arc<dyn PipelineEventSink>,
}

#[async_trait]
impl ExtractorSession for FeedSession {
    fn records(&mut self) -> RecordStream<'_> {
        let Some(feed) = self.feed.take() else {
            return stream::empty().boxed();
        };
        let index = Arc::clone(&self.index);
        let data_source = self.data_source.clone();
        let events = Arc::clone(&self.events);

        feed.flat_map(move |event| {
            let items: Vec<Result<Record, ConnectionError>> = match event {
                Ok(FeedEvent::Tick(tick)) => index
                    .records_for(&tick.symbol, &tick.schema, tick.timestamp, &tick.fields)
                    .into_iter()
                    .map(Ok)
                    .collect(),
                Ok(FeedEvent::Disconnect(reason)) => vec![Err(ExtractorError::Disconnected {
                    data_source: data_source.clone(),
                    reason,
                }
                .into_connection_error(&data_source))],
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    events.emit(PipelineEvent::FeedLagged {
                        data_source: data_source.clone(),
                        skipped,
                    });
                    Vec::new()
                }
            };
            stream::iter(items)
        })
        .boxed()
    }

    async fn stop(self: Box<Self>) {
        debug!("Feed {} session closed", self.data_source);
    }
}
