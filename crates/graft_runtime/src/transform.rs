//! Turning an engine's output into an incremental response.

use crate::error::SourceError;
use crate::fan_in::{BoxSource, FanIn, Source};
use crate::publisher::{
    IncrementalPublisher, LegacyPublisher, PayloadPublisher, StructuredPublisher,
};
use crate::streaming::{
    ExecutionResult, IncrementalEvent, InitialOutcome, InitialPayload, InitialResult,
    PendingDescriptor, SubsequentStream,
};
use futures::StreamExt;
use graft_core::DeferMarkerArena;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Wire format of subsequent payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Entries addressed by path and label.
    #[default]
    Legacy,
    /// Entries addressed by pending id.
    Structured,
}

/// Transform configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Wire format of subsequent payloads.
    pub format: PayloadFormat,
    /// Fold events that are already buffered into the same frame.
    pub batch_ready_events: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            format: PayloadFormat::Legacy,
            batch_ready_events: true,
        }
    }
}

impl TransformConfig {
    #[must_use]
    pub fn with_format(mut self, format: PayloadFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.batch_ready_events = enabled;
        self
    }
}

/// Everything the engine hands over after computing the initial result.
pub struct EngineOutput {
    pub initial: InitialResult,
    /// Branches the engine already knows are pending.
    pub pending: Vec<PendingDescriptor>,
    /// Producers of subsequent events.
    pub sources: Vec<BoxSource<IncrementalEvent>>,
}

impl EngineOutput {
    #[must_use]
    pub fn new(initial: InitialResult) -> Self {
        Self {
            initial,
            pending: Vec::new(),
            sources: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_pending(mut self, descriptor: PendingDescriptor) -> Self {
        self.pending.push(descriptor);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Source<Item = IncrementalEvent> + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl fmt::Debug for EngineOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOutput")
            .field("initial", &self.initial)
            .field("pending", &self.pending)
            .field("sources", &self.sources.len())
            .finish()
    }
}

/// Adds event sources to a running response.
#[derive(Clone)]
pub struct SourceHandle {
    fan_in: FanIn<IncrementalEvent>,
}

impl SourceHandle {
    /// Registers another source. Returns false if the response already
    /// finished, in which case the source is released.
    pub fn add(&self, source: impl Source<Item = IncrementalEvent> + 'static) -> bool {
        self.fan_in.add(source)
    }

    /// Number of sources still producing events.
    #[must_use]
    pub fn live_sources(&self) -> usize {
        self.fan_in.live_sources()
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("live_sources", &self.live_sources())
            .finish()
    }
}

/// An incremental response: the initial payload and the frames after it.
pub struct IncrementalResponse {
    pub initial: InitialPayload,
    pub subsequent: SubsequentStream,
    pub sources: SourceHandle,
}

impl fmt::Debug for IncrementalResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalResponse")
            .field("initial", &self.initial)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

/// The result of a transform.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Nothing was pending.
    Single(ExecutionResult),
    Incremental(IncrementalResponse),
}

impl ExecutionOutcome {
    /// Returns the single result, if nothing was deferred.
    #[must_use]
    pub fn into_single(self) -> Option<ExecutionResult> {
        match self {
            Self::Single(result) => Some(result),
            Self::Incremental(_) => None,
        }
    }

    /// Returns the incremental response, if anything was deferred.
    #[must_use]
    pub fn into_incremental(self) -> Option<IncrementalResponse> {
        match self {
            Self::Single(_) => None,
            Self::Incremental(response) => Some(response),
        }
    }
}

/// Turns engine output into an [`ExecutionOutcome`].
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    config: TransformConfig,
}

impl Transformer {
    #[must_use]
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Publishes the initial result and wires the event sources into the
    /// subsequent frame stream.
    ///
    /// When nothing is pending the sources are released and a single result
    /// is returned. Must be called from within a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if the engine announces two streams on the same list.
    pub async fn transform(
        &self,
        arena: Arc<DeferMarkerArena>,
        output: EngineOutput,
    ) -> ExecutionOutcome {
        let EngineOutput {
            initial,
            pending,
            sources,
        } = output;

        let payloads: Box<dyn PayloadPublisher> = match self.config.format {
            PayloadFormat::Legacy => Box::new(LegacyPublisher::new()),
            PayloadFormat::Structured => Box::new(StructuredPublisher::new()),
        };
        let mut publisher = IncrementalPublisher::new(arena, payloads);

        let fan_in = FanIn::new();
        for source in sources {
            fan_in.add_boxed(source);
        }

        let initial = match publisher.start(initial, pending) {
            InitialOutcome::Complete(result) => {
                debug!("nothing pending, releasing event sources");
                fan_in.cancel().await;
                return ExecutionOutcome::Single(result);
            }
            InitialOutcome::Incremental(payload) => payload,
        };

        let sources = SourceHandle {
            fan_in: fan_in.clone(),
        };
        let subsequent = subsequent_frames(publisher, fan_in, self.config.batch_ready_events);
        ExecutionOutcome::Incremental(IncrementalResponse {
            initial,
            subsequent,
            sources,
        })
    }
}

/// Transforms with the default configuration.
///
/// # Panics
///
/// See [`Transformer::transform`].
pub async fn transform(arena: Arc<DeferMarkerArena>, output: EngineOutput) -> ExecutionOutcome {
    Transformer::default().transform(arena, output).await
}

fn subsequent_frames<P>(
    mut publisher: IncrementalPublisher<P>,
    fan_in: FanIn<IncrementalEvent>,
    batch: bool,
) -> SubsequentStream
where
    P: PayloadPublisher + 'static,
{
    let guard = fan_in.drop_guard();
    async_stream::stream! {
        let _guard = guard;
        loop {
            let event = match fan_in.next().await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    warn!(
                        pending = publisher.context().pending_len(),
                        "event sources exhausted with branches still pending"
                    );
                    if let Some(frame) = publisher.drain_payload(false) {
                        yield Ok(frame);
                    }
                    break;
                }
                Err(error) => {
                    debug!(%error, "event sources aborted");
                    yield Err::<_, SourceError>(error);
                    break;
                }
            };

            publisher.handle(event);
            while batch && publisher.has_pending() {
                match fan_in.try_next_buffered() {
                    Some(event) => publisher.handle(event),
                    None => break,
                }
            }

            let has_next = publisher.has_pending();
            if let Some(frame) = publisher.drain_payload(has_next) {
                yield Ok(frame);
            }
            if !has_next {
                fan_in.cancel().await;
                break;
            }
        }
    }
    .boxed()
}
