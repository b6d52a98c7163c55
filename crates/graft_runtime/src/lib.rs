//! Incremental delivery runtime for graft.
//!
//! This crate turns an engine's initial result and its stream of deferred
//! and streamed results into an incremental response:
//! - `plan`: Field planning against defer marker sets
//! - `embed`: Error embedding into the response tree
//! - `fan_in`: Lazy fan-in of event sources
//! - `context`: Pending branch bookkeeping
//! - `publisher`: Incremental publisher and payload formats
//! - `streaming`: Engine events and wire payloads
//! - `transform`: The transform entry point
//! - `multipart`: `multipart/mixed` encoding

pub mod context;
pub mod embed;
pub mod error;
pub mod fan_in;
pub mod multipart;
pub mod plan;
pub mod publisher;
pub mod streaming;
pub mod transform;

pub use context::{
    branch_key, BranchKey, DeferredFragment, LabelTable, PendingBranch, StreamBranch,
    TransformContext,
};
pub use embed::embed_errors;
pub use error::{SourceError, SourceResult};
pub use fan_in::{BoxSource, CancelOnDrop, FanIn, Source, Step, StreamSource};
pub use multipart::{MultipartError, MultipartWriter};
pub use plan::{BranchSelection, FieldPlanner, Plan};
pub use publisher::{IncrementalPublisher, LegacyPublisher, PayloadPublisher, StructuredPublisher};
pub use streaming::{
    CompletedEntry, ExecutionGroupResult, ExecutionResult, IncrementalEvent, InitialOutcome,
    InitialPayload, InitialResult, LegacyEntry, LegacyPayload, PendingDescriptor, PendingEntry,
    PendingKind, StreamItemsResult, StructuredEntry, StructuredPayload, SubsequentPayload,
    SubsequentStream,
};
pub use transform::{
    transform, EngineOutput, ExecutionOutcome, IncrementalResponse, PayloadFormat, SourceHandle,
    TransformConfig, Transformer,
};
