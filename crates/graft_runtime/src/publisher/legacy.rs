//! The label-and-path payload format.
//!
//! Entries are addressed by path and the user's label. Branch registration and
//! successful completion produce nothing on the wire.

use super::PayloadPublisher;
use crate::context::PendingBranch;
use crate::streaming::{
    ExecutionResult, InitialOutcome, InitialPayload, LegacyEntry, LegacyPayload,
    SubsequentPayload,
};
use graft_core::{GraphQLError, Node};

/// Publishes frames of `{incremental, hasNext}` entries.
#[derive(Debug, Default)]
pub struct LegacyPublisher {
    incremental: Vec<LegacyEntry>,
}

impl LegacyPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn label(branch: &PendingBranch) -> Option<String> {
        branch.original_label().map(str::to_string)
    }
}

impl PayloadPublisher for LegacyPublisher {
    fn add_pending(&mut self, _branch: &PendingBranch) {}

    fn add_failed_fragment(&mut self, branch: &PendingBranch, errors: Vec<GraphQLError>) {
        self.incremental.push(LegacyEntry::Defer {
            data: None,
            errors,
            path: branch.path().clone(),
            label: Self::label(branch),
        });
    }

    fn add_successful_fragment(
        &mut self,
        branch: &PendingBranch,
        data: Node,
        errors: Vec<GraphQLError>,
        _completes: bool,
    ) {
        self.incremental.push(LegacyEntry::Defer {
            data: Some(data),
            errors,
            path: branch.path().clone(),
            label: Self::label(branch),
        });
    }

    fn add_failed_stream(&mut self, branch: &PendingBranch, errors: Vec<GraphQLError>) {
        self.incremental.push(LegacyEntry::Stream {
            items: None,
            errors,
            path: branch.path().clone(),
            label: Self::label(branch),
        });
    }

    fn add_successful_stream(&mut self, _branch: &PendingBranch) {}

    fn add_stream_items(
        &mut self,
        branch: &PendingBranch,
        start: usize,
        items: Vec<Node>,
        errors: Vec<GraphQLError>,
    ) {
        self.incremental.push(LegacyEntry::Stream {
            items: Some(items),
            errors,
            path: branch.path().index(start),
            label: Self::label(branch),
        });
    }

    fn get_subsequent_payload(&mut self, has_next: bool) -> Option<SubsequentPayload> {
        if has_next && self.incremental.is_empty() {
            return None;
        }
        Some(SubsequentPayload::Legacy(LegacyPayload {
            incremental: std::mem::take(&mut self.incremental),
            has_next,
        }))
    }

    fn get_initial_payload(
        &mut self,
        data: Option<Node>,
        errors: Vec<GraphQLError>,
        has_next: bool,
    ) -> InitialOutcome {
        if !has_next {
            return InitialOutcome::Complete(ExecutionResult { data, errors });
        }
        InitialOutcome::Incremental(InitialPayload {
            data,
            errors,
            pending: Vec::new(),
            has_next,
        })
    }
}
