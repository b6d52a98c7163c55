//! The id-based payload format.
//!
//! Every branch is announced in `pending` with an id, delivered in
//! `incremental` by id and closed in `completed`.

use super::PayloadPublisher;
use crate::context::PendingBranch;
use crate::streaming::{
    CompletedEntry, ExecutionResult, InitialOutcome, InitialPayload, PendingEntry,
    StructuredEntry, StructuredPayload, SubsequentPayload,
};
use graft_core::{GraphQLError, Node};

/// Publishes frames of `{pending, incremental, completed, hasNext}`.
#[derive(Debug, Default)]
pub struct StructuredPublisher {
    pending: Vec<PendingEntry>,
    incremental: Vec<StructuredEntry>,
    completed: Vec<CompletedEntry>,
}

impl StructuredPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.incremental.is_empty() && self.completed.is_empty()
    }

    fn complete(&mut self, branch: &PendingBranch, errors: Vec<GraphQLError>) {
        self.completed.push(CompletedEntry {
            id: branch.id().to_string(),
            errors,
        });
    }
}

impl PayloadPublisher for StructuredPublisher {
    fn add_pending(&mut self, branch: &PendingBranch) {
        self.pending.push(PendingEntry {
            id: branch.id().to_string(),
            path: branch.path().clone(),
            label: branch.original_label().map(str::to_string),
        });
    }

    fn add_failed_fragment(&mut self, branch: &PendingBranch, errors: Vec<GraphQLError>) {
        self.complete(branch, errors);
    }

    fn add_successful_fragment(
        &mut self,
        branch: &PendingBranch,
        data: Node,
        errors: Vec<GraphQLError>,
        completes: bool,
    ) {
        self.incremental.push(StructuredEntry::Data {
            id: branch.id().to_string(),
            data,
            errors,
        });
        if completes {
            self.complete(branch, Vec::new());
        }
    }

    fn add_failed_stream(&mut self, branch: &PendingBranch, errors: Vec<GraphQLError>) {
        self.complete(branch, errors);
    }

    fn add_successful_stream(&mut self, branch: &PendingBranch) {
        self.complete(branch, Vec::new());
    }

    fn add_stream_items(
        &mut self,
        branch: &PendingBranch,
        _start: usize,
        items: Vec<Node>,
        errors: Vec<GraphQLError>,
    ) {
        self.incremental.push(StructuredEntry::Items {
            id: branch.id().to_string(),
            items,
            errors,
        });
    }

    fn get_subsequent_payload(&mut self, has_next: bool) -> Option<SubsequentPayload> {
        if has_next && self.is_empty() {
            return None;
        }
        Some(SubsequentPayload::Structured(StructuredPayload {
            pending: std::mem::take(&mut self.pending),
            incremental: std::mem::take(&mut self.incremental),
            completed: std::mem::take(&mut self.completed),
            has_next,
        }))
    }

    fn get_initial_payload(
        &mut self,
        data: Option<Node>,
        errors: Vec<GraphQLError>,
        has_next: bool,
    ) -> InitialOutcome {
        let pending = std::mem::take(&mut self.pending);
        if !has_next {
            return InitialOutcome::Complete(ExecutionResult { data, errors });
        }
        InitialOutcome::Incremental(InitialPayload {
            data,
            errors,
            pending,
            has_next,
        })
    }
}
