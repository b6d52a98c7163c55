//! Incremental publisher.
//!
//! [`IncrementalPublisher`] consumes engine events, refines the response tree,
//! discovers nested branches and hands every change to a [`PayloadPublisher`],
//! which decides how the changes look on the wire.

mod legacy;
mod structured;

pub use legacy::LegacyPublisher;
pub use structured::StructuredPublisher;

use crate::context::{branch_key, PendingBranch, TransformContext};
use crate::embed::embed_errors;
use crate::plan::{BranchSelection, FieldPlanner};
use crate::streaming::{
    ExecutionGroupResult, IncrementalEvent, InitialOutcome, InitialResult, PendingDescriptor,
    StreamItemsResult, SubsequentPayload,
};
use graft_core::{
    DeferMarkerArena, DeferMarkerSet, GraphQLError, GroupedFieldSet, Node, ResponsePath,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns branch lifecycle changes into wire payloads.
///
/// Calls between two [`get_subsequent_payload`](Self::get_subsequent_payload)
/// calls are collected into one frame.
pub trait PayloadPublisher: Send {
    /// A branch was registered.
    fn add_pending(&mut self, branch: &PendingBranch);

    /// An execution group of a deferred fragment failed.
    fn add_failed_fragment(&mut self, branch: &PendingBranch, errors: Vec<GraphQLError>);

    /// An execution group of a deferred fragment delivered `data`.
    /// `completes` is set when it was the fragment's last group.
    fn add_successful_fragment(
        &mut self,
        branch: &PendingBranch,
        data: Node,
        errors: Vec<GraphQLError>,
        completes: bool,
    );

    /// A stream failed.
    fn add_failed_stream(&mut self, branch: &PendingBranch, errors: Vec<GraphQLError>);

    /// A stream delivered its last batch.
    fn add_successful_stream(&mut self, branch: &PendingBranch);

    /// A stream delivered `items` starting at index `start`.
    fn add_stream_items(
        &mut self,
        branch: &PendingBranch,
        start: usize,
        items: Vec<Node>,
        errors: Vec<GraphQLError>,
    );

    /// Drains the collected changes into a frame.
    ///
    /// Returns `None` when nothing changed and more frames follow.
    fn get_subsequent_payload(&mut self, has_next: bool) -> Option<SubsequentPayload>;

    /// Builds the initial payload.
    fn get_initial_payload(
        &mut self,
        data: Option<Node>,
        errors: Vec<GraphQLError>,
        has_next: bool,
    ) -> InitialOutcome;
}

impl<P: PayloadPublisher + ?Sized> PayloadPublisher for Box<P> {
    fn add_pending(&mut self, branch: &PendingBranch) {
        (**self).add_pending(branch);
    }

    fn add_failed_fragment(&mut self, branch: &PendingBranch, errors: Vec<GraphQLError>) {
        (**self).add_failed_fragment(branch, errors);
    }

    fn add_successful_fragment(
        &mut self,
        branch: &PendingBranch,
        data: Node,
        errors: Vec<GraphQLError>,
        completes: bool,
    ) {
        (**self).add_successful_fragment(branch, data, errors, completes);
    }

    fn add_failed_stream(&mut self, branch: &PendingBranch, errors: Vec<GraphQLError>) {
        (**self).add_failed_stream(branch, errors);
    }

    fn add_successful_stream(&mut self, branch: &PendingBranch) {
        (**self).add_successful_stream(branch);
    }

    fn add_stream_items(
        &mut self,
        branch: &PendingBranch,
        start: usize,
        items: Vec<Node>,
        errors: Vec<GraphQLError>,
    ) {
        (**self).add_stream_items(branch, start, items, errors);
    }

    fn get_subsequent_payload(&mut self, has_next: bool) -> Option<SubsequentPayload> {
        (**self).get_subsequent_payload(has_next)
    }

    fn get_initial_payload(
        &mut self,
        data: Option<Node>,
        errors: Vec<GraphQLError>,
        has_next: bool,
    ) -> InitialOutcome {
        (**self).get_initial_payload(data, errors, has_next)
    }
}

/// Drives one incremental response.
pub struct IncrementalPublisher<P> {
    context: TransformContext,
    payloads: P,
}

impl<P: PayloadPublisher> IncrementalPublisher<P> {
    /// Creates a publisher for one request.
    pub fn new(arena: Arc<DeferMarkerArena>, payloads: P) -> Self {
        Self {
            context: TransformContext::new(arena),
            payloads,
        }
    }

    #[must_use]
    pub fn context(&self) -> &TransformContext {
        &self.context
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.context.has_pending()
    }

    /// Seeds the response tree with the initial result and registers the
    /// branches already known to be pending.
    ///
    /// Without initial data nothing can be delivered incrementally, so known
    /// branches are dropped and the result is complete.
    ///
    /// # Panics
    ///
    /// Panics if two known streams share a list.
    pub fn start(
        &mut self,
        initial: InitialResult,
        known: Vec<PendingDescriptor>,
    ) -> InitialOutcome {
        let InitialResult {
            data,
            errors,
            selection,
        } = initial;

        let Some(data) = data else {
            if !known.is_empty() {
                warn!(
                    branches = known.len(),
                    "initial result has no data, dropping pending branches"
                );
            }
            return self.payloads.get_initial_payload(None, errors, false);
        };

        let mut tree = Node::from(data);
        embed_errors(&mut tree, &errors);
        self.context.set_tree(tree);

        for descriptor in known {
            self.register(descriptor);
        }
        if let Some(BranchSelection { markers, fields }) = selection {
            self.discover(&ResponsePath::root(), &fields, &markers);
        }

        let has_next = self.context.has_pending();
        debug!(pending = self.context.pending_len(), "initial result published");
        let data = Some(self.context.tree().clone());
        self.payloads.get_initial_payload(data, errors, has_next)
    }

    /// Applies one engine event.
    pub fn handle(&mut self, event: IncrementalEvent) {
        match event {
            IncrementalEvent::ExecutionGroup(result) => self.on_execution_group_result(result),
            IncrementalEvent::StreamItems(result) => self.on_stream_items_result(result),
        }
    }

    /// Applies the result of one execution group.
    pub fn on_execution_group_result(&mut self, result: ExecutionGroupResult) {
        let ExecutionGroupResult {
            label,
            path,
            data,
            errors,
            selection,
        } = result;
        let key = branch_key(&label, &path);

        if self.context.is_terminated(&key) {
            debug!(branch = %key, "ignoring result for finished branch");
            return;
        }
        match self.context.get(&key) {
            Some(PendingBranch::Stream(_)) => {
                warn!(branch = %key, "execution group result for a stream");
                return;
            }
            Some(PendingBranch::DeferredFragment(_)) => {}
            None => {
                let original = self.context.labels().original(&label).map(str::to_string);
                self.register(
                    PendingDescriptor::deferred(label, path.clone()).with_original_label(original),
                );
            }
        }

        let Some(data) = data else {
            self.fail_fragment(&key, &path, errors);
            return;
        };

        let data = Node::from(data);
        let tree = self.context.tree_mut();
        if !tree.merge_at(&path, data.clone()) {
            warn!(branch = %key, "fragment path is missing from the response");
        }
        embed_errors(tree, &errors);

        if let Some(BranchSelection { markers, fields }) = selection {
            self.discover(&path, &fields, &markers);
        }

        let completes = match self.context.get_mut(&key) {
            Some(PendingBranch::DeferredFragment(fragment)) => {
                fragment.execution_groups = fragment.execution_groups.saturating_sub(1);
                fragment.execution_groups == 0
            }
            _ => return,
        };
        let branch = if completes {
            self.context.terminate(&key)
        } else {
            self.context.get(&key).cloned()
        };
        if let Some(branch) = branch {
            debug!(branch = %key, completes, "fragment delivered");
            self.payloads
                .add_successful_fragment(&branch, data, errors, completes);
        }
    }

    /// Applies a batch of stream items.
    pub fn on_stream_items_result(&mut self, result: StreamItemsResult) {
        let StreamItemsResult {
            label,
            path,
            index,
            items,
            errors,
            has_next,
        } = result;
        let key = branch_key(&label, &path);

        if self.context.is_terminated(&key) {
            debug!(stream = %key, "ignoring items for finished stream");
            return;
        }
        let (start, item_selection) = match self.context.get(&key) {
            Some(PendingBranch::Stream(stream)) => {
                (stream.next_index, stream.item_selection.clone())
            }
            _ => {
                warn!(stream = %key, "items for an unknown stream");
                return;
            }
        };

        let Some(items) = items else {
            embed_errors(self.context.tree_mut(), &errors);
            if let Some(branch) = self.context.terminate(&key) {
                debug!(stream = %key, "stream failed");
                self.payloads.add_failed_stream(&branch, errors);
            }
            return;
        };

        if index != start {
            warn!(stream = %key, expected = start, received = index, "stream index mismatch");
        }
        let items: Vec<Node> = items.into_iter().map(Node::from).collect();
        let count = items.len();
        let tree = self.context.tree_mut();
        if tree.append_items(&path, start, items.clone()).is_none() {
            warn!(stream = %key, "streamed list is missing from the response");
        }
        embed_errors(tree, &errors);

        if let Some(PendingBranch::Stream(stream)) = self.context.get_mut(&key) {
            stream.next_index = start + count;
        }
        if let Some(BranchSelection { markers, fields }) = &item_selection {
            for offset in 0..count {
                self.descend(&path.index(start + offset), fields, markers);
            }
        }

        if let Some(branch) = self.context.get(&key).cloned() {
            self.payloads.add_stream_items(&branch, start, items, errors);
        }
        if !has_next {
            if let Some(branch) = self.context.terminate(&key) {
                debug!(stream = %key, "stream finished");
                self.payloads.add_successful_stream(&branch);
            }
        }
    }

    /// Drains the changes since the last frame.
    pub fn drain_payload(&mut self, has_next: bool) -> Option<SubsequentPayload> {
        self.payloads.get_subsequent_payload(has_next)
    }

    fn register(&mut self, descriptor: PendingDescriptor) {
        if let Some(branch) = self.context.register(descriptor) {
            self.payloads.add_pending(branch);
        }
    }

    fn fail_fragment(&mut self, key: &str, path: &ResponsePath, errors: Vec<GraphQLError>) {
        let tree = self.context.tree_mut();
        tree.set_at(path, Node::Null);
        embed_errors(tree, &errors);
        if let Some(branch) = self.context.terminate(key) {
            debug!(branch = %key, "fragment failed");
            self.payloads.add_failed_fragment(&branch, errors);
        }
    }

    /// Plans `fields` at `path` and registers every branch the plan gates.
    ///
    /// Immediate fields are followed into the merged data; subtrees that are
    /// missing, `null` or failed are not descended.
    fn discover(&mut self, path: &ResponsePath, fields: &GroupedFieldSet, parent: &DeferMarkerSet) {
        let arena = Arc::clone(self.context.arena());
        let plan = FieldPlanner::new(&arena).plan(fields, parent);

        let mut markers = Vec::new();
        for set in plan.branches.keys() {
            for marker in set.iter() {
                if !markers.contains(&marker) {
                    markers.push(marker);
                }
            }
        }
        for marker in markers {
            let descriptor = PendingDescriptor::deferred(marker.branch_label(), path.clone())
                .with_original_label(arena.label(marker))
                .with_execution_groups(plan.buckets_containing(marker));
            self.register(descriptor);
        }

        for (response_key, group) in plan.immediate.iter() {
            let selection = GroupedFieldSet::merge_selections(group);
            if selection.is_empty() {
                continue;
            }
            self.descend(&path.field(response_key), &selection, parent);
        }
    }

    fn descend(&mut self, path: &ResponsePath, fields: &GroupedFieldSet, parent: &DeferMarkerSet) {
        let items = match self.context.tree().get(path) {
            Some(Node::Object(_)) => None,
            Some(Node::List(items)) => Some(items.len()),
            _ => return,
        };
        match items {
            None => self.discover(path, fields, parent),
            Some(len) => {
                for index in 0..len {
                    self.descend(&path.index(index), fields, parent);
                }
            }
        }
    }
}
