//! Per-request bookkeeping for the incremental publisher.

use crate::plan::BranchSelection;
use crate::streaming::{PendingDescriptor, PendingKind};
use graft_core::{DeferMarkerArena, Node, ResponsePath};
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::trace;

/// Identifies a branch across events: its label joined with its path.
pub type BranchKey = String;

/// Builds the [`BranchKey`] of a label at a path.
#[must_use]
pub fn branch_key(label: &str, path: &ResponsePath) -> BranchKey {
    format!("{label}.{path}")
}

/// A deferred fragment waiting for its execution groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredFragment {
    pub id: String,
    pub label: String,
    pub original_label: Option<String>,
    pub path: ResponsePath,
    /// Execution groups still outstanding.
    pub execution_groups: usize,
}

/// A stream waiting for more items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBranch {
    pub id: String,
    pub label: String,
    pub original_label: Option<String>,
    /// Path of the streamed list.
    pub path: ResponsePath,
    pub item_selection: Option<BranchSelection>,
    /// Index the next item lands at.
    pub next_index: usize,
}

/// A branch announced but not yet completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingBranch {
    DeferredFragment(DeferredFragment),
    Stream(StreamBranch),
}

impl PendingBranch {
    /// Wire id, unique within one response.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::DeferredFragment(fragment) => &fragment.id,
            Self::Stream(stream) => &stream.id,
        }
    }

    /// Engine-facing label.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::DeferredFragment(fragment) => &fragment.label,
            Self::Stream(stream) => &stream.label,
        }
    }

    /// The label the user wrote.
    #[must_use]
    pub fn original_label(&self) -> Option<&str> {
        match self {
            Self::DeferredFragment(fragment) => fragment.original_label.as_deref(),
            Self::Stream(stream) => stream.original_label.as_deref(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &ResponsePath {
        match self {
            Self::DeferredFragment(fragment) => &fragment.path,
            Self::Stream(stream) => &stream.path,
        }
    }

    #[must_use]
    pub fn key(&self) -> BranchKey {
        branch_key(self.label(), self.path())
    }

    #[must_use]
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

/// Maps engine-facing labels back to the labels the user wrote.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    originals: FxHashMap<String, Option<String>>,
}

impl LabelTable {
    /// Records the original label of `label`. The first registration wins.
    pub fn register(&mut self, label: &str, original: Option<&str>) {
        self.originals
            .entry(label.to_string())
            .or_insert_with(|| original.map(str::to_string));
    }

    /// The original label of `label`, if one was registered.
    #[must_use]
    pub fn original(&self, label: &str) -> Option<&str> {
        self.originals.get(label).and_then(Option::as_deref)
    }
}

/// Mutable state of one incremental response.
#[derive(Debug)]
pub struct TransformContext {
    arena: Arc<DeferMarkerArena>,
    labels: LabelTable,
    tree: Node,
    pending: IndexMap<BranchKey, PendingBranch>,
    terminated: FxHashSet<BranchKey>,
    stream_attach_points: FxHashMap<String, String>,
    next_id: usize,
}

impl TransformContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new(arena: Arc<DeferMarkerArena>) -> Self {
        Self {
            arena,
            labels: LabelTable::default(),
            tree: Node::Null,
            pending: IndexMap::new(),
            terminated: FxHashSet::default(),
            stream_attach_points: FxHashMap::default(),
            next_id: 0,
        }
    }

    #[must_use]
    pub fn arena(&self) -> &Arc<DeferMarkerArena> {
        &self.arena
    }

    #[must_use]
    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    /// The accumulated response tree.
    #[must_use]
    pub fn tree(&self) -> &Node {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Node {
        &mut self.tree
    }

    pub fn set_tree(&mut self, tree: Node) {
        self.tree = tree;
    }

    /// Registers a pending branch.
    ///
    /// Returns `None` if a branch with the same label and path is already
    /// pending or has terminated.
    ///
    /// # Panics
    ///
    /// Panics if another stream is already pending at the same list.
    pub fn register(&mut self, descriptor: PendingDescriptor) -> Option<&PendingBranch> {
        let key = branch_key(&descriptor.label, &descriptor.path);
        if self.pending.contains_key(&key) || self.terminated.contains(&key) {
            trace!(branch = %key, "branch already known");
            return None;
        }

        let PendingDescriptor {
            label,
            original_label,
            path,
            kind,
        } = descriptor;
        self.labels.register(&label, original_label.as_deref());
        let original_label = self.labels.original(&label).map(str::to_string);
        let id = self.next_id.to_string();
        self.next_id += 1;

        let branch = match kind {
            PendingKind::Deferred { execution_groups } => {
                PendingBranch::DeferredFragment(DeferredFragment {
                    id,
                    label,
                    original_label,
                    path,
                    execution_groups: execution_groups.max(1),
                })
            }
            PendingKind::Stream {
                next_index,
                item_selection,
            } => {
                let attached = self
                    .stream_attach_points
                    .insert(path.to_string(), label.clone());
                assert!(
                    attached.is_none(),
                    "stream `{label}` attached to `{path}` while another stream is pending there"
                );
                let next_index = next_index
                    .or_else(|| self.tree.get(&path).and_then(Node::as_list).map(<[_]>::len))
                    .unwrap_or(0);
                PendingBranch::Stream(StreamBranch {
                    id,
                    label,
                    original_label,
                    path,
                    item_selection,
                    next_index,
                })
            }
        };

        trace!(branch = %key, id = branch.id(), "branch registered");
        let branch: &PendingBranch = self.pending.entry(key).or_insert(branch);
        Some(branch)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PendingBranch> {
        self.pending.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut PendingBranch> {
        self.pending.get_mut(key)
    }

    /// Removes a branch for good. Later events for it are ignored.
    pub fn terminate(&mut self, key: &str) -> Option<PendingBranch> {
        let branch = self.pending.shift_remove(key)?;
        if branch.is_stream() {
            self.stream_attach_points.remove(&branch.path().to_string());
        }
        self.terminated.insert(key.to_string());
        Some(branch)
    }

    #[must_use]
    pub fn is_terminated(&self, key: &str) -> bool {
        self.terminated.contains(key)
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Pending branches in registration order.
    pub fn pending(&self) -> impl Iterator<Item = &PendingBranch> {
        self.pending.values()
    }
}
