//! Engine events and wire payloads for incremental delivery.

use crate::error::SourceResult;
use crate::plan::BranchSelection;
use futures::stream::BoxStream;
use graft_core::{GraphQLError, Node, ResponsePath};
use serde::Serialize;

/// The initial result computed by the engine.
#[derive(Debug, Clone, Default)]
pub struct InitialResult {
    /// Initial data; `None` when execution failed before producing any.
    pub data: Option<serde_json::Value>,
    /// Errors of the initial result.
    pub errors: Vec<GraphQLError>,
    /// The root selection, used to discover branches inside the initial data.
    pub selection: Option<BranchSelection>,
}

impl InitialResult {
    /// Creates an initial result with data.
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Creates an initial result without data.
    pub fn errors(errors: Vec<GraphQLError>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }

    /// Adds an error.
    #[must_use]
    pub fn with_error(mut self, error: GraphQLError) -> Self {
        self.errors.push(error);
        self
    }

    /// Sets the root selection.
    #[must_use]
    pub fn with_selection(mut self, selection: BranchSelection) -> Self {
        self.selection = Some(selection);
        self
    }
}

/// What kind of branch a descriptor announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    /// A deferred fragment completed by `execution_groups` results.
    Deferred { execution_groups: usize },
    /// A stream attached to the list at the descriptor's path.
    Stream {
        /// Index of the first streamed item; defaults to the current list length.
        next_index: Option<usize>,
        /// Selection of each item, used to discover nested branches.
        item_selection: Option<BranchSelection>,
    },
}

/// A branch the engine already knows is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDescriptor {
    /// Engine-facing label, unique per branch.
    pub label: String,
    /// The label the user wrote, if any.
    pub original_label: Option<String>,
    pub path: ResponsePath,
    pub kind: PendingKind,
}

impl PendingDescriptor {
    /// Announces a deferred fragment with one execution group.
    pub fn deferred(label: impl Into<String>, path: ResponsePath) -> Self {
        Self {
            label: label.into(),
            original_label: None,
            path,
            kind: PendingKind::Deferred {
                execution_groups: 1,
            },
        }
    }

    /// Announces a stream.
    pub fn stream(label: impl Into<String>, path: ResponsePath) -> Self {
        Self {
            label: label.into(),
            original_label: None,
            path,
            kind: PendingKind::Stream {
                next_index: None,
                item_selection: None,
            },
        }
    }

    /// Sets the user-visible label.
    #[must_use]
    pub fn with_original_label(mut self, label: Option<impl Into<String>>) -> Self {
        self.original_label = label.map(Into::into);
        self
    }

    /// Sets the number of execution groups of a deferred fragment.
    #[must_use]
    pub fn with_execution_groups(mut self, count: usize) -> Self {
        if let PendingKind::Deferred { execution_groups } = &mut self.kind {
            *execution_groups = count.max(1);
        }
        self
    }

    /// Sets the first streamed index.
    #[must_use]
    pub fn with_next_index(mut self, index: usize) -> Self {
        if let PendingKind::Stream { next_index, .. } = &mut self.kind {
            *next_index = Some(index);
        }
        self
    }

    /// Sets the per-item selection of a stream.
    #[must_use]
    pub fn with_item_selection(mut self, selection: BranchSelection) -> Self {
        if let PendingKind::Stream { item_selection, .. } = &mut self.kind {
            *item_selection = Some(selection);
        }
        self
    }
}

/// The outcome of one execution group of a deferred fragment.
#[derive(Debug, Clone)]
pub struct ExecutionGroupResult {
    pub label: String,
    pub path: ResponsePath,
    /// `None` when the group failed.
    pub data: Option<serde_json::Value>,
    pub errors: Vec<GraphQLError>,
    /// What the group resolved, used to discover nested branches.
    pub selection: Option<BranchSelection>,
}

impl ExecutionGroupResult {
    /// A successful group.
    pub fn success(label: impl Into<String>, path: ResponsePath, data: serde_json::Value) -> Self {
        Self {
            label: label.into(),
            path,
            data: Some(data),
            errors: Vec::new(),
            selection: None,
        }
    }

    /// A failed group.
    pub fn failure(
        label: impl Into<String>,
        path: ResponsePath,
        errors: Vec<GraphQLError>,
    ) -> Self {
        Self {
            label: label.into(),
            path,
            data: None,
            errors,
            selection: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: GraphQLError) -> Self {
        self.errors.push(error);
        self
    }

    #[must_use]
    pub fn with_selection(mut self, selection: BranchSelection) -> Self {
        self.selection = Some(selection);
        self
    }
}

/// One batch of stream items.
#[derive(Debug, Clone)]
pub struct StreamItemsResult {
    pub label: String,
    /// Path of the streamed list.
    pub path: ResponsePath,
    /// Index of the first item in this batch.
    pub index: usize,
    /// `None` when the stream failed.
    pub items: Option<Vec<serde_json::Value>>,
    pub errors: Vec<GraphQLError>,
    /// False on the last batch of a stream.
    pub has_next: bool,
}

impl StreamItemsResult {
    /// A batch of items; more may follow.
    pub fn items(
        label: impl Into<String>,
        path: ResponsePath,
        index: usize,
        items: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            label: label.into(),
            path,
            index,
            items: Some(items),
            errors: Vec::new(),
            has_next: true,
        }
    }

    /// A failed stream.
    pub fn failure(
        label: impl Into<String>,
        path: ResponsePath,
        errors: Vec<GraphQLError>,
    ) -> Self {
        Self {
            label: label.into(),
            path,
            index: 0,
            items: None,
            errors,
            has_next: false,
        }
    }

    /// Marks this batch as the last one.
    #[must_use]
    pub fn last(mut self) -> Self {
        self.has_next = false;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: GraphQLError) -> Self {
        self.errors.push(error);
        self
    }
}

/// An event produced by the engine after the initial result.
#[derive(Debug, Clone)]
pub enum IncrementalEvent {
    ExecutionGroup(ExecutionGroupResult),
    StreamItems(StreamItemsResult),
}

impl From<ExecutionGroupResult> for IncrementalEvent {
    fn from(result: ExecutionGroupResult) -> Self {
        Self::ExecutionGroup(result)
    }
}

impl From<StreamItemsResult> for IncrementalEvent {
    fn from(result: StreamItemsResult) -> Self {
        Self::StreamItems(result)
    }
}

/// A complete, non-incremental result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Node>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

/// The first payload of an incremental response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Node>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<PendingEntry>,
    pub has_next: bool,
}

/// What a payload strategy produces for the initial result.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialOutcome {
    /// Nothing is pending; the result is final.
    Complete(ExecutionResult),
    /// Subsequent payloads follow.
    Incremental(InitialPayload),
}

/// A structured-format pending announcement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingEntry {
    pub id: String,
    pub path: ResponsePath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A structured-format completion notice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

/// A structured-format incremental entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StructuredEntry {
    Data {
        id: String,
        data: Node,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        errors: Vec<GraphQLError>,
    },
    Items {
        id: String,
        items: Vec<Node>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        errors: Vec<GraphQLError>,
    },
}

/// A legacy-format incremental entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LegacyEntry {
    Defer {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Node>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        errors: Vec<GraphQLError>,
        path: ResponsePath,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Stream {
        #[serde(skip_serializing_if = "Option::is_none")]
        items: Option<Vec<Node>>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        errors: Vec<GraphQLError>,
        path: ResponsePath,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
}

/// A legacy-format subsequent payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPayload {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub incremental: Vec<LegacyEntry>,
    pub has_next: bool,
}

/// A structured-format subsequent payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredPayload {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<PendingEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub incremental: Vec<StructuredEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub completed: Vec<CompletedEntry>,
    pub has_next: bool,
}

/// One frame after the initial payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SubsequentPayload {
    Legacy(LegacyPayload),
    Structured(StructuredPayload),
}

impl SubsequentPayload {
    /// Whether more frames follow.
    #[must_use]
    pub fn has_next(&self) -> bool {
        match self {
            Self::Legacy(payload) => payload.has_next,
            Self::Structured(payload) => payload.has_next,
        }
    }
}

/// The frames following the initial payload. Ends after the `hasNext: false`
/// frame, or after yielding the error that aborted the event sources.
pub type SubsequentStream = BoxStream<'static, SourceResult<SubsequentPayload>>;

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::path;
    use serde_json::json;

    #[test]
    fn test_legacy_entries_omit_absent_fields() {
        let payload = LegacyPayload {
            incremental: vec![
                LegacyEntry::Defer {
                    data: Some(Node::from(json!({"bio": "hi"}))),
                    errors: vec![],
                    path: path!["user"],
                    label: None,
                },
                LegacyEntry::Stream {
                    items: None,
                    errors: vec![GraphQLError::new("boom")],
                    path: path!["feed", 2usize],
                    label: Some("feed".into()),
                },
            ],
            has_next: true,
        };

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "incremental": [
                    {"data": {"bio": "hi"}, "path": ["user"]},
                    {"errors": [{"message": "boom"}], "path": ["feed", 2], "label": "feed"}
                ],
                "hasNext": true
            })
        );
    }

    #[test]
    fn test_terminal_frame_is_minimal() {
        let legacy = SubsequentPayload::Legacy(LegacyPayload {
            incremental: vec![],
            has_next: false,
        });
        assert_eq!(serde_json::to_value(&legacy).unwrap(), json!({"hasNext": false}));

        let structured = SubsequentPayload::Structured(StructuredPayload {
            pending: vec![],
            incremental: vec![],
            completed: vec![CompletedEntry {
                id: "0".into(),
                errors: vec![],
            }],
            has_next: false,
        });
        assert_eq!(
            serde_json::to_value(&structured).unwrap(),
            json!({"completed": [{"id": "0"}], "hasNext": false})
        );
    }

    #[test]
    fn test_descriptor_builders() {
        let descriptor = PendingDescriptor::stream("s", path!["feed"])
            .with_next_index(2)
            .with_execution_groups(3);
        assert_eq!(
            descriptor.kind,
            PendingKind::Stream {
                next_index: Some(2),
                item_selection: None
            }
        );

        let descriptor = PendingDescriptor::deferred("d", path![]).with_execution_groups(0);
        assert_eq!(
            descriptor.kind,
            PendingKind::Deferred {
                execution_groups: 1
            }
        );
    }
}
