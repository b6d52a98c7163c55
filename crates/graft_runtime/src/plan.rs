//! Field planning for deferred execution.
//!
//! A grouped field set is split into the fields that belong to the current
//! branch and buckets of fields gated by other defer marker sets. Planning is
//! lazy: nested buckets are only discovered once the enclosing branch's data
//! has been merged, so defers under a subtree that never resolved are never
//! registered.

use graft_core::{DeferMarkerArena, DeferMarkerSet, FieldInvocation, GroupedFieldSet};
use indexmap::IndexMap;

/// A planned field set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Fields resolved together with the parent branch.
    pub immediate: GroupedFieldSet,
    /// Fields gated by other marker sets, in order of first use.
    pub branches: IndexMap<DeferMarkerSet, GroupedFieldSet>,
}

impl Plan {
    /// Returns true if no field was planned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.immediate.is_empty() && self.branches.is_empty()
    }

    /// Number of branch buckets that include `marker`.
    #[must_use]
    pub fn buckets_containing(&self, marker: graft_core::DeferMarkerId) -> usize {
        self.branches.keys().filter(|set| set.contains(marker)).count()
    }
}

/// The fields a branch resolved and the marker set it ran under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchSelection {
    pub markers: DeferMarkerSet,
    pub fields: GroupedFieldSet,
}

impl BranchSelection {
    #[must_use]
    pub fn new(markers: DeferMarkerSet, fields: GroupedFieldSet) -> Self {
        Self { markers, fields }
    }
}

/// Plans grouped field sets against one request's marker arena.
#[derive(Debug, Clone, Copy)]
pub struct FieldPlanner<'a> {
    arena: &'a DeferMarkerArena,
}

impl<'a> FieldPlanner<'a> {
    /// Creates a planner.
    #[must_use]
    pub fn new(arena: &'a DeferMarkerArena) -> Self {
        Self { arena }
    }

    /// Partitions `fields` relative to `parent`.
    ///
    /// A field whose filtered marker set equals `parent` is immediate; every
    /// other field goes to the bucket of its filtered set.
    #[must_use]
    pub fn plan(&self, fields: &GroupedFieldSet, parent: &DeferMarkerSet) -> Plan {
        let mut plan = Plan::default();
        for (response_key, group) in fields.iter() {
            let markers = self.filtered_markers(group);
            if &markers == parent {
                plan.immediate.extend_group(response_key, group);
                continue;
            }
            plan.branches
                .entry(markers)
                .or_default()
                .extend_group(response_key, group);
        }
        plan
    }

    /// The antichain of markers gating a field group.
    ///
    /// Any ungated occurrence makes the whole field ungated.
    #[must_use]
    pub fn filtered_markers(&self, group: &[FieldInvocation]) -> DeferMarkerSet {
        let mut markers = DeferMarkerSet::empty();
        for invocation in group {
            match invocation.defer {
                Some(marker) => markers.insert(marker),
                None => return DeferMarkerSet::empty(),
            }
        }
        self.arena.filter(&markers)
    }
}
