//! Deferral markers and canonical marker sets.
//!
//! Every application of a defer directive in a request becomes one
//! [`DeferMarker`] in a [`DeferMarkerArena`]. Nesting is recorded by parent id,
//! so the markers form a forest that can be walked without reference cycles.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Identifies a marker inside its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeferMarkerId(u32);

impl DeferMarkerId {
    /// Creates an id from a raw index.
    #[must_use]
    pub const fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// The label the engine uses to address this marker's branches.
    #[must_use]
    pub fn branch_label(self) -> String {
        format!("defer{}", self.0)
    }
}

impl fmt::Display for DeferMarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One application of a defer directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferMarker {
    /// The user-supplied label, if any.
    pub label: Option<String>,
    /// The marker this one is nested under.
    pub parent: Option<DeferMarkerId>,
}

/// Arena of all markers of one request.
#[derive(Debug, Clone, Default)]
pub struct DeferMarkerArena {
    markers: Vec<DeferMarker>,
}

impl DeferMarkerArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a marker.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownMarker`] if `parent` is not in this arena.
    pub fn add(
        &mut self,
        label: Option<&str>,
        parent: Option<DeferMarkerId>,
    ) -> CoreResult<DeferMarkerId> {
        if let Some(parent) = parent {
            self.get(parent)?;
        }
        let raw = u32::try_from(self.markers.len()).map_err(|_| CoreError::ArenaFull)?;
        self.markers.push(DeferMarker {
            label: label.map(str::to_string),
            parent,
        });
        Ok(DeferMarkerId(raw))
    }

    /// Looks up a marker.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownMarker`] if `id` is not in this arena.
    pub fn get(&self, id: DeferMarkerId) -> CoreResult<&DeferMarker> {
        self.markers
            .get(id.0 as usize)
            .ok_or(CoreError::UnknownMarker(id))
    }

    /// Returns the user label of a marker, if it has one.
    #[must_use]
    pub fn label(&self, id: DeferMarkerId) -> Option<&str> {
        self.get(id).ok().and_then(|m| m.label.as_deref())
    }

    /// Returns the number of markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Returns true if the arena holds no markers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Iterates over the strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: DeferMarkerId) -> Ancestors<'_> {
        Ancestors {
            arena: self,
            next: self.get(id).ok().and_then(|m| m.parent),
        }
    }

    /// Reduces a set to an antichain by dropping every marker that has an
    /// ancestor in the same set.
    #[must_use]
    pub fn filter(&self, set: &DeferMarkerSet) -> DeferMarkerSet {
        set.iter()
            .filter(|&id| !self.ancestors(id).any(|a| set.contains(a)))
            .collect()
    }
}

/// Iterator returned by [`DeferMarkerArena::ancestors`].
pub struct Ancestors<'a> {
    arena: &'a DeferMarkerArena,
    next: Option<DeferMarkerId>,
}

impl Iterator for Ancestors<'_> {
    type Item = DeferMarkerId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.arena.get(current).ok().and_then(|m| m.parent);
        Some(current)
    }
}

/// A set of markers, kept sorted and de-duplicated.
///
/// Equality and hashing are structural, so two sets built from the same
/// markers in any order are interchangeable as map keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeferMarkerSet(Vec<DeferMarkerId>);

impl DeferMarkerSet {
    /// The empty set (a field that is not deferred).
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// A set with one marker.
    #[must_use]
    pub fn single(id: DeferMarkerId) -> Self {
        Self(vec![id])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn contains(&self, id: DeferMarkerId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    /// Inserts a marker, keeping the set canonical.
    pub fn insert(&mut self, id: DeferMarkerId) {
        if let Err(pos) = self.0.binary_search(&id) {
            self.0.insert(pos, id);
        }
    }

    /// Iterates in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = DeferMarkerId> + '_ {
        self.0.iter().copied()
    }

    /// Canonical string key, e.g. `"1,4,7"`.
    #[must_use]
    pub fn key(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromIterator<DeferMarkerId> for DeferMarkerSet {
    fn from_iter<I: IntoIterator<Item = DeferMarkerId>>(iter: I) -> Self {
        let mut ids: Vec<_> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }
}

impl fmt::Display for DeferMarkerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_arena() -> (DeferMarkerArena, DeferMarkerId, DeferMarkerId, DeferMarkerId) {
        let mut arena = DeferMarkerArena::new();
        let outer = arena.add(Some("outer"), None).unwrap();
        let inner = arena.add(Some("inner"), Some(outer)).unwrap();
        let other = arena.add(None, None).unwrap();
        (arena, outer, inner, other)
    }

    #[test]
    fn test_unknown_parent() {
        let mut arena = DeferMarkerArena::new();
        let err = arena.add(None, Some(DeferMarkerId::from_raw(3))).unwrap_err();
        assert!(matches!(err, CoreError::UnknownMarker(id) if id.as_raw() == 3));
    }

    #[test]
    fn test_ancestors() {
        let (arena, outer, inner, other) = nested_arena();
        assert_eq!(arena.ancestors(inner).collect::<Vec<_>>(), vec![outer]);
        assert_eq!(arena.ancestors(outer).count(), 0);
        assert_eq!(arena.ancestors(other).count(), 0);
        assert_eq!(arena.label(outer), Some("outer"));
        assert_eq!(arena.label(other), None);
    }

    #[test]
    fn test_filter_removes_descendants() {
        let (arena, outer, inner, other) = nested_arena();
        let set: DeferMarkerSet = [inner, outer, other].into_iter().collect();
        let filtered = arena.filter(&set);
        assert_eq!(filtered, [outer, other].into_iter().collect::<DeferMarkerSet>());
    }

    #[test]
    fn test_filter_is_idempotent() {
        let (arena, outer, inner, other) = nested_arena();
        let set: DeferMarkerSet = [inner, outer, other].into_iter().collect();
        let once = arena.filter(&set);
        assert_eq!(arena.filter(&once), once);
    }

    #[test]
    fn test_structural_equality() {
        let a = DeferMarkerId::from_raw(1);
        let b = DeferMarkerId::from_raw(5);
        let left: DeferMarkerSet = [b, a, b].into_iter().collect();
        let mut right = DeferMarkerSet::empty();
        right.insert(a);
        right.insert(b);
        assert_eq!(left, right);
        assert_eq!(left.key(), "1,5");

        let mut buckets = indexmap::IndexMap::new();
        buckets.insert(left.clone(), "first");
        assert_eq!(buckets.get(&right), Some(&"first"));
    }
}
