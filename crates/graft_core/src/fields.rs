//! Grouped field sets.

use crate::marker::DeferMarkerId;
use indexmap::IndexMap;

/// One occurrence of a field in the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInvocation {
    /// The schema field name.
    pub name: String,
    /// The innermost defer marker gating this occurrence.
    pub defer: Option<DeferMarkerId>,
    /// Sub-selection for composite fields.
    pub selection: GroupedFieldSet,
}

impl FieldInvocation {
    /// Creates a leaf invocation.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defer: None,
            selection: GroupedFieldSet::new(),
        }
    }

    /// Marks this occurrence as gated by `marker`.
    #[must_use]
    pub fn deferred(mut self, marker: DeferMarkerId) -> Self {
        self.defer = Some(marker);
        self
    }

    /// Sets the sub-selection.
    #[must_use]
    pub fn with_selection(mut self, selection: GroupedFieldSet) -> Self {
        self.selection = selection;
        self
    }
}

/// Fields of one response level, keyed by response key in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedFieldSet {
    fields: IndexMap<String, Vec<FieldInvocation>>,
}

impl GroupedFieldSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an invocation under `response_key`, keeping first-seen key order.
    pub fn push(&mut self, response_key: impl Into<String>, invocation: FieldInvocation) {
        self.fields
            .entry(response_key.into())
            .or_default()
            .push(invocation);
    }

    /// Builder form of [`GroupedFieldSet::push`].
    #[must_use]
    pub fn with(mut self, response_key: impl Into<String>, invocation: FieldInvocation) -> Self {
        self.push(response_key, invocation);
        self
    }

    /// Inserts a whole field group, appending to any existing one.
    pub fn extend_group(&mut self, response_key: &str, group: &[FieldInvocation]) {
        self.fields
            .entry(response_key.to_string())
            .or_default()
            .extend(group.iter().cloned());
    }

    #[must_use]
    pub fn get(&self, response_key: &str) -> Option<&[FieldInvocation]> {
        self.fields.get(response_key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[FieldInvocation])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Merges the sub-selections of every invocation in `group`.
    #[must_use]
    pub fn merge_selections(group: &[FieldInvocation]) -> Self {
        let mut merged = Self::new();
        for invocation in group {
            for (key, sub_group) in invocation.selection.iter() {
                merged.extend_group(key, sub_group);
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_key_order() {
        let set = GroupedFieldSet::new()
            .with("b", FieldInvocation::new("b"))
            .with("a", FieldInvocation::new("a"))
            .with("b", FieldInvocation::new("b"));

        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(set.get("b").map(<[_]>::len), Some(2));
    }

    #[test]
    fn test_merge_selections() {
        let first = FieldInvocation::new("user").with_selection(
            GroupedFieldSet::new()
                .with("id", FieldInvocation::new("id"))
                .with("name", FieldInvocation::new("name")),
        );
        let second = FieldInvocation::new("user").with_selection(
            GroupedFieldSet::new()
                .with("email", FieldInvocation::new("email"))
                .with("id", FieldInvocation::new("id")),
        );

        let merged = GroupedFieldSet::merge_selections(&[first, second]);
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["id", "name", "email"]);
        assert_eq!(merged.get("id").map(<[_]>::len), Some(2));
    }
}
