//! Grafting path-addressed errors onto the response tree.

use graft_core::{ErrorLeaf, GraphQLError, Node, PathSegment};
use tracing::trace;

/// Embeds each error at the leaf its path points to.
///
/// A `null` or missing final slot becomes an [`ErrorLeaf`]; an existing leaf
/// accumulates. Errors without a path, with a path through a missing or
/// non-container node, or pointing at a real value are skipped. Returns the
/// number of errors embedded.
pub fn embed_errors(tree: &mut Node, errors: &[GraphQLError]) -> usize {
    errors
        .iter()
        .filter(|error| embed_error(tree, error))
        .count()
}

fn embed_error(tree: &mut Node, error: &GraphQLError) -> bool {
    let Some(path) = &error.path else {
        return false;
    };
    let Some((last, parents)) = path.segments().split_last() else {
        return false;
    };

    let mut node = tree;
    for segment in parents {
        node = match (node, segment) {
            (Node::Object(fields), PathSegment::Field(name)) => match fields.get_mut(name) {
                Some(child) => child,
                None => return skipped(error),
            },
            (Node::List(items), PathSegment::Index(index)) => match items.get_mut(*index) {
                Some(child) => child,
                None => return skipped(error),
            },
            _ => return skipped(error),
        };
    }

    let slot = match (node, last) {
        (Node::Object(fields), PathSegment::Field(name)) => fields.entry(name.clone()).or_default(),
        (Node::List(items), PathSegment::Index(index)) => match items.get_mut(*index) {
            Some(slot) => slot,
            None => return skipped(error),
        },
        _ => return skipped(error),
    };

    match slot {
        Node::Null => {
            *slot = Node::Errors(ErrorLeaf::new(error.clone()));
            true
        }
        Node::Errors(leaf) => {
            leaf.push(error.clone());
            true
        }
        _ => skipped(error),
    }
}

fn skipped(error: &GraphQLError) -> bool {
    trace!(error = %error, "error not embedded");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::path;
    use serde_json::json;

    #[test]
    fn test_embeds_at_null_leaf() {
        let mut tree = Node::from(json!({"user": {"name": null, "id": "1"}}));
        let error = GraphQLError::new("no name").with_path(path!["user", "name"]);

        assert_eq!(embed_errors(&mut tree, &[error.clone()]), 1);
        let leaf = tree
            .get(&path!["user", "name"])
            .and_then(Node::as_error_leaf)
            .unwrap();
        assert_eq!(leaf.errors(), &[error]);
    }

    #[test]
    fn test_accumulates_at_same_leaf() {
        let mut tree = Node::from(json!({"items": [1, null]}));
        let errors = vec![
            GraphQLError::new("first").with_path(path!["items", 1usize]),
            GraphQLError::new("second").with_path(path!["items", 1usize]),
        ];

        assert_eq!(embed_errors(&mut tree, &errors), 2);
        let leaf = tree
            .get(&path!["items", 1usize])
            .and_then(Node::as_error_leaf)
            .unwrap();
        assert_eq!(leaf.errors().len(), 2);
    }

    #[test]
    fn test_missing_leaf_is_created() {
        let mut tree = Node::from(json!({"user": {}}));
        let error = GraphQLError::new("gone").with_path(path!["user", "email"]);
        assert_eq!(embed_errors(&mut tree, &[error]), 1);
        assert_eq!(tree.to_value(), json!({"user": {"email": null}}));
    }

    #[test]
    fn test_malformed_paths_are_noops() {
        let mut tree = Node::from(json!({"user": null, "count": 3, "list": []}));
        let before = tree.clone();
        let errors = vec![
            GraphQLError::new("no path"),
            GraphQLError::new("root").with_path(path![]),
            GraphQLError::new("under null").with_path(path!["user", "name"]),
            GraphQLError::new("real value").with_path(path!["count"]),
            GraphQLError::new("wrong shape").with_path(path!["count", 0usize]),
            GraphQLError::new("out of range").with_path(path!["list", 4usize]),
        ];

        assert_eq!(embed_errors(&mut tree, &errors), 0);
        assert_eq!(tree, before);
    }
}
