//! Response paths.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self::Field(s)
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Field(s.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

/// A path from the response root to one node of the response tree.
///
/// Serializes as a JSON array of strings and numbers, e.g. `["user", "friends", 0]`.
/// The `Display` form joins segments with `.` and is used as part of branch keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponsePath(Vec<PathSegment>);

impl ResponsePath {
    /// Creates the root path.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns true for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the segments of this path.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the path has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new path extended by a field segment.
    #[must_use]
    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut path = self.clone();
        path.0.push(PathSegment::Field(name.into()));
        path
    }

    /// Returns a new path extended by an index segment.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut path = self.clone();
        path.0.push(PathSegment::Index(index));
        path
    }
}

impl fmt::Display for ResponsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<Vec<PathSegment>> for ResponsePath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

impl FromIterator<PathSegment> for ResponsePath {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Builds a [`ResponsePath`] from string and integer literals.
///
/// ```
/// use graft_core::path;
///
/// let p = path!["user", "friends", 0usize];
/// assert_eq!(p.to_string(), "user.friends.0");
/// ```
#[macro_export]
macro_rules! path {
    () => {
        $crate::path::ResponsePath::root()
    };
    ($($segment:expr),+ $(,)?) => {
        $crate::path::ResponsePath::from(vec![$($crate::path::PathSegment::from($segment)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ResponsePath::root().to_string(), "");
        assert_eq!(path!["a", 0usize, "b"].to_string(), "a.0.b");
    }

    #[test]
    fn test_serialize_untagged() {
        let p = path!["user", 2usize];
        assert_eq!(serde_json::to_value(&p).unwrap(), serde_json::json!(["user", 2]));

        let back: ResponsePath = serde_json::from_value(serde_json::json!(["user", 2])).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_extend() {
        let base = path!["list"];
        assert_eq!(base.index(3), path!["list", 3usize]);
        assert_eq!(base.field("name"), path!["list", "name"]);
        assert_eq!(base.len(), 1);
    }
}
