//! Runtime errors.

use graft_core::GraphQLError;
use thiserror::Error;

/// Errors raised by event sources and the fan-in registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// A source failed while producing its next value.
    #[error("source failed: {message}")]
    Failed { message: String },

    /// The registry was aborted by its consumer.
    #[error("fan-in aborted: {message}")]
    Aborted { message: String },

    /// The registry is already closed.
    #[error("fan-in registry is closed")]
    Closed,
}

impl SourceError {
    /// Creates a [`SourceError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Creates a [`SourceError::Aborted`].
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Converts into a wire error for the terminal frame of a failed transform.
    #[must_use]
    pub fn to_graphql_error(&self) -> GraphQLError {
        GraphQLError::new(self.to_string())
    }
}

/// Result alias for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            SourceError::failed("socket reset").to_string(),
            "source failed: socket reset"
        );
        assert_eq!(
            SourceError::Closed.to_graphql_error().message,
            "fan-in registry is closed"
        );
    }
}
