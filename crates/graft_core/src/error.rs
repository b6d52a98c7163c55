//! Error types shared across graft.

use crate::marker::DeferMarkerId;
use crate::path::ResponsePath;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by the core data structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A marker id that does not belong to the arena.
    #[error("unknown defer marker {0}")]
    UnknownMarker(DeferMarkerId),

    /// The arena cannot hand out more ids.
    #[error("defer marker arena is full")]
    ArenaFull,
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// A GraphQL error as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// The error message.
    pub message: String,
    /// The path to the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<ResponsePath>,
    /// Error extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

impl GraphQLError {
    /// Creates a new error without a path.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Adds a path to the error.
    #[must_use]
    pub fn with_path(mut self, path: ResponsePath) -> Self {
        self.path = Some(path);
        self
    }
}

impl std::fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} (at {path})", self.message),
            None => f.write_str(&self.message),
        }
    }
}
