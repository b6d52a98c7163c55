//! Core data model for graft.
//!
//! This crate provides the types shared by the incremental delivery runtime:
//! - `path`: Response paths
//! - `marker`: Defer marker arena and canonical marker sets
//! - `fields`: Grouped field sets
//! - `tree`: The live response tree and error leaves
//! - `error`: Core and wire-level errors

pub mod error;
pub mod fields;
pub mod marker;
pub mod path;
pub mod tree;

pub use error::{CoreError, CoreResult, GraphQLError};
pub use fields::{FieldInvocation, GroupedFieldSet};
pub use marker::{DeferMarker, DeferMarkerArena, DeferMarkerId, DeferMarkerSet};
pub use path::{PathSegment, ResponsePath};
pub use tree::{ErrorLeaf, Node};
