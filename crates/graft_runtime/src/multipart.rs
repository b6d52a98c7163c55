//! `multipart/mixed` encoding of incremental responses.

use crate::error::SourceError;
use crate::streaming::{ExecutionResult, InitialPayload, SubsequentPayload};
use crate::transform::IncrementalResponse;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while encoding parts.
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("failed to serialize part: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes incremental responses as `multipart/mixed` bodies.
#[derive(Debug, Clone)]
pub struct MultipartWriter {
    boundary: String,
    content_type: String,
}

impl MultipartWriter {
    /// Creates a writer with the conventional `-` boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary("-")
    }

    /// Creates a writer with a custom boundary.
    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        let boundary = boundary.into();
        Self {
            content_type: format!("multipart/mixed; boundary=\"{boundary}\""),
            boundary,
        }
    }

    /// Returns the Content-Type header value.
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Formats a non-incremental result as a single closed part.
    ///
    /// # Errors
    ///
    /// Returns an error if the result cannot be serialized.
    pub fn format_result(&self, result: &ExecutionResult) -> Result<String, MultipartError> {
        Ok(format!("{}{}", self.part(result)?, self.terminator()))
    }

    /// Formats the initial part.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn format_initial(&self, payload: &InitialPayload) -> Result<String, MultipartError> {
        self.part(payload)
    }

    /// Formats a subsequent part, closing the body after the last one.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn format_subsequent(&self, payload: &SubsequentPayload) -> Result<String, MultipartError> {
        let mut part = self.part(payload)?;
        if !payload.has_next() {
            part.push_str(&self.terminator());
        }
        Ok(part)
    }

    /// Formats the closing part for a response whose sources failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the part cannot be serialized.
    pub fn format_error(&self, error: &SourceError) -> Result<String, MultipartError> {
        let body = serde_json::json!({
            "errors": [error.to_graphql_error()],
            "hasNext": false,
        });
        Ok(format!("{}{}", self.part(&body)?, self.terminator()))
    }

    /// Encodes a whole response as a stream of body chunks.
    pub fn encode(
        &self,
        response: IncrementalResponse,
    ) -> BoxStream<'static, Result<String, MultipartError>> {
        let IncrementalResponse {
            initial,
            subsequent,
            ..
        } = response;
        let writer = self.clone();
        let initial = stream::once(futures::future::ready(writer.format_initial(&initial)));
        let subsequent = subsequent.map(move |frame| match frame {
            Ok(frame) => writer.format_subsequent(&frame),
            Err(error) => writer.format_error(&error),
        });
        initial.chain(subsequent).boxed()
    }

    fn part(&self, body: &impl Serialize) -> Result<String, MultipartError> {
        Ok(format!(
            "--{}\r\nContent-Type: application/json; charset=utf-8\r\n\r\n{}\r\n",
            self.boundary,
            serde_json::to_string(body)?
        ))
    }

    fn terminator(&self) -> String {
        format!("--{}--\r\n", self.boundary)
    }
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::LegacyPayload;
    use graft_core::Node;
    use serde_json::json;

    #[test]
    fn test_content_type() {
        let writer = MultipartWriter::new();
        assert_eq!(writer.content_type(), "multipart/mixed; boundary=\"-\"");
        assert_eq!(writer.boundary(), "-");
    }

    #[test]
    fn test_parts_and_terminator() {
        let writer = MultipartWriter::with_boundary("b");
        let initial = InitialPayload {
            data: Some(Node::from(json!({"a": 1}))),
            errors: vec![],
            pending: vec![],
            has_next: true,
        };
        assert_eq!(
            writer.format_initial(&initial).unwrap(),
            concat!(
                "--b\r\nContent-Type: application/json; charset=utf-8\r\n\r\n",
                "{\"data\":{\"a\":1},\"hasNext\":true}\r\n"
            )
        );

        let last = SubsequentPayload::Legacy(LegacyPayload {
            incremental: vec![],
            has_next: false,
        });
        let part = writer.format_subsequent(&last).unwrap();
        assert!(part.contains("{\"hasNext\":false}"));
        assert!(part.ends_with("--b--\r\n"));
    }

    #[test]
    fn test_error_part_closes_body() {
        let writer = MultipartWriter::new();
        let part = writer.format_error(&SourceError::failed("reset")).unwrap();
        assert!(part.contains("source failed: reset"));
        assert!(part.ends_with("----\r\n"));
    }
}
