//! Line classification.
//!
//! A line is object-shaped if it starts with `{` and array-shaped if it
//! starts with `[` (after leading whitespace). Anything else, and anything
//! that fails to parse, is a malformed frame.

use serde_json::{Map, Value};
use thiserror::Error;

/// One JSON frame, inbound or outbound.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

/// Why a line could not be turned into a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("empty line")]
    Empty,

    #[error("frame starts with {0:?}, expected '{{' or '['")]
    Unclassifiable(char),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("line exceeds the maximum frame length")]
    TooLong,

    #[error("missing or invalid field {0}")]
    MissingField(&'static str),

    #[error("tag {tag:?}: missing or invalid operand at index {index}")]
    MissingOperand { tag: String, index: usize },
}

impl Frame {
    /// Classify and parse one line.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] for blank, unclassifiable or unparseable
    /// lines.
    pub fn classify(line: &str) -> Result<Frame, FrameError> {
        let trimmed = line.trim();
        let first = trimmed.chars().next().ok_or(FrameError::Empty)?;

        match first {
            '{' => serde_json::from_str(trimmed)
                .map(Frame::Object)
                .map_err(|e| FrameError::InvalidJson(e.to_string())),
            '[' => serde_json::from_str(trimmed)
                .map(Frame::Array)
                .map_err(|e| FrameError::InvalidJson(e.to_string())),
            other => Err(FrameError::Unclassifiable(other)),
        }
    }

    /// Serialize to a single line, without the terminator.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures (non-finite floats cannot occur in a
    /// `Value`, so this is practically infallible).
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Frame::Object(map) => serde_json::to_string(map),
            Frame::Array(items) => serde_json::to_string(items),
        }
    }

    /// Short label for logs.
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            Frame::Object(_) => "object",
            Frame::Array(_) => "array",
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Frame::Object(map) => Some(map),
            Frame::Array(_) => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Frame::Array(items) => Some(items),
            Frame::Object(_) => None,
        }
    }

    /// The frame as a plain JSON value, mostly for comparisons in tests.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Frame::Object(map) => Value::Object(map.clone()),
            Frame::Array(items) => Value::Array(items.clone()),
        }
    }
}

impl TryFrom<Value> for Frame {
    type Error = FrameError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Frame::Object(map)),
            Value::Array(items) => Ok(Frame::Array(items)),
            _ => Err(FrameError::InvalidJson(
                "frame must be an object or an array".to_string(),
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_object() {
        let frame = Frame::classify(r#"{"m":51}"#).unwrap();
        assert_eq!(frame.shape(), "object");
        assert_eq!(frame.to_value(), json!({"m": 51}));
    }

    #[test]
    fn test_classify_array_with_whitespace() {
        let frame = Frame::classify("  [\"16\", 42]\r").unwrap();
        assert_eq!(frame.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_classify_rejects_garbage() {
        assert_eq!(Frame::classify(""), Err(FrameError::Empty));
        assert_eq!(Frame::classify("   "), Err(FrameError::Empty));
        assert_eq!(
            Frame::classify("hello"),
            Err(FrameError::Unclassifiable('h'))
        );
        assert_eq!(Frame::classify("42"), Err(FrameError::Unclassifiable('4')));
        assert!(matches!(
            Frame::classify("{\"m\":"),
            Err(FrameError::InvalidJson(_))
        ));
        assert!(matches!(
            Frame::classify("[1,2"),
            Err(FrameError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_encode_is_single_line() {
        let frame = Frame::try_from(json!([9, 3500, "k"])).unwrap();
        let line = frame.encode().unwrap();
        assert_eq!(line, r#"[9,3500,"k"]"#);
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_try_from_scalar_fails() {
        assert!(Frame::try_from(json!(5)).is_err());
    }
}
