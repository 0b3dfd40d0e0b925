use thiserror::Error;

/// Errors raised while building or decoding a domain record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    /// A required field was absent from a dict/JSON/wire form.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// A field was present but could not be coerced to the expected type.
    #[error("invalid value for field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A timestamp string could not be parsed.
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// A positional wire tuple had the wrong shape.
    #[error("malformed {record} tuple: {reason}")]
    MalformedTuple { record: &'static str, reason: String },

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(String),
}

impl RecordError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub fn malformed(record: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedTuple {
            record,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for RecordError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// A specialized Result type for record operations.
pub type Result<T> = std::result::Result<T, RecordError>;
