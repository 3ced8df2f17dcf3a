//! Error types for record store operations

use thiserror::Error;

use crate::backend::ClientError;

/// Errors that can occur during record store operations
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend error on table '{table}': {source}")]
    Backend {
        table: String,
        #[source]
        source: ClientError,
    },
}

impl RecordStoreError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unsupported_filter(msg: impl Into<String>) -> Self {
        Self::UnsupportedFilter(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Wrap a native client failure with the table it happened on.
    ///
    /// Missing tables surface as `NotFound`; native validation rejections as
    /// `BadRequest`. Callers that know a failed condition means something more
    /// specific (missing item, stale revision) map it themselves before calling this.
    pub fn backend(table: impl Into<String>, source: ClientError) -> Self {
        let table = table.into();
        match source {
            ClientError::ResourceNotFound(msg) => {
                Self::NotFound(format!("table '{}': {}", table, msg))
            }
            ClientError::Validation(msg) => {
                Self::BadRequest(format!("table '{}': {}", table, msg))
            }
            source => Self::Backend { table, source },
        }
    }

    /// HTTP-equivalent status code for the surrounding REST layer
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::UnsupportedFilter(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Configuration(_) => 500,
            Self::Backend { .. } => 502,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, RecordStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_maps_missing_table_to_not_found() {
        let err = RecordStoreError::backend(
            "widgets",
            ClientError::ResourceNotFound("no such table".into()),
        );
        assert!(err.is_not_found());
        assert!(err.to_string().contains("widgets"));
    }

    #[test]
    fn test_backend_keeps_transport_failures_wrapped() {
        let err = RecordStoreError::backend("widgets", ClientError::Transport("reset".into()));
        match &err {
            RecordStoreError::Backend { table, source } => {
                assert_eq!(table, "widgets");
                assert_eq!(source, &ClientError::Transport("reset".into()));
            }
            other => panic!("Expected Backend, got {:?}", other),
        }
        assert_eq!(err.status_code(), 502);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RecordStoreError::bad_request("x").status_code(), 400);
        assert_eq!(RecordStoreError::unsupported_filter("x").status_code(), 400);
        assert_eq!(RecordStoreError::not_found("x").status_code(), 404);
        assert_eq!(RecordStoreError::conflict("x").status_code(), 409);
        assert_eq!(RecordStoreError::configuration("x").status_code(), 500);
    }

    #[test]
    fn test_every_kind_has_a_constructor() {
        // no wildcard arm: a new kind must be added here with its constructor
        fn kind(err: &RecordStoreError) -> &'static str {
            match err {
                RecordStoreError::BadRequest(_) => "bad_request",
                RecordStoreError::UnsupportedFilter(_) => "unsupported_filter",
                RecordStoreError::NotFound(_) => "not_found",
                RecordStoreError::Conflict(_) => "conflict",
                RecordStoreError::Configuration(_) => "configuration",
                RecordStoreError::Backend { .. } => "backend",
            }
        }
        let built = [
            RecordStoreError::bad_request("x"),
            RecordStoreError::unsupported_filter("x"),
            RecordStoreError::not_found("x"),
            RecordStoreError::conflict("x"),
            RecordStoreError::configuration("x"),
            RecordStoreError::backend("t", ClientError::Transport("x".into())),
        ];
        let kinds: Vec<_> = built.iter().map(kind).collect();
        assert_eq!(
            kinds,
            ["bad_request", "unsupported_filter", "not_found", "conflict", "configuration", "backend"]
        );
    }
}
