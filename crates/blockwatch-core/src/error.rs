use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while configuring the segmenter or reading event sources.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to read {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to discover log files: {0}")]
    Discovery(String),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl BlockError {
    pub fn source_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BlockError::SourceRead {
            path: path.into(),
            source,
        }
    }

    /// Read and discovery failures are retried on the next poll.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BlockError::InvalidConfiguration(_))
    }
}

/// A single log line that could not be turned into a usage event.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing or invalid '{0}' field")]
    MissingField(&'static str),

    #[error("invalid timestamp '{0}'")]
    Timestamp(String),

    #[error("line carries no usage data")]
    NoUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_configuration_is_fatal() {
        let err = BlockError::InvalidConfiguration("window must be positive".to_string());
        assert!(!err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "invalid configuration: window must be positive"
        );
    }

    #[test]
    fn test_source_read_is_recoverable() {
        let err = BlockError::source_read(
            "/tmp/missing.jsonl",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("/tmp/missing.jsonl"));
    }
}
