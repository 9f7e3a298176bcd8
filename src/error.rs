/// Error types shared by every pipeline stage.
///
/// Data-quality failures (bad files, too little data) are isolated per
/// activity by the batch runner. Configuration failures (bad parameters,
/// classifier or clustering boundary misuse) abort the command.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
    #[error("failed to parse FIT file: {0}")]
    FitParse(String),
    #[error("unsupported track format: {0}")]
    UnsupportedFormat(String),
    #[error("track file does not exist: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn insufficient(msg: impl Into<String>) -> Self {
        PipelineError::InsufficientData(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Config(msg.into())
    }

    /// True for parameter and boundary misuse, false for problems with the
    /// recorded data itself.
    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Config(_) | PipelineError::Json(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_split() {
        assert!(PipelineError::config("window must be at least 2").is_configuration());
        assert!(!PipelineError::insufficient("empty series").is_configuration());
        assert!(!PipelineError::MissingFile(PathBuf::from("a.gpx")).is_configuration());
    }

    #[test]
    fn test_messages() {
        let err = PipelineError::insufficient("no samples for activity 7");
        assert_eq!(err.to_string(), "insufficient data: no samples for activity 7");
    }
}
