//! Error taxonomy shared by the sampling, analysis and log parsing paths

use thiserror::Error;

/// Errors produced by memdiag-lib
#[derive(Debug, Error)]
pub enum DiagError {
    /// Subject vanished or access was denied. Non-fatal: the tick is skipped.
    #[error("sample unavailable for {subject}: {reason}")]
    SampleUnavailable { subject: String, reason: String },

    /// Fewer than two samples were collected for an analysis
    #[error("insufficient data: {collected} sample(s) collected, at least 2 required")]
    InsufficientData { collected: usize },

    /// One OOM log source could not be read
    #[error("log source {source_name} unavailable: {reason}")]
    LogSourceUnavailable { source_name: String, reason: String },

    /// A line of an input file could not be parsed
    #[error("malformed input at line {line}: {reason}")]
    MalformedInput { line: usize, reason: String },

    /// Rejected before any sampling begins
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiagError {
    pub fn sample_unavailable(subject: impl Into<String>, reason: impl ToString) -> Self {
        DiagError::SampleUnavailable {
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        DiagError::InvalidConfiguration(message.into())
    }

    /// Whether a sampling loop should skip the tick and keep going
    pub fn is_transient(&self) -> bool {
        matches!(self, DiagError::SampleUnavailable { .. })
    }
}

pub type Result<T, E = DiagError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DiagError::sample_unavailable("pid 1", "gone").is_transient());
        assert!(!DiagError::InsufficientData { collected: 1 }.is_transient());
        assert!(!DiagError::invalid_config("count must be >= 2").is_transient());
    }

    #[test]
    fn test_messages() {
        let err = DiagError::LogSourceUnavailable {
            source_name: "journal".to_string(),
            reason: "journalctl not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "log source journal unavailable: journalctl not found"
        );
    }
}
