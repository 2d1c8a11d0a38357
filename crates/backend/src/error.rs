use thiserror::Error;

/// Errors returned by metrics backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend cannot answer this kind of question. Checks that need
    /// the answer are skipped without a report.
    #[error("{backend} does not support {what}")]
    Unsupported { backend: String, what: String },

    /// The backend could not be reached.
    #[error("{backend} is unavailable: {message}")]
    Unavailable { backend: String, message: String },

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = BackendError::Unsupported {
            backend: "prom".into(),
            what: "metric metadata".into(),
        };
        assert_eq!(err.to_string(), "prom does not support metric metadata");
        assert!(err.is_unsupported());

        let err = BackendError::Unavailable {
            backend: "prom".into(),
            message: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "prom is unavailable: connection refused");
        assert!(!err.is_unsupported());

        assert_eq!(BackendError::Other("boom".into()).to_string(), "boom");
    }
}
