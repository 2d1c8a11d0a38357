use thiserror::Error;

use crate::ast::PosRange;

/// Error returned when a query cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {}", .position.start)]
pub struct ParseError {
    /// Human readable description of the problem.
    pub message: String,
    /// Span of the offending input.
    pub position: PosRange,
}

impl ParseError {
    pub fn new(message: impl Into<String>, position: PosRange) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = ParseError::new("unexpected character ')'", PosRange::new(4, 5));
        assert_eq!(err.to_string(), "unexpected character ')' at position 4");
    }
}
