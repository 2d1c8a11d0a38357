use thiserror::Error;

/// Errors that can occur while reading rule files.
#[derive(Debug, Error)]
pub enum RulesError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML or does not have the rule file layout.
    #[error("YAML parse error in {path}{}: {message}", line_suffix(*.line))]
    Yaml {
        path: String,
        line: Option<usize>,
        message: String,
    },

    /// A rule is missing required fields or has conflicting ones.
    #[error("invalid rule in {path} at line {line}: {message}")]
    InvalidRule {
        path: String,
        line: usize,
        message: String,
    },
}

impl RulesError {
    /// Line the error refers to, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Io { .. } => None,
            Self::Yaml { line, .. } => *line,
            Self::InvalidRule { line, .. } => Some(*line),
        }
    }
}

fn line_suffix(line: Option<usize>) -> String {
    line.map(|l| format!(" at line {l}")).unwrap_or_default()
}
