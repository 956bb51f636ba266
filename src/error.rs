//! Error types for the driver.
//!
//! Configuration, tool lookup and process failures are fatal and surface as
//! [`DriverError`]. Malformed result lines are [`ParseWarning`]s: the report
//! reader counts and logs them, then moves on.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal driver error
#[derive(Error, Debug)]
pub enum DriverError {
    /// Missing or invalid scenario/executor configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The configured tool path or pattern did not resolve to an executable
    #[error("no executable matches tool path '{pattern}': {reason}")]
    ToolNotFound { pattern: String, reason: String },

    /// A wildcard tool pattern matched more than one executable
    #[error("tool path '{pattern}' is ambiguous, it matches {}", format_candidates(.candidates))]
    AmbiguousTool {
        pattern: String,
        candidates: Vec<PathBuf>,
    },

    /// The operating system refused to start the child process
    #[error("failed to spawn '{}': {source}", .tool.display())]
    ProcessSpawn {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The child process failed according to the exit policy
    #[error("{tool} exited with {}{}", describe_exit(.exit_code), format_diagnostics(.diagnostics))]
    Tool {
        tool: String,
        exit_code: Option<i32>,
        diagnostics: String,
    },

    /// An executor operation was called in a state that does not allow it
    #[error("cannot {operation} while executor is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, DriverError>;

/// A result line that could not be turned into a sample
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseWarning {
    #[error("blank line")]
    Blank,

    #[error("header line")]
    Header,

    #[error("expected at least 4 columns, found {0}")]
    TooFewColumns(usize),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("invalid elapsed time '{0}'")]
    InvalidElapsed(String),

    #[error("unknown outcome '{0}'")]
    UnknownOutcome(String),

    #[error("error outcome without a message")]
    MissingErrorMessage,

    #[error("unreadable CSV record: {0}")]
    Malformed(String),
}

impl ParseWarning {
    /// Header and blank lines are expected in every result file and are not
    /// worth reporting individually.
    pub fn is_noise(&self) -> bool {
        matches!(self, ParseWarning::Blank | ParseWarning::Header)
    }
}

fn format_candidates(candidates: &[PathBuf]) -> String {
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn format_diagnostics(diagnostics: &str) -> String {
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!("\n{}", diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_not_found_names_pattern() {
        let err = DriverError::ToolNotFound {
            pattern: "/opt/tools/*".to_string(),
            reason: "nothing matched".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/opt/tools/*"));
        assert!(msg.contains("nothing matched"));
    }

    #[test]
    fn test_tool_error_includes_exit_code_and_diagnostics() {
        let err = DriverError::Tool {
            tool: "molotov".to_string(),
            exit_code: Some(3),
            diagnostics: "molotov STDERR:\nboom".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("molotov exited with exit code 3"));
        assert!(msg.ends_with("boom"));

        let killed = DriverError::Tool {
            tool: "molotov".to_string(),
            exit_code: None,
            diagnostics: String::new(),
        };
        assert_eq!(
            killed.to_string(),
            "molotov exited with no exit code (terminated by signal)"
        );
    }

    #[test]
    fn test_parse_warning_noise() {
        assert!(ParseWarning::Header.is_noise());
        assert!(ParseWarning::Blank.is_noise());
        assert!(!ParseWarning::TooFewColumns(2).is_noise());
    }
}
