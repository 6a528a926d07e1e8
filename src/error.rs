use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChapterError {
    #[error("Required tool '{tool}' not found")]
    ToolUnavailable { tool: String },

    #[error("{tool} failed with status {status}\n{output}")]
    ToolExecutionFailed {
        tool: String,
        status: String,
        output: String,
    },

    #[error("{tool} timed out after {timeout:?}\n{output}")]
    ToolTimedOut {
        tool: String,
        timeout: Duration,
        output: String,
    },

    #[error("{tool} was cancelled")]
    Cancelled { tool: String },

    #[error("Failed to parse chapter metadata: {0}")]
    ParseFailed(String),

    #[error("Failed to encode chapter metadata: {0}")]
    EncodeFailed(String),

    #[error("Edited list has {actual} chapters, source has {expected}")]
    ChapterCountMismatch { expected: usize, actual: usize },

    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    #[error("Session is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChapterError {
    /// Raw tool output attached to the error, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::ToolExecutionFailed { output, .. } | Self::ToolTimedOut { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

impl From<serde_xml_rs::Error> for ChapterError {
    fn from(e: serde_xml_rs::Error) -> Self {
        ChapterError::ParseFailed(format!("XML error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, ChapterError>;
