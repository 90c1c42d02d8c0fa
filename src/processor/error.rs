use crate::v1beta::rest;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Where a call was waiting when it observed cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPoint {
    /// Before a new attempt was opened.
    BeforeAttempt,
    /// Waiting for the next chunk of a response stream.
    Stream,
    /// Sleeping between attempts.
    Backoff,
}

impl fmt::Display for CancelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BeforeAttempt => "before attempt",
            Self::Stream => "while streaming",
            Self::Backoff => "during retry",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create genai client: {0}")]
    ClientInit(#[source] reqwest::Error),
    #[error("client is closed")]
    Closed,
    #[error("content blocked by safety settings ({0})")]
    SafetyBlocked(String),
    #[error("context cancelled {0}")]
    Cancelled(CancelPoint),
    #[error("failed to write response: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to read image file {path}: {source}")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to generate content: {0}")]
    Generation(#[source] rest::Error),
    #[error("failed to process text after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: rest::Error,
    },
    #[error("no content generated after {attempts} attempts")]
    NoContent { attempts: u32 },
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
