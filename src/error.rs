use crate::command::Step;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum_macros::Display;

/// Why a single normalization job was rejected
#[derive(thiserror::Error, Debug)]
pub enum NormalizeError {
    #[error("Unsupported normalization type: {0}")]
    UnsupportedMethod(String),
    #[error("No audio stream found in {0:?}")]
    NoAudioStream(PathBuf),
    #[error("{step} failed for {path:?}: {message}")]
    ToolInvocation {
        step: Step,
        path: PathBuf,
        message: String,
    },
    #[error("Failed to clean up temporary file {path:?}: {message}")]
    Cleanup { path: PathBuf, message: String },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl NormalizeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnsupportedMethod(_) => FailureKind::UnsupportedMethod,
            Self::NoAudioStream(_) => FailureKind::NoAudioStream,
            Self::ToolInvocation { .. } => FailureKind::ToolInvocation,
            Self::Cleanup { .. } => FailureKind::Cleanup,
            Self::Io { .. } => FailureKind::Io,
        }
    }
}

/// Serializable tag of a [`NormalizeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum FailureKind {
    UnsupportedMethod,
    NoAudioStream,
    ToolInvocation,
    Cleanup,
    Io,
}

/// Failures of a folder run
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("I/O error during processing of {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} files failed to normalize")]
    FilesFailed(usize),
}
