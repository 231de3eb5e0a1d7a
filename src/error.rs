//! Pipeline error taxonomy

use thiserror::Error;

use crate::engine::ModelRole;

/// Errors surfaced by staging, model construction, inference and decoding.
///
/// None of these are retried internally; the caller decides what to do.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bundled asset missing/unreadable or cache directory not writable.
    #[error("failed to stage asset '{name}': {source}")]
    Staging {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed weights/config or unsupported format. The role stays unloaded.
    #[error("failed to construct {role} model: {source}")]
    ModelConstruction {
        role: ModelRole,
        #[source]
        source: anyhow::Error,
    },

    /// Engine invocation failure. The cached handle remains valid.
    #[error("{role} inference failed: {source}")]
    Inference {
        role: ModelRole,
        #[source]
        source: anyhow::Error,
    },

    /// Output tensor does not match the expected layout or label table.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// A newer request for the same target replaced this one.
    #[error("request for '{0}' was superseded by a newer request")]
    Superseded(String),

    /// The blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub(crate) fn decoding(message: impl Into<String>) -> Self {
        PipelineError::Decoding(message.into())
    }
}
