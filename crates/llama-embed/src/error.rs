//! Error types for the embedding pipeline.
//!
//! Every failure surfaces synchronously to the immediate caller. Nothing in
//! this crate retries: a transient engine failure is reported, not hidden.
//!
//! | Variant | Raised by |
//! |---------|-----------|
//! | `InvalidArgument` | registry / handle boundary |
//! | `ModelLoadError` | [`ModelHandle::create`](crate::ModelHandle::create) |
//! | `ContextCreationError` | [`ModelHandle::create`](crate::ModelHandle::create) |
//! | `TokenizationError`, `EmptyInput` | [`tokenize`](crate::tokenize) |
//! | `DecodeError`, `EmbeddingUnavailable` | [`embed`](crate::embed) |
//! | `InvalidDimension` | [`extract`](crate::extract) |

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;

/// Result type for embedding operations.
pub type EmbedResult<T> = Result<T, EmbedError>;

/// Errors that can occur anywhere in the embedding pipeline.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Missing, malformed or stale argument at the public boundary.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The engine refused to load the model file.
    #[error("Failed to load model {}: {source}", path.display())]
    ModelLoadError {
        path: PathBuf,
        #[source]
        source: BackendError,
    },

    /// The model loaded but no inference context could be built for it.
    #[error("Failed to create context for {}: {source}", path.display())]
    ContextCreationError {
        path: PathBuf,
        #[source]
        source: BackendError,
    },

    /// The engine tokenizer reported a negative token count.
    #[error("Failed to tokenize text ({text_bytes} bytes): {source}")]
    TokenizationError {
        text_bytes: usize,
        #[source]
        source: BackendError,
    },

    /// The text produced zero tokens.
    #[error("Empty input: text produced no tokens")]
    EmptyInput,

    /// The decode pass returned a non-zero status.
    #[error("Failed to run inference over {n_tokens} tokens: {source}")]
    DecodeError {
        n_tokens: usize,
        #[source]
        source: BackendError,
    },

    /// Decode succeeded but the context exposes no embedding buffer.
    #[error("Failed to get embeddings: {message}")]
    EmbeddingUnavailable { message: String },

    /// The engine buffer is shorter than the model's embedding dimension.
    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    /// Process-wide engine initialization failed.
    #[error("Backend initialization failed: {source}")]
    BackendInit {
        #[source]
        source: BackendError,
    },

    /// Configuration file invalid or out of range.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EmbedError {
    /// Create an invalid argument error from any displayable reason.
    pub fn invalid_argument<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidArgument {
            message: e.to_string(),
        }
    }

    /// Create a configuration error from any displayable reason.
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::ConfigError {
            message: e.to_string(),
        }
    }

    /// True for failures raised while creating a model handle.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::ModelLoadError { .. } | Self::ContextCreationError { .. } | Self::BackendInit { .. }
        )
    }

    /// True for failures raised while embedding text on a live handle.
    pub fn is_inference_failure(&self) -> bool {
        matches!(
            self,
            Self::TokenizationError { .. }
                | Self::EmptyInput
                | Self::DecodeError { .. }
                | Self::EmbeddingUnavailable { .. }
                | Self::InvalidDimension { .. }
        )
    }
}
