//! CLI error type and exit codes.
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | General error (IO, engine not built in) |
//! | 3 | Model or context could not be loaded |
//! | 4 | Invalid input or configuration |
//! | 5 | Inference failed |

use llama_embed::EmbedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Model commands need the `llama` feature.
    #[error("built without llama support; rebuild with `--features llama`")]
    EngineUnavailable,

    #[error("{0}")]
    General(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Embed(e) => match e {
                EmbedError::InvalidArgument { .. }
                | EmbedError::ConfigError { .. }
                | EmbedError::EmptyInput => 4,
                e if e.is_load_failure() => 3,
                e if e.is_inference_failure() => 5,
                _ => 1,
            },
            Self::Serialization(_) => 4,
            Self::Io(_) | Self::EngineUnavailable | Self::General(_) => 1,
        }
    }
}
