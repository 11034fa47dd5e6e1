//! Engine seam.
//!
//! The model-execution engine (tokenizer algorithm, tensor math, weight
//! format) is opaque to this crate. [`EmbeddingBackend`] is the narrow set of
//! capabilities the pipeline consumes from it.
//!
//! # Resource ownership
//!
//! Engine resources are modelled as owned values. Dropping a
//! [`Model`](EmbeddingBackend::Model), [`Context`](EmbeddingBackend::Context)
//! or [`Batch`](EmbeddingBackend::Batch) releases the engine resource behind
//! it, so each one is released exactly once on every exit path.
//!
//! # Implementations
//!
//! - [`LlamaCppBackend`] (feature `llama`): llama.cpp through `llama-cpp-2`
//! - [`StubBackend`](crate::stubs::StubBackend) (tests / `test-utils`)

#[cfg(feature = "llama")]
mod llama;

#[cfg(feature = "llama")]
pub use llama::LlamaCppBackend;

use std::path::Path;

use thiserror::Error;

/// Token identifier in the model's vocabulary.
pub type Token = i32;

/// Position of a token within its sequence.
pub type Pos = i32;

/// Sequence membership tag inside a batch.
pub type SeqId = i32;

/// Errors reported by an engine backend.
///
/// These carry the engine's own status codes; the pipeline wraps them into
/// [`EmbedError`](crate::EmbedError) variants that name the failing step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Process-wide engine initialization failed.
    #[error("engine init failed: {message}")]
    Init { message: String },

    /// Loading model weights failed.
    #[error("model load failed: {message}")]
    ModelLoad { message: String },

    /// Creating an inference context failed.
    #[error("context creation failed: {message}")]
    ContextCreate { message: String },

    /// Tokenizer returned a negative count.
    ///
    /// When the output buffer is too small the code is the negated number of
    /// tokens the text needs.
    #[error("tokenizer returned {code}")]
    Tokenize { code: i32 },

    /// Appending a token to a batch failed (batch full, bad sequence id).
    #[error("batch add failed: {message}")]
    BatchAdd { message: String },

    /// Decode returned a non-zero status code.
    #[error("decode returned {code}")]
    Decode { code: i32 },
}

/// Parameters applied when loading a model.
///
/// `None` fields keep the engine's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelParams {
    /// Number of layers to offload to the GPU.
    pub n_gpu_layers: Option<u32>,
}

/// Parameters applied when creating an inference context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextParams {
    /// Whether the context exposes an embedding buffer after decode.
    pub embeddings: bool,
    /// Threads used for single-token generation.
    pub n_threads: u32,
    /// Threads used for batch (prompt) processing.
    pub n_threads_batch: u32,
    /// Context window; `None` uses the model's training context.
    pub n_ctx: Option<u32>,
    /// Logical maximum batch size submitted to decode.
    pub n_batch: Option<u32>,
    /// Physical micro-batch size.
    pub n_ubatch: Option<u32>,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            embeddings: true,
            n_threads: 4,
            n_threads_batch: 4,
            n_ctx: None,
            n_batch: None,
            n_ubatch: None,
        }
    }
}

/// Capabilities consumed from the model-execution engine.
///
/// A context must not be decoded from two threads at once; callers hold
/// `&mut Context` for the duration of a decode, which the type system
/// enforces. Handles shared across threads are serialized by the
/// [`ModelRegistry`](crate::ModelRegistry).
pub trait EmbeddingBackend: Send + Sync + 'static {
    /// Loaded model weights and vocabulary.
    type Model: Send + Sync;

    /// Inference session bound to one model.
    type Context: Send;

    /// Transient decode request.
    type Batch;

    /// Load a model from a file in the engine's native weight format.
    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model, BackendError>;

    /// Create an inference context for `model`.
    fn new_context(
        &self,
        model: &Self::Model,
        params: &ContextParams,
    ) -> Result<Self::Context, BackendError>;

    /// Native embedding dimensionality of `model`.
    fn n_embd(&self, model: &Self::Model) -> i32;

    /// Tokenize `text` into `tokens`, returning the number written.
    ///
    /// `add_special` prepends the model's beginning-of-sequence marker.
    ///
    /// Fails with [`BackendError::Tokenize`] when the engine reports a
    /// negative count, including when `tokens` is too small.
    fn tokenize_into(
        &self,
        model: &Self::Model,
        text: &str,
        tokens: &mut [Token],
        add_special: bool,
    ) -> Result<usize, BackendError>;

    /// Allocate a batch with room for `n_tokens` entries across `n_seq_max` sequences.
    fn new_batch(&self, n_tokens: usize, n_seq_max: usize) -> Self::Batch;

    /// Append one token to `batch`.
    fn batch_add(
        &self,
        batch: &mut Self::Batch,
        token: Token,
        pos: Pos,
        seq_ids: &[SeqId],
        logits: bool,
    ) -> Result<(), BackendError>;

    /// Clear sequence (KV / positional) state so the next decode starts at position 0.
    fn reset_context(&self, ctx: &mut Self::Context);

    /// Run one decode pass of `batch` against `ctx`.
    fn decode(&self, ctx: &mut Self::Context, batch: &mut Self::Batch) -> Result<(), BackendError>;

    /// Borrow the context's embedding buffer.
    ///
    /// Returns `None` when embeddings were not enabled on the context or the
    /// last decode produced none. The slice is overwritten by the next decode.
    fn embeddings<'c>(&self, ctx: &'c Self::Context) -> Option<&'c [f32]>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_params_default_matches_fixed_engine_setup() {
        let params = ContextParams::default();
        assert!(params.embeddings);
        assert_eq!(params.n_threads, 4);
        assert_eq!(params.n_threads_batch, 4);
        assert!(params.n_ctx.is_none());
    }

    #[test]
    fn test_model_params_default_keeps_engine_defaults() {
        assert_eq!(ModelParams::default().n_gpu_layers, None);
    }

    #[test]
    fn test_backend_error_display() {
        assert_eq!(BackendError::Decode { code: 1 }.to_string(), "decode returned 1");
        assert_eq!(
            BackendError::Tokenize { code: -42 }.to_string(),
            "tokenizer returned -42"
        );
    }
}
