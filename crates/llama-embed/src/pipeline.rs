//! Inference pipeline: one single-sequence batch, one decode pass.
//!
//! # Batch lifetime
//!
//! The batch is allocated immediately before decode and owned by [`embed`]
//! alone. It is released when it goes out of scope, which happens exactly
//! once on every exit path: after a failed append, after a failed decode,
//! and before the embedding buffer is read on success.

use tracing::{debug, warn};

use crate::backend::{BackendError, EmbeddingBackend, Pos, SeqId};
use crate::error::{EmbedError, EmbedResult};
use crate::extract::{extract, EmbeddingVector};
use crate::handle::ModelHandle;
use crate::tokenizer::TokenSequence;

/// The only sequence used for embedding requests.
const SEQ_ID: SeqId = 0;

/// Borrowed view of the context's embedding buffer.
///
/// The buffer belongs to the context and is overwritten by the next decode on
/// the same handle. The view holds the handle's mutable borrow, so no further
/// call on the handle is possible until the view is dropped; call
/// [`to_vector`](Self::to_vector) to keep the values.
#[derive(Debug)]
pub struct EmbeddingView<'h> {
    values: &'h [f32],
    n_embd: usize,
    n_tokens: usize,
}

impl<'h> EmbeddingView<'h> {
    /// Raw engine buffer. May be longer than `n_embd`.
    pub fn as_slice(&self) -> &[f32] {
        self.values
    }

    /// Model embedding dimension.
    pub fn n_embd(&self) -> usize {
        self.n_embd
    }

    /// Tokens decoded to produce this buffer.
    pub fn n_tokens(&self) -> usize {
        self.n_tokens
    }

    /// Copy `n_embd` values out into an owned vector.
    pub fn to_vector(&self) -> EmbedResult<EmbeddingVector> {
        extract(self.values, self.n_embd)
    }
}

/// Decode `tokens` on the handle's context and borrow the resulting embedding.
///
/// Sequence state is reset first, so every request decodes positions
/// `0..n` on a clean context. Every token is tagged with sequence 0 and no
/// logit output; pooled embedding mode reads all positions.
///
/// # Errors
///
/// - `EmptyInput` for a zero-length sequence (no batch is allocated)
/// - `DecodeError` if a token cannot be added or decode returns non-zero
/// - `EmbeddingUnavailable` if the context exposes no embedding buffer
/// - `InvalidArgument` if the handle has been destroyed
pub fn embed<'h, B: EmbeddingBackend>(
    handle: &'h mut ModelHandle<B>,
    tokens: &TokenSequence,
) -> EmbedResult<EmbeddingView<'h>> {
    if tokens.is_empty() {
        return Err(EmbedError::EmptyInput);
    }

    let n_embd = handle.n_embd();
    let n_tokens = tokens.len();
    let (backend, ctx) = handle.context_mut()?;

    backend.reset_context(ctx);
    decode_sequence(backend, ctx, tokens)?;

    let values = backend.embeddings(ctx).ok_or_else(|| {
        warn!(n_tokens, "Decode produced no embedding buffer");
        EmbedError::EmbeddingUnavailable {
            message: "context returned no embedding buffer (embeddings disabled or empty decode)"
                .to_string(),
        }
    })?;

    Ok(EmbeddingView {
        values,
        n_embd,
        n_tokens,
    })
}

/// Build the batch, decode it, and drop it before returning.
fn decode_sequence<B: EmbeddingBackend>(
    backend: &B,
    ctx: &mut B::Context,
    tokens: &TokenSequence,
) -> EmbedResult<()> {
    let n_tokens = tokens.len();
    let decode_error = |source: BackendError| EmbedError::DecodeError { n_tokens, source };

    let mut batch = backend.new_batch(n_tokens, 1);
    for (i, &token) in tokens.iter().enumerate() {
        backend
            .batch_add(&mut batch, token, i as Pos, &[SEQ_ID], false)
            .map_err(decode_error)?;
    }

    backend.decode(ctx, &mut batch).map_err(|source| {
        warn!(n_tokens, error = %source, "Decode failed");
        decode_error(source)
    })?;

    debug!(n_tokens, "Decode complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbedConfig;
    use crate::stubs::StubBackend;
    use crate::tokenizer::tokenize;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn setup(backend: Arc<StubBackend>, config: &EmbedConfig) -> (NamedTempFile, ModelHandle<StubBackend>) {
        let file = NamedTempFile::new().unwrap();
        let handle = ModelHandle::create(backend, file.path(), config).unwrap();
        (file, handle)
    }

    #[test]
    fn test_embed_releases_batch_once_on_success() {
        let backend = Arc::new(StubBackend::new(64));
        let (_file, mut handle) = setup(backend.clone(), &EmbedConfig::default());

        let tokens = tokenize(&handle, "hello world").unwrap();
        let view = embed(&mut handle, &tokens).unwrap();
        assert_eq!(view.n_tokens(), 2);
        assert_eq!(view.as_slice().len(), 64);

        let counts = backend.counts();
        assert_eq!(counts.batches_created, 1);
        assert_eq!(counts.batches_released, 1);
        assert_eq!(counts.decodes, 1);
    }

    #[test]
    fn test_batch_is_single_sequence_without_logits() {
        let backend = Arc::new(StubBackend::new(8));
        let (_file, mut handle) = setup(backend, &EmbedConfig::default());
        let tokens = tokenize(&handle, "one two three four").unwrap();

        embed(&mut handle, &tokens).unwrap();
        // Second request must restart at position 0.
        embed(&mut handle, &tokens).unwrap();

        let (_, ctx) = handle.context_mut().unwrap();
        let decoded = ctx.last_decoded();
        assert_eq!(decoded.len(), 4);
        for (i, entry) in decoded.iter().enumerate() {
            assert_eq!(entry.token, tokens[i]);
            assert_eq!(entry.pos, i as Pos);
            assert_eq!(entry.seq_ids, vec![SEQ_ID]);
            assert!(!entry.logits, "token {} requested logits", i);
        }
    }

    #[test]
    fn test_forced_decode_failure_releases_batch_exactly_once() {
        let backend = Arc::new(StubBackend::new(64));
        let (_file, mut handle) = setup(backend.clone(), &EmbedConfig::default());
        let tokens = tokenize(&handle, "hello").unwrap();

        backend.fail_decode(true);
        match embed(&mut handle, &tokens) {
            Err(EmbedError::DecodeError { n_tokens, source }) => {
                assert_eq!(n_tokens, 1);
                assert_eq!(source, BackendError::Decode { code: 1 });
            }
            other => panic!("expected DecodeError, got {:?}", other),
        }

        let counts = backend.counts();
        assert_eq!(counts.batches_created, 1);
        assert_eq!(counts.batches_released, 1);
    }

    #[test]
    fn test_missing_buffer_is_embedding_unavailable() {
        let backend = Arc::new(StubBackend::new(64));
        let (_file, mut handle) = setup(backend.clone(), &EmbedConfig::default());
        let tokens = tokenize(&handle, "hello").unwrap();

        backend.withhold_embeddings(true);
        assert!(matches!(
            embed(&mut handle, &tokens),
            Err(EmbedError::EmbeddingUnavailable { .. })
        ));

        let counts = backend.counts();
        assert_eq!(counts.batches_created, 1);
        assert_eq!(counts.batches_released, 1);
    }

    #[test]
    fn test_oversized_batch_is_decode_error() {
        let backend = Arc::new(StubBackend::new(64));
        let mut config = EmbedConfig::default();
        config.context.n_batch = Some(2);
        let (_file, mut handle) = setup(backend.clone(), &config);

        let tokens = tokenize(&handle, "one two three").unwrap();
        assert!(matches!(
            embed(&mut handle, &tokens),
            Err(EmbedError::DecodeError { n_tokens: 3, .. })
        ));
        assert_eq!(backend.counts().live_batches(), 0);
    }

    #[test]
    fn test_empty_sequence_allocates_no_batch() {
        let backend = Arc::new(StubBackend::new(64));
        let (_file, mut handle) = setup(backend.clone(), &EmbedConfig::default());

        let empty = TokenSequence::default();
        assert!(matches!(embed(&mut handle, &empty), Err(EmbedError::EmptyInput)));
        assert_eq!(backend.counts().batches_created, 0);
    }

    #[test]
    fn test_repeated_requests_reset_sequence_state() {
        let backend = Arc::new(StubBackend::new(16));
        let (_file, mut handle) = setup(backend.clone(), &EmbedConfig::default());
        let tokens = tokenize(&handle, "same text twice").unwrap();

        let first = embed(&mut handle, &tokens).unwrap().to_vector().unwrap();
        let second = embed(&mut handle, &tokens).unwrap().to_vector().unwrap();

        let bits = |v: &EmbeddingVector| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first), bits(&second));
        assert_eq!(backend.counts().decodes, 2);
    }

    #[test]
    fn test_short_engine_buffer_is_invalid_dimension() {
        let backend = Arc::new(StubBackend::new(16));
        let (_file, mut handle) = setup(backend.clone(), &EmbedConfig::default());
        let tokens = tokenize(&handle, "hello").unwrap();

        backend.truncate_embeddings(true);
        let view = embed(&mut handle, &tokens).unwrap();
        assert!(matches!(
            view.to_vector(),
            Err(EmbedError::InvalidDimension {
                expected: 16,
                actual: 15
            })
        ));
    }
}
