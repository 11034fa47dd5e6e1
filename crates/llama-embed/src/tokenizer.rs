//! Tokenizer adapter: text to a bounded token sequence.

use std::ops::Deref;

use tracing::{debug, warn};

use crate::backend::{EmbeddingBackend, Token};
use crate::error::{EmbedError, EmbedResult};
use crate::handle::ModelHandle;

/// Token identifiers for one text under one model's vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenSequence(Vec<Token>);

impl TokenSequence {
    /// Token identifiers in order.
    pub fn as_slice(&self) -> &[Token] {
        &self.0
    }

    /// Consume the sequence, returning the raw identifiers.
    pub fn into_inner(self) -> Vec<Token> {
        self.0
    }
}

impl Deref for TokenSequence {
    type Target = [Token];

    fn deref(&self) -> &[Token] {
        &self.0
    }
}

impl From<Vec<Token>> for TokenSequence {
    fn from(tokens: Vec<Token>) -> Self {
        Self(tokens)
    }
}

/// Working buffer size: one slot per text byte plus `headroom`.
fn token_capacity(text_bytes: usize, headroom: usize) -> EmbedResult<usize> {
    text_bytes.checked_add(headroom).ok_or_else(|| {
        EmbedError::invalid_argument(format!(
            "token buffer for {} bytes plus {} headroom overflows",
            text_bytes, headroom
        ))
    })
}

/// Tokenize `text` with the handle's model vocabulary.
///
/// The working buffer holds `text.len() + token_headroom` slots. No
/// beginning-of-sequence or special markers are added unless the handle was
/// configured with `tokenizer.add_special`.
///
/// # Errors
///
/// - `TokenizationError` if the engine reports a negative count (including a
///   buffer too small for the text)
/// - `EmptyInput` if the text produces zero tokens
/// - `InvalidArgument` if the token buffer size overflows
/// - `InvalidArgument` if the handle has been destroyed
pub fn tokenize<B: EmbeddingBackend>(handle: &ModelHandle<B>, text: &str) -> EmbedResult<TokenSequence> {
    let settings = handle.tokenizer_config();
    let (backend, model) = handle.model_ref()?;

    let mut tokens: Vec<Token> = vec![0; token_capacity(text.len(), settings.token_headroom)?];
    let n_tokens = backend
        .tokenize_into(model, text, &mut tokens, settings.add_special)
        .map_err(|source| {
            warn!(text_bytes = text.len(), error = %source, "Tokenization failed");
            EmbedError::TokenizationError {
                text_bytes: text.len(),
                source,
            }
        })?;
    tokens.truncate(n_tokens);

    debug!(text_bytes = text.len(), n_tokens, "Tokenized text");

    if tokens.is_empty() {
        return Err(EmbedError::EmptyInput);
    }
    Ok(TokenSequence(tokens))
}
