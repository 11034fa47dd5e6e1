//! Embedding extractor: copy the engine buffer into a caller-owned vector.
//!
//! The copy is required. The source buffer belongs to the inference context
//! and is overwritten by the next decode, so an [`EmbeddingVector`] never
//! aliases it.

use std::ops::Deref;

use serde::Serialize;

use crate::error::{EmbedError, EmbedResult};

/// Fixed-length embedding, independent of any engine buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    /// Number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    /// Values in order.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Consume the vector, returning the values.
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl Deref for EmbeddingVector {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

impl From<EmbeddingVector> for Vec<f32> {
    fn from(vector: EmbeddingVector) -> Self {
        vector.0
    }
}

/// Copy the first `n_embd` values of `buffer`.
///
/// Values are copied verbatim: no normalization, and NaN or infinite values
/// pass through untouched.
///
/// # Errors
///
/// - `InvalidDimension` if `buffer` holds fewer than `n_embd` values
pub fn extract(buffer: &[f32], n_embd: usize) -> EmbedResult<EmbeddingVector> {
    let values = buffer.get(..n_embd).ok_or(EmbedError::InvalidDimension {
        expected: n_embd,
        actual: buffer.len(),
    })?;
    Ok(EmbeddingVector(values.to_vec()))
}
