//! llama.cpp backend via `llama-cpp-2`.
//!
//! Loads GGUF models and runs embedding decodes on the CPU (or GPU when
//! `n_gpu_layers` is set). The llama.cpp backend may only be initialized once
//! per process, so a single [`LlamaCppBackend`] is meant to be shared behind an
//! `Arc` by every handle.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::DecodeError;
use tracing::{debug, info, warn};

use super::{BackendError, ContextParams, EmbeddingBackend, ModelParams, Pos, SeqId, Token};
use crate::error::{EmbedError, EmbedResult};

/// Inference context paired with the model it borrows from.
///
/// `ctx` is declared before `model` so it is dropped first; the model's heap
/// allocation is kept alive by the `Arc` for as long as the context exists.
pub struct LlamaSession {
    ctx: LlamaContext<'static>,
    _model: Arc<LlamaModel>,
    /// Tokens in the last successful decode; 0 after a reset.
    n_decoded: i32,
}

// Safety: a session is only ever used through `&mut` (decode) or while the
// owning handle's lock is held, so the raw context is never touched from two
// threads at once.
unsafe impl Send for LlamaSession {}

/// llama.cpp engine backend.
///
/// Embeddings are read from the pooled sequence-0 output. For models whose
/// GGUF pooling type is NONE there is no pooled output, and the last token's
/// embedding is returned instead.
pub struct LlamaCppBackend {
    backend: LlamaBackend,
}

impl LlamaCppBackend {
    /// Initialize the llama.cpp backend.
    ///
    /// Fails if the backend was already initialized in this process.
    pub fn init() -> EmbedResult<Self> {
        let backend = LlamaBackend::init().map_err(|e| EmbedError::BackendInit {
            source: BackendError::Init {
                message: e.to_string(),
            },
        })?;
        info!("llama.cpp backend initialized");
        Ok(Self { backend })
    }
}

impl std::fmt::Debug for LlamaCppBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaCppBackend").finish_non_exhaustive()
    }
}

fn thread_count(name: &str, n: u32) -> Result<i32, BackendError> {
    i32::try_from(n).map_err(|_| BackendError::ContextCreate {
        message: format!("{} {} exceeds engine range", name, n),
    })
}

fn decode_code(e: &DecodeError) -> i32 {
    match e {
        DecodeError::NoKvCacheSlot => 1,
        DecodeError::NTokensZero => -1,
        DecodeError::Unknown(code) => *code,
    }
}

impl EmbeddingBackend for LlamaCppBackend {
    type Model = Arc<LlamaModel>;
    type Context = LlamaSession;
    type Batch = LlamaBatch;

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model, BackendError> {
        let mut model_params = LlamaModelParams::default();
        if let Some(n_gpu_layers) = params.n_gpu_layers {
            model_params = model_params.with_n_gpu_layers(n_gpu_layers);
        }

        let model = LlamaModel::load_from_file(&self.backend, path, &model_params).map_err(|e| {
            BackendError::ModelLoad {
                message: e.to_string(),
            }
        })?;

        info!(
            n_vocab = model.n_vocab(),
            n_embd = model.n_embd(),
            n_params = model.n_params(),
            "GGUF model loaded"
        );
        Ok(Arc::new(model))
    }

    fn new_context(
        &self,
        model: &Self::Model,
        params: &ContextParams,
    ) -> Result<Self::Context, BackendError> {
        let mut ctx_params = LlamaContextParams::default()
            .with_embeddings(params.embeddings)
            .with_n_threads(thread_count("n_threads", params.n_threads)?)
            .with_n_threads_batch(thread_count("n_threads_batch", params.n_threads_batch)?)
            .with_n_ctx(params.n_ctx.and_then(NonZeroU32::new));
        if let Some(n_batch) = params.n_batch {
            ctx_params = ctx_params.with_n_batch(n_batch);
        }
        if let Some(n_ubatch) = params.n_ubatch {
            ctx_params = ctx_params.with_n_ubatch(n_ubatch);
        }

        let model = Arc::clone(model);
        let ctx = model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| BackendError::ContextCreate {
                message: e.to_string(),
            })?;

        // Safety: the context borrows the model behind `model`'s Arc. The Arc
        // is stored alongside it in `LlamaSession` and outlives the context
        // because fields drop in declaration order.
        let ctx = unsafe { std::mem::transmute::<LlamaContext<'_>, LlamaContext<'static>>(ctx) };

        Ok(LlamaSession {
            ctx,
            _model: model,
            n_decoded: 0,
        })
    }

    fn n_embd(&self, model: &Self::Model) -> i32 {
        model.n_embd()
    }

    fn tokenize_into(
        &self,
        model: &Self::Model,
        text: &str,
        tokens: &mut [Token],
        add_special: bool,
    ) -> Result<usize, BackendError> {
        let add_bos = if add_special {
            AddBos::Always
        } else {
            AddBos::Never
        };

        let found = model.str_to_token(text, add_bos).map_err(|e| {
            warn!(error = %e, "llama.cpp tokenizer failed");
            BackendError::Tokenize { code: -1 }
        })?;

        if found.len() > tokens.len() {
            return Err(BackendError::Tokenize {
                code: -(found.len() as i32),
            });
        }

        for (slot, token) in tokens.iter_mut().zip(&found) {
            *slot = token.0;
        }
        Ok(found.len())
    }

    fn new_batch(&self, n_tokens: usize, n_seq_max: usize) -> Self::Batch {
        LlamaBatch::new(n_tokens, n_seq_max as i32)
    }

    fn batch_add(
        &self,
        batch: &mut Self::Batch,
        token: Token,
        pos: Pos,
        seq_ids: &[SeqId],
        logits: bool,
    ) -> Result<(), BackendError> {
        batch
            .add(LlamaToken::new(token), pos, seq_ids, logits)
            .map_err(|e| BackendError::BatchAdd {
                message: e.to_string(),
            })
    }

    fn reset_context(&self, ctx: &mut Self::Context) {
        ctx.ctx.clear_kv_cache();
        ctx.n_decoded = 0;
    }

    fn decode(&self, ctx: &mut Self::Context, batch: &mut Self::Batch) -> Result<(), BackendError> {
        ctx.ctx.decode(batch).map_err(|e| {
            debug!(error = %e, "llama_decode failed");
            BackendError::Decode {
                code: decode_code(&e),
            }
        })?;
        ctx.n_decoded = batch.n_tokens();
        Ok(())
    }

    fn embeddings<'c>(&self, ctx: &'c Self::Context) -> Option<&'c [f32]> {
        match ctx.ctx.embeddings_seq_ith(0) {
            Ok(values) => Some(values),
            Err(e) if ctx.n_decoded > 0 => {
                debug!(error = %e, "no pooled embedding, reading last token");
                ctx.ctx.embeddings_ith(ctx.n_decoded - 1).ok()
            }
            Err(e) => {
                debug!(error = %e, "no embedding for sequence 0");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_count_rejects_values_beyond_i32() {
        assert_eq!(thread_count("n_threads", 8).unwrap(), 8);
        assert!(matches!(
            thread_count("n_threads", u32::MAX),
            Err(BackendError::ContextCreate { .. })
        ));
    }
}
