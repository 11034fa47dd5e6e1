//! Model handle: a loaded model paired with its inference context.
//!
//! The model and context are created together by [`ModelHandle::create`] and
//! released together by [`ModelHandle::destroy`] (or on drop). A handle never
//! holds one without the other.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::backend::{BackendError, EmbeddingBackend};
use crate::config::{EmbedConfig, TokenizerConfig};
use crate::error::{EmbedError, EmbedResult};
use crate::extract::EmbeddingVector;
use crate::pipeline::embed;
use crate::tokenizer::tokenize;

/// Owns one loaded model and its embedding-enabled context.
///
/// `n_embd` is fixed at creation. The handle is not `Clone`: ownership of the
/// engine resources cannot be duplicated. A handle must not be decoded from
/// two threads at once; every inference method takes `&mut self`.
pub struct ModelHandle<B: EmbeddingBackend> {
    backend: Arc<B>,
    // Declared before `model` so it is released first.
    context: Option<B::Context>,
    model: Option<B::Model>,
    n_embd: usize,
    path: PathBuf,
    tokenizer: TokenizerConfig,
}

impl<B: EmbeddingBackend> ModelHandle<B> {
    /// Load the model at `path` and build an embedding context for it.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `path` is empty
    /// - `ConfigError` if `config` fails validation (nothing is loaded)
    /// - `ModelLoadError` if the engine rejects the file, or the model reports
    ///   a non-positive embedding dimension (model and context are released)
    /// - `ContextCreationError` if the context cannot be built (the model is
    ///   released before returning)
    pub fn create(backend: Arc<B>, path: impl AsRef<Path>, config: &EmbedConfig) -> EmbedResult<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(EmbedError::invalid_argument("model path must not be empty"));
        }
        config.validate()?;

        info!(
            model_path = %path.display(),
            n_threads = config.context.n_threads,
            "Loading embedding model"
        );

        let model = backend
            .load_model(path, &config.model.params())
            .map_err(|source| {
                error!(model_path = %path.display(), error = %source, "Model load failed");
                EmbedError::ModelLoadError {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        let context = match backend.new_context(&model, &config.context.params()) {
            Ok(context) => context,
            Err(source) => {
                error!(model_path = %path.display(), error = %source, "Context creation failed");
                drop(model);
                return Err(EmbedError::ContextCreationError {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let n_embd = backend.n_embd(&model);
        if n_embd <= 0 {
            error!(model_path = %path.display(), n_embd, "Model reports no embedding dimension");
            drop(context);
            drop(model);
            return Err(EmbedError::ModelLoadError {
                path: path.to_path_buf(),
                source: BackendError::ModelLoad {
                    message: format!("model reports embedding dimension {}", n_embd),
                },
            });
        }

        info!(model_path = %path.display(), n_embd, "Embedding model ready");

        Ok(Self {
            backend,
            context: Some(context),
            model: Some(model),
            n_embd: n_embd as usize,
            path: path.to_path_buf(),
            tokenizer: config.tokenizer.clone(),
        })
    }

    /// Release the context, then the model.
    ///
    /// Calling this again is a no-op. Inference on a destroyed handle fails
    /// with `InvalidArgument`.
    pub fn destroy(&mut self) {
        let had_context = self.context.take().is_some();
        let had_model = self.model.take().is_some();

        if had_context || had_model {
            info!(model_path = %self.path.display(), "Embedding model released");
        } else {
            debug!(model_path = %self.path.display(), "Handle already released");
        }
    }

    /// Whether the model and context are still held.
    pub fn is_live(&self) -> bool {
        self.model.is_some() && self.context.is_some()
    }

    /// Embedding dimensionality of the model.
    pub fn n_embd(&self) -> usize {
        self.n_embd
    }

    /// Path the model was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tokenizer settings captured at creation.
    pub fn tokenizer_config(&self) -> &TokenizerConfig {
        &self.tokenizer
    }

    /// Tokenize, decode and copy out the embedding for `text`.
    pub fn get_embedding(&mut self, text: &str) -> EmbedResult<EmbeddingVector> {
        let tokens = tokenize(self, text)?;
        let view = embed(self, &tokens)?;
        view.to_vector()
    }

    pub(crate) fn model_ref(&self) -> EmbedResult<(&B, &B::Model)> {
        match &self.model {
            Some(model) => Ok((self.backend.as_ref(), model)),
            None => Err(released(&self.path)),
        }
    }

    pub(crate) fn context_mut(&mut self) -> EmbedResult<(&B, &mut B::Context)> {
        match &mut self.context {
            Some(context) => Ok((self.backend.as_ref(), context)),
            None => Err(released(&self.path)),
        }
    }
}

fn released(path: &Path) -> EmbedError {
    EmbedError::invalid_argument(format!(
        "model handle for {} has been destroyed",
        path.display()
    ))
}

impl<B: EmbeddingBackend> Drop for ModelHandle<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<B: EmbeddingBackend> fmt::Debug for ModelHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("path", &self.path)
            .field("n_embd", &self.n_embd)
            .field("live", &self.is_live())
            .finish()
    }
}
