//! Text embeddings from GGUF models via llama.cpp.
//!
//! A model file is loaded once into a [`ModelHandle`] together with an
//! embedding-enabled inference context. Each request tokenizes the text,
//! decodes it as a single sequence, and copies the model's `n_embd` pooled
//! values into an owned [`EmbeddingVector`].
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    EMBEDDING PIPELINE                       │
//! ├────────────────────────────────────────────────────────────┤
//! │  text → tokenize → batch (seq 0) → decode → extract (copy)  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Backend**: [`EmbeddingBackend`] seam; `LlamaCppBackend` drives
//!   llama-cpp-2 behind the `llama` feature
//! - **Handle**: model + context lifecycle, released together
//! - **Tokenizer**: `text.len() + headroom` token buffer
//! - **Pipeline**: batch build, decode, borrowed embedding view
//! - **Extract**: fixed-length copy out of the engine buffer
//! - **Registry**: `create_model` / `get_embedding` / `destroy_model` over
//!   opaque [`HandleId`]s
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use llama_embed::{EmbedConfig, LlamaCppBackend, ModelRegistry};
//!
//! let backend = Arc::new(LlamaCppBackend::init()?);
//! let registry = ModelRegistry::new(backend, EmbedConfig::default())?;
//!
//! let id = registry.create_model("models/nomic-embed-text.gguf")?;
//! let vector = registry.get_embedding(id, "hello")?;
//! println!("{} dimensions", vector.len());
//! registry.destroy_model(id);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod handle;
pub mod pipeline;
pub mod registry;
#[cfg(any(test, feature = "test-utils"))]
pub mod stubs;
pub mod tokenizer;

#[cfg(feature = "llama")]
pub use backend::LlamaCppBackend;
pub use backend::{BackendError, ContextParams, EmbeddingBackend, ModelParams, Token};
pub use config::{ContextConfig, EmbedConfig, ModelConfig, TokenizerConfig};
pub use error::{EmbedError, EmbedResult};
pub use extract::{extract, EmbeddingVector};
pub use handle::ModelHandle;
pub use pipeline::{embed, EmbeddingView};
pub use registry::{HandleId, ModelRegistry};
pub use tokenizer::{tokenize, TokenSequence};
