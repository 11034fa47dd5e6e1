//! Configuration for model loading, context creation and tokenization.
//!
//! # Loading Configuration
//!
//! ```rust,ignore
//! use llama_embed::EmbedConfig;
//!
//! // Load from file
//! let config = EmbedConfig::from_file("llama-embed.toml")?;
//!
//! // Or use defaults, with environment overrides
//! let config = EmbedConfig::default().with_env_overrides();
//! ```
//!
//! # TOML Structure
//!
//! ```toml
//! [model]
//! n_gpu_layers = 0
//!
//! [context]
//! n_threads = 4
//! n_threads_batch = 4
//! n_ctx = 2048
//! n_batch = 2048
//! n_ubatch = 2048
//!
//! [tokenizer]
//! token_headroom = 16
//! add_special = false
//! ```
//!
//! Every section and field is optional. The defaults reproduce the fixed
//! setup of the pipeline: engine-default model parameters, embeddings
//! enabled, 4 threads, 16 tokens of headroom, no special markers.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::{ContextParams, ModelParams};
use crate::error::{EmbedError, EmbedResult};

// ============================================================================
// MODEL CONFIG
// ============================================================================

/// Model loading parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Layers to offload to the GPU. Omitted keeps the engine default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_gpu_layers: Option<u32>,
}

impl ModelConfig {
    /// Engine parameters for [`EmbeddingBackend::load_model`](crate::EmbeddingBackend::load_model).
    pub fn params(&self) -> ModelParams {
        ModelParams {
            n_gpu_layers: self.n_gpu_layers,
        }
    }
}

// ============================================================================
// CONTEXT CONFIG
// ============================================================================

/// Inference context parameters.
///
/// Embedding output is always enabled; it is not configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Threads for the engine's internal tensor work.
    pub n_threads: u32,

    /// Threads for batch processing.
    pub n_threads_batch: u32,

    /// Context window. Omitted uses the model's training context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_ctx: Option<u32>,

    /// Maximum tokens per decode call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_batch: Option<u32>,

    /// Physical micro-batch size. Embedding models need this to cover the
    /// whole input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_ubatch: Option<u32>,
}

/// Upper bound for either thread count.
pub const MAX_THREADS: u32 = 1024;

/// Upper bound for `tokenizer.token_headroom`.
pub const MAX_TOKEN_HEADROOM: usize = 4096;

fn default_n_threads() -> u32 {
    4
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            n_threads: default_n_threads(),
            n_threads_batch: default_n_threads(),
            n_ctx: None,
            n_batch: None,
            n_ubatch: None,
        }
    }
}

impl ContextConfig {
    /// Engine parameters for [`EmbeddingBackend::new_context`](crate::EmbeddingBackend::new_context).
    pub fn params(&self) -> ContextParams {
        ContextParams {
            embeddings: true,
            n_threads: self.n_threads,
            n_threads_batch: self.n_threads_batch,
            n_ctx: self.n_ctx,
            n_batch: self.n_batch,
            n_ubatch: self.n_ubatch,
        }
    }

    fn validate(&self) -> EmbedResult<()> {
        for (name, value) in [
            ("n_threads", self.n_threads),
            ("n_threads_batch", self.n_threads_batch),
        ] {
            if value == 0 || value > MAX_THREADS {
                return Err(EmbedError::config(format!(
                    "context.{} must be in 1..={}, got {}",
                    name, MAX_THREADS, value
                )));
            }
        }
        for (name, value) in [
            ("n_ctx", self.n_ctx),
            ("n_batch", self.n_batch),
            ("n_ubatch", self.n_ubatch),
        ] {
            if value == Some(0) {
                return Err(EmbedError::config(format!("context.{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

// ============================================================================
// TOKENIZER CONFIG
// ============================================================================

/// Tokenizer adapter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Extra token slots allocated above the text's byte length.
    pub token_headroom: usize,

    /// Prepend the model's beginning-of-sequence marker.
    pub add_special: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            token_headroom: 16,
            add_special: false,
        }
    }
}

// ============================================================================
// ROOT CONFIG
// ============================================================================

/// Root configuration for the embedding pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Model loading.
    pub model: ModelConfig,
    /// Context creation.
    pub context: ContextConfig,
    /// Tokenization.
    pub tokenizer: TokenizerConfig,
}

impl EmbedConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// - `EmbedError::ConfigError` if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> EmbedResult<Self> {
        let path = path.as_ref();

        let contents = std::fs::read_to_string(path).map_err(|e| {
            EmbedError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        toml::from_str(&contents).map_err(|e| {
            EmbedError::config(format!(
                "Failed to parse TOML in '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Create configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> EmbedResult<Self> {
        toml::from_str(toml).map_err(|e| EmbedError::config(format!("Failed to parse TOML: {}", e)))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml_string(&self) -> EmbedResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| EmbedError::config(format!("Failed to serialize to TOML: {}", e)))
    }

    /// Validate all configuration values.
    ///
    /// # Errors
    /// - `EmbedError::ConfigError` naming the first invalid field
    pub fn validate(&self) -> EmbedResult<()> {
        self.context.validate()?;
        let headroom = self.tokenizer.token_headroom;
        if headroom == 0 || headroom > MAX_TOKEN_HEADROOM {
            return Err(EmbedError::config(format!(
                "tokenizer.token_headroom must be in 1..={}, got {}",
                MAX_TOKEN_HEADROOM, headroom
            )));
        }
        Ok(())
    }

    /// Apply `LLAMA_EMBED_*` environment overrides.
    ///
    /// Values that fail to parse are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = env_parse::<u32>("LLAMA_EMBED_N_THREADS") {
            self.context.n_threads = n;
        }
        if let Some(n) = env_parse::<u32>("LLAMA_EMBED_N_THREADS_BATCH") {
            self.context.n_threads_batch = n;
        }
        if let Some(n) = env_parse::<u32>("LLAMA_EMBED_N_CTX") {
            self.context.n_ctx = Some(n);
        }
        if let Some(n) = env_parse::<u32>("LLAMA_EMBED_N_GPU_LAYERS") {
            self.model.n_gpu_layers = Some(n);
        }
        if let Some(n) = env_parse::<usize>("LLAMA_EMBED_TOKEN_HEADROOM") {
            self.tokenizer.token_headroom = n;
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse().ok())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_embed_config_default() {
        let config = EmbedConfig::default();
        assert_eq!(config.model.n_gpu_layers, None);
        assert_eq!(config.context.n_threads, 4);
        assert_eq!(config.context.n_threads_batch, 4);
        assert_eq!(config.tokenizer.token_headroom, 16);
        assert!(!config.tokenizer.add_special);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_context_params_always_enable_embeddings() {
        let params = ContextConfig::default().params();
        assert!(params.embeddings);
        assert_eq!(params.n_threads, 4);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EmbedConfig::from_toml_str(
            r#"
            [context]
            n_threads = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.context.n_threads, 8);
        assert_eq!(config.context.n_threads_batch, 4); // default
        assert_eq!(config.tokenizer.token_headroom, 16); // default
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = EmbedConfig::from_toml_str("[context\nn_threads = ").unwrap_err();
        assert!(matches!(err, EmbedError::ConfigError { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let mut config = EmbedConfig::default();
        config.context.n_threads = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("n_threads"));
    }

    #[test]
    fn test_validate_rejects_zero_optional_sizes() {
        let mut config = EmbedConfig::default();
        config.context.n_ubatch = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("n_ubatch"));
    }

    #[test]
    fn test_validate_rejects_zero_headroom() {
        let mut config = EmbedConfig::default();
        config.tokenizer.token_headroom = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_headroom() {
        let mut config = EmbedConfig::default();
        config.tokenizer.token_headroom = MAX_TOKEN_HEADROOM;
        assert!(config.validate().is_ok());

        for headroom in [MAX_TOKEN_HEADROOM + 1, usize::MAX] {
            config.tokenizer.token_headroom = headroom;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("token_headroom"));
        }
    }

    #[test]
    fn test_oversized_headroom_from_toml_is_rejected() {
        let config = EmbedConfig::from_toml_str("[tokenizer]\ntoken_headroom = 9223372036854775807").unwrap();
        assert!(matches!(config.validate(), Err(EmbedError::ConfigError { .. })));
    }

    #[test]
    fn test_validate_rejects_thread_counts_beyond_engine_range() {
        let mut config = EmbedConfig::default();
        config.context.n_threads_batch = u32::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("n_threads_batch"));

        config.context.n_threads_batch = MAX_THREADS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[model]\nn_gpu_layers = 99\n\n[tokenizer]\ntoken_headroom = 32\nadd_special = true"
        )
        .unwrap();

        let config = EmbedConfig::from_file(file.path()).unwrap();
        assert_eq!(config.model.n_gpu_layers, Some(99));
        assert_eq!(config.tokenizer.token_headroom, 32);
        assert!(config.tokenizer.add_special);
    }

    #[test]
    fn test_from_missing_file_is_config_error() {
        let err = EmbedConfig::from_file("/nonexistent/llama-embed.toml").unwrap_err();
        match err {
            EmbedError::ConfigError { message } => {
                assert!(message.contains("/nonexistent/llama-embed.toml"))
            }
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    #[test]
    fn test_toml_string_reparses_to_same_config() {
        let mut config = EmbedConfig::default();
        config.context.n_ctx = Some(512);
        config.model.n_gpu_layers = Some(10);

        let toml_str = config.to_toml_string().unwrap();
        assert_eq!(EmbedConfig::from_toml_str(&toml_str).unwrap(), config);
    }
}
