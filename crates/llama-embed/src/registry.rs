//! Handle registry: the `createModel` / `getEmbedding` / `destroyModel`
//! surface over opaque handle identifiers.
//!
//! # Concurrency
//!
//! - The id map sits behind a `RwLock`; lookups take the read lock only long
//!   enough to clone the handle's `Arc`.
//! - Each handle has its own `Mutex`, so requests on different handles run in
//!   parallel while requests on one handle are serialized.
//! - Destroy removes the id first, then waits for any in-flight request on
//!   that handle before releasing the engine resources.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::EmbeddingBackend;
use crate::config::EmbedConfig;
use crate::error::{EmbedError, EmbedResult};
use crate::extract::EmbeddingVector;
use crate::handle::ModelHandle;

/// Opaque identifier for a model created through a [`ModelRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(Uuid);

impl HandleId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for HandleId {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| EmbedError::invalid_argument(format!("invalid handle id '{}': {}", s, e)))
    }
}

type SharedHandle<B> = Arc<Mutex<ModelHandle<B>>>;

/// Owns every live [`ModelHandle`] created through it.
pub struct ModelRegistry<B: EmbeddingBackend> {
    backend: Arc<B>,
    config: EmbedConfig,
    handles: RwLock<HashMap<HandleId, SharedHandle<B>>>,
}

impl<B: EmbeddingBackend> ModelRegistry<B> {
    /// Build a registry that creates every handle with `config`.
    ///
    /// # Errors
    ///
    /// - `ConfigError` if `config` fails validation
    pub fn new(backend: Arc<B>, config: EmbedConfig) -> EmbedResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            handles: RwLock::new(HashMap::new()),
        })
    }

    /// Load a model and return its handle id.
    ///
    /// On failure nothing is registered and nothing stays allocated.
    pub fn create_model(&self, path: impl AsRef<Path>) -> EmbedResult<HandleId> {
        let handle = ModelHandle::create(self.backend.clone(), path, &self.config)?;
        let id = HandleId::new();
        self.handles.write().insert(id, Arc::new(Mutex::new(handle)));
        debug!(handle_id = %id, "Registered model handle");
        Ok(id)
    }

    /// Compute the embedding for `text` on the model behind `id`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `id` is unknown or already destroyed
    /// - any pipeline error from tokenization, decode or extraction
    pub fn get_embedding(&self, id: HandleId, text: &str) -> EmbedResult<EmbeddingVector> {
        let handle = self.lookup(id)?;
        let mut guard = handle.lock();
        guard.get_embedding(text)
    }

    /// Embedding dimensionality of the model behind `id`.
    pub fn n_embd(&self, id: HandleId) -> EmbedResult<usize> {
        Ok(self.lookup(id)?.lock().n_embd())
    }

    /// Release the model behind `id`. Unknown ids are ignored.
    pub fn destroy_model(&self, id: HandleId) {
        let removed = self.handles.write().remove(&id);
        match removed {
            Some(handle) => {
                handle.lock().destroy();
                info!(handle_id = %id, "Destroyed model handle");
            }
            None => debug!(handle_id = %id, "Destroy on unknown handle ignored"),
        }
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    fn lookup(&self, id: HandleId) -> EmbedResult<SharedHandle<B>> {
        self.handles
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| EmbedError::invalid_argument(format!("unknown model handle {}", id)))
    }
}

impl<B: EmbeddingBackend> fmt::Debug for ModelRegistry<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("handles", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::StubBackend;
    use std::thread;
    use tempfile::NamedTempFile;

    fn registry(n_embd: i32) -> (Arc<StubBackend>, ModelRegistry<StubBackend>) {
        let backend = Arc::new(StubBackend::new(n_embd));
        let registry = ModelRegistry::new(backend.clone(), EmbedConfig::default()).unwrap();
        (backend, registry)
    }

    #[test]
    fn test_hello_on_768_dim_model() {
        let file = NamedTempFile::new().unwrap();
        let (_backend, registry) = registry(768);

        let id = registry.create_model(file.path()).unwrap();
        assert_eq!(registry.n_embd(id).unwrap(), 768);

        let vector = registry.get_embedding(id, "hello").unwrap();
        assert_eq!(vector.len(), 768);
        assert!(vector.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_same_text_twice_is_bit_identical() {
        let file = NamedTempFile::new().unwrap();
        let (_backend, registry) = registry(64);
        let id = registry.create_model(file.path()).unwrap();

        let a = registry.get_embedding(id, "the cat sat on the mat").unwrap();
        let b = registry.get_embedding(id, "the cat sat on the mat").unwrap();
        let bits = |v: &EmbeddingVector| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn test_nonexistent_path_registers_nothing() {
        let (backend, registry) = registry(768);

        let err = registry.create_model("/nonexistent/model.gguf").unwrap_err();
        assert!(matches!(err, EmbedError::ModelLoadError { .. }));
        assert!(registry.is_empty());
        assert_eq!(backend.counts().models_loaded, 0);
    }

    #[test]
    fn test_engine_load_failure_registers_nothing() {
        let file = NamedTempFile::new().unwrap();
        let (backend, registry) = registry(32);
        backend.fail_load(true);

        let err = registry.create_model(file.path()).unwrap_err();
        assert!(err.is_load_failure());
        assert!(registry.is_empty());
        assert_eq!(backend.counts().models_loaded, 0);
        assert_eq!(backend.counts().contexts_created, 0);

        backend.fail_load(false);
        assert!(registry.create_model(file.path()).is_ok());
    }

    #[test]
    fn test_empty_text_is_empty_input() {
        let file = NamedTempFile::new().unwrap();
        let (_backend, registry) = registry(32);
        let id = registry.create_model(file.path()).unwrap();

        assert!(matches!(registry.get_embedding(id, ""), Err(EmbedError::EmptyInput)));
    }

    #[test]
    fn test_destroy_releases_and_second_destroy_is_noop() {
        let file = NamedTempFile::new().unwrap();
        let (backend, registry) = registry(32);
        let id = registry.create_model(file.path()).unwrap();

        registry.destroy_model(id);
        registry.destroy_model(id);

        let counts = backend.counts();
        assert_eq!(counts.models_released, 1);
        assert_eq!(counts.contexts_released, 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_embedding_after_destroy_is_invalid_argument() {
        let file = NamedTempFile::new().unwrap();
        let (_backend, registry) = registry(32);
        let id = registry.create_model(file.path()).unwrap();
        registry.destroy_model(id);

        assert!(matches!(
            registry.get_embedding(id, "hello"),
            Err(EmbedError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_handles_are_independent() {
        let file_a = NamedTempFile::new().unwrap();
        let file_b = NamedTempFile::new().unwrap();
        let (backend, registry) = registry(16);

        let a = registry.create_model(file_a.path()).unwrap();
        let b = registry.create_model(file_b.path()).unwrap();
        assert_ne!(a, b);

        registry.destroy_model(a);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_embedding(b, "still alive").unwrap().len(), 16);
        assert_eq!(backend.counts().live_models(), 1);
    }

    #[test]
    fn test_concurrent_requests_across_handles() {
        let files: Vec<NamedTempFile> = (0..4).map(|_| NamedTempFile::new().unwrap()).collect();
        let (backend, registry) = registry(32);
        let registry = Arc::new(registry);

        let ids: Vec<HandleId> = files
            .iter()
            .map(|f| registry.create_model(f.path()).unwrap())
            .collect();
        let expected = registry.get_embedding(ids[0], "shared text").unwrap();

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                let id = ids[i % ids.len()];
                thread::spawn(move || {
                    (0..10)
                        .map(|_| registry.get_embedding(id, "shared text").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for worker in workers {
            for vector in worker.join().unwrap() {
                assert_eq!(vector, expected);
            }
        }
        assert_eq!(backend.counts().live_batches(), 0);
    }

    #[test]
    fn test_handle_id_parse() {
        let id = HandleId::new();
        let parsed: HandleId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(matches!(
            "not-a-uuid".parse::<HandleId>(),
            Err(EmbedError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EmbedConfig::default();
        config.context.n_threads = 0;
        let err = ModelRegistry::new(Arc::new(StubBackend::new(8)), config).unwrap_err();
        assert!(matches!(err, EmbedError::ConfigError { .. }));
    }
}
