//! Deterministic stub engine.
//!
//! Behaves like a small embedding model:
//!
//! 1. Tokenizes by whitespace, hashing each word into a 32k vocabulary
//! 2. Requires batch positions to continue from the context's sequence state
//! 3. Mean-pools per-token pseudo-random vectors (seeded LCG) into the
//!    context's embedding buffer
//!
//! Every model, context and batch bumps an allocation counter when created and
//! a release counter when dropped, so tests can assert that nothing leaks and
//! nothing is released twice.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::{
    BackendError, ContextParams, EmbeddingBackend, ModelParams, Pos, SeqId, Token,
};

const STUB_VOCAB_SIZE: u64 = 32_000;

#[derive(Debug, Default)]
struct Counters {
    models_loaded: AtomicUsize,
    models_released: AtomicUsize,
    contexts_created: AtomicUsize,
    contexts_released: AtomicUsize,
    batches_created: AtomicUsize,
    batches_released: AtomicUsize,
    decodes: AtomicUsize,
}

/// Point-in-time copy of the stub's resource counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StubCounts {
    pub models_loaded: usize,
    pub models_released: usize,
    pub contexts_created: usize,
    pub contexts_released: usize,
    pub batches_created: usize,
    pub batches_released: usize,
    pub decodes: usize,
}

impl StubCounts {
    /// Models loaded and not yet released.
    pub fn live_models(&self) -> usize {
        self.models_loaded - self.models_released
    }

    /// Contexts created and not yet released.
    pub fn live_contexts(&self) -> usize {
        self.contexts_created - self.contexts_released
    }

    /// Batches allocated and not yet released.
    pub fn live_batches(&self) -> usize {
        self.batches_created - self.batches_released
    }
}

#[derive(Debug, Default)]
struct Faults {
    load: AtomicBool,
    context: AtomicBool,
    tokenize: AtomicBool,
    decode: AtomicBool,
    withhold_embeddings: AtomicBool,
    truncate_embeddings: AtomicBool,
}

/// Loaded stub model.
#[derive(Debug)]
pub struct StubModel {
    path: PathBuf,
    n_embd: i32,
    counters: Arc<Counters>,
}

impl StubModel {
    /// Path the model was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StubModel {
    fn drop(&mut self) {
        self.counters.models_released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stub inference context.
#[derive(Debug)]
pub struct StubContext {
    params: ContextParams,
    n_embd: usize,
    /// Tokens already decoded into sequence 0.
    n_past: usize,
    embeddings: Option<Vec<f32>>,
    last_decoded: Vec<DecodedToken>,
    counters: Arc<Counters>,
}

impl StubContext {
    /// Parameters the context was created with.
    pub fn params(&self) -> &ContextParams {
        &self.params
    }

    /// Tokens held in the sequence state.
    pub fn n_past(&self) -> usize {
        self.n_past
    }

    /// Entries of the most recent successful decode, in batch order.
    pub fn last_decoded(&self) -> &[DecodedToken] {
        &self.last_decoded
    }
}

impl Drop for StubContext {
    fn drop(&mut self) {
        self.counters.contexts_released.fetch_add(1, Ordering::SeqCst);
    }
}

/// One token as it was appended to a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub token: Token,
    pub pos: Pos,
    pub seq_ids: Vec<SeqId>,
    pub logits: bool,
}

/// Stub decode batch.
#[derive(Debug)]
pub struct StubBatch {
    capacity: usize,
    n_seq_max: usize,
    entries: Vec<DecodedToken>,
    counters: Arc<Counters>,
}

impl StubBatch {
    /// Number of tokens in the batch.
    pub fn n_tokens(&self) -> usize {
        self.entries.len()
    }
}

impl Drop for StubBatch {
    fn drop(&mut self) {
        self.counters.batches_released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Deterministic stub engine for tests.
///
/// # Example
///
/// ```rust,ignore
/// use llama_embed::stubs::StubBackend;
///
/// let backend = StubBackend::new(768);
/// assert_eq!(backend.counts().live_models(), 0);
/// ```
#[derive(Debug)]
pub struct StubBackend {
    n_embd: i32,
    tokens_per_word: usize,
    counters: Arc<Counters>,
    faults: Faults,
}

impl StubBackend {
    /// Create a stub whose models report `n_embd` dimensions.
    pub fn new(n_embd: i32) -> Self {
        Self {
            n_embd,
            tokens_per_word: 1,
            counters: Arc::new(Counters::default()),
            faults: Faults::default(),
        }
    }

    /// Emit `n` tokens per whitespace-separated word.
    pub fn with_tokens_per_word(mut self, n: usize) -> Self {
        self.tokens_per_word = n;
        self
    }

    /// Make `load_model` fail.
    pub fn fail_load(&self, fail: bool) {
        self.faults.load.store(fail, Ordering::SeqCst);
    }

    /// Make `new_context` fail.
    pub fn fail_context(&self, fail: bool) {
        self.faults.context.store(fail, Ordering::SeqCst);
    }

    /// Make `tokenize_into` fail.
    pub fn fail_tokenize(&self, fail: bool) {
        self.faults.tokenize.store(fail, Ordering::SeqCst);
    }

    /// Make `decode` fail with status 1.
    pub fn fail_decode(&self, fail: bool) {
        self.faults.decode.store(fail, Ordering::SeqCst);
    }

    /// Let decode succeed without producing an embedding buffer.
    pub fn withhold_embeddings(&self, withhold: bool) {
        self.faults.withhold_embeddings.store(withhold, Ordering::SeqCst);
    }

    /// Expose one value fewer than `n_embd` after decode.
    pub fn truncate_embeddings(&self, truncate: bool) {
        self.faults.truncate_embeddings.store(truncate, Ordering::SeqCst);
    }

    /// Snapshot of the resource counters.
    pub fn counts(&self) -> StubCounts {
        let c = &self.counters;
        StubCounts {
            models_loaded: c.models_loaded.load(Ordering::SeqCst),
            models_released: c.models_released.load(Ordering::SeqCst),
            contexts_created: c.contexts_created.load(Ordering::SeqCst),
            contexts_released: c.contexts_released.load(Ordering::SeqCst),
            batches_created: c.batches_created.load(Ordering::SeqCst),
            batches_released: c.batches_released.load(Ordering::SeqCst),
            decodes: c.decodes.load(Ordering::SeqCst),
        }
    }

    fn word_token(word: &str, index: usize) -> Token {
        // FNV-1a over the word bytes, salted with the sub-token index.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.bytes().chain((index as u64).to_le_bytes()) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % STUB_VOCAB_SIZE) as Token
    }

    fn token_vector(token: Token, pos: Pos, n_embd: usize, out: &mut [f32]) {
        // LCG with Knuth MMIX parameters, seeded from token and position.
        let mut seed = (token as u64) ^ ((pos as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        for slot in out.iter_mut().take(n_embd) {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot += ((seed as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32;
        }
    }
}

impl EmbeddingBackend for StubBackend {
    type Model = StubModel;
    type Context = StubContext;
    type Batch = StubBatch;

    fn load_model(&self, path: &Path, _params: &ModelParams) -> Result<Self::Model, BackendError> {
        if self.faults.load.load(Ordering::SeqCst) {
            return Err(BackendError::ModelLoad {
                message: "injected load failure".to_string(),
            });
        }
        if !path.is_file() {
            return Err(BackendError::ModelLoad {
                message: format!("failed to open {}", path.display()),
            });
        }

        self.counters.models_loaded.fetch_add(1, Ordering::SeqCst);
        Ok(StubModel {
            path: path.to_path_buf(),
            n_embd: self.n_embd,
            counters: Arc::clone(&self.counters),
        })
    }

    fn new_context(
        &self,
        model: &Self::Model,
        params: &ContextParams,
    ) -> Result<Self::Context, BackendError> {
        if self.faults.context.load(Ordering::SeqCst) {
            return Err(BackendError::ContextCreate {
                message: "injected context failure".to_string(),
            });
        }

        self.counters.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(StubContext {
            params: params.clone(),
            n_embd: model.n_embd.max(0) as usize,
            n_past: 0,
            embeddings: None,
            last_decoded: Vec::new(),
            counters: Arc::clone(&self.counters),
        })
    }

    fn n_embd(&self, model: &Self::Model) -> i32 {
        model.n_embd
    }

    fn tokenize_into(
        &self,
        _model: &Self::Model,
        text: &str,
        tokens: &mut [Token],
        add_special: bool,
    ) -> Result<usize, BackendError> {
        if self.faults.tokenize.load(Ordering::SeqCst) {
            return Err(BackendError::Tokenize { code: -1 });
        }

        let mut found: Vec<Token> = Vec::new();
        if add_special {
            found.push(1); // BOS
        }
        for word in text.split_whitespace() {
            for i in 0..self.tokens_per_word {
                found.push(Self::word_token(word, i));
            }
        }

        if found.len() > tokens.len() {
            return Err(BackendError::Tokenize {
                code: -(found.len() as i32),
            });
        }
        tokens[..found.len()].copy_from_slice(&found);
        Ok(found.len())
    }

    fn new_batch(&self, n_tokens: usize, n_seq_max: usize) -> Self::Batch {
        self.counters.batches_created.fetch_add(1, Ordering::SeqCst);
        StubBatch {
            capacity: n_tokens,
            n_seq_max,
            entries: Vec::with_capacity(n_tokens),
            counters: Arc::clone(&self.counters),
        }
    }

    fn batch_add(
        &self,
        batch: &mut Self::Batch,
        token: Token,
        pos: Pos,
        seq_ids: &[SeqId],
        logits: bool,
    ) -> Result<(), BackendError> {
        if batch.entries.len() >= batch.capacity {
            return Err(BackendError::BatchAdd {
                message: format!("batch full ({} tokens)", batch.capacity),
            });
        }
        if seq_ids
            .iter()
            .any(|&id| id < 0 || id as usize >= batch.n_seq_max)
        {
            return Err(BackendError::BatchAdd {
                message: format!("sequence id out of range 0..{}", batch.n_seq_max),
            });
        }

        batch.entries.push(DecodedToken {
            token,
            pos,
            seq_ids: seq_ids.to_vec(),
            logits,
        });
        Ok(())
    }

    fn reset_context(&self, ctx: &mut Self::Context) {
        ctx.n_past = 0;
        ctx.embeddings = None;
    }

    fn decode(&self, ctx: &mut Self::Context, batch: &mut Self::Batch) -> Result<(), BackendError> {
        self.counters.decodes.fetch_add(1, Ordering::SeqCst);

        if self.faults.decode.load(Ordering::SeqCst) {
            return Err(BackendError::Decode { code: 1 });
        }
        if batch.entries.is_empty() {
            return Err(BackendError::Decode { code: -1 });
        }
        if let Some(n_batch) = ctx.params.n_batch {
            if batch.entries.len() > n_batch as usize {
                return Err(BackendError::Decode { code: -1 });
            }
        }
        let positions_continue = batch
            .entries
            .iter()
            .enumerate()
            .all(|(i, e)| e.pos as usize == ctx.n_past + i);
        if !positions_continue {
            return Err(BackendError::Decode { code: -1 });
        }

        ctx.n_past += batch.entries.len();
        ctx.last_decoded = batch.entries.clone();

        if !ctx.params.embeddings || self.faults.withhold_embeddings.load(Ordering::SeqCst) {
            ctx.embeddings = None;
            return Ok(());
        }

        let n_embd = ctx.n_embd;
        let mut pooled = vec![0.0f32; n_embd];
        let mut n_seq0 = 0usize;
        for entry in batch.entries.iter().filter(|e| e.seq_ids.contains(&0)) {
            Self::token_vector(entry.token, entry.pos, n_embd, &mut pooled);
            n_seq0 += 1;
        }
        if n_seq0 > 0 {
            for v in &mut pooled {
                *v /= n_seq0 as f32;
            }
        }
        if self.faults.truncate_embeddings.load(Ordering::SeqCst) {
            pooled.pop();
        }
        ctx.embeddings = Some(pooled);
        Ok(())
    }

    fn embeddings<'c>(&self, ctx: &'c Self::Context) -> Option<&'c [f32]> {
        ctx.embeddings.as_deref()
    }
}
