//! `embed` command: one JSON line per input text.
//!
//! ```bash
//! llama-embed embed --model nomic-embed-text.gguf --text "hello"
//! cat lines.txt | llama-embed embed --model nomic-embed-text.gguf
//! ```

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;
use tracing::info;

use llama_embed::{EmbeddingBackend, EmbeddingVector, ModelRegistry};

use crate::error::CliError;

/// Arguments for the embed command.
#[derive(Args, Debug)]
pub struct EmbedArgs {
    /// Path to a GGUF model file
    #[arg(short, long)]
    pub model: PathBuf,

    /// Text to embed (repeatable). Reads one text per stdin line when omitted.
    #[arg(short, long)]
    pub text: Vec<String>,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// One output record.
#[derive(Debug, Serialize)]
pub struct EmbedOutput {
    pub text: String,
    pub dimensions: usize,
    pub embedding: EmbeddingVector,
}

pub async fn handle_embed(args: EmbedArgs) -> i32 {
    super::finish("embed", execute(args).await)
}

#[cfg(feature = "llama")]
async fn execute(args: EmbedArgs) -> Result<(), CliError> {
    let config = super::load_config(args.config.as_deref())?;
    let texts = gather_texts(args.text, std::io::stdin().lock())?;
    let model = args.model;

    let outputs = super::blocking(move || {
        let registry = ModelRegistry::new(super::engine()?, config)?;
        embed_texts(&registry, &model, texts)
    })
    .await?;

    write_outputs(&outputs, std::io::stdout().lock())
}

#[cfg(not(feature = "llama"))]
async fn execute(_args: EmbedArgs) -> Result<(), CliError> {
    Err(CliError::EngineUnavailable)
}

/// Explicit texts win; otherwise every non-blank line of `input`.
#[cfg_attr(not(feature = "llama"), allow(dead_code))]
fn gather_texts(texts: Vec<String>, input: impl BufRead) -> Result<Vec<String>, CliError> {
    if !texts.is_empty() {
        return Ok(texts);
    }
    let mut lines = Vec::new();
    for line in input.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Load `model`, embed every text in order, release the model.
///
/// The model is released even when a text fails.
#[cfg_attr(not(feature = "llama"), allow(dead_code))]
fn embed_texts<B: EmbeddingBackend>(
    registry: &ModelRegistry<B>,
    model: &Path,
    texts: Vec<String>,
) -> Result<Vec<EmbedOutput>, CliError> {
    let id = registry.create_model(model)?;

    let result = texts
        .into_iter()
        .map(|text| {
            let embedding = registry.get_embedding(id, &text)?;
            Ok(EmbedOutput {
                dimensions: embedding.dimensions(),
                text,
                embedding,
            })
        })
        .collect::<Result<Vec<_>, CliError>>();

    registry.destroy_model(id);

    if let Ok(outputs) = &result {
        info!(model_path = %model.display(), count = outputs.len(), "Embedded texts");
    }
    result
}

#[cfg_attr(not(feature = "llama"), allow(dead_code))]
fn write_outputs(outputs: &[EmbedOutput], mut out: impl Write) -> Result<(), CliError> {
    for output in outputs {
        serde_json::to_writer(&mut out, output)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
