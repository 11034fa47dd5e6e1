//! `info` command: load a model and print its embedding dimension.

use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;

use llama_embed::{EmbeddingBackend, ModelRegistry};

use crate::error::CliError;

/// Arguments for the info command.
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Path to a GGUF model file
    #[arg(short, long)]
    pub model: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub model: PathBuf,
    pub n_embd: usize,
}

pub async fn handle_info(args: InfoArgs) -> i32 {
    super::finish("info", execute(args).await)
}

#[cfg(feature = "llama")]
async fn execute(args: InfoArgs) -> Result<(), CliError> {
    let config = super::load_config(args.config.as_deref())?;
    let model = args.model;

    let info = super::blocking(move || {
        let registry = ModelRegistry::new(super::engine()?, config)?;
        model_info(&registry, &model)
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

#[cfg(not(feature = "llama"))]
async fn execute(_args: InfoArgs) -> Result<(), CliError> {
    Err(CliError::EngineUnavailable)
}

#[cfg_attr(not(feature = "llama"), allow(dead_code))]
fn model_info<B: EmbeddingBackend>(registry: &ModelRegistry<B>, model: &Path) -> Result<ModelInfo, CliError> {
    let id = registry.create_model(model)?;
    let n_embd = registry.n_embd(id);
    registry.destroy_model(id);
    Ok(ModelInfo {
        model: model.to_path_buf(),
        n_embd: n_embd?,
    })
}
