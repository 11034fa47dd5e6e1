//! CLI command handlers
//!
//! - `embed`: embed texts from arguments or stdin
//! - `info`: load a model and report its dimension
//! - `config`: print the effective configuration

pub mod config;
pub mod embed;
pub mod info;

use std::path::Path;

use tracing::{debug, error};

use llama_embed::EmbedConfig;

use crate::error::CliError;

/// Load `path` (or defaults), apply environment overrides, validate.
pub(crate) fn load_config(path: Option<&Path>) -> Result<EmbedConfig, CliError> {
    let config = match path {
        Some(path) => {
            debug!(config_path = %path.display(), "Loading configuration");
            EmbedConfig::from_file(path)?
        }
        None => EmbedConfig::default(),
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Run engine work off the async runtime.
#[cfg_attr(not(feature = "llama"), allow(dead_code))]
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, CliError>
where
    F: FnOnce() -> Result<T, CliError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CliError::General(format!("worker task failed: {}", e)))?
}

/// The llama.cpp engine. One per process.
#[cfg(feature = "llama")]
pub(crate) fn engine() -> Result<std::sync::Arc<llama_embed::LlamaCppBackend>, CliError> {
    Ok(std::sync::Arc::new(llama_embed::LlamaCppBackend::init()?))
}

/// Map a command result to an exit code, logging the failure.
pub(crate) fn finish(command: &str, result: Result<(), CliError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(command, error = %e, "Command failed");
            eprintln!("error: {}", e);
            e.exit_code()
        }
    }
}
