//! llama-embed CLI
//!
//! Text embeddings from GGUF models on the command line.
//!
//! # Commands
//!
//! - `embed`: embed texts given with `--text`, or one per stdin line
//! - `info`: load a model and print its embedding dimension
//! - `config`: print the effective configuration as TOML
//!
//! Logging goes to stderr; results go to stdout.

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod error;

/// llama-embed - text embeddings from GGUF models
#[derive(Parser)]
#[command(name = "llama-embed")]
#[command(version)]
#[command(about = "Text embeddings from GGUF models via llama.cpp")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed texts and print one JSON object per text
    Embed(commands::embed::EmbedArgs),
    /// Load a model and print its embedding dimension
    Info(commands::info::InfoArgs),
    /// Print the effective configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli.command {
        Commands::Embed(args) => commands::embed::handle_embed(args).await,
        Commands::Info(args) => commands::info::handle_info(args).await,
        Commands::Config(args) => commands::config::handle_config(args).await,
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embed_with_repeated_text() {
        let cli = Cli::try_parse_from([
            "llama-embed", "-vv", "embed", "--model", "m.gguf", "--text", "a", "--text", "b",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Embed(args) => {
                assert_eq!(args.model.to_str(), Some("m.gguf"));
                assert_eq!(args.text, vec!["a".to_string(), "b".to_string()]);
                assert!(args.config.is_none());
            }
            _ => panic!("expected embed"),
        }
    }

    #[test]
    fn test_embed_requires_model() {
        assert!(Cli::try_parse_from(["llama-embed", "embed", "--text", "a"]).is_err());
    }

    #[test]
    fn test_parse_config_command() {
        let cli = Cli::try_parse_from(["llama-embed", "config", "--config", "c.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Config(_)));
    }
}
