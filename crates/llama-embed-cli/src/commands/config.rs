//! `config` command: print the effective configuration as TOML.

use std::path::PathBuf;

use clap::Args;

use crate::error::CliError;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn handle_config(args: ConfigArgs) -> i32 {
    super::finish("config", execute(args))
}

fn execute(args: ConfigArgs) -> Result<(), CliError> {
    let config = super::load_config(args.config.as_deref())?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_config_defaults_succeed() {
        assert_eq!(handle_config(ConfigArgs { config: None }).await, 0);
    }

    #[tokio::test]
    async fn test_unreadable_config_exits_4() {
        let args = ConfigArgs {
            config: Some(PathBuf::from("/nonexistent/llama-embed.toml")),
        };
        assert_eq!(handle_config(args).await, 4);
    }

    #[tokio::test]
    async fn test_malformed_config_exits_4() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[context\nn_threads = ").unwrap();
        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
        };
        assert_eq!(handle_config(args).await, 4);
    }
}
