//! CLI module for keel
//!
//! Provides commands:
//! - `serve`: run the bus and reconcilers over stdin/stdout JSON lines
//! - `config`: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod config;

/// Keel delivery engine CLI
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(about = "Event-driven deployment reconciler")]
#[command(version)]
pub struct Cli {
    /// Log as JSON lines instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    /// Extra configuration file layered over the profile files
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the bus and reconcilers; commands are read from stdin
    Serve {
        /// Process events in the dispatch loop instead of worker pools
        #[arg(long)]
        inline: bool,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Print the embedded defaults instead
        #[arg(long)]
        defaults: bool,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let explicit = cli.config.as_deref();
    match cli.command {
        Some(Commands::Serve { inline }) => crate::server::run(inline, explicit).await,
        Some(Commands::Config { defaults }) => config::run(defaults, explicit),
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_inline() {
        let cli = Cli::try_parse_from(["keel", "--json", "serve", "--inline"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Some(Commands::Serve { inline: true })));
    }

    #[test]
    fn test_parse_config() {
        let cli = Cli::try_parse_from(["keel", "config"]).unwrap();
        assert!(!cli.json);
        assert!(matches!(cli.command, Some(Commands::Config { defaults: false })));
    }

    #[test]
    fn test_parse_global_config_path() {
        let cli = Cli::try_parse_from(["keel", "serve", "--config", "/etc/keel/prod.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/keel/prod.toml")));
        assert!(matches!(cli.command, Some(Commands::Serve { inline: false })));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }
}
