//! Command-line interface.

mod config;
mod serve;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use stockdesk::Config;

#[derive(Debug, Parser)]
#[command(name = "stockdesk", version, about = "Stock dashboard backend: AI gateway and versioned record store")]
pub(crate) struct Cli {
    /// Config file (default: ~/.stockdesk/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Run the HTTP server (default)
    Serve {
        /// Override server.bind
        #[arg(long)]
        bind: Option<String>,
        /// Override server.port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub(crate) enum ConfigAction {
    /// Print the effective configuration with secrets masked
    Show,
    /// Report configuration problems; exits non-zero if any
    Check,
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve {
        bind: None,
        port: None,
    }) {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve::cmd_serve(config).await
        }
        Commands::Config { action } => config::cmd_config(action, &config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_serve() {
        let cli = Cli::try_parse_from(["stockdesk"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.log_json);
    }

    #[test]
    fn test_serve_overrides() {
        let cli =
            Cli::try_parse_from(["stockdesk", "--log-json", "serve", "--port", "9000"]).unwrap();
        assert!(cli.log_json);
        match cli.command {
            Some(Commands::Serve { bind, port }) => {
                assert_eq!(bind, None);
                assert_eq!(port, Some(9000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["stockdesk", "config", "check", "--config", "/tmp/c.json"])
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/c.json")));
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Check
            })
        ));
    }

    #[test]
    fn test_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["stockdesk", "migrate"]).is_err());
    }
}
