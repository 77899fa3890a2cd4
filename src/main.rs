use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use specdash::config::LogFormat;

mod cmd;

#[derive(Parser)]
#[command(name = "specdash")]
#[command(version, about = "Live dashboard for spec and bug workflows across workspaces")]
pub struct Cli {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format; overrides [logging] format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the dashboard server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Directory to scan for workspaces (repeatable)
        #[arg(long = "root")]
        roots: Vec<PathBuf>,

        /// Seconds between discovery passes
        #[arg(long)]
        interval: Option<u64>,

        /// Open the dashboard in a browser once listening
        #[arg(long)]
        open: bool,
    },
    /// Discover workspaces once and print their active sessions
    Scan {
        /// Directory to scan for workspaces (repeatable)
        #[arg(long = "root")]
        roots: Vec<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone, Copy)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cmd::load_config(cli.config.as_deref())?;

    let format = cli.log_format.unwrap_or(config.logging.format);
    let _log_guard = specdash::logging::init(cli.verbose, format, config.logging.dir.as_deref())?;

    match &cli.command {
        Commands::Serve {
            port,
            host,
            roots,
            interval,
            open,
        } => {
            let overrides = cmd::ServeOverrides {
                port: *port,
                host: host.clone(),
                roots: roots.clone(),
                interval: *interval,
                open: *open,
            };
            cmd::cmd_serve(config, overrides).await?;
        }
        Commands::Scan { roots, json } => cmd::cmd_scan(&config, roots, *json)?,
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), *command)?
        }
    }

    Ok(())
}
