//! remote-bridge CLI
//!
//! - `connect` bootstraps the backend on a remote host and serves the gateway
//! - `status` asks a running gateway about a session
//! - `config` manages the configuration file

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remote_bridge::commands::{self, ConnectOverrides};
use remote_bridge::output::print_error;

#[derive(Parser)]
#[command(name = "remote-bridge")]
#[command(author, version, about = "Serve a local frontend against a backend bootstrapped over SSH")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "REMOTE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", env = "REMOTE_BRIDGE_LOG")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a remote host, bootstrap the backend and serve the gateway
    Connect {
        /// Remote host as [user@]host[:port]
        target: String,
        /// Private key to try (repeatable, replaces configured identity files)
        #[arg(short, long = "identity")]
        identity: Vec<PathBuf>,
        /// Gateway bind address (overrides config)
        #[arg(short, long, env = "REMOTE_BRIDGE_BIND")]
        bind: Option<String>,
        /// Directory served to requests without a live session
        #[arg(long)]
        static_dir: Option<PathBuf>,
        /// Local application directory to package
        #[arg(long)]
        app_dir: Option<PathBuf>,
        /// Entry point inside the application payload
        #[arg(long)]
        entry: Option<String>,
        /// Never prompt for passphrases or passwords
        #[arg(long)]
        no_prompt: bool,
    },

    /// Query the status of a session on a running gateway
    Status {
        /// Gateway address (defaults to the configured bind address)
        #[arg(short, long)]
        gateway: Option<String>,
        /// Session id (the remoteId cookie value)
        #[arg(short, long)]
        session: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => cli.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Connect {
            target,
            identity,
            bind,
            static_dir,
            app_dir,
            entry,
            no_prompt,
        } => {
            let config = commands::load_bridge_config(config_path)?;
            let overrides = ConnectOverrides {
                identity_files: identity,
                bind,
                static_dir,
                app_dir,
                entry_point: entry,
                no_prompt,
            };
            if let Err(e) = commands::connect_command(&target, config, &overrides).await {
                print_error(&format!("{:#}", e));
                return Err(e);
            }
        }

        Commands::Status { gateway, session } => {
            let gateway = match gateway {
                Some(gateway) => gateway,
                None => commands::load_bridge_config(config_path)?.gateway.bind_address,
            };
            commands::status_command(&gateway, &session).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_init(config_path, force)?,
            ConfigAction::Show => commands::config_show(config_path)?,
            ConfigAction::Path => commands::config_path(config_path),
        },
    }

    Ok(())
}
