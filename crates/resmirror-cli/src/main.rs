//! resmirror CLI
//!
//! Command-line interface for resmirror - watch and edit server resources.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use resmirror_core::{Config, TargetId};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "resmirror")]
#[command(about = "resmirror - Live mirror of server resources")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level for stderr logging (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror collections and print changes as they happen
    Watch {
        /// Resource types to watch (defaults to configured collections)
        resource_types: Vec<String>,
    },
    /// List a collection
    #[command(alias = "ls")]
    List {
        /// Resource type
        resource_type: String,
    },
    /// Show a single resource
    Show {
        /// Resource type
        resource_type: String,
        /// Resource ID
        resource_id: String,
    },
    /// Create a resource
    #[command(alias = "add")]
    Create {
        /// Resource type
        resource_type: String,
        /// Resource ID
        resource_id: String,
        /// Resource data as a JSON object
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Append a link to a resource
    Link {
        /// Resource type
        resource_type: String,
        /// Resource ID
        resource_id: String,
        /// Relation name, e.g. children
        relation: String,
        /// Type of the linked resource
        target_type: String,
        /// ID of the linked resource
        target_id: String,
        /// Link title (defaults to the target ID)
        #[arg(short = 'T', long)]
        title: Option<String>,
    },
    /// Set fields on a resource
    Set {
        /// Resource type
        resource_type: String,
        /// Resource ID
        resource_id: String,
        /// Fields as KEY=VALUE; VALUE is parsed as JSON when possible
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Delete a resource
    #[command(alias = "rm")]
    Delete {
        /// Resource type
        resource_type: String,
        /// Resource ID
        resource_id: String,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (server_url, realtime_url, collections, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    init_logging(&cli.log_level);

    let config_path = cli.config.as_ref();

    // Config commands work even when the config file is broken
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match cli.command {
        Commands::Watch { resource_types } => {
            commands::watch::watch(&config, resource_types, &output).await
        }
        Commands::List { resource_type } => {
            commands::resource::list(&config, resource_type, &output).await
        }
        Commands::Show {
            resource_type,
            resource_id,
        } => commands::resource::show(&config, resource_type, resource_id, &output).await,
        Commands::Create {
            resource_type,
            resource_id,
            data,
        } => commands::resource::create(&config, resource_type, resource_id, data, &output).await,
        Commands::Link {
            resource_type,
            resource_id,
            relation,
            target_type,
            target_id,
            title,
        } => {
            let target = TargetId::new(target_type, target_id);
            commands::resource::link(
                &config,
                resource_type,
                resource_id,
                relation,
                target,
                title,
                &output,
            )
            .await
        }
        Commands::Set {
            resource_type,
            resource_id,
            fields,
        } => commands::resource::set(&config, resource_type, resource_id, fields, &output).await,
        Commands::Delete {
            resource_type,
            resource_id,
        } => commands::resource::delete(&config, resource_type, resource_id, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

/// Log to stderr so stdout stays clean for command output
fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "resmirror_core={},resmirror_cli={}",
            log_level, log_level
        ))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
