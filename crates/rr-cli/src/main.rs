//! Runbook Responder CLI
//!
//! Runs the alert triage service or triages a single alert locally.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use rr_core::ApprovalDecision;
use rr_observability::{LoggingConfig, LoggingError};
use std::path::PathBuf;

mod commands;
mod config;

use commands::{run_server, run_triage, TriageOptions};
use config::AppConfig;

#[derive(Parser)]
#[command(name = "rr")]
#[command(version)]
#[command(about = "Security alert triage and remediation workflow", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "RR_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level regardless of configuration
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "RR_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server and workflow engine
    Serve {
        /// Host to bind to
        #[arg(long, env = "RR_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "RR_PORT")]
        port: Option<u16>,

        /// Database URL (`sqlite::memory:` or `sqlite://file.db?mode=rwc`)
        #[arg(short, long, env = "RR_DATABASE_URL")]
        database: Option<String>,

        /// Approval webhook URL
        #[arg(long, env = "RR_WEBHOOK_URL")]
        webhook_url: Option<String>,

        /// Disable Swagger UI
        #[arg(long)]
        no_swagger: bool,
    },

    /// Triage one alert in process and print the resulting incident
    Triage {
        /// Alert JSON file, `-` for stdin
        #[arg(short, long)]
        file: PathBuf,

        /// Decide a pending approval
        #[arg(long, value_enum)]
        decision: Option<DecisionArg>,

        /// Print the incident as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Show secrets (redacted by default)
        #[arg(long)]
        show_secrets: bool,
    },

    /// Check the configuration and exit
    Validate,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DecisionArg {
    Approved,
    Denied,
}

impl From<DecisionArg> for ApprovalDecision {
    fn from(arg: DecisionArg) -> Self {
        match arg {
            DecisionArg::Approved => ApprovalDecision::Approved,
            DecisionArg::Denied => ApprovalDecision::Denied,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    if cli.log_json {
        config.logging.json = true;
    }
    init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            database,
            webhook_url,
            no_swagger,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(url) = database {
                config.database.url = url;
            }
            if webhook_url.is_some() {
                config.notifications.webhook_url = webhook_url;
            }
            if no_swagger {
                config.server.enable_swagger = false;
            }

            println!("{} Starting Runbook Responder...", "[server]".cyan());
            run_server(config).await
        }
        Commands::Triage {
            file,
            decision,
            json,
        } => {
            run_triage(
                config,
                TriageOptions {
                    file,
                    decision: decision.map(Into::into),
                    json,
                },
            )
            .await
        }
        Commands::Config { action } => cmd_config(&config, action),
    }
}

fn init_logging(config: &AppConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let logging = LoggingConfig::from_level_name(level, config.logging.json)
        .context("Invalid logging configuration")?;

    match rr_observability::init_logging_with_config(&logging) {
        Ok(()) | Err(LoggingError::AlreadyInitialized(_)) => Ok(()),
        Err(e) => Err(e).context("Failed to initialise logging"),
    }
}

fn cmd_config(config: &AppConfig, action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Show { show_secrets } => {
            let shown = if show_secrets {
                config.clone()
            } else {
                config.redact()
            };
            print!("{}", serde_yaml::to_string(&shown)?);
            Ok(())
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("{}", "Configuration is valid.".green().bold());
            Ok(())
        }
    }
}
