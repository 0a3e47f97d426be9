use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use dashlink::config::{ClientConfig, ConfigOverrides};
use dashlink::logging::{LogFormat, LogOptions, init_logging};

mod cmd;

#[derive(Parser)]
#[command(name = "dashlink")]
#[command(version, about = "Command-line client for the automation dashboard")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file (default: ./dashlink.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// API base URL. Overrides the config file and DASHLINK_API_URL.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// WebSocket base URL. Overrides the config file and DASHLINK_WS_URL.
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// Where the credential pair is persisted.
    #[arg(long, global = true)]
    pub credentials_file: Option<PathBuf>,

    /// Log output format: pretty, json
    #[arg(long, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the issued credentials
    Login {
        #[arg(long)]
        email: Option<String>,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },
    /// Revoke the session and forget the stored credentials
    Logout,
    /// Show the signed-in account
    Whoami,
    /// Send a credentialed request and print the JSON response
    Request {
        /// GET, POST, PUT, PATCH or DELETE
        method: String,
        /// Path relative to the API base, e.g. /api/automations/
        path: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Stream realtime dashboard events until interrupted
    Watch {
        #[arg(value_enum, default_value = "automations")]
        target: WatchTarget,
        /// Connect to a single automation's endpoint and subscribe to it
        #[arg(long)]
        automation: Option<String>,
        /// Print raw JSON envelopes instead of formatted lines
        #[arg(long)]
        raw: bool,
    },
    /// View, validate or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchTarget {
    Automations,
    Dashboard,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default dashlink.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let _log_guard = init_logging(&LogOptions {
        verbose: cli.verbose,
        format: cli.log_format,
        file: cli.log_file.clone(),
    })
    .context("Failed to initialize logging")?;

    let overrides = ConfigOverrides {
        api_url: cli.api_url.clone(),
        ws_url: cli.ws_url.clone(),
        credentials_file: cli.credentials_file.clone(),
    };
    let config = ClientConfig::resolve(cli.config.as_deref(), &overrides)
        .context("Failed to load configuration")?;

    match &cli.command {
        Commands::Login { email, password } => {
            cmd::cmd_login(&config, email.clone(), password.clone()).await?
        }
        Commands::Register {
            email,
            username,
            first_name,
            last_name,
        } => {
            cmd::cmd_register(
                &config,
                email.clone(),
                username.clone(),
                first_name.clone(),
                last_name.clone(),
            )
            .await?
        }
        Commands::Logout => cmd::cmd_logout(&config).await?,
        Commands::Whoami => cmd::cmd_whoami(&config).await?,
        Commands::Request { method, path, data } => {
            cmd::cmd_request(&config, method, path, data.as_deref()).await?
        }
        Commands::Watch {
            target,
            automation,
            raw,
        } => cmd::cmd_watch(&config, *target, automation.clone(), *raw).await?,
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), command.clone())?
        }
    }

    Ok(())
}
