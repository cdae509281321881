use clap::{Parser, Subcommand};
use std::path::PathBuf;
use unibox_cli::{
    check_config, init_tracing, log_dir, remove_credential, run_server, run_stats, run_sync,
    set_credential,
};
use unibox_core::config::AppConfig;

#[derive(Parser)]
#[command(name = "unibox")]
#[command(version)]
#[command(about = "Unified social inbox: webhooks in, one queue out")]
struct Cli {
    /// Config file (defaults to ~/.unibox/config.toml)
    #[arg(short, long, global = true, env = "UNIBOX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook gateway and inbox API
    Serve,
    /// Print inbox counts for an organization
    Stats {
        #[arg(long = "org")]
        organization_id: String,
    },
    /// Backfill recent activity for an organization's accounts
    Sync {
        #[arg(long = "org")]
        organization_id: String,
    },
    /// Show configured platforms and accounts
    CheckConfig,
    /// Manage stored access tokens
    Credentials {
        #[command(subcommand)]
        action: CredentialActions,
    },
}

#[derive(Subcommand)]
enum CredentialActions {
    /// Store a token for an account
    Set { account_id: String, token: String },
    /// Forget an account's token
    Remove { account_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.clone())?;
    let _guard = init_tracing(&log_dir(&config));

    match cli.command {
        Commands::Serve => run_server(config).await,
        Commands::Stats { organization_id } => run_stats(&config, &organization_id).await,
        Commands::Sync { organization_id } => run_sync(&config, &organization_id).await,
        Commands::CheckConfig => check_config(&config),
        Commands::Credentials { action } => match action {
            CredentialActions::Set { account_id, token } => set_credential(&config, &account_id, &token),
            CredentialActions::Remove { account_id } => remove_credential(&config, &account_id),
        },
    }
}
