//! Callback relay - missed-call lead notifications
//!
//! Receives telephony provider webhooks, keeps one record per call, and
//! texts the caller and the business owner when a call is missed.

mod api;
mod auth;
mod calling;
mod config;
mod models;
mod server;
mod store;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{HttpAudioRetriever, NotificationDispatcher, TwilioMessagingClient, WhisperTranscriber};
use calling::CallCoordinator;
use config::Config;
use models::{CallKey, FormParams, TenantProfile, PROVIDER_TWILIO};
use store::{CallStore, SqliteCallStore};

#[derive(Parser)]
#[command(name = "callback-relay")]
#[command(about = "Turns missed phone calls into text message leads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve {
        /// Address to listen on
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the signature the provider would send for a request
    Sign {
        /// Full request URL, including any query string
        url: String,

        /// POST parameters as name=value
        params: Vec<String>,
    },

    /// Show a stored call record
    Call {
        /// Provider call id (CallSid)
        provider_call_id: String,

        #[arg(long, default_value = PROVIDER_TWILIO)]
        provider: String,
    },

    /// Register the business name for a provider number
    Tenant {
        /// Provider-facing number, e.g. +15550002222
        number: String,

        /// Name used in outbound texts
        name: String,
    },
}

fn open_store(config: &Config) -> Result<SqliteCallStore> {
    let path = config.database_path()?;
    tracing::debug!("Opening call database at {}", path.display());
    SqliteCallStore::open(&path)
        .with_context(|| format!("Failed to open call database {}", path.display()))
}

async fn serve(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;

    let config = Arc::new(config);
    let store = Arc::new(open_store(&config)?);
    let messaging = Arc::new(TwilioMessagingClient::new(&config)?);
    let coordinator = CallCoordinator::new(
        config.clone(),
        store,
        Arc::new(HttpAudioRetriever::new(&config)?),
        Arc::new(WhisperTranscriber::new(&config)?),
        NotificationDispatcher::new(messaging),
    );

    tracing::info!(
        signature_mode = %auth::SignatureMode::resolve(&config),
        production = config.is_production(),
        "Starting webhook server"
    );
    server::run_server(server::AppState::new(config, Arc::new(coordinator))).await
}

fn parse_params(pairs: &[String]) -> Result<FormParams> {
    let mut params = FormParams::new();
    for pair in pairs {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("Expected name=value, got '{}'", pair);
        };
        params.insert(name.to_string(), value.to_string());
    }
    Ok(params)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            serve(config, host, port).await?;
        }
        Commands::Sign { url, params } => {
            if config.twilio.auth_token.is_empty() {
                bail!("twilio.auth_token (TWILIO_AUTH_TOKEN) is not set");
            }
            let params = parse_params(&params)?;
            println!(
                "{}",
                auth::compute_signature(&config.twilio.auth_token, &url, &params)
            );
        }
        Commands::Call {
            provider_call_id,
            provider,
        } => {
            let store = open_store(&config)?;
            let key = CallKey::new(provider, provider_call_id);
            match store.find_by_key(&key)? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => bail!("No call {} for provider {}", key.provider_call_id, key.provider),
            }
        }
        Commands::Tenant { number, name } => {
            let store = open_store(&config)?;
            store.upsert_tenant(&TenantProfile {
                systemix_number: number.clone(),
                company_name: Some(name),
                name: None,
            })?;
            tracing::info!(number = %calling::mask_phone(&number), "Tenant saved");
        }
    }

    Ok(())
}
