use std::sync::Arc;

use clap::{Parser, Subcommand};
use leadchat::{
    bus::EventBus,
    clock::SystemClock,
    config::Config,
    interface::terminal::TerminalInterface,
    jobs::{LeadJob, LoggingLeadJob, WebhookLeadJob},
    responder::{EchoResponder, OpenAiResponder, Responder},
    server::LeadServer,
    store::Store,
    widget::{ChatWidget, PRUNE_INTERVAL},
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "leadchat", version, about = "Lead form and chat widget")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lead/chat backend.
    Serve,
    /// Run the widget in this terminal against the configured backend.
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Initializing store at {}", config.db_path.display());
    let store = Store::new(&config.db_path).await?;
    store.init().await?;

    match cli.command {
        Commands::Serve => serve(config, store).await,
        Commands::Chat => chat(config, store).await,
    }
}

async fn serve(config: Config, store: Store) -> anyhow::Result<()> {
    let responder: Arc<dyn Responder> = match &config.openai_api_key {
        Some(key) => {
            info!("Answering with model {}", config.chat_model);
            Arc::new(OpenAiResponder::new(
                &config.openai_base_url,
                key.clone(),
                config.chat_model.clone(),
            )?)
        }
        None => {
            info!("No OPENAI_API_KEY set, answering with the echo responder.");
            Arc::new(EchoResponder)
        }
    };

    let lead_job: Arc<dyn LeadJob> = match &config.lead_webhook {
        Some(url) => {
            info!("Accepted leads are posted to {}", url);
            Arc::new(WebhookLeadJob::new(url.clone())?)
        }
        None => Arc::new(LoggingLeadJob),
    };

    let app = LeadServer::new(store, responder, config.allowed_origin.clone())
        .with_lead_job(lead_job)
        .router();

    info!("Starting lead/chat server on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}

async fn chat(config: Config, store: Store) -> anyhow::Result<()> {
    let bus = Arc::new(EventBus::new());
    let widget = Arc::new(
        ChatWidget::new(
            Arc::new(store),
            Arc::new(SystemClock),
            bus.clone(),
            &config.api_base,
            config.viewport_width,
        )
        .await?,
    );

    let pruner = widget.spawn_pruner(PRUNE_INTERVAL);
    let terminal = TerminalInterface::new(bus, widget);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = terminal.run() => {
            if let Err(e) = res {
                error!("Terminal stopped with error: {}", e);
            }
        }
    }

    pruner.abort();
    Ok(())
}
