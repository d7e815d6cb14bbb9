use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::mpsc;

use mina_bot::application::errors::BotError;
use mina_bot::application::services::{ConversationService, OrderService};
use mina_bot::application::worker;
use mina_bot::domain::traits::{Channel, Classifier, InvoiceRenderer};
use mina_bot::infrastructure::adapters::{ConsoleAdapter, TwilioAdapter};
use mina_bot::infrastructure::classifier::GroqClassifier;
use mina_bot::infrastructure::config::Config;
use mina_bot::infrastructure::database::{self, schema, Repository, StateStore};
use mina_bot::infrastructure::renderer::HttpInvoiceRenderer;

#[derive(Parser)]
#[command(name = "mina-bot")]
#[command(about = "WhatsApp commerce assistant for small merchants", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            run_bot(cli.config);
        }
        Commands::Version => {
            println!("mina-bot v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => {
            init_config();
        }
    }
}

fn run_bot(config_path: String) {
    let config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    };

    tracing::info!("Starting mina-bot: {}", config.bot.name);

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async move {
        if let Err(e) = run(config).await {
            tracing::error!("Fatal: {}", e);
            std::process::exit(1);
        }
    });
}

async fn run(config: Config) -> Result<(), BotError> {
    // Persistence: fail fast when the store is unreachable.
    let backend = database::connect(config.database.url.as_deref()).await?;
    schema::ensure_schema(backend.as_ref()).await?;
    let repo = Repository::new(backend);
    let state = StateStore::new(repo.clone());
    let orders = OrderService::new(repo.clone(), config.orders.invalid_item_policy);

    let channel = build_channel(&config);
    tracing::info!(channel = channel.name(), "Channel adapter ready");

    let api_key = config.classifier.api_key.clone().ok_or_else(|| {
        mina_bot::application::errors::ConfigError::MissingField("classifier.api-key".to_string())
    })?;
    let classifier: Arc<dyn Classifier> = Arc::new(GroqClassifier::new(
        api_key,
        config.classifier.model.clone(),
        config.classifier.audio_model.clone(),
        config.classifier.vision_model.clone(),
    ));

    let renderer: Arc<dyn InvoiceRenderer> = Arc::new(HttpInvoiceRenderer::new(
        repo.clone(),
        config.renderer.endpoint.clone(),
    ));
    if config.renderer.endpoint.is_none() {
        tracing::warn!("No invoice render endpoint configured; orders confirm without PDFs");
    }

    let service = Arc::new(ConversationService::new(
        repo,
        state,
        orders,
        Arc::clone(&channel),
        classifier,
        renderer,
        config.bot.base_url.clone(),
    ));

    let (tx, rx) = mpsc::channel(config.queue.capacity);
    let handles = worker::spawn_workers(config.queue.workers, rx, service, Arc::clone(&channel));
    tracing::info!(workers = config.queue.workers, "Worker pool started");

    let poll_interval = config
        .adapters
        .twilio
        .as_ref()
        .filter(|t| t.enabled)
        .map(|t| t.poll_interval_seconds)
        .unwrap_or(0);

    // Polling loop: pull inbound events, hand them to the queue. The
    // console adapter blocks on stdin so it polls without an interval.
    loop {
        match channel.poll_inbound().await {
            Ok(events) => {
                for event in events {
                    if tx.send(event).await.is_err() {
                        tracing::error!("Queue closed, stopping poll loop");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                if channel.name() == "console" {
                    tracing::info!("Console input closed, shutting down");
                    break;
                }
                tracing::error!("Inbound poll failed: {}", e);
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
        if poll_interval > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(poll_interval)).await;
        }
    }

    // Close the queue and let in-flight events finish.
    drop(tx);
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

fn build_channel(config: &Config) -> Arc<dyn Channel> {
    if let Some(tw) = config.adapters.twilio.as_ref().filter(|t| t.enabled) {
        if let (Some(sid), Some(token), Some(number)) = (
            tw.account_sid.as_deref(),
            tw.auth_token.as_deref(),
            tw.from_number.as_deref(),
        ) {
            return Arc::new(TwilioAdapter::new(sid, token, number));
        }
        tracing::warn!("Twilio enabled but credentials incomplete, falling back to console");
    }
    Arc::new(ConsoleAdapter::new())
}

fn init_config() {
    let config = Config::default();
    match serde_yaml::to_string(&config) {
        Ok(yaml) => {
            if let Err(e) = std::fs::write("config.yaml", yaml) {
                eprintln!("Failed to write config.yaml: {}", e);
            } else {
                println!("Generated config.yaml");
            }
        }
        Err(e) => eprintln!("Failed to serialize config: {}", e),
    }
}
