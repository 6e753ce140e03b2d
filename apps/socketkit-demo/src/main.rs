use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use serde_json::json;
use socketkit::transport::LocalTransport;
use socketkit::{run, wait_for_shutdown, MetadataStore, ShutdownOptions};
use socketkit_bootstrap::{AppConfig, CliArgs};
use std::path::PathBuf;
use std::sync::Arc;

mod chat;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// SocketKit demo - a chat served by declarative socket controllers
#[derive(Parser)]
#[command(name = "socketkit-demo")]
#[command(about = "SocketKit demo - a chat served by declarative socket controllers")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Global per-connection throttle limit (overrides config)
    #[arg(long)]
    throttle_limit: Option<u32>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind the chat, play a short scripted session and wait for a shutdown signal
    Run,
    /// Validate configuration and controller declarations, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
        throttle_limit: cli.throttle_limit,
    };

    // defaults -> YAML (if provided) -> env (APP__*) -> CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.clone().unwrap_or_default();
    socketkit_bootstrap::init_logging(&logging_config, &config.home_dir());

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_chat(config).await,
        Commands::Check => check_config(config),
    }
}

async fn run_chat(config: AppConfig) -> Result<()> {
    let ns = config.server.namespace.clone();
    tracing::info!(namespace = %ns, "SocketKit demo starting");

    let transport = Arc::new(LocalTransport::new());
    let opts = chat::chat_options(transport.clone(), &ns)?.with_config(&config.sockets);

    // The session runs once the chat is bound; the runner stops when the signal arrives.
    let session = async move {
        if let Err(e) = play_session(&transport, &ns).await {
            tracing::error!(error = %format!("{e:#}"), "Scripted session failed");
        }
        tracing::info!("Waiting for shutdown signal");
        if let Err(e) = wait_for_shutdown().await {
            tracing::warn!(error = %e, "Signal listener failed");
        }
    };
    run(opts, ShutdownOptions::Future(Box::pin(session))).await
}

/// Two guests meet in the lobby, talk and whisper, then one leaves.
async fn play_session(transport: &LocalTransport, ns: &str) -> Result<()> {
    let alice = transport.connect(ns).await?;
    let bob = transport.connect(ns).await?;

    alice.dispatch("say", vec![json!("hi bob")]).await?;
    bob.dispatch("whisper", vec![json!({ "to": "guest-1", "text": "hi alice" })])
        .await?;
    bob.dispatch("say", vec![json!(42)]).await?;
    bob.disconnect("bye").await?;

    for emission in alice.received() {
        tracing::info!(event = %emission.event, data = %emission.data, "guest-1 received");
    }
    let unhandled = transport.take_unhandled_errors();
    if !unhandled.is_empty() {
        tracing::warn!(count = unhandled.len(), "Errors reached the transport");
    }
    Ok(())
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    let mut store = MetadataStore::new();
    chat::chat_controller(&mut store, &config.server.namespace)
        .context("chat controller declaration is invalid")?;
    if let Some(logging) = &config.logging {
        for (target, level) in socketkit_bootstrap::describe_levels(logging) {
            tracing::info!(%target, %level, "Console log level");
        }
    }
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}
