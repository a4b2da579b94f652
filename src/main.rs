use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mail2tg::channels::{ChatClient, Relay, SmtpRelay, SmtpServer, TelegramBot};
use mail2tg::config::{Config, DEFAULT_CONFIG_PATH, LoggingConfig};
use mail2tg::pipeline::drain::{DrainLoop, spawn_drain_loop};
use mail2tg::pipeline::intake::IntakeHandler;
use mail2tg::pipeline::queue::destination_queues;
use mail2tg::pipeline::render::Renderer;

/// Forward incoming mail to Telegram chats.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_tracing(&config.logging)?;

    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    eprintln!("📨 mail2tg v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {}", args.config.display());
    eprintln!("   SMTP: {} ({})", config.smtp.listen, config.smtp.name);
    eprintln!("   Routes: {} ({} chats)", config.routes.len(), config.routes.destinations().len());
    match &config.fallback {
        Some(fallback) => eprintln!("   Fallback: {}:{}", fallback.host, fallback.port),
        None => eprintln!("   Fallback: disabled"),
    }

    run(config).await?;
    Ok(())
}

/// Wire the pipeline together and serve until Ctrl-C.
async fn run(config: Config) -> mail2tg::Result<()> {
    // ── Telegram ─────────────────────────────────────────────────────────
    let bot = TelegramBot::new(config.bot.token, config.bot.api_url);
    let me = bot.get_me().await?;
    tracing::info!(bot = %me.username.as_deref().unwrap_or(&me.first_name), "Authorized on bot account");
    let client: Arc<dyn ChatClient> = Arc::new(bot);

    // ── Queues + drain loop ──────────────────────────────────────────────
    let routes = Arc::new(config.routes);
    let (queue_tx, queue_rx) = destination_queues(routes.destinations(), config.queue.capacity);

    let fallback = config
        .fallback
        .map(|f| Arc::new(SmtpRelay::new(f)) as Arc<dyn Relay>);
    let renderer = Renderer::new(client, fallback);
    let (drain_handle, drain_shutdown) =
        spawn_drain_loop(DrainLoop::new(queue_rx, renderer, config.queue.interval));

    // ── SMTP server ──────────────────────────────────────────────────────
    let server = SmtpServer::bind(&config.smtp.listen, config.smtp.session()).await?;
    let intake = Arc::new(IntakeHandler::new(routes, queue_tx));

    tokio::select! {
        result = server.serve(intake) => {
            if let Err(e) = result {
                tracing::error!("SMTP server stopped: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    drain_shutdown.store(true, Ordering::Relaxed);
    if let Err(e) = drain_handle.await {
        tracing::error!("Drain loop task failed: {e}");
    }

    Ok(())
}

/// Log to stdout, or append to `logging.file` when set.
fn init_tracing(
    logging: &LoggingConfig,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_level = if logging.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let Some(path) = &logging.file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        return Ok(None);
    };

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .init();

    Ok(Some(guard))
}
