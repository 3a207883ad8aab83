//! rinnabot CLI entry point.

use rinnabot::agent::{DialogueRouter, ResponsePipeline, RouterDeps, RouterSettings, Worker};
use rinnabot::audit::SqliteAuditStore;
use rinnabot::config::Config;
use rinnabot::conversation::{PromptBuilder, TextNormalizer, TokenBudgetTrimmer, UserResolver};
use rinnabot::error::ConfigError;
use rinnabot::llm::LlamaServerClient;
use rinnabot::messaging::{ChatPosterDyn, DryRunPoster, SlackPoster};
use rinnabot::moderation::{AzureContentModerator, GoogleLanguageClassifier, ModerationGateway};
use rinnabot::pubsub::{HttpPongPublisher, LoggingPongPublisher, PongPublisher};
use rinnabot::speech::SpeechPostProcessor;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(name = "rinnabot")]
#[command(about = "Multi-persona Slack chat agent backed by a local language model")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the Pub/Sub push endpoint (default)
    Serve {
        /// Log posts instead of sending them
        #[arg(long)]
        dry_run: bool,
    },
    /// Feed newline-delimited JSON events from a file through the worker
    Replay {
        file: PathBuf,
        /// Post for real instead of dry-run
        #[arg(long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let command = cli.command.unwrap_or(Command::Serve { dry_run: false });
    match &command {
        Command::Serve { dry_run } => config.dry_run |= *dry_run,
        Command::Replay { live, .. } => config.dry_run = !*live,
    }

    let _log_guard = init_tracing(cli.debug, &config)?;
    if !provider_installed {
        tracing::debug!("rustls crypto provider already installed");
    }
    config.validate().context("invalid configuration")?;

    tracing::info!(
        data_dir = %config.data_dir.display(),
        dry_run = config.dry_run,
        "configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let router = build_router(&config).await?;
    let (worker, handle) = Worker::new(router, config.pubsub.queue_capacity, shutdown.clone());
    let worker_task = tokio::spawn(worker.run());

    match command {
        Command::Serve { .. } => {
            let bind = config
                .pubsub
                .bind
                .parse()
                .with_context(|| format!("invalid pubsub.bind address '{}'", config.pubsub.bind))?;
            let server = rinnabot::pubsub::start_push_server(bind, handle, shutdown.clone()).await?;

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            tracing::info!("shutdown signal received");
            shutdown.cancel();

            if let Err(error) = server.await {
                tracing::warn!(%error, "push endpoint task failed");
            }
        }
        Command::Replay { file, .. } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read events from {}", file.display()))?;

            let mut replayed = 0usize;
            for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
                handle
                    .submit(line.as_bytes().to_vec())
                    .await
                    .context("event worker stopped during replay")?;
                replayed += 1;
            }
            tracing::info!(replayed, file = %file.display(), "replay finished");
            shutdown.cancel();
        }
    }

    if let Err(error) = worker_task.await {
        tracing::warn!(%error, "event worker task failed");
    }

    tracing::info!("rinnabot stopped");
    Ok(())
}

/// Stderr logging, plus a daily-rolling file when `logging.dir` is set.
/// The returned guard flushes the file writer on drop.
fn init_tracing(
    debug: bool,
    config: &Config,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = build_env_filter(debug);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match &config.logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory: {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, "rinnabot.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .compact();

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            Ok(None)
        }
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--debug`.
fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default))
}

async fn build_router(config: &Config) -> anyhow::Result<DialogueRouter> {
    let personas = Arc::new(config.persona_set()?);

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory: {}", config.data_dir.display())
    })?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(config.sqlite_path())
                .create_if_missing(true),
        )
        .await
        .with_context(|| format!("failed to open {}", config.sqlite_path().display()))?;
    let audit = SqliteAuditStore::new(pool);
    audit.initialize().await?;

    let generation = Arc::new(LlamaServerClient::new(
        config.generation.server_url.clone(),
        config.generation.compute_mode,
        Duration::from_secs(config.generation.timeout_secs),
    )?);

    let builder = PromptBuilder::new(
        TextNormalizer::new(&personas)?,
        UserResolver::new(
            config.slack.automation_bot_id.clone(),
            &personas,
            config.prompt.user_aliases.clone(),
        ),
        config.prompt.meaning_asker.clone(),
    );
    let pipeline = ResponsePipeline::new(
        generation,
        builder,
        TokenBudgetTrimmer::new(config.generation.token_ceiling),
        SpeechPostProcessor::new(&personas),
        config.generation.sampling.clone(),
        config.time_zone()?,
        config.prompt.weather.clone(),
    );

    let moderation = build_moderation(config)?;

    let poster: Arc<dyn ChatPosterDyn> = if config.dry_run {
        Arc::new(DryRunPoster)
    } else {
        let token = config
            .slack
            .bot_token
            .clone()
            .ok_or_else(|| ConfigError::MissingKey("slack.bot_token".into()))?;
        Arc::new(SlackPoster::new(token)?)
    };

    let pongs: Arc<dyn PongPublisher> = match (&config.pubsub.access_token, config.dry_run) {
        (Some(token), false) => Arc::new(HttpPongPublisher::new(
            config.pubsub.project_id.clone(),
            token.clone(),
            Duration::from_secs(config.moderation.timeout_secs),
        )?),
        _ => Arc::new(LoggingPongPublisher),
    };

    let deps = RouterDeps {
        pipeline,
        personas,
        moderation,
        poster,
        audit: Arc::new(audit),
        pongs,
    };
    let settings = RouterSettings {
        channel: config.slack.channel.clone(),
        automation_bot_id: config.slack.automation_bot_id.clone(),
        thread_stale_after: config.thread_stale_after(),
        ping_freshness: config.ping_freshness(),
        post_pacing: config.post_pacing(),
        censor_marker: config.moderation.censor_marker.clone(),
    };

    Ok(DialogueRouter::new(deps, settings))
}

fn build_moderation(config: &Config) -> anyhow::Result<ModerationGateway> {
    let moderation = &config.moderation;
    let timeout = Duration::from_secs(moderation.timeout_secs);

    let google_key = moderation
        .google_api_key
        .clone()
        .ok_or_else(|| ConfigError::MissingKey("GOOGLE_LANGUAGE_API_KEY".into()))?;
    let endpoint = moderation
        .content_moderator_endpoint
        .clone()
        .ok_or_else(|| ConfigError::MissingKey("CONTENT_MODERATOR_ENDPOINT".into()))?;
    let key = moderation
        .content_moderator_key
        .clone()
        .ok_or_else(|| ConfigError::MissingKey("CONTENT_MODERATOR_SUBSCRIPTION_KEY".into()))?;

    Ok(ModerationGateway::new(
        Arc::new(GoogleLanguageClassifier::new(google_key, timeout)?),
        Arc::new(AzureContentModerator::new(endpoint, key, timeout)?),
        moderation.allow_list.clone(),
    ))
}
