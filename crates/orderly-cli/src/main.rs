use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use orderly_core::app::{AppBuilder, LoggingHandler, OrderListener, PREFETCH};
use orderly_core::config::AppConfig;
use orderly_core::http::{AppState, build_router};
use orderly_core::impls::{
    AmqpConnector, CacheLayer, DurableStore, EventPublisher, PostgresConnector, RedisCache,
};
use orderly_core::supervisor::{ConnectionSupervisor, SupervisorError};

#[derive(Parser)]
#[command(name = "orderly")]
#[command(about = "Order record service: Postgres + Redis cache + RabbitMQ events")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service.
    Serve {
        #[arg(long, env = "ORDERLY_BIND_ADDR")]
        bind: Option<SocketAddr>,
    },
    /// Consume lifecycle events from the queue, one at a time.
    Listen,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env().context("failed to load configuration")?;

    // shutdown は watch で配る（接続待ちのキャンセルにも使う）
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            serve(config, shutdown_rx).await
        }
        Command::Listen => listen(config, shutdown_rx).await,
    }
}

async fn serve(config: AppConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let store = DurableStore::new(
        ConnectionSupervisor::new(
            PostgresConnector::new(&config.database_url),
            config.startup_policy(),
        )
        .with_shutdown(shutdown.clone()),
        config.heal_policy(),
    );
    if !started(store.establish().await).context("postgres unavailable")? {
        return Ok(());
    }

    let events = EventPublisher::new(
        ConnectionSupervisor::new(AmqpConnector::new(&config.amqp_url), config.startup_policy())
            .with_shutdown(shutdown.clone()),
        config.heal_policy(),
        config.queue.clone(),
    );
    if !started(events.establish().await).context("rabbitmq unavailable")? {
        return Ok(());
    }

    let redis = RedisCache::open(&config.redis_url).context("invalid redis url")?;

    let coordinator = AppBuilder::new()
        .store(Arc::new(store))
        .cache(Arc::new(CacheLayer::new(Arc::new(redis))))
        .events(Arc::new(events))
        .build()
        .context("failed to wire the service")?;

    let app = build_router(AppState::new(coordinator));
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(bind_addr = %config.bind_addr, queue = %config.queue, "order service started");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
        .context("server error")?;

    Ok(())
}

async fn listen(config: AppConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let supervisor =
        ConnectionSupervisor::new(AmqpConnector::new(&config.amqp_url), config.startup_policy())
            .with_shutdown(shutdown.clone());
    let listener = OrderListener::new(supervisor, config.queue.clone(), Arc::new(LoggingHandler));

    info!(queue = %config.queue, prefetch = PREFETCH, "listener starting");
    listener.run(shutdown).await.context("listener stopped")?;

    let stats = listener.stats();
    info!(
        processed = stats.processed,
        malformed = stats.malformed,
        failed = stats.failed,
        restarts = stats.restarts,
        "listener finished"
    );
    Ok(())
}

/// `Ok(false)` when shutdown arrived before the backend did.
fn started(result: Result<(), SupervisorError>) -> Result<bool, SupervisorError> {
    match result {
        Ok(()) => Ok(true),
        Err(SupervisorError::Cancelled { target }) => {
            info!(backend = %target, "shutdown while waiting for backend");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("orderly_core=info,orderly_cli=info,tower_http=info")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install ctrl+c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
