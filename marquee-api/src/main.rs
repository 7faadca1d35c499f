use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marquee_api::{app, AppState};
use marquee_core::{ReservationStore, SystemClock};
use marquee_notify::{
    JobHandler, LoggingSender, NotificationMetrics, NotificationPool, NotificationSender, PngQrRenderer,
    SmtpSender,
};
use marquee_store::app_config::Config;
use marquee_store::DbClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "marquee_api=debug,marquee_booking=debug,marquee_notify=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Marquee API on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let store: Arc<dyn ReservationStore> = Arc::new(db.store());

    let sender: Arc<dyn NotificationSender> = match &config.smtp {
        Some(smtp) => Arc::new(
            SmtpSender::new(
                &smtp.host,
                smtp.port,
                &smtp.from_address,
                smtp.username.clone(),
                smtp.password.clone(),
            )
            .context("Failed to configure SMTP")?,
        ),
        None => {
            tracing::warn!("No [smtp] section configured, notifications will only be logged");
            Arc::new(LoggingSender)
        }
    };

    let metrics = NotificationMetrics::new().context("Failed to register metrics")?;
    let handler = JobHandler::new(
        sender,
        Arc::new(PngQrRenderer::default()),
        metrics.clone(),
        config.notifications.base_url.clone(),
    );
    let pool = NotificationPool::start(
        config.notifications.workers,
        config.notifications.queue_capacity,
        handler,
    );

    let hold_secs = i64::try_from(config.booking.hold_ttl_seconds).context("hold_ttl_seconds out of range")?;
    let hold_ttl = chrono::Duration::try_seconds(hold_secs).context("hold_ttl_seconds out of range")?;

    let state = AppState::new(store, Arc::new(SystemClock), hold_ttl, pool.queue(), metrics);
    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // HTTP is down; let queued ticket mails go out before exit
    pool.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
