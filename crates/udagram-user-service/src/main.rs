mod cleanup;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use udagram_api::config::UserServiceConfig;
use udagram_api::state::UserStateInner;
use udagram_api::tokens::{JwtKeys, TokenIssuer};
use udagram_db::Database;
use udagram_events::{BusConfig, EventPublisher, SqliteBus};
use udagram_storage::DiskObjectStore;

/// Refresh-token sweep interval (10 minutes).
const SWEEP_INTERVAL_SECS: u64 = 600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "udagram_user_service=debug,udagram_api=debug,udagram_events=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let config = match UserServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       UDAGRAM_JWT_SECRET must match the feed service's secret.");
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };
    let common = &config.common;

    // Init DB, storage and bus
    let db = Arc::new(Database::open(&config.db_path)?);
    let storage = Arc::new(
        DiskObjectStore::new(common.storage_dir.clone(), common.public_object_url.clone()).await?,
    );
    let bus = SqliteBus::open(&common.bus_path, BusConfig::default())?;
    info!("Publishing user events to topic {}", common.user_topic);

    let shutdown = CancellationToken::new();
    tokio::spawn(cleanup::run_sweeper_loop(
        db.clone(),
        SWEEP_INTERVAL_SECS,
        shutdown.clone(),
    ));

    let keys = Arc::new(JwtKeys::new(&common.jwt_secret));
    let state = Arc::new(UserStateInner {
        db,
        tokens: TokenIssuer::new(keys, config.access_ttl_secs, config.refresh_ttl_secs),
        storage,
        avatar_bucket: config.avatar_bucket.clone(),
        storage_dir: common.storage_dir.clone(),
        events: EventPublisher::new(Arc::new(bus), common.user_topic.clone()),
        internal_token: Arc::from(common.internal_token.as_str()),
    });

    let app = udagram_api::user_router(state);

    let addr: SocketAddr = common.bind_addr().parse()?;
    info!("Udagram user service listening on {}", addr);
    info!(
        "Token lifetimes: access {}s, refresh {}s",
        config.access_ttl_secs, config.refresh_ttl_secs
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
