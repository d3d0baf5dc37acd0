use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use udagram_api::config::FeedServiceConfig;
use udagram_api::feed_service::{FeedService, SqliteFeedRepository};
use udagram_api::propagation::UserUpdatedHandler;
use udagram_api::state::FeedStateInner;
use udagram_api::tokens::JwtKeys;
use udagram_api::user_client::HttpUserDirectory;
use udagram_db::Database;
use udagram_events::{BusConfig, ConsumerConfig, QueueConsumer, SqliteBus};
use udagram_storage::DiskObjectStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "udagram_feed_service=debug,udagram_api=debug,udagram_events=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let config = match FeedServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       UDAGRAM_JWT_SECRET must match the user service's secret.");
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };
    let common = &config.common;

    // Init DB, storage, bus and the user service client
    let db = Arc::new(Database::open(&config.db_path)?);
    let storage = Arc::new(
        DiskObjectStore::new(common.storage_dir.clone(), common.public_object_url.clone()).await?,
    );
    let bus = SqliteBus::open(&common.bus_path, BusConfig::default())?;
    bus.subscribe(&common.user_topic, &config.feed_queue).await?;
    let users = Arc::new(HttpUserDirectory::new(
        &config.user_service_url,
        common.internal_token.clone(),
    )?);

    let feeds = Arc::new(FeedService::new(
        Arc::new(SqliteFeedRepository::new(db)),
        storage,
        users,
        config.feed_bucket.clone(),
    ));

    // Keep author fields on feeds in step with user profiles
    let shutdown = CancellationToken::new();
    let consumer = QueueConsumer::new(
        Arc::new(bus),
        Arc::new(UserUpdatedHandler::new(feeds.clone())),
        ConsumerConfig::new(config.feed_queue.clone()),
    );
    let consumer_shutdown = shutdown.clone();
    let consumer_task = tokio::spawn(async move { consumer.run(consumer_shutdown).await });

    let state = Arc::new(FeedStateInner {
        feeds,
        keys: Arc::new(JwtKeys::new(&common.jwt_secret)),
        storage_dir: common.storage_dir.clone(),
    });

    let app = udagram_api::feed_router(state);

    let addr: SocketAddr = common.bind_addr().parse()?;
    info!("Udagram feed service listening on {}", addr);
    info!(
        "Consuming {} (subscribed to {}), user service at {}",
        config.feed_queue, common.user_topic, config.user_service_url
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop polling; unacknowledged messages are redelivered on restart
    shutdown.cancel();
    if let Err(e) = consumer_task.await {
        warn!("Consumer task ended abnormally: {}", e);
    }
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
                warn!("Failed to install SIGTERM handler: {}", e);
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
