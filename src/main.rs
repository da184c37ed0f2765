//! Reunite - case registry and face-matching gateway

use clap::Parser;
use redis::aio::ConnectionManagerConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reunite::{
    auth::JwtValidator,
    cases::CaseService,
    config::Args,
    db::schemas::{CaseDoc, StatsDoc, UserDoc, CASE_COLLECTION, STATS_COLLECTION, USER_COLLECTION},
    db::MongoClient,
    notify::{self, ChannelRegistry, NotificationService, Notifier},
    outbox::Outbox,
    ratelimit::RateLimiter,
    registration::{CaseRegistrar, MongoRegistrationStore, RegistrationStore},
    search::SearchService,
    server::{self, AppState},
    services::{ContentModerator, FaceEmbedder, HttpEmbedder, HttpMediaStore, HttpModerator, MediaStore},
    vector::{HttpVectorIndex, VectorIndex},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("reunite={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Reunite - case registry gateway");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!(
        "Mode: {}",
        if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" }
    );
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Redis: {}", args.redis_url);
    info!("Embedding service: {}", args.embedding_url);
    info!("Moderation service: {}", args.moderation_url);
    info!("Object storage: {}", args.storage_url);
    info!("Vector index: {}", args.vector_url);
    info!("Search cooldown: {}s", args.search_cooldown_secs);
    info!(
        "Rate limit: {} requests / {}s",
        args.rate_limit_max, args.rate_limit_window_secs
    );
    info!("Session cap: {}", args.max_sessions);
    info!("======================================");

    // Connect to MongoDB; the document store is not optional
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            client
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let cases = mongo.collection::<CaseDoc>(CASE_COLLECTION).await?;
    let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let stats = mongo.collection::<StatsDoc>(STATS_COLLECTION).await?;

    // Connect to Redis for the request limiter; the limiter fails open,
    // so a missing cache disables throttling rather than the service
    let limiter = connect_limiter(&args).await;
    if limiter.is_none() {
        warn!("Redis unavailable, request rate limiting disabled");
    }

    // Shared HTTP client for all outbound service calls
    let http = reqwest::Client::builder()
        .timeout(args.request_timeout())
        .build()?;

    let moderator: Arc<dyn ContentModerator> = Arc::new(HttpModerator::new(
        http.clone(),
        args.moderation_url.clone(),
        args.moderation_key.clone(),
    ));
    let embedder: Arc<dyn FaceEmbedder> =
        Arc::new(HttpEmbedder::new(http.clone(), args.embedding_url.clone()));
    let media: Arc<dyn MediaStore> =
        Arc::new(HttpMediaStore::new(http.clone(), args.storage_url.clone()));
    let vectors: Arc<dyn VectorIndex> = Arc::new(HttpVectorIndex::new(
        http,
        args.vector_url.clone(),
        args.vector_api_key.clone(),
    ));

    // Channel registry and fan-out service, constructed once and injected
    let registry = Arc::new(ChannelRegistry::new(args.max_sessions));
    let notifier = Arc::new(NotificationService::new(users.clone(), Arc::clone(&registry)));

    // Side-effect worker
    let outbox = Outbox::start(args.outbox_queue_size);

    let registration_store: Arc<dyn RegistrationStore> = Arc::new(MongoRegistrationStore::new(
        cases.clone(),
        users.clone(),
        stats.clone(),
    ));
    let registrar = Arc::new(CaseRegistrar::new(
        registration_store,
        moderator,
        embedder,
        media,
        Arc::clone(&vectors),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        outbox.clone(),
        args.moderation_max_severity,
    ));

    let case_service = Arc::new(CaseService::new(
        cases.clone(),
        users.clone(),
        stats.clone(),
        Arc::clone(&vectors),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        outbox.clone(),
    ));

    let search = Arc::new(SearchService::new(
        cases.clone(),
        Arc::clone(&vectors),
        args.search_cooldown(),
    ));

    let jwt = JwtValidator::new(&args.jwt_secret());

    let state = Arc::new(AppState {
        args: args.clone(),
        mongo,
        jwt,
        limiter,
        registry,
        notifier,
        registrar,
        case_service,
        search,
        outbox,
        in_flight: AtomicUsize::new(0),
    });

    // Run the server until a shutdown signal arrives
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_state = Arc::clone(&state);
    let mut server_handle =
        tokio::spawn(async move { server::run(server_state, shutdown_rx).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server stopped"),
                Ok(Err(e)) => error!("Server error: {:?}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    // Hard timeout force-exits regardless of what is still in flight
    let force = Duration::from_secs(state.args.shutdown_force_secs);
    tokio::spawn(async move {
        tokio::time::sleep(force).await;
        error!("Forced exit after {}s shutdown timeout", force.as_secs());
        std::process::exit(1);
    });

    // Grace period lets in-flight requests (including saga steps) finish
    let grace = Duration::from_secs(state.args.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, async {
        while state.in_flight.load(Ordering::Relaxed) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .is_ok();

    if !drained {
        warn!("Grace period elapsed with requests still in flight");
    }

    // Deregister every live stream session and clear the channels
    notify::disconnect_all(&state.registry).await;

    info!("Shutdown complete");
    Ok(())
}

/// Build the Redis-backed limiter, or `None` if Redis never answers
async fn connect_limiter(args: &Args) -> Option<RateLimiter> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(500));

    let client = match redis::Client::open(args.redis_url.as_str()) {
        Ok(client) => client,
        Err(e) => {
            warn!("Invalid Redis URL: {}", e);
            return None;
        }
    };

    match client.get_connection_manager_with_config(config).await {
        Ok(conn) => {
            info!("Redis connected successfully");
            Some(RateLimiter::new(
                conn,
                Duration::from_secs(args.rate_limit_window_secs),
                args.rate_limit_max,
            ))
        }
        Err(e) => {
            warn!("Redis connection failed: {}", e);
            None
        }
    }
}
