use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use message_bus::{IdempotencyStore, Publisher, PublisherConfig, RedisIdempotencyStore};
use onboarding_engine::{
    assignment::AssignmentLock,
    auth::{JwtAuth, TokenVerifier},
    config::Config,
    database::Database,
    handlers,
    idempotency::IdempotentRequests,
    nats::EventPublisher,
    nats_consumer,
    notifications::WebhookWorker,
    profile::ProfileScorer,
    services::OnboardingService,
};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use webhooks::{Dispatcher, HttpTransport};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("onboarding_engine=info,actix_web=info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .json()
        .init();

    info!("Starting Onboarding Engine...");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!("Configuration loaded successfully");

    // Initialize database
    let db = Arc::new(
        Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .context("Failed to connect to database")?,
    );
    if config.database.run_migrations {
        db.migrate().await.context("Failed to run migrations")?;
    }

    info!("Database connected successfully");

    // Initialize Redis
    let redis_client = redis::Client::open(config.redis.url.clone()).context("Failed to create Redis client")?;
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("Failed to connect to Redis")?;
    let store: Arc<dyn IdempotencyStore> = Arc::new(RedisIdempotencyStore::new(redis_conn));

    info!("Redis connected successfully");

    // Initialize NATS
    let nats_client = async_nats::connect(config.nats.url.as_str())
        .await
        .context("Failed to connect to NATS")?;
    let publisher = Publisher::new(
        nats_client.clone(),
        PublisherConfig {
            subject_prefix: config.nats.subject_prefix.clone(),
            ..PublisherConfig::default()
        },
    );
    let events = Arc::new(EventPublisher::new(publisher));

    info!("NATS publisher initialized successfully");

    // Initialize service
    let service = Arc::new(OnboardingService::new(
        db.clone(),
        events,
        IdempotentRequests::new(
            store.clone(),
            config.idempotency.lock_ttl(),
            config.idempotency.processed_ttl(),
        ),
        AssignmentLock::new(
            store.clone(),
            Duration::from_secs(config.assignment.lock_ttl_secs),
        ),
        ProfileScorer::default(),
    ));

    info!("Onboarding service initialized successfully");

    // Background tasks
    let _screening = nats_consumer::start_screening_consumer(
        nats_client,
        &config.nats,
        store,
        service.clone(),
        &config.idempotency,
    );

    if config.webhooks.enabled {
        let transport = HttpTransport::new(Duration::from_secs(config.webhooks.request_timeout_secs))
            .context("Failed to build webhook HTTP client")?;
        let worker = WebhookWorker::new(
            db.clone(),
            Dispatcher::new(Arc::new(transport)),
            config.webhooks.batch_size,
            Duration::from_millis(config.webhooks.poll_interval_ms),
            Duration::from_secs(config.webhooks.lease_secs),
        );
        let _webhooks = worker.spawn();
    } else {
        info!("Webhook delivery worker disabled");
    }

    if config.assignment.auto_assign {
        let _assignment = service
            .clone()
            .spawn_auto_assignment(Duration::from_secs(config.assignment.interval_secs));
    }

    // Start HTTP server
    let server_config = config.server.clone();
    let verifier = TokenVerifier::new(&config.auth);
    let service_data = web::Data::new(service);

    info!(
        "Starting HTTP server on {}:{}",
        server_config.host, server_config.port
    );

    HttpServer::new(move || {
        App::new()
            .app_data(service_data.clone())
            .wrap(JwtAuth::new(verifier.clone()))
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(handlers::configure_routes)
    })
    .workers(server_config.workers)
    .bind((server_config.host, server_config.port))?
    .run()
    .await?;

    Ok(())
}
