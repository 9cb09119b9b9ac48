mod api_doc;
mod auth;
mod cache;
mod config;
mod controller;
mod db;
mod delivery;
mod digest;
mod event;
mod fanout;
mod graph;
mod jobs;
mod notification;
mod preference;
mod routes;
mod schema_ext;
mod store;
mod trending;
mod websocket;

use axum::{routing::get, Router};
use dotenv::dotenv;
use redis::Client;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api_doc::ApiDoc;
use crate::cache::redis::{spawn_relay, RedisCache};
use crate::config::AppConfig;
use crate::delivery::push::PushDispatcher;
use crate::delivery::retry::RetryPolicy;
use crate::delivery::router::{DeliveryRouter, RealtimePublisher};
use crate::delivery::sender::{
    EmailSender, HttpEmailSender, HttpPushSender, LogEmailSender, LogPushSender, PushSender,
};
use crate::delivery::{spawn_delivery_worker, DeliveryQueue};
use crate::digest::aggregator::DigestAggregator;
use crate::event::service::EventService;
use crate::fanout::FanoutEngine;
use crate::graph::{memory::MemoryGraph, postgres::PgSocialGraph, SocialGraph};
use crate::jobs::scheduler::{spawn_scheduler, ScheduleConfig};
use crate::jobs::worker::{spawn_job_worker, JobWorker};
use crate::jobs::JobQueue;
use crate::notification::service::NotificationService;
use crate::preference::service::PreferenceService;
use crate::store::{memory::MemoryStore, postgres::PgNotificationStore, NotificationStore};
use crate::trending::service::TrendingService;
use crate::trending::tracker::TrendingTracker;
use crate::websocket::notifications::SocketState;
use crate::websocket::registry::ConnectionRegistry;

const JOB_QUEUE_SIZE: usize = 64;
const PORT_ATTEMPTS: u16 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let config = AppConfig::from_env();
    if std::env::var("JWT_SECRET").is_err() {
        warn!("JWT_SECRET is not set; every authenticated request will be rejected");
    }

    let (store, graph): (Arc<dyn NotificationStore>, Arc<dyn SocialGraph>) =
        match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
                if !db::check_db_initialized(&pool).await {
                    db::init_db(&pool).await?;
                }
                info!("Using Postgres notification store");
                let store: Arc<dyn NotificationStore> = Arc::new(PgNotificationStore::new(pool.clone()));
                let graph: Arc<dyn SocialGraph> = Arc::new(PgSocialGraph::new(pool));
                (store, graph)
            }
            None => {
                warn!("DATABASE_URL not set, using the in-memory store; nothing survives a restart");
                let store: Arc<dyn NotificationStore> = Arc::new(MemoryStore::new());
                let graph: Arc<dyn SocialGraph> = Arc::new(MemoryGraph::new());
                (store, graph)
            }
        };

    let redis_cache = match &config.redis_url {
        Some(url) => match Client::open(url.clone()) {
            Ok(client) => {
                info!("Initializing Redis with URL: {}", url);
                Some(RedisCache::new(client))
            }
            Err(e) => {
                error!("Failed to connect to Redis: {}", e);
                None
            }
        },
        None => {
            info!("No Redis URL configured, real-time delivery stays on this instance");
            None
        }
    };

    // Real-time: with Redis every instance relays the pub/sub stream into its own sockets.
    let registry = Arc::new(ConnectionRegistry::new());
    let realtime: Arc<dyn RealtimePublisher> = match &redis_cache {
        Some(cache) => {
            let cache = Arc::new(cache.clone());
            spawn_relay(cache.clone(), registry.clone());
            cache
        }
        None => registry.clone(),
    };

    let push_sender: Arc<dyn PushSender> = match &config.push_gateway_url {
        Some(url) => Arc::new(HttpPushSender::new(url.clone())),
        None => Arc::new(LogPushSender),
    };
    let email_sender: Arc<dyn EmailSender> = match &config.email_gateway_url {
        Some(url) => Arc::new(HttpEmailSender::new(url.clone())),
        None => Arc::new(LogEmailSender),
    };

    let notification_service = Arc::new(NotificationService::new(store.clone(), redis_cache.clone()));
    let preference_service = Arc::new(PreferenceService::new(store.clone()));

    let tracker = Arc::new(TrendingTracker::new(config.trending_policy));
    let trending_service = Arc::new(TrendingService::new(tracker, store.clone()));
    if let Err(e) = trending_service.restore().await {
        warn!("Starting with empty trending counters: {}", e);
    }

    // Delivery pipeline
    let push = Arc::new(PushDispatcher::new(
        store.clone(),
        push_sender,
        RetryPolicy::new(config.push_retry.clone()),
    ));
    let router = Arc::new(DeliveryRouter::new(
        store.clone(),
        realtime,
        push,
        config.push_concurrency,
    ));
    let (delivery_queue, delivery_rx) = DeliveryQueue::bounded(config.delivery_queue_size);
    spawn_delivery_worker(router, delivery_rx);

    let fanout = Arc::new(FanoutEngine::new(
        store.clone(),
        graph,
        config.available_channels,
    ));
    let event_service = Arc::new(EventService::new(
        store.clone(),
        fanout,
        trending_service.clone(),
        notification_service.clone(),
        delivery_queue,
    ));

    // Background jobs
    let digest = Arc::new(DigestAggregator::new(
        store.clone(),
        email_sender,
        RetryPolicy::new(config.email_retry.clone()),
    ));
    let (job_queue, job_rx) = JobQueue::bounded(JOB_QUEUE_SIZE);
    spawn_job_worker(
        Arc::new(JobWorker::new(
            digest,
            trending_service.clone(),
            notification_service.clone(),
        )),
        job_rx,
    );
    spawn_scheduler(
        job_queue.clone(),
        ScheduleConfig {
            digest_hour: config.digest_hour,
            trending_sweep_interval: config.trending_sweep_interval,
        },
    );

    let socket_state = Arc::new(SocketState {
        registry,
        notifications: notification_service.clone(),
    });

    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::routes(store))
        .merge(routes::events::routes(event_service))
        .merge(routes::notifications::routes(
            notification_service,
            preference_service,
            socket_state,
        ))
        .merge(routes::trending::routes(trending_service))
        .merge(routes::admin::routes(job_queue))
        .route("/", get(|| async { "Social notification service" }))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let mut port = config.port;
    for attempt in 1..=PORT_ATTEMPTS {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match axum::Server::try_bind(&addr) {
            Ok(server) => {
                info!("Server started at http://localhost:{}", port);
                info!("API documentation: http://localhost:{}/docs", port);
                info!(
                    "WebSocket notifications: ws://localhost:{}/api/notifications/ws?token=<JWT>",
                    port
                );
                return server
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| e.into());
            }
            Err(e) => {
                warn!("Port {} unavailable: {}", port, e);
                if attempt == PORT_ATTEMPTS {
                    break;
                }
                port += 1;
            }
        }
    }

    Err("Failed to bind to any port".into())
}
