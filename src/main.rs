use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod auth;
mod challenge;
mod config;
mod db;
mod error;
mod handlers;
mod models;

use auth::rate_limit::RateLimitState;
use challenge::ChallengeEngine;
use config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub engine: Arc<ChallengeEngine>,
    pub ws_tx: Option<broadcast::Sender<String>>,
    pub rate_limiter: RateLimitState,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hundredfold_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env());

    // Database
    let db = db::create_pool(&config.database_url).await;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations applied");

    // Broadcast channel feeding the live activity stream
    let (ws_tx, _) = broadcast::channel::<String>(256);

    let engine = Arc::new(ChallengeEngine::new(
        Arc::new(db::PgUserStore::new(db.clone())),
        Arc::new(db::PgActivitySink::new(db.clone())),
        Arc::new(challenge::cache::MemoryCache::new()),
        Some(ws_tx.clone()),
        Duration::from_secs(config.counter_grace_secs),
    ));

    let rate_limiter = RateLimitState::new();

    let state = AppState {
        db,
        config: config.clone(),
        engine,
        ws_tx: Some(ws_tx),
        rate_limiter,
    };

    // Credential endpoints sit behind the per-IP rate limiter.
    let auth_routes = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/refresh", post(handlers::auth::refresh))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::rate_limit::rate_limit_auth,
        ));

    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz))
        .route("/ws", get(handlers::ws::ws_handler))
        .merge(auth_routes);

    let protected_routes = Router::new()
        .route("/api/me", get(handlers::profile::me))
        .route("/api/me", put(handlers::profile::update_me))
        // Challenge
        .route("/api/challenge", get(handlers::challenge::get_state))
        .route(
            "/api/challenge/repetitions",
            post(handlers::challenge::add_repetitions),
        )
        .route(
            "/api/challenge/start",
            post(handlers::challenge::start_challenge),
        )
        .route(
            "/api/challenge/reset",
            post(handlers::challenge::reset_challenge),
        )
        .route(
            "/api/challenge/congratulations-seen",
            post(handlers::challenge::congratulations_seen),
        )
        // Community
        .route("/api/groups", get(handlers::groups::list_groups))
        .route("/api/groups", post(handlers::groups::create_group))
        .route("/api/groups/:id/join", post(handlers::groups::join_group))
        .route("/api/groups/:id/leave", post(handlers::groups::leave_group))
        .route("/api/groups/:id/members", get(handlers::groups::list_members))
        .route(
            "/api/groups/:id/messages",
            get(handlers::groups::list_messages),
        )
        .route(
            "/api/groups/:id/messages",
            post(handlers::groups::post_message),
        )
        .route(
            "/api/leaderboard",
            get(handlers::leaderboard::get_leaderboard),
        )
        .route(
            "/api/activities",
            get(handlers::activities::list_activities),
        )
        .route("/api/auth/logout", post(handlers::auth::logout))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    let allowed_origins: Vec<axum::http::HeaderValue> = {
        let mut origins = vec![config
            .frontend_url
            .parse::<axum::http::HeaderValue>()
            .expect("FRONTEND_URL must be a valid origin")];
        // In dev, also allow LAN access (e.g. testing from another device)
        if let Ok(extra) = std::env::var("CORS_EXTRA_ORIGINS") {
            for o in extra.split(',') {
                if let Ok(hv) = o.trim().parse::<axum::http::HeaderValue>() {
                    origins.push(hv);
                }
            }
        }
        origins
    };
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ])
        .allow_credentials(true);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listen address");
    // Client IPs feed the auth rate limiter.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .expect("Server error");
}
