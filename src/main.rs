use axum::http::{
    HeaderValue, Method,
    header::{ACCEPT, CONTENT_TYPE},
};
use pollsync::config::Config;
use pollsync::db::{MemoryPollStore, PgPollStore, PollStore, init_db};
use pollsync::startup::{AppState, spawn_db_health_check};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{
    Expiry, MemoryStore, SessionManagerLayer, SessionStore,
    cookie::{SameSite, time::Duration as CookieDuration},
};
use tower_sessions_sqlx_store::PostgresStore;

#[macro_use]
extern crate tracing;

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "INFO");
        }
    }
    // initialize tracing
    tracing_subscriber::fmt::init();

    let config = Config::load();

    match config.database_url.clone() {
        Some(url) => {
            let pool = init_db(&url).await.expect("Unable to connect to database");
            spawn_db_health_check(pool.clone());

            let session_store = PostgresStore::new(pool.clone());
            session_store
                .migrate()
                .await
                .expect("Unable to migrate session store");

            info!("using postgres poll store");
            serve(PgPollStore::new(pool), session_store, &config).await;
        }
        None => {
            warn!("DATABASE_URL not set, polls are kept in memory only");
            serve(MemoryPollStore::new(), MemoryStore::default(), &config).await;
        }
    }
}

async fn serve<S, Store>(store: S, session_store: Store, config: &Config)
where
    S: PollStore,
    Store: SessionStore + Clone,
{
    let app_state = AppState::new(store, config);
    app_state.spawn_ledger_purge(Duration::from_secs(60));

    let allow_origin = match config
        .allowed_origin
        .as_deref()
        .map(HeaderValue::from_str)
    {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(e)) => {
            warn!("Invalid ALLOWED_ORIGIN: {e}, mirroring request origin");
            AllowOrigin::mirror_request()
        }
        None => AllowOrigin::mirror_request(),
    };

    let session_expiry = i64::try_from(config.session_expiry.as_secs()).unwrap_or(i64::MAX);

    let app = pollsync::router(app_state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(allow_origin)
                .allow_credentials(true)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([CONTENT_TYPE, ACCEPT]),
        )
        .layer(
            SessionManagerLayer::new(session_store)
                .with_name("pollsync")
                .with_same_site(SameSite::Lax)
                .with_secure(false) // TODO: set to true once the service only runs behind HTTPS
                .with_expiry(Expiry::OnInactivity(CookieDuration::seconds(session_expiry))),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Unable to spawn tcp listener");

    // live feeds never finish on their own, so the hub is torn down first
    let hub = app_state.clone();
    let shutdown = async move {
        shutdown_signal().await;
        hub.shutdown();
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("server error: {e}");
    }

    info!("server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = ?e, "failed to install ctrl-c handler");
    }
    info!("shutdown signal received");
}
