// AuthCore API Server
// Entry point: configuration, storage, cache and the HTTP listener

use anyhow::Context;
use authcore_api::config::StorageBackend;
use authcore_api::{create_router, AppState, Backends, Config};
use authcore_auth::{HttpOAuthExchange, RejectingVerifier};
use authcore_cache::Cache;
use authcore_database::{Database, MemoryStore, PgStore, Store};
use authcore_tenant::{NotificationDispatcher, WebhookNotifier};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting AuthCore API server");

    let config = Config::load().context("invalid configuration")?;

    let (store, database): (Arc<dyn Store>, Option<Database>) = match config.storage.backend {
        StorageBackend::Postgres => {
            tracing::info!("Connecting to database");
            let database = Database::new(config.storage.database())
                .await
                .context("failed to connect to database")?;
            database.migrate().await.context("failed to apply schema")?;
            tracing::info!("Database connected");
            (Arc::new(PgStore::from_database(&database)), Some(database))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store; state is lost on restart");
            (Arc::new(MemoryStore::new()), None)
        }
    };

    let cache = Cache::new(config.cache.cache())
        .await
        .context("failed to initialize cache")?;
    cache.ping().await.context("cache ping failed")?;
    tracing::info!(backend = cache.backend_name(), "Cache ready");

    let notifier = match &config.webhook {
        Some(webhook) => NotificationDispatcher::new(Arc::new(
            WebhookNotifier::new(&webhook.url, &webhook.secret).context("invalid webhook configuration")?,
        )),
        None => NotificationDispatcher::logging(),
    };

    let backends = Backends {
        store,
        cache,
        database,
        notifier,
        oauth: Arc::new(HttpOAuthExchange::new().context("failed to build HTTP client")?),
        // SAML assertions are rejected until a signature verifier is configured.
        assertions: Arc::new(RejectingVerifier),
    };
    let state = Arc::new(AppState::new(&config, backends).context("failed to build services")?);

    let app = create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// `RUST_LOG` filters; `LOG_FORMAT=json` switches to structured output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,authcore_api=debug,tower_http=debug"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
