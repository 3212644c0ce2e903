//! Notes Backend - multi-user notes service
//! Mission: Authenticated, rate-limited note storage over HTTP

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notes_backend::{
    api::{create_router, AppState},
    auth::{AuthState, JwtHandler, PasswordHasher, UserStore},
    clock::{Clock, SystemClock},
    config::Config,
    middleware::RateLimiters,
    notes::{NoteStore, NotesState},
    storage::Database,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment and logging
    load_env();
    init_tracing();

    let config = Config::parse();
    config.validate().context("Invalid configuration")?;

    info!("🚀 Notes backend starting (v{})", env!("CARGO_PKG_VERSION"));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let db = Database::open(&config.db_path)?;
    let user_store = Arc::new(UserStore::new(db.clone()));
    let note_store = Arc::new(NoteStore::new(db));

    let jwt_handler = Arc::new(JwtHandler::new(
        &config.jwt_secret(),
        config.token_ttl(),
        clock.clone(),
    ));
    info!(
        "🔐 Authentication initialized (token ttl {} min, bcrypt cost {})",
        jwt_handler.token_ttl().num_minutes(),
        config.bcrypt_cost
    );

    let auth_state = AuthState::new(
        user_store.clone(),
        jwt_handler,
        PasswordHasher::new(config.bcrypt_cost),
    );

    let limiters = RateLimiters::new(config.default_policy(), &config.rate_policies()?);
    limiters.spawn_sweeper(
        clock.clone(),
        Duration::from_secs(config.sweep_interval_secs),
    );

    info!(
        "🚦 Rate limiting: {} requests / {}s per client and operation",
        config.rate_limit, config.rate_window_secs
    );

    let app = create_router(AppState {
        auth: auth_state,
        notes: NotesState {
            note_store,
            user_store,
        },
        limiters,
        clock,
    });

    // Start server
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("🎯 API server listening on {}", config.bind);

    // Peer addresses feed the rate limiter's client identity
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

/// Initialize tracing with an env-overridable filter
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notes_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the crate directory when launched from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
