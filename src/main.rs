use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use rusqlite::params;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use kwento::auth;
use kwento::config::{Cli, Config};
use kwento::db;
use kwento::error::AppResult;
use kwento::routes;
use kwento::state::AppState;
use kwento::stories::StoryRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(config.db_path())?;
    db::run_migrations(&pool)?;

    // Build app state
    let state = AppState {
        db: pool.clone(),
        config: config.clone(),
        stories: StoryRepository::sqlite(pool),
    };

    // Build router
    let mut app = Router::new()
        .route("/", get(routes::index))
        .merge(routes::auth::router())
        .merge(routes::stories::router());

    // Test-only seed endpoint: creates a user + session, returns session cookie
    if std::env::var("KWENTO_TEST_SEED").is_ok() {
        app = app.route("/test/seed", get(test_seed));
    }

    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Test-only: seed an admin user + session and return the session cookie.
/// Only mounted when KWENTO_TEST_SEED env var is set.
async fn test_seed(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    let user_id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT OR IGNORE INTO users (id, username, is_admin) VALUES (?1, 'testuser', 1)",
        params![user_id],
    )?;

    // Get the actual user id (may already exist from a previous seed call)
    let uid: String = conn.query_row(
        "SELECT id FROM users WHERE username = 'testuser'",
        [],
        |r| r.get(0),
    )?;
    drop(conn);

    let token = auth::session::create_session(&state.db, &uid, state.config.auth.session_hours)?;

    let cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age=3600",
        state.config.auth.cookie_name, token
    );

    Ok((
        [(header::SET_COOKIE, cookie)],
        format!("{{\"user_id\":\"{}\",\"username\":\"testuser\"}}", uid),
    ))
}
