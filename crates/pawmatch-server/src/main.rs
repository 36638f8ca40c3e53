use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use pawmatch_api::auth::{self, AppState, AppStateInner};
use pawmatch_api::{animals, conversations, messages};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pawmatch=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PAWMATCH_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let admin_jwt_secret =
        std::env::var("PAWMATCH_ADMIN_JWT_SECRET").unwrap_or_else(|_| jwt_secret.clone());
    let db_path = std::env::var("PAWMATCH_DB_PATH").unwrap_or_else(|_| "pawmatch.db".into());
    let host = std::env::var("PAWMATCH_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PAWMATCH_PORT")
        .unwrap_or_else(|_| "3001".into())
        .parse()?;

    // Init database
    let db = pawmatch_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        admin_jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/shelters/login", post(auth::shelter_login))
        .route("/animals/{animal_id}", get(animals::get_animal))
        .with_state(app_state.clone());

    // Identity is resolved per request by the extractor: a verified shelter
    // token, a user bearer token, or an anonymous device key.
    let conversation_routes = Router::new()
        .route("/animals", post(animals::create_animal))
        .route(
            "/conversations",
            post(conversations::start_conversation).get(conversations::list_conversations),
        )
        .route(
            "/conversations/{id}/messages",
            get(messages::get_messages).post(messages::post_message),
        )
        .route("/conversations/{id}", delete(conversations::delete_conversation))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(conversation_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Pawmatch server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
