use anyhow::Context;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;
use wanderease::{AppState, db, messages, realtime, rooms};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wanderease=debug,info")),
        )
        .init();

    let database_url = dotenv::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db_pool = db::connect(&database_url)
        .await
        .context("connecting to database")?;
    db::init_schema(&db_pool)
        .await
        .context("initializing schema")?;

    let app_state = AppState::new(db_pool);

    let app = Router::new()
        .route("/", get(health))
        .nest("/api/rooms", rooms::router())
        .nest("/api/messages", messages::router())
        .merge(realtime::router())
        .with_state(app_state)
        .layer(CorsLayer::permissive());

    let addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "wanderease backend listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "success": true, "message": "WanderEase backend running" }))
}
