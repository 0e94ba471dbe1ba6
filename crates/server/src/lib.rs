pub mod config;
pub mod connection;
pub mod demo_jobs;
pub mod dispatch;
pub mod pool;
pub mod reporter;
pub mod state;
pub mod ws;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use state::AppState;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize)]
pub struct Stats {
    pub jobs: usize,
    pub clients: usize,
}

async fn stats(State(state): State<AppState>) -> Json<Stats> {
    Json(Stats {
        jobs: state.registry.count(),
        clients: state.clients.current(),
    })
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the daemon on an already bound listener until the server fails.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, app(state)).await
}
