use crate::web::{handlers, AppState};
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub async fn start_web_server(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Repair monitoring running on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // === SCHEDULED REPAIRS ===
        .route(
            "/repair-management/v2/schedules",
            get(handlers::get_schedules),
        )
        .route(
            "/repair-management/v2/schedules/{id}",
            get(handlers::get_schedule),
        )
        .route(
            "/repair-management/v2/schedules/{id}/metrics",
            get(handlers::get_schedule_metrics),
        )
        // === ON-DEMAND REPAIRS ===
        .route(
            "/repair-management/v2/repairs",
            get(handlers::get_repairs),
        )
        .route(
            "/repair-management/v2/repairs",
            post(handlers::trigger_repair),
        )
        // === REPLICA LOCKS ===
        .route(
            "/repair-management/v2/locks",
            get(handlers::get_active_locks),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
