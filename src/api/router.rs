use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::require_auth;
use super::handlers;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    // Public routes — no authentication required
    let public = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::render));

    // Protected API routes — require Bearer token when API_TOKEN is set
    let protected = Router::new()
        // Control
        .route("/api/control/stop", post(handlers::control::stop))
        .route("/api/control/resume", post(handlers::control::resume))
        .route("/api/control/status", get(handlers::control::status))
        // Targets
        .route("/api/targets", get(handlers::targets::list))
        .route("/api/targets/:id/execute", post(handlers::targets::execute))
        // Positions
        .route("/api/positions", get(handlers::positions::list))
        .route("/api/positions/:id/close", post(handlers::positions::close))
        .route(
            "/api/positions/:id/stop-loss",
            put(handlers::positions::update_stop_loss),
        )
        .route(
            "/api/positions/:id/take-profit",
            put(handlers::positions::update_take_profit),
        )
        // Config
        .route(
            "/api/config",
            get(handlers::config::get_config).put(handlers::config::update_config),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    public
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
