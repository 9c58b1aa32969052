use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::rest::{agents, health, settings};
use crate::state::AppState;
use crate::ws::subscriber::ws_upgrade;

pub fn build_router(state: AppState) -> Router {
    let vite_port = {
        let config = state.config.read().unwrap_or_else(|e| e.into_inner());
        config.vite_port
    };

    // Localhost is the trust boundary; CORS only needs to admit the dev
    // frontend origins.
    let origins: Vec<HeaderValue> = [
        format!("http://localhost:{vite_port}"),
        format!("http://127.0.0.1:{vite_port}"),
    ]
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/api/health", get(health::health))
        .route(
            "/api/agents",
            get(agents::list).post(agents::create),
        )
        .route(
            "/api/agents/{id}",
            get(agents::get_agent).delete(agents::delete_agent),
        )
        .route("/api/agents/{id}/status", get(agents::status))
        .route("/api/agents/{id}/diff", get(agents::diff))
        .route("/api/agents/{id}/pr", axum::routing::post(agents::create_pr))
        .route("/api/agents/{id}/merge", axum::routing::post(agents::merge))
        .route(
            "/api/settings",
            get(settings::get_settings).put(settings::put_settings),
        )
        .route(
            "/api/terminal-settings",
            get(settings::get_terminal_settings).put(settings::put_terminal_settings),
        )
        .route("/api/recent-repos", get(settings::recent_repos))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<axum::body::Body>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri()
                )
            },
        ))
        .with_state(state)
}
