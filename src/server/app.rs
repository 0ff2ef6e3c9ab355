use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::api::api_routes;
use crate::config::ServerConfig;
use crate::websocket::ws_handler;

use super::AppState;

/// Build the HTTP surface: the bridge's upgrade route plus the read-only API.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// upgrade handler records the peer address.
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.server);
    let ws_path = state.settings.server.ws_path.clone();

    tracing::info!(
        ws_path = %ws_path,
        cors_origins = state.settings.server.cors_origins.len(),
        "HTTP routes configured"
    );

    Router::new()
        .route(&ws_path, get(ws_handler))
        .merge(api_routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(cors)
        .with_state(state)
}

/// Only GET is ever served: the upgrade and the API reads
fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers(Any);

    if server.cors_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    layer.allow_origin(AllowOrigin::list(allowed_origins(&server.cors_origins)))
}

fn allowed_origins(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}
