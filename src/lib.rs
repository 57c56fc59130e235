pub mod config;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod rooms;
pub mod signaling;
pub mod state;
pub mod tasks;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use state::AppState;
use websocket::handler;

/// Build the relay router: the login channel at `/` and `/login`, room
/// channels at `/publish/{room_id}` and `/subscribe/{room_id}`. Any other
/// path is accepted as a WebSocket and immediately closed with a reason.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handler::login_handler))
        .route("/login", get(handler::login_handler))
        .route("/publish/:room_id", get(handler::publish_handler))
        .route("/subscribe/:room_id", get(handler::subscribe_handler))
        .fallback(handler::reject_unknown_path)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
