//! canbridge-api - configuration web server for the CAN to MQTT gateway
//!
//! Serves a single HTML status page. Every GET path is answered with it;
//! `/start`, `/stop` and `/config?...` act on the bridge first.
//!
//! # Usage
//!
//! ```ignore
//! use canbridge_api::{create_router, AppState, ConfigServer};
//!
//! let server = ConfigServer::new(supervisor.clone());
//! let router = create_router(AppState::new(server), Duration::from_secs(30));
//! axum::serve(listener, router).await?;
//! ```

pub mod error;
pub mod query;
pub mod render;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use query::{decode_query_string, percent_decode, QueryParams};
pub use server::{build_delta, ConfigServer};
pub use state::AppState;

use std::time::Duration;

use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::Html;
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the configuration router
///
/// Requests are handled strictly one at a time and bounded by
/// `request_timeout`. A timed out `/config` request still finishes applying
/// its settings in the background.
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .fallback(serve_page)
        // Middleware
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(ConcurrencyLimitLayer::new(1))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn serve_page(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> Result<Html<String>, ApiError> {
    let server = state.server();
    let status = server.handle_request(&method, uri.path(), uri.query()).await;
    let page = server.render_page(&status).await?;
    Ok(Html(page))
}
