use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler::{self, AppState};
use crate::ratelimit::{rate_limit_middleware, RouteClass};

/// Build the axum router with all Ember endpoints.
pub fn build_router(state: AppState) -> Router {
    let limits = state.rate_limit.clone();

    let upload = Router::new()
        .route("/upload", post(handler::upload_handler))
        // The vault enforces the size bound on the bytes it actually stores.
        .layer(DefaultBodyLimit::disable())
        .route_layer(middleware::from_fn_with_state(
            (limits.clone(), RouteClass::Upload),
            rate_limit_middleware,
        ));
    let download = Router::new()
        .route("/download/:file_id", get(handler::download_handler))
        .route_layer(middleware::from_fn_with_state(
            (limits.clone(), RouteClass::Download),
            rate_limit_middleware,
        ));
    let pages = Router::new()
        .route("/health", get(handler::health_handler))
        .route("/info", get(handler::info_handler))
        .route_layer(middleware::from_fn_with_state(
            (limits.clone(), RouteClass::Page),
            rate_limit_middleware,
        ));

    upload
        .merge(download)
        .merge(pages)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
