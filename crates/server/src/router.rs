//! Route table and per-route middleware stacks.

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::middleware;
use crate::state::AppState;

/// Build the HTTP router.
///
/// Layers are listed innermost-first (`.layer` wraps what came before), so
/// each group reads bottom-up to get the outermost-first order documented in
/// the crate docs.
pub fn build_router(state: AppState) -> Router {
    let root = Router::new()
        .route("/", get(handlers::get_all))
        .layer(from_fn_with_state(state.clone(), middleware::gzip_codec));

    let plain = Router::new()
        .route("/value/{kind}/{name}", get(handlers::get_value))
        .route(
            "/update/{kind}/{name}/{value}",
            post(handlers::update_path),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::verify_signature,
        ));

    let json = Router::new()
        .route("/update/", post(handlers::update_json))
        .route("/value/", post(handlers::value_json))
        .layer(from_fn_with_state(state.clone(), middleware::gzip_codec))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::verify_signature,
        ))
        .layer(from_fn(middleware::require_json));

    let batch = Router::new()
        .route("/updates/", post(handlers::update_batch))
        .layer(from_fn_with_state(state.clone(), middleware::decrypt_body))
        .layer(from_fn_with_state(state.clone(), middleware::gzip_codec))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::verify_signature,
        ))
        .layer(from_fn_with_state(state.clone(), middleware::check_subnet))
        .layer(from_fn(middleware::require_json));

    let ping = Router::new().route("/ping", get(handlers::ping));

    Router::new()
        .merge(root)
        .merge(plain)
        .merge(json)
        .merge(batch)
        .merge(ping)
        .layer(from_fn(middleware::log_requests))
        .with_state(state)
}
